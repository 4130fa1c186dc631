//! The template engine's fixed filter set
//!
//! Filters are a closed, non-Turing-complete set, so there is no sandboxing
//! concern here.

use crate::error::{Result, ShowRunError};

/// A parsed filter invocation, e.g. `upper` or `default:"none"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Urlencode,
    Trim,
    Upper,
    Lower,
    Default(String),
}

impl Filter {
    /// Parse a single `name` or `name:"arg"` filter segment.
    pub fn parse(segment: &str) -> Result<Self> {
        let segment = segment.trim();
        if let Some((name, arg)) = segment.split_once(':') {
            match name.trim() {
                "default" => Ok(Self::Default(parse_quoted_arg(arg.trim())?)),
                other => Err(ShowRunError::TemplateError(format!(
                    "unknown filter '{other}' (filters taking arguments: default)"
                ))),
            }
        } else {
            match segment {
                "urlencode" => Ok(Self::Urlencode),
                "trim" => Ok(Self::Trim),
                "upper" => Ok(Self::Upper),
                "lower" => Ok(Self::Lower),
                other => Err(ShowRunError::TemplateError(format!("unknown filter '{other}'"))),
            }
        }
    }

    /// Apply this filter to the current resolved value.
    ///
    /// `value` is `None` when the path it came from was undefined; only
    /// [`Filter::Default`] can turn that into `Some`. Every other filter is a
    /// no-op on `None` so that a later `default` in the chain still fires.
    #[must_use]
    pub fn apply(&self, value: Option<String>) -> Option<String> {
        match self {
            Self::Default(fallback) => value.or_else(|| Some(fallback.clone())),
            Self::Urlencode => value.map(|v| urlencoding::encode(&v).into_owned()),
            Self::Trim => value.map(|v| v.trim().to_string()),
            Self::Upper => value.map(|v| v.to_uppercase()),
            Self::Lower => value.map(|v| v.to_lowercase()),
        }
    }
}

/// Parse a quoted string argument (`"literal"`), the only literal form the
/// spec's filter syntax defines.
fn parse_quoted_arg(arg: &str) -> Result<String> {
    if arg.len() >= 2 && arg.starts_with('"') && arg.ends_with('"') {
        Ok(arg[1..arg.len() - 1].to_string())
    } else {
        Err(ShowRunError::TemplateError(format!(
            "filter argument must be a quoted string, got: {arg}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_replaces_none_only() {
        let f = Filter::Default("fallback".into());
        assert_eq!(f.apply(None), Some("fallback".into()));
        assert_eq!(f.apply(Some("value".into())), Some("value".into()));
    }

    #[test]
    fn urlencode_escapes_reserved_characters() {
        let f = Filter::Urlencode;
        assert_eq!(f.apply(Some("a b/c".into())), Some("a%20b%2Fc".into()));
    }

    #[test]
    fn non_default_filters_pass_through_none() {
        assert_eq!(Filter::Upper.apply(None), None);
        assert_eq!(Filter::Trim.apply(None), None);
    }

    #[test]
    fn parse_rejects_unknown_filter() {
        assert!(Filter::parse("reverse").is_err());
    }

    #[test]
    fn parse_rejects_unquoted_default_argument() {
        assert!(Filter::parse("default:none").is_err());
    }
}
