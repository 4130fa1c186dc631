//! Template engine: `{{ <path> [| <filter>]* }}` resolution
//!
//! Intentionally non-Turing-complete: path lookups plus a fixed filter set,
//! no general expression evaluation. The placeholder regex is compiled once
//! into a `once_cell::sync::Lazy<Regex>` rather than on every call, the same
//! pattern used elsewhere in this crate's dependency graph for other
//! hot-path regexes.

pub mod filters;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::ops::Range;

use crate::error::{Result, ShowRunError};
use crate::utils::redact_secrets;
use filters::Filter;

static TEMPLATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*(?P<expr>[^}]+?)\s*\}\}").expect("valid template regex"));

/// Read-only view over the state a template expression can reference.
pub struct TemplateContext<'a> {
    pub inputs: &'a serde_json::Map<String, Value>,
    pub vars: &'a serde_json::Map<String, Value>,
    pub secrets: &'a HashMap<String, String>,
}

impl<'a> TemplateContext<'a> {
    #[must_use]
    pub fn new(
        inputs: &'a serde_json::Map<String, Value>,
        vars: &'a serde_json::Map<String, Value>,
        secrets: &'a HashMap<String, String>,
    ) -> Self {
        Self { inputs, vars, secrets }
    }

    fn lookup(&self, path: &str) -> Result<Option<String>> {
        let (namespace, key) = path
            .split_once('.')
            .ok_or_else(|| ShowRunError::TemplateError(format!("malformed path '{path}', expected '<namespace>.<key>'")))?;

        match namespace {
            "inputs" => Ok(self.inputs.get(key).and_then(canonical_text)),
            "vars" => Ok(self.vars.get(key).and_then(canonical_text)),
            "secret" => Ok(self.secrets.get(key).cloned()),
            other => Err(ShowRunError::TemplateError(format!(
                "unknown template namespace '{other}', expected one of inputs, vars, secret"
            ))),
        }
    }

    fn secret_values(&self) -> Vec<&str> {
        self.secrets.values().map(String::as_str).collect()
    }

    fn redact(&self, message: String) -> String {
        redact_secrets(&message, &self.secret_values())
    }
}

/// Render a value to its canonical template text, or `None` if it has no
/// scalar representation (missing / `null`).
fn canonical_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Resolve every `{{ ... }}` expression in `template`. Undefined paths render
/// as the empty string.
pub fn resolve(template: &str, ctx: &TemplateContext<'_>) -> Result<String> {
    resolve_inner(template, ctx, None)
}

/// Resolve a template used as (or interpolated into) a URL. An undefined path
/// whose expression falls within the URL's host component fails fast with
/// [`ShowRunError::TemplateError`] instead of silently rendering an empty
/// string, which would otherwise produce a request to an unintended host.
pub fn resolve_url(template: &str, ctx: &TemplateContext<'_>) -> Result<String> {
    resolve_inner(template, ctx, host_span(template))
}

/// Approximate span of the URL's authority component: the text between
/// `://` and the next `/`, `?`, or `#` (or end of string).
fn host_span(template: &str) -> Option<Range<usize>> {
    let scheme_end = template.find("://")? + 3;
    let rest = &template[scheme_end..];
    let host_end = rest
        .find(['/', '?', '#'])
        .map_or(template.len(), |i| scheme_end + i);
    Some(scheme_end..host_end)
}

fn spans_overlap(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

fn resolve_inner(template: &str, ctx: &TemplateContext<'_>, strict_span: Option<Range<usize>>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut last_end = 0;

    for caps in TEMPLATE_RE.captures_iter(template) {
        let whole = caps.get(0).expect("group 0 always present");
        let expr = caps.name("expr").expect("expr group present").as_str();

        out.push_str(&template[last_end..whole.start()]);

        let (path, filter_exprs) = split_pipeline(expr);
        let raw = ctx
            .lookup(path.trim())
            .map_err(|e| ShowRunError::TemplateError(ctx.redact(e.to_string())))?;

        let mut value = raw;
        for filter_expr in filter_exprs {
            let filter = Filter::parse(filter_expr)
                .map_err(|e| ShowRunError::TemplateError(ctx.redact(e.to_string())))?;
            value = filter.apply(value);
        }

        match value {
            Some(text) => out.push_str(&text),
            None => {
                let undefined_here = strict_span
                    .as_ref()
                    .is_some_and(|span| spans_overlap(span, &(whole.start()..whole.end())));
                if undefined_here {
                    return Err(ShowRunError::TemplateError(ctx.redact(format!(
                        "undefined reference '{}' used in URL host",
                        path.trim()
                    ))));
                }
            }
        }

        last_end = whole.end();
    }
    out.push_str(&template[last_end..]);
    Ok(out)
}

fn split_pipeline(expr: &str) -> (&str, Vec<&str>) {
    let mut parts = expr.split('|');
    let path = parts.next().unwrap_or_default();
    (path, parts.collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx<'a>(
        inputs: &'a serde_json::Map<String, Value>,
        vars: &'a serde_json::Map<String, Value>,
        secrets: &'a HashMap<String, String>,
    ) -> TemplateContext<'a> {
        TemplateContext::new(inputs, vars, secrets)
    }

    #[test]
    fn resolves_inputs_and_vars() {
        let inputs = json!({"batch": "S25"}).as_object().unwrap().clone();
        let vars = json!({"count": 3, "active": true}).as_object().unwrap().clone();
        let secrets = HashMap::new();
        let c = ctx(&inputs, &vars, &secrets);

        assert_eq!(resolve("batch={{inputs.batch}}", &c).unwrap(), "batch=S25");
        assert_eq!(resolve("n={{vars.count}} a={{vars.active}}", &c).unwrap(), "n=3 a=true");
    }

    #[test]
    fn undefined_path_renders_empty_outside_url_host() {
        let inputs = serde_json::Map::new();
        let vars = serde_json::Map::new();
        let secrets = HashMap::new();
        let c = ctx(&inputs, &vars, &secrets);
        assert_eq!(resolve("x=[{{vars.missing}}]", &c).unwrap(), "x=[]");
    }

    #[test]
    fn undefined_path_in_url_host_fails_fast() {
        let inputs = serde_json::Map::new();
        let vars = serde_json::Map::new();
        let secrets = HashMap::new();
        let c = ctx(&inputs, &vars, &secrets);
        let err = resolve_url("https://{{vars.missing}}.example.com/path", &c);
        assert!(matches!(err, Err(ShowRunError::TemplateError(_))));
    }

    #[test]
    fn undefined_path_outside_host_in_url_is_fine() {
        let inputs = serde_json::Map::new();
        let vars = serde_json::Map::new();
        let secrets = HashMap::new();
        let c = ctx(&inputs, &vars, &secrets);
        let resolved = resolve_url("https://example.com/{{vars.missing}}", &c).unwrap();
        assert_eq!(resolved, "https://example.com/");
    }

    #[test]
    fn filters_chain_left_to_right() {
        let inputs = json!({"name": "  Acme Co  "}).as_object().unwrap().clone();
        let vars = serde_json::Map::new();
        let secrets = HashMap::new();
        let c = ctx(&inputs, &vars, &secrets);
        assert_eq!(resolve("{{inputs.name | trim | upper}}", &c).unwrap(), "ACME CO");
    }

    #[test]
    fn default_filter_applies_only_when_undefined() {
        let inputs = serde_json::Map::new();
        let vars = serde_json::Map::new();
        let secrets = HashMap::new();
        let c = ctx(&inputs, &vars, &secrets);
        assert_eq!(resolve(r#"{{vars.missing | default:"none"}}"#, &c).unwrap(), "none");
    }

    #[test]
    fn secret_values_never_appear_in_errors() {
        let inputs = serde_json::Map::new();
        let vars = serde_json::Map::new();
        let mut secrets = HashMap::new();
        secrets.insert("API_KEY".to_string(), "sk-super-secret".to_string());
        let c = ctx(&inputs, &vars, &secrets);
        let err = resolve("{{bogus.API_KEY}}", &c).unwrap_err();
        assert!(!err.to_string().contains("sk-super-secret"));
    }

    #[test]
    fn applying_template_twice_is_idempotent() {
        let inputs = json!({"batch": "S25"}).as_object().unwrap().clone();
        let vars = serde_json::Map::new();
        let secrets = HashMap::new();
        let c = ctx(&inputs, &vars, &secrets);
        let once = resolve("{{inputs.batch}}", &c).unwrap();
        let twice = resolve("{{inputs.batch}}", &c).unwrap();
        assert_eq!(once, twice);
    }
}
