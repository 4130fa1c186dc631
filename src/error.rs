//! Error taxonomy for the flow runtime
//!
//! One `thiserror` enum covers every failure surface named in the spec; a
//! unit-only `ErrorKind` projection lets retry policies and the auth policy
//! match on error class without caring about the message payload.

use thiserror::Error;

use crate::utils::redact_secrets;

/// Result alias used throughout the runtime.
pub type Result<T> = std::result::Result<T, ShowRunError>;

/// The full error taxonomy produced by pack loading, validation and execution.
#[derive(Debug, Error)]
pub enum ShowRunError {
    #[error("pack file missing: {0}")]
    MissingFile(String),

    #[error("manifest schema error: {0}")]
    SchemaError(String),

    #[error("flow validation failed:\n{0}")]
    FlowValidationError(String),

    #[error("missing required secret: {0}")]
    MissingRequiredSecret(String),

    #[error("template error: {0}")]
    TemplateError(String),

    #[error("target not found: {0}")]
    TargetNotFound(String),

    #[error("ambiguous target: {0} matches {1} elements")]
    AmbiguousTarget(String, usize),

    #[error("element not interactable: {0}")]
    ElementNotInteractable(String),

    #[error("navigation timed out after {0}ms")]
    NavigationTimeout(u64),

    #[error("wait timed out after {0}ms")]
    WaitTimeout(u64),

    #[error("no matching network request found within {0}ms")]
    NetworkRequestNotFound(u64),

    #[error("replay failed: {0}")]
    ReplayError(String),

    #[error("response validation failed: {0}")]
    ResponseValidationError(String),

    #[error("authentication failure detected")]
    AuthFailure,

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    InternalError(String),
}

impl ShowRunError {
    /// Classify this error for `retry.onlyOn` filtering and auth-policy matching.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingFile(_) => ErrorKind::Validation,
            Self::SchemaError(_) => ErrorKind::Validation,
            Self::FlowValidationError(_) => ErrorKind::Validation,
            Self::MissingRequiredSecret(_) => ErrorKind::Validation,
            Self::TemplateError(_) => ErrorKind::TemplateError,
            Self::TargetNotFound(_) => ErrorKind::TargetNotFound,
            Self::AmbiguousTarget(_, _) => ErrorKind::AmbiguousTarget,
            Self::ElementNotInteractable(_) => ErrorKind::ElementNotInteractable,
            Self::NavigationTimeout(_) => ErrorKind::NavigationTimeout,
            Self::WaitTimeout(_) => ErrorKind::WaitTimeout,
            Self::NetworkRequestNotFound(_) => ErrorKind::NetworkRequestNotFound,
            Self::ReplayError(_) => ErrorKind::ReplayError,
            Self::ResponseValidationError(_) => ErrorKind::ResponseValidationError,
            Self::AuthFailure => ErrorKind::AuthFailure,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InternalError(_) => ErrorKind::InternalError,
        }
    }

    /// Wrap an opaque error, redacting any known secret values from its message.
    #[must_use]
    pub fn internal(msg: impl Into<String>, secrets: &[&str]) -> Self {
        Self::InternalError(redact_secrets(&msg.into(), secrets))
    }

    /// Render the one-line, user-visible `"Error: ..."` message used in `meta.notes`.
    #[must_use]
    pub fn notes_line(&self, secrets: &[&str]) -> String {
        redact_secrets(&format!("Error: {self}"), secrets)
    }
}

impl From<anyhow::Error> for ShowRunError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(err.to_string())
    }
}

/// Unit-only classification of [`ShowRunError`], used by retry/auth matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    TemplateError,
    TargetNotFound,
    AmbiguousTarget,
    ElementNotInteractable,
    NavigationTimeout,
    WaitTimeout,
    NetworkRequestNotFound,
    ReplayError,
    ResponseValidationError,
    AuthFailure,
    Cancelled,
    InternalError,
}

impl std::str::FromStr for ErrorKind {
    type Err = ShowRunError;

    /// Parses the `retry.onlyOn` / manifest-facing names (`PascalCase`) into
    /// an [`ErrorKind`].
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "ValidationError" => Self::Validation,
            "TemplateError" => Self::TemplateError,
            "TargetNotFound" => Self::TargetNotFound,
            "AmbiguousTarget" => Self::AmbiguousTarget,
            "ElementNotInteractable" => Self::ElementNotInteractable,
            "NavigationTimeout" => Self::NavigationTimeout,
            "WaitTimeout" => Self::WaitTimeout,
            "NetworkRequestNotFound" => Self::NetworkRequestNotFound,
            "ReplayError" => Self::ReplayError,
            "ResponseValidationError" => Self::ResponseValidationError,
            "AuthFailure" => Self::AuthFailure,
            "Cancelled" => Self::Cancelled,
            "InternalError" => Self::InternalError,
            other => {
                return Err(ShowRunError::SchemaError(format!(
                    "unknown error kind in retry.onlyOn: {other}"
                )));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notes_line_begins_with_error_prefix() {
        let err = ShowRunError::TargetNotFound("button".into());
        assert!(err.notes_line(&[]).starts_with("Error: "));
    }

    #[test]
    fn notes_line_redacts_secret_values() {
        let err = ShowRunError::InternalError("token sk-super-secret rejected".into());
        let line = err.notes_line(&["sk-super-secret"]);
        assert!(!line.contains("sk-super-secret"));
        assert!(line.contains("[REDACTED]"));
    }

    #[test]
    fn kind_roundtrips_from_str_for_taxonomy_names() {
        assert_eq!(
            "NavigationTimeout".parse::<ErrorKind>().unwrap(),
            ErrorKind::NavigationTimeout
        );
        assert!("NotARealKind".parse::<ErrorKind>().is_err());
    }
}
