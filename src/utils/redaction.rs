//! Secret redaction helpers
//!
//! Anything that might reach a log line, an event, or an error message passes
//! through here first. The sensitive-header set lives in [`super::constants`];
//! this module handles redacting literal secret *values* wherever they appear.

const REDACTED_PLACEHOLDER: &str = "[REDACTED]";

/// Replace every occurrence of any `secrets` value in `text` with a placeholder.
///
/// Empty secret values are skipped (an empty needle would match everywhere).
#[must_use]
pub fn redact_secrets(text: &str, secrets: &[&str]) -> String {
    let mut out = text.to_string();
    for secret in secrets {
        if secret.is_empty() {
            continue;
        }
        out = out.replace(secret, REDACTED_PLACEHOLDER);
    }
    out
}
