//! Header redaction shared by capture summaries and snapshot writes.

use std::collections::HashMap;

use crate::utils::constants::is_sensitive_header;

const REDACTED_VALUE: &str = "[REDACTED]";

/// Replace sensitive header values with a placeholder, keeping the header
/// names: names are recorded for diagnostics, values never are.
#[must_use]
pub fn redact_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| {
            if is_sensitive_header(k) {
                (k.clone(), REDACTED_VALUE.to_string())
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}
