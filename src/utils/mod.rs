pub mod constants;
pub mod redaction;
pub mod string_utils;

pub use constants::*;
pub use redaction::redact_secrets;
pub use string_utils::{safe_truncate_boundary, safe_truncate_chars};
