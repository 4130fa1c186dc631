//! Shared defaults for the flow runtime
//!
//! Default values and caps used throughout the interpreter, capture buffer and
//! replay paths to keep magic numbers in one place.

/// Default timeout for an interactive DOM step (click/fill/select/...).
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 30_000;

/// Default timeout for `network_replay` HTTP-only and browser-context requests.
pub const DEFAULT_REPLAY_TIMEOUT_MS: u64 = 30_000;

/// Maximum number of entries retained in the rolling network capture buffer.
pub const CAPTURE_MAX_ENTRIES: usize = 300;

/// Aggregate estimated byte size cap for the rolling network capture buffer.
pub const CAPTURE_MAX_BYTES: usize = 50 * 1024 * 1024;

/// Maximum stored response body size; larger bodies are discarded (metadata kept).
pub const CAPTURE_MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Request headers/post data are truncated beyond this many bytes.
pub const CAPTURE_HEADER_TRUNCATE_BYTES: usize = 64 * 1024;

/// Maximum bytes of a response body exposed as `snippet` in summaries.
pub const CAPTURE_SNIPPET_BYTES: usize = 2 * 1024;

/// Inactivity TTL for `session` persistence mode's temp profile directory.
pub const SESSION_PROFILE_TTL_SECS: u64 = 30 * 60;

/// Default `maxRecoveriesPerRun` for the auth resilience controller.
pub const DEFAULT_MAX_RECOVERIES_PER_RUN: u32 = 1;

/// Default `maxStepRetryAfterRecovery` for the auth resilience controller.
pub const DEFAULT_MAX_STEP_RETRY_AFTER_RECOVERY: u32 = 1;

/// Default auth policy status codes treated as an authentication failure.
pub const DEFAULT_AUTH_FAILURE_STATUS_CODES: &[u16] = &[401, 403];

/// Header names that must never be logged, listed, overridden, or exported by value.
///
/// This is the single source of truth for sensitive-header redaction; every
/// subsystem that touches headers (capture, snapshot, replay, events) imports
/// this set instead of re-deriving it.
pub const SENSITIVE_HEADER_NAMES: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "proxy-authorization",
];

/// Returns true if `name` (case-insensitive) is a sensitive header.
#[must_use]
pub fn is_sensitive_header(name: &str) -> bool {
    SENSITIVE_HEADER_NAMES
        .iter()
        .any(|sensitive| sensitive.eq_ignore_ascii_case(name))
}

/// Chrome user agent used when `stealth` mode masks the automation banner.
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";
