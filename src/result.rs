//! The value `runtime::run` always returns, even on failure — it never throws.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata describing how a run went, independent of whether it succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub url: String,
    pub duration_ms: u64,
    pub notes: Vec<String>,
}

/// The single value `run()` returns, success or failure. A failed run still
/// carries whatever collectibles were written before the failing step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    pub collectibles: Map<String, Value>,
    pub meta: RunMeta,
    pub failed_step_id: Option<String>,
}

impl RunResult {
    #[must_use]
    pub fn success(collectibles: Map<String, Value>, url: String, duration_ms: u64, hints: Vec<String>) -> Self {
        Self { success: true, collectibles, meta: RunMeta { url, duration_ms, notes: hints }, failed_step_id: None }
    }

    #[must_use]
    pub fn failure(
        collectibles: Map<String, Value>,
        url: String,
        duration_ms: u64,
        mut hints: Vec<String>,
        failed_step_id: Option<String>,
        error_line: String,
    ) -> Self {
        hints.push(error_line);
        Self { success: false, collectibles, meta: RunMeta { url, duration_ms, notes: hints }, failed_step_id }
    }
}
