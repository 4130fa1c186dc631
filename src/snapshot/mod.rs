//! Request snapshots and the HTTP-only pre-flight check
//!
//! `snapshots.json` holds, per `network_replay` step id, the *templated*
//! request the step would issue plus validation metadata observed from the
//! live response. Storing the pre-resolution template (rather than the
//! resolved request) is what lets the same snapshot serve both a future live
//! run (different inputs) and HTTP-only replay.

pub mod http_replay;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShowRunError};
use crate::pack::flow::{FlowDocument, ResponseAs, StepParams};

const SNAPSHOT_FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub method: String,
    pub url_template: String,
    #[serde(default)]
    pub headers_template: HashMap<String, String>,
    pub body_template: Option<String>,
    pub captured_at: i64,
    pub ttl_secs: Option<u64>,
    pub expected_status: Option<u16>,
    pub expected_content_type: Option<String>,
    pub expected_keys: Option<Vec<String>>,
    pub response_as: ResponseAs,
    pub response_path: Option<String>,
}

impl RequestSnapshot {
    #[must_use]
    pub fn is_stale(&self, now: i64) -> bool {
        match self.ttl_secs {
            None => false,
            Some(ttl) => now.saturating_sub(self.captured_at) >= ttl as i64,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    #[serde(default)]
    snapshots: HashMap<String, RequestSnapshot>,
}

/// The pack's `snapshots.json`, loaded once per run and written back after
/// any live `network_replay` step.
pub struct SnapshotStore {
    path: PathBuf,
    snapshots: HashMap<String, RequestSnapshot>,
}

impl SnapshotStore {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self { path: path.to_path_buf(), snapshots: HashMap::new() });
        }
        let contents = fs::read_to_string(path)
            .map_err(|e| ShowRunError::internal(format!("reading {}: {e}", path.display()), &[]))?;
        let file: SnapshotFile = serde_json::from_str(&contents)
            .map_err(|e| ShowRunError::SchemaError(format!("{}: {e}", path.display())))?;
        Ok(Self { path: path.to_path_buf(), snapshots: file.snapshots })
    }

    pub fn save(&self) -> Result<()> {
        let file = SnapshotFile { version: SNAPSHOT_FILE_VERSION, snapshots: self.snapshots.clone() };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| ShowRunError::internal(e.to_string(), &[]))?;
        fs::write(&self.path, json)
            .map_err(|e| ShowRunError::internal(format!("writing {}: {e}", self.path.display()), &[]))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = fs::metadata(&self.path) {
                let mut perms = metadata.permissions();
                perms.set_mode(0o600);
                let _ = fs::set_permissions(&self.path, perms);
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, step_id: &str) -> Option<&RequestSnapshot> {
        self.snapshots.get(step_id)
    }

    pub fn put(&mut self, step_id: impl Into<String>, snapshot: RequestSnapshot) {
        self.snapshots.insert(step_id.into(), snapshot);
    }
}

/// A flow is HTTP-only-compatible iff it has no DOM-coupled step kinds and
/// every `network_replay` step has a fresh snapshot.
#[must_use]
pub fn preflight_http_only_compatible(flow: &FlowDocument, store: &SnapshotStore, now: i64) -> bool {
    for step in &flow.flow {
        if step.params.is_dom_coupled() {
            return false;
        }
        if let StepParams::NetworkReplay(_) = &step.params {
            match store.get(&step.id) {
                None => return false,
                Some(snapshot) if snapshot.is_stale(now) => return false,
                Some(_) => {}
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::flow::{NavigateParams, NetworkReplayParams, ResponseSpec, Step, StepParams};

    fn sample_snapshot(ttl_secs: Option<u64>, captured_at: i64) -> RequestSnapshot {
        RequestSnapshot {
            method: "POST".into(),
            url_template: "https://x.test/api/companies".into(),
            headers_template: HashMap::new(),
            body_template: None,
            captured_at,
            ttl_secs,
            expected_status: Some(200),
            expected_content_type: None,
            expected_keys: None,
            response_as: ResponseAs::Json,
            response_path: None,
        }
    }

    #[test]
    fn null_ttl_snapshot_never_stale() {
        let snapshot = sample_snapshot(None, 0);
        assert!(!snapshot.is_stale(1_000_000));
    }

    #[test]
    fn ttl_snapshot_stale_once_elapsed_meets_or_exceeds_ttl() {
        let snapshot = sample_snapshot(Some(60), 1000);
        assert!(!snapshot.is_stale(1059));
        assert!(snapshot.is_stale(1060));
    }

    #[test]
    fn preflight_rejects_flow_with_dom_coupled_step() {
        let flow = FlowDocument {
            inputs: HashMap::new(),
            collectibles: vec![],
            flow: vec![Step {
                id: "s1".into(),
                params: StepParams::Navigate(NavigateParams { url: "https://x.test".into(), wait_until: None }),
                label: None,
                once: false,
                skip_if: None,
                retry: None,
            }],
        };
        let store = SnapshotStore { path: PathBuf::new(), snapshots: HashMap::new() };
        assert!(!preflight_http_only_compatible(&flow, &store, 0));
    }

    #[test]
    fn preflight_rejects_missing_snapshot_for_replay_step() {
        let flow = FlowDocument {
            inputs: HashMap::new(),
            collectibles: vec![],
            flow: vec![Step {
                id: "s1".into(),
                params: StepParams::NetworkReplay(NetworkReplayParams {
                    request_id: "{{vars.req}}".into(),
                    overrides: None,
                    auth: None,
                    save_as: None,
                    out: None,
                    response: ResponseSpec { as_: ResponseAs::Json, path: None },
                }),
                label: None,
                once: false,
                skip_if: None,
                retry: None,
            }],
        };
        let store = SnapshotStore { path: PathBuf::new(), snapshots: HashMap::new() };
        assert!(!preflight_http_only_compatible(&flow, &store, 0));
    }
}
