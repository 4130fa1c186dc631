//! Pack directory loading
//!
//! A pack directory holds `taskpack.json`, `flow.json`, and an optional
//! `.secrets.json`. Loading is a pure read-and-parse step; structural and
//! referential validation happens separately in [`super::validator`].

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{Result, ShowRunError};

use super::flow::FlowDocument;
use super::manifest::TaskpackManifest;
use super::secrets;

const TASKPACK_FILENAME: &str = "taskpack.json";
const FLOW_FILENAME: &str = "flow.json";
const SECRETS_FILENAME: &str = ".secrets.json";

static PACK_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("valid pack id regex"));

/// A loaded, unvalidated pack: manifest, flow document, resolved secrets and
/// the directory it came from (needed later for the snapshot file and
/// profile-mode persistence).
#[derive(Debug, Clone)]
pub struct Pack {
    pub dir: PathBuf,
    pub manifest: TaskpackManifest,
    pub flow: FlowDocument,
    pub secrets: std::collections::HashMap<String, String>,
}

impl Pack {
    /// Load `taskpack.json`, `flow.json`, and (if present) `.secrets.json`
    /// from `dir`, resolving declared secrets against the file and process
    /// environment.
    pub fn load(dir: &Path) -> Result<Self> {
        let manifest = load_json_file::<TaskpackManifest>(&dir.join(TASKPACK_FILENAME))?;
        if !PACK_ID_RE.is_match(&manifest.id) {
            return Err(ShowRunError::SchemaError(format!(
                "pack id '{}' must match [A-Za-z0-9._-]+",
                manifest.id
            )));
        }

        let flow = load_json_file::<FlowDocument>(&dir.join(FLOW_FILENAME))?;

        let from_file = secrets::load_secrets_file(&dir.join(SECRETS_FILENAME))?;
        let resolved = secrets::resolve_secrets(&manifest.secrets, &from_file)?;

        Ok(Self { dir: dir.to_path_buf(), manifest, flow, secrets: resolved })
    }

    /// Apply declared input defaults to `inputs`, then check every `required`
    /// field is present. Returns the merged input map.
    pub fn apply_input_defaults(
        &self,
        mut inputs: serde_json::Map<String, Value>,
    ) -> Result<serde_json::Map<String, Value>> {
        for (name, schema) in &self.flow.inputs {
            if !inputs.contains_key(name) {
                if let Some(default) = &schema.default {
                    inputs.insert(name.clone(), default.clone());
                } else if schema.required {
                    return Err(ShowRunError::SchemaError(format!(
                        "missing required input '{name}'"
                    )));
                }
            }
        }
        Ok(inputs)
    }

    #[must_use]
    pub fn snapshot_file(&self) -> PathBuf {
        self.dir.join("snapshots.json")
    }
}

fn load_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(ShowRunError::MissingFile(path.display().to_string()));
    }
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ShowRunError::MissingFile(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&contents)
        .map_err(|e| ShowRunError::SchemaError(format!("{}: {e}", path.display())))
}
