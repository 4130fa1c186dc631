//! Task pack types: manifest, flow document, secrets, loading and validation.

pub mod flow;
pub mod loader;
pub mod manifest;
pub mod secrets;
pub mod validator;

pub use flow::{FlowDocument, SkipIf, Step, StepParams, Target, TargetKind, TargetRef};
pub use loader::Pack;
pub use manifest::{AuthConfig, BrowserSettings, Engine, Persistence, TaskpackManifest};

use std::path::Path;

use crate::error::Result;

/// Load and fully validate a pack directory in one call.
pub fn load_and_validate(dir: &Path) -> Result<Pack> {
    let pack = Pack::load(dir)?;
    validator::validate(&pack.manifest, &pack.flow)?;
    Ok(pack)
}
