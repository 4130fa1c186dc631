//! Task pack manifest: engine selection, persistence mode, auth config.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    Default,
    Stealth,
}

impl Default for Engine {
    fn default() -> Self {
        Self::Default
    }
}

/// How the browser profile's cookies/storage persist across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persistence {
    /// Fresh profile per run, discarded on completion.
    None,
    /// Profile kept alive for `SESSION_PROFILE_TTL_SECS` and reused by
    /// subsequent runs of the same pack within that window.
    Session,
    /// Profile keyed by name, persisted to disk indefinitely.
    Profile { name: String },
}

impl Default for Persistence {
    fn default() -> Self {
        Self::None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSettings {
    #[serde(default)]
    pub engine: Engine,
    #[serde(default)]
    pub persistence: Persistence,
    pub viewport_width: Option<u32>,
    pub viewport_height: Option<u32>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub headless: bool,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            engine: Engine::default(),
            persistence: Persistence::default(),
            viewport_width: None,
            viewport_height: None,
            user_agent: None,
            headless: true,
        }
    }
}

impl BrowserSettings {
    #[must_use]
    pub fn builder() -> BrowserSettingsBuilder {
        BrowserSettingsBuilder::default()
    }
}

/// Plain fluent builder. `BrowserSettings` has no required-before-optional
/// field ordering, so a typestate builder would add ceremony with no
/// invariant to enforce.
#[derive(Debug, Default)]
pub struct BrowserSettingsBuilder {
    settings: BrowserSettings,
}

impl BrowserSettingsBuilder {
    #[must_use]
    pub fn engine(mut self, engine: Engine) -> Self {
        self.settings.engine = engine;
        self
    }

    #[must_use]
    pub fn persistence(mut self, persistence: Persistence) -> Self {
        self.settings.persistence = persistence;
        self
    }

    #[must_use]
    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.settings.viewport_width = Some(width);
        self.settings.viewport_height = Some(height);
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.settings.user_agent = Some(user_agent.into());
        self
    }

    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.settings.headless = headless;
        self
    }

    #[must_use]
    pub fn build(self) -> BrowserSettings {
        self.settings
    }
}

/// Proactive check: does the page currently show signs of a logged-out /
/// auth-expired state, independent of any single step's outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthGuardConfig {
    pub url_includes: Option<String>,
    pub target: Option<super::flow::Target>,
}

/// Reactive policy: which errors count as auth failures and how to recover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPolicyConfig {
    #[serde(default = "default_status_codes")]
    pub on_status_codes: Vec<u16>,
    pub recovery_flow: Vec<super::flow::Step>,
    #[serde(default = "default_max_recoveries")]
    pub max_recoveries_per_run: u32,
    #[serde(default = "default_max_retry_after_recovery")]
    pub max_step_retry_after_recovery: u32,
    #[serde(default)]
    pub cooldown_ms: u64,
}

fn default_status_codes() -> Vec<u16> {
    crate::utils::constants::DEFAULT_AUTH_FAILURE_STATUS_CODES.to_vec()
}

fn default_max_recoveries() -> u32 {
    crate::utils::constants::DEFAULT_MAX_RECOVERIES_PER_RUN
}

fn default_max_retry_after_recovery() -> u32 {
    crate::utils::constants::DEFAULT_MAX_STEP_RETRY_AFTER_RECOVERY
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub guard: Option<AuthGuardConfig>,
    pub policy: Option<AuthPolicyConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretSource {
    Env,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretDecl {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    pub source: Option<SecretSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskpackManifest {
    pub id: String,
    pub version: String,
    pub description: Option<String>,
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub secrets: Vec<SecretDecl>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_defaults_to_none() {
        assert_eq!(Persistence::default(), Persistence::None);
    }

    #[test]
    fn builder_composes_fluently() {
        let settings = BrowserSettings::builder()
            .engine(Engine::Stealth)
            .viewport(1280, 800)
            .headless(false)
            .build();
        assert_eq!(settings.engine, Engine::Stealth);
        assert_eq!(settings.viewport_width, Some(1280));
        assert!(!settings.headless);
    }

    #[test]
    fn manifest_deserializes_minimal_json() {
        let json = serde_json::json!({"id": "demo", "version": "1.0.0"});
        let manifest: TaskpackManifest = serde_json::from_value(json).unwrap();
        assert_eq!(manifest.browser.engine, Engine::Default);
        assert!(manifest.secrets.is_empty());
    }
}
