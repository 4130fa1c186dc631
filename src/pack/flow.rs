//! Flow document types: steps, targets, skip predicates, retry policy
//!
//! `Step` is adjacently tagged on
//! `type`/`params` so `{"id": "s1", "type": "click", "params": {...}}` maps
//! straight onto `StepParams::Click(ClickParams)`; `SkipIf` is externally
//! tagged so `{"url_includes": "..."}` / `{"all": [...]}` fall out of serde's
//! default enum representation with no custom (de)serialization code needed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{Result, ShowRunError};

// ---------------------------------------------------------------------------
// Inputs & collectibles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    String,
    Number,
    Boolean,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputFieldSchema {
    #[serde(rename = "type")]
    pub field_type: ScalarType,
    #[serde(default)]
    pub required: bool,
    pub description: Option<String>,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectibleDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ScalarType,
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Target resolution
// ---------------------------------------------------------------------------

/// Human-stable element reference, resolved in `role > label > text > css`
/// priority order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetKind {
    Role { role: String, name: Option<String> },
    Label { text: String },
    Text { text: String, #[serde(default)] exact: bool },
    Css { selector: String },
}

/// A `TargetKind` plus optional `within`/`near` composition, which applies to
/// any kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    #[serde(flatten)]
    pub kind: TargetKind,
    pub within: Option<Box<Target>>,
    pub near: Option<Box<Target>>,
}

impl Target {
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self { kind: TargetKind::Css { selector: selector.into() }, within: None, near: None }
    }
}

/// Steps take a `target` object, a bare `selector` shorthand, or both a base
/// locator plus `scope`/`near` composition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetRef {
    pub target: Option<Target>,
    pub selector: Option<String>,
    pub scope: Option<Box<Target>>,
    pub near: Option<Box<Target>>,
}

impl TargetRef {
    /// Compose the effective `Target` this step interacts with.
    pub fn resolve(&self) -> Result<Target> {
        let mut base = match (&self.target, &self.selector) {
            (Some(target), _) => target.clone(),
            (None, Some(selector)) => Target::css(selector.clone()),
            (None, None) => {
                return Err(ShowRunError::SchemaError(
                    "step requires either 'target' or 'selector'".into(),
                ));
            }
        };
        if let Some(scope) = &self.scope {
            base.within = Some(scope.clone());
        }
        if let Some(near) = &self.near {
            base.near = Some(near.clone());
        }
        Ok(base)
    }
}

// ---------------------------------------------------------------------------
// skip_if predicates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipIf {
    UrlIncludes(String),
    UrlMatches(String),
    ElementVisible(TargetRef),
    ElementExists(TargetRef),
    VarEquals { name: String, value: Value },
    VarTruthy(String),
    VarFalsy(String),
    All(Vec<SkipIf>),
    Any(Vec<SkipIf>),
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub times: u32,
    pub delay_ms: u64,
    #[serde(default)]
    pub only_on: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Per-kind step params
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WaitUntil {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigateParams {
    pub url: String,
    pub wait_until: Option<WaitUntil>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitForParams {
    pub target: Option<Target>,
    pub selector: Option<String>,
    pub url: Option<String>,
    pub load_state: Option<WaitUntil>,
    pub visible: Option<bool>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickParams {
    #[serde(flatten)]
    pub locator: TargetRef,
    #[serde(default)]
    pub first: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillParams {
    #[serde(flatten)]
    pub locator: TargetRef,
    pub value: String,
    #[serde(default)]
    pub clear: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectOptionParams {
    #[serde(flatten)]
    pub locator: TargetRef,
    pub value: String,
    #[serde(default)]
    pub first: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PressKeyParams {
    pub key: String,
    #[serde(flatten)]
    pub locator: TargetRef,
    pub times: Option<u32>,
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFileParams {
    #[serde(flatten)]
    pub locator: TargetRef,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameAction {
    Enter,
    Exit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameParams {
    pub frame: Target,
    pub action: FrameAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTabParams {
    pub url: String,
    pub save_tab_index_as: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchTabParams {
    pub tab: String,
    #[serde(default)]
    pub close_current_tab: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractTitleParams {
    pub out: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractTextParams {
    #[serde(flatten)]
    pub locator: TargetRef,
    pub out: String,
    #[serde(default)]
    pub first: bool,
    #[serde(default)]
    pub trim: bool,
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractAttributeParams {
    #[serde(flatten)]
    pub locator: TargetRef,
    pub attribute: String,
    pub out: String,
    #[serde(default)]
    pub first: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertParams {
    #[serde(flatten)]
    pub locator: TargetRef,
    pub visible: Option<bool>,
    pub text_includes: Option<String>,
    pub url_includes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetVarParams {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepParams {
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pick {
    First,
    Last,
}

/// Permitted keys for `network_find.where`. `deny_unknown_fields` rejects
/// unknown keys so a misconfigured filter can't silently degrade to
/// match-everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkWhere {
    pub url_includes: Option<String>,
    pub url_matches: Option<String>,
    pub method: Option<String>,
    pub resource_type: Option<String>,
    pub status: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkFindParams {
    #[serde(rename = "where")]
    pub filter: NetworkWhere,
    pub pick: Pick,
    pub save_as: String,
    pub wait_for_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegexReplace {
    pub find: String,
    pub replace: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkOverrides {
    pub url_replace: Option<Vec<RegexReplace>>,
    pub url: Option<String>,
    pub body_replace: Option<Vec<RegexReplace>>,
    pub body: Option<String>,
    pub set_query: Option<HashMap<String, String>>,
    pub set_headers: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkAuth {
    BrowserContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseAs {
    Json,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSpec {
    #[serde(rename = "as")]
    pub as_: ResponseAs,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkReplayParams {
    pub request_id: String,
    pub overrides: Option<NetworkOverrides>,
    pub auth: Option<NetworkAuth>,
    pub save_as: Option<String>,
    pub out: Option<String>,
    pub response: ResponseSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkExtractParams {
    pub from_var: String,
    #[serde(rename = "as")]
    pub as_: ResponseAs,
    pub path: Option<String>,
    pub out: String,
}

/// Adjacently tagged on `type`/`params`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum StepParams {
    Navigate(NavigateParams),
    WaitFor(WaitForParams),
    Click(ClickParams),
    Fill(FillParams),
    SelectOption(SelectOptionParams),
    PressKey(PressKeyParams),
    UploadFile(UploadFileParams),
    Frame(FrameParams),
    NewTab(NewTabParams),
    SwitchTab(SwitchTabParams),
    ExtractTitle(ExtractTitleParams),
    ExtractText(ExtractTextParams),
    ExtractAttribute(ExtractAttributeParams),
    Assert(AssertParams),
    SetVar(SetVarParams),
    Sleep(SleepParams),
    NetworkFind(NetworkFindParams),
    NetworkReplay(NetworkReplayParams),
    NetworkExtract(NetworkExtractParams),
}

impl StepParams {
    /// The step kind name as it appears in `type` (for logging/events).
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Navigate(_) => "navigate",
            Self::WaitFor(_) => "wait_for",
            Self::Click(_) => "click",
            Self::Fill(_) => "fill",
            Self::SelectOption(_) => "select_option",
            Self::PressKey(_) => "press_key",
            Self::UploadFile(_) => "upload_file",
            Self::Frame(_) => "frame",
            Self::NewTab(_) => "new_tab",
            Self::SwitchTab(_) => "switch_tab",
            Self::ExtractTitle(_) => "extract_title",
            Self::ExtractText(_) => "extract_text",
            Self::ExtractAttribute(_) => "extract_attribute",
            Self::Assert(_) => "assert",
            Self::SetVar(_) => "set_var",
            Self::Sleep(_) => "sleep",
            Self::NetworkFind(_) => "network_find",
            Self::NetworkReplay(_) => "network_replay",
            Self::NetworkExtract(_) => "network_extract",
        }
    }

    /// True for the DOM-coupled kinds that make a flow browser-only, used by
    /// the HTTP-only pre-flight compatibility check.
    #[must_use]
    pub fn is_dom_coupled(&self) -> bool {
        !matches!(self, Self::SetVar(_) | Self::Sleep(_) | Self::NetworkExtract(_) | Self::NetworkReplay(_))
    }

    /// The collectible name this step writes to, if any.
    #[must_use]
    pub fn out_collectible(&self) -> Option<&str> {
        match self {
            Self::ExtractTitle(p) => Some(&p.out),
            Self::ExtractText(p) => Some(&p.out),
            Self::ExtractAttribute(p) => Some(&p.out),
            Self::NetworkReplay(p) => p.out.as_deref(),
            Self::NetworkExtract(p) => Some(&p.out),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Step & flow document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(flatten)]
    pub params: StepParams,
    pub label: Option<String>,
    #[serde(default)]
    pub once: bool,
    pub skip_if: Option<SkipIf>,
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowDocument {
    #[serde(default)]
    pub inputs: HashMap<String, InputFieldSchema>,
    #[serde(default)]
    pub collectibles: Vec<CollectibleDecl>,
    pub flow: Vec<Step>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_deserializes_adjacently_tagged_type_and_params() {
        let json = serde_json::json!({
            "id": "s1",
            "type": "click",
            "params": {"selector": "#btn", "first": true}
        });
        let step: Step = serde_json::from_value(json).unwrap();
        assert_eq!(step.id, "s1");
        match step.params {
            StepParams::Click(p) => {
                assert!(p.first);
                assert_eq!(p.locator.selector.as_deref(), Some("#btn"));
            }
            other => panic!("unexpected params: {other:?}"),
        }
    }

    #[test]
    fn skip_if_any_empty_list_round_trips() {
        let json = serde_json::json!({"any": []});
        let skip: SkipIf = serde_json::from_value(json).unwrap();
        assert!(matches!(skip, SkipIf::Any(v) if v.is_empty()));
    }

    #[test]
    fn network_where_rejects_unknown_keys() {
        let json = serde_json::json!({"urlIncludes": "/api/", "bogus": true});
        let result: std::result::Result<NetworkWhere, _> = serde_json::from_value(json);
        assert!(result.is_err());
    }

    #[test]
    fn target_ref_requires_target_or_selector() {
        let empty = TargetRef::default();
        assert!(empty.resolve().is_err());
    }

    #[test]
    fn target_ref_prefers_explicit_target_over_selector() {
        let locator = TargetRef {
            target: Some(Target::css("#explicit")),
            selector: Some("#shorthand".into()),
            scope: None,
            near: None,
        };
        let resolved = locator.resolve().unwrap();
        match resolved.kind {
            TargetKind::Css { selector } => assert_eq!(selector, "#explicit"),
            other => panic!("unexpected kind: {other:?}"),
        }
    }
}
