//! HTTP-only execution of an HTTP-only-compatible flow
//!
//! Runs the restricted step set (`set_var`, `sleep`, `network_extract`,
//! `network_replay`) with no browser involved at all. `network_replay` here
//! replays from the snapshot store instead of the browser's HTTP context.
//! Any validation failure or snapshot inconsistency declines gracefully,
//! instructing the caller to fall back to launching a real browser instead
//! of erroring out.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::ShowRunError;
use crate::interpreter::handlers;
use crate::interpreter::json_path;
use crate::interpreter::state::RunState;
use crate::pack::flow::{FlowDocument, SkipIf, StepParams};
use crate::template::{self, TemplateContext};
use crate::utils::constants::DEFAULT_REPLAY_TIMEOUT_MS;

use super::SnapshotStore;

/// Why the HTTP-only path gave up on a flow it had already started.
#[derive(Debug, Clone)]
pub struct Decline {
    pub step_id: Option<String>,
    pub reason: String,
}

impl Decline {
    fn at(step_id: &str, reason: impl Into<String>) -> Self {
        Self { step_id: Some(step_id.to_string()), reason: reason.into() }
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    !matches!(value, serde_json::Value::Null | serde_json::Value::Bool(false))
        && value.as_str().map(|s| !s.is_empty()).unwrap_or(true)
}

/// `skip_if` evaluated with no driver: `element_*` predicates are
/// conservatively `false` (no page exists in this mode) and `url_*`
/// predicates compare against the empty string, matching a fresh session
/// with no navigation.
fn evaluate_skip_if(skip_if: &SkipIf) -> bool {
    match skip_if {
        SkipIf::UrlIncludes(_) | SkipIf::UrlMatches(_) => false,
        SkipIf::ElementVisible(_) | SkipIf::ElementExists(_) => false,
        SkipIf::VarEquals { .. } | SkipIf::VarTruthy(_) | SkipIf::VarFalsy(_) => false,
        SkipIf::All(items) => items.iter().all(evaluate_skip_if),
        SkipIf::Any(items) => items.iter().any(evaluate_skip_if),
    }
}

/// Execute `flow` entirely through snapshots and plain in-memory handlers.
/// Precondition: `snapshot::preflight_http_only_compatible` returned true.
pub async fn run_flow(
    flow: &FlowDocument,
    state: &mut RunState,
    store: &SnapshotStore,
    secrets: &HashMap<String, String>,
    client: &reqwest::Client,
) -> Result<(), Decline> {
    for step in &flow.flow {
        if let Some(skip_if) = &step.skip_if {
            if evaluate_skip_if(skip_if) {
                state.restore_once(&step.id);
                continue;
            }
        }
        if step.once && state.has_run_once(&step.id) {
            state.restore_once(&step.id);
            continue;
        }

        let ctx = TemplateContext::new(&state.inputs, &state.vars, secrets);
        let writes = match &step.params {
            StepParams::SetVar(params) => handlers::set_var(params, &ctx)
                .map_err(|e| Decline::at(&step.id, e.to_string()))?,
            StepParams::Sleep(params) => {
                handlers::sleep(params).await;
                crate::interpreter::state::StepWrites::none()
            }
            StepParams::NetworkExtract(params) => handlers::network_extract(params, &state.vars, &mut state.hints)
                .map_err(|e| Decline::at(&step.id, e.to_string()))?,
            StepParams::NetworkReplay(params) => {
                replay_one(&step.id, params, state, store, secrets, client).await?
            }
            other => {
                return Err(Decline::at(
                    &step.id,
                    format!("step kind '{}' is not valid in HTTP-only mode", other.kind_name()),
                ));
            }
        };

        state.apply_writes(&step.id, step.once, writes);
        state.steps_executed.push(step.id.clone());
    }
    Ok(())
}

async fn replay_one(
    step_id: &str,
    params: &crate::pack::flow::NetworkReplayParams,
    state: &mut RunState,
    store: &SnapshotStore,
    secrets: &HashMap<String, String>,
    client: &reqwest::Client,
) -> Result<crate::interpreter::state::StepWrites, Decline> {
    let snapshot = store.get(step_id).ok_or_else(|| Decline::at(step_id, "no snapshot for this step"))?;

    let ctx = TemplateContext::new(&state.inputs, &state.vars, secrets);
    let url = template::resolve_url(&snapshot.url_template, &ctx).map_err(|e| Decline::at(step_id, e.to_string()))?;
    let body = snapshot
        .body_template
        .as_ref()
        .map(|b| template::resolve(b, &ctx))
        .transpose()
        .map_err(|e| Decline::at(step_id, e.to_string()))?;
    let mut headers = HashMap::new();
    for (name, value_template) in &snapshot.headers_template {
        let resolved = template::resolve(value_template, &ctx).map_err(|e| Decline::at(step_id, e.to_string()))?;
        headers.insert(name.clone(), resolved);
    }

    let method = reqwest::Method::from_bytes(snapshot.method.as_bytes())
        .map_err(|_| Decline::at(step_id, format!("invalid method '{}'", snapshot.method)))?;
    let mut request = client.request(method, &url);
    for (name, value) in &headers {
        request = request.header(name, value);
    }
    if let Some(body) = &body {
        request = request.body(body.clone());
    }

    let timeout = Duration::from_millis(DEFAULT_REPLAY_TIMEOUT_MS);
    let response = tokio::time::timeout(timeout, request.send())
        .await
        .map_err(|_| Decline::at(step_id, "replay request timed out"))?
        .map_err(|e| Decline::at(step_id, format!("replay request failed: {e}")))?;

    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let raw_body = response.text().await.map_err(|e| Decline::at(step_id, format!("reading replay body: {e}")))?;

    if let Some(expected) = snapshot.expected_status {
        if expected != status {
            return Err(Decline::at(step_id, format!("expected status {expected}, got {status}")));
        }
    }
    if let Some(expected) = &snapshot.expected_content_type {
        if content_type.as_deref().is_none_or(|ct| !ct.contains(expected.as_str())) {
            return Err(Decline::at(step_id, format!("expected content-type containing '{expected}', got {content_type:?}")));
        }
    }

    let parsed = json_path::parse_body(snapshot.response_as, &raw_body);
    if let Some(expected_keys) = &snapshot.expected_keys {
        let has_all_keys = parsed.as_object().is_some_and(|obj| expected_keys.iter().all(|k| obj.contains_key(k)));
        if !has_all_keys {
            return Err(Decline::at(step_id, format!("response missing expected keys {expected_keys:?}")));
        }
    }

    let mut writes = crate::interpreter::state::StepWrites::none();
    if let Some(save_as) = &params.save_as {
        writes.vars.insert(save_as.clone(), serde_json::Value::String(raw_body.clone()));
    }
    if let Some(out) = &params.out {
        let projected = json_path::apply_path(&parsed, snapshot.response_path.as_deref(), &mut state.hints);
        writes.collectibles.insert(out.clone(), projected);
    }
    Ok(writes)
}

impl From<Decline> for ShowRunError {
    fn from(decline: Decline) -> Self {
        ShowRunError::ResponseValidationError(decline.reason)
    }
}
