//! Browser-mode step dispatch: one `StepParams` variant maps to one
//! [`BrowserDriver`] call (or, for the four DOM-free kinds, the shared
//! handlers in [`crate::interpreter::handlers`])

use std::time::Duration;

use regex::Regex;

use crate::capture::check_no_sensitive_header_overrides;
use crate::driver::{BrowserDriver, EffectiveRequest};
use crate::error::{Result, ShowRunError};
use crate::interpreter::handlers;
use crate::interpreter::json_path;
use crate::interpreter::state::{RunState, StepWrites};
use crate::pack::flow::{NetworkReplayParams, RegexReplace, StepParams};
use crate::snapshot::RequestSnapshot;
use crate::template::{self, TemplateContext};
use crate::utils::constants::DEFAULT_STEP_TIMEOUT_MS;

const STEP_TIMEOUT: Duration = Duration::from_millis(DEFAULT_STEP_TIMEOUT_MS);

/// Resolve a locator's `target`/`selector` into an optional `Target`,
/// treating "neither given" as "no target" rather than a hard error —
/// `press_key`/`assert` allow a targetless invocation (page-level key press,
/// URL-only assertion).
fn optional_target(locator: &crate::pack::flow::TargetRef) -> Option<crate::pack::flow::Target> {
    locator.resolve().ok()
}

/// Dispatch one step's params against a live browser driver, returning the
/// writes it produced. DOM-free kinds (`set_var`/`sleep`/`network_extract`)
/// delegate to [`crate::interpreter::handlers`], shared with HTTP-only mode.
pub async fn dispatch(
    step_id: &str,
    params: &StepParams,
    state: &mut RunState,
    driver: &mut dyn BrowserDriver,
    secrets: &std::collections::HashMap<String, String>,
    snapshot_out: Option<&mut crate::snapshot::SnapshotStore>,
) -> Result<StepWrites> {
    match params {
        StepParams::Navigate(p) => {
            driver.navigate(&resolved_url(&p.url, state, secrets)?, p.wait_until, STEP_TIMEOUT).await?;
            Ok(StepWrites::none())
        }
        StepParams::WaitFor(p) => {
            let target = p.target.clone().or_else(|| p.selector.as_deref().map(crate::pack::flow::Target::css));
            let timeout = p.timeout_ms.map(Duration::from_millis).unwrap_or(STEP_TIMEOUT);
            driver
                .wait_for(target.as_ref(), p.url.as_deref(), p.load_state, p.visible, timeout)
                .await?;
            Ok(StepWrites::none())
        }
        StepParams::Click(p) => {
            let target = p.locator.resolve()?;
            driver.click(&target, p.first, STEP_TIMEOUT).await?;
            Ok(StepWrites::none())
        }
        StepParams::Fill(p) => {
            let target = p.locator.resolve()?;
            let ctx = TemplateContext::new(&state.inputs, &state.vars, secrets);
            let value = template::resolve(&p.value, &ctx)?;
            driver.fill(&target, &value, p.clear, STEP_TIMEOUT).await?;
            Ok(StepWrites::none())
        }
        StepParams::SelectOption(p) => {
            let target = p.locator.resolve()?;
            let ctx = TemplateContext::new(&state.inputs, &state.vars, secrets);
            let value = template::resolve(&p.value, &ctx)?;
            driver.select_option(&target, &value, p.first, STEP_TIMEOUT).await?;
            Ok(StepWrites::none())
        }
        StepParams::PressKey(p) => {
            let target = optional_target(&p.locator);
            let times = p.times.unwrap_or(1);
            let delay = p.delay_ms.map(Duration::from_millis).unwrap_or_default();
            driver.press_key(target.as_ref(), &p.key, times, delay, STEP_TIMEOUT).await?;
            Ok(StepWrites::none())
        }
        StepParams::UploadFile(p) => {
            let target = p.locator.resolve()?;
            driver.upload_file(&target, &p.files, STEP_TIMEOUT).await?;
            Ok(StepWrites::none())
        }
        StepParams::Frame(p) => {
            match p.action {
                crate::pack::flow::FrameAction::Enter => driver.enter_frame(&p.frame, STEP_TIMEOUT).await?,
                crate::pack::flow::FrameAction::Exit => driver.exit_frame().await?,
            }
            Ok(StepWrites::none())
        }
        StepParams::NewTab(p) => {
            let ctx = TemplateContext::new(&state.inputs, &state.vars, secrets);
            let url = template::resolve_url(&p.url, &ctx)?;
            let index = driver.new_tab(&url, STEP_TIMEOUT).await?;
            state.active_tab = index;
            match &p.save_tab_index_as {
                Some(name) => Ok(StepWrites::var(name.clone(), serde_json::json!(index))),
                None => Ok(StepWrites::none()),
            }
        }
        StepParams::SwitchTab(p) => {
            let ctx = TemplateContext::new(&state.inputs, &state.vars, secrets);
            let resolved = template::resolve(&p.tab, &ctx)?;
            let index: usize = resolved
                .parse()
                .map_err(|_| ShowRunError::TemplateError(format!("switch_tab.tab '{resolved}' is not a tab index")))?;
            driver.switch_tab(index, p.close_current_tab).await?;
            state.active_tab = index;
            Ok(StepWrites::none())
        }
        StepParams::ExtractTitle(p) => {
            let title = driver.extract_title().await?;
            Ok(StepWrites::collectible(p.out.clone(), serde_json::Value::String(title)))
        }
        StepParams::ExtractText(p) => {
            let target = p.locator.resolve()?;
            let extracted = driver.extract_text(&target, p.first, p.trim, STEP_TIMEOUT).await?;
            let value = match extracted.or_else(|| p.default.clone()) {
                Some(text) => serde_json::Value::String(text),
                None => serde_json::Value::Null,
            };
            Ok(StepWrites::collectible(p.out.clone(), value))
        }
        StepParams::ExtractAttribute(p) => {
            let target = p.locator.resolve()?;
            let extracted = driver.extract_attribute(&target, &p.attribute, p.first, STEP_TIMEOUT).await?;
            let value = extracted.map_or(serde_json::Value::Null, serde_json::Value::String);
            Ok(StepWrites::collectible(p.out.clone(), value))
        }
        StepParams::Assert(p) => {
            let target = optional_target(&p.locator);
            let ok = driver
                .assert_target(target.as_ref(), p.visible, p.text_includes.as_deref(), p.url_includes.as_deref(), STEP_TIMEOUT)
                .await?;
            if !ok {
                return Err(ShowRunError::TargetNotFound("assert condition not met".into()));
            }
            Ok(StepWrites::none())
        }
        StepParams::SetVar(p) => {
            let ctx = TemplateContext::new(&state.inputs, &state.vars, secrets);
            handlers::set_var(p, &ctx)
        }
        StepParams::Sleep(p) => {
            handlers::sleep(p).await;
            Ok(StepWrites::none())
        }
        StepParams::NetworkFind(p) => {
            let capture = driver.capture();
            if let Some(wait_ms) = p.wait_for_ms {
                let deadline = tokio::time::Instant::now() + Duration::from_millis(wait_ms);
                loop {
                    if capture.find(&p.filter, p.pick).is_some() {
                        break;
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(ShowRunError::NetworkRequestNotFound(wait_ms));
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
            let id = capture
                .find(&p.filter, p.pick)
                .ok_or(ShowRunError::NetworkRequestNotFound(p.wait_for_ms.unwrap_or(0)))?;
            Ok(StepWrites::var(p.save_as.clone(), serde_json::json!(id.to_string())))
        }
        StepParams::NetworkReplay(p) => network_replay(step_id, p, state, driver, secrets, snapshot_out).await,
        StepParams::NetworkExtract(p) => handlers::network_extract(p, &state.vars, &mut state.hints),
    }
}

fn resolved_url(template_str: &str, state: &RunState, secrets: &std::collections::HashMap<String, String>) -> Result<String> {
    let ctx = TemplateContext::new(&state.inputs, &state.vars, secrets);
    template::resolve_url(template_str, &ctx)
}

fn apply_regex_replacements(mut text: String, rules: &[RegexReplace]) -> Result<String> {
    for rule in rules {
        let re = Regex::new(&rule.find)
            .map_err(|e| ShowRunError::ReplayError(format!("overrides.urlReplace/bodyReplace pattern '{}' invalid: {e}", rule.find)))?;
        text = re.replace_all(&text, rule.replace.as_str()).into_owned();
    }
    Ok(text)
}

/// `network_replay`: look up a captured request by id, apply overrides in a
/// fixed order (`urlReplace` -> `url` -> `bodyReplace` ->
/// `body` -> `setQuery` -> `setHeaders`), replay through the driver's HTTP
/// context, then validate/project the response. When `snapshot_out` is
/// `Some`, the effective (unresolved override) request is recorded for
/// future HTTP-only replay.
pub async fn network_replay(
    step_id: &str,
    params: &NetworkReplayParams,
    state: &mut RunState,
    driver: &mut dyn BrowserDriver,
    secrets: &std::collections::HashMap<String, String>,
    snapshot_out: Option<&mut crate::snapshot::SnapshotStore>,
) -> Result<StepWrites> {
    let ctx = TemplateContext::new(&state.inputs, &state.vars, secrets);
    let resolved_id = template::resolve(&params.request_id, &ctx)?;
    let id: u64 = resolved_id
        .parse()
        .map_err(|_| ShowRunError::ReplayError(format!("request_id '{resolved_id}' is not a captured request id")))?;

    let capture = driver.capture();
    let captured = capture.get(id).ok_or_else(|| ShowRunError::ReplayError(format!("no captured request with id {id}")))?;
    let request_headers = capture.request_headers(id).unwrap_or_default();

    let mut url = captured.url.clone();
    let mut body = capture.request_body(id);
    let mut headers = request_headers.clone();

    if let Some(overrides) = &params.overrides {
        if let Some(rules) = &overrides.url_replace {
            url = apply_regex_replacements(url, rules)?;
        }
        if let Some(explicit_url) = &overrides.url {
            url = template::resolve_url(explicit_url, &ctx)?;
        }
        if let Some(rules) = &overrides.body_replace {
            let base = body.unwrap_or_default();
            body = Some(apply_regex_replacements(base, rules)?);
        }
        if let Some(explicit_body) = &overrides.body {
            body = Some(template::resolve(explicit_body, &ctx)?);
        }
        if let Some(set_query) = &overrides.set_query {
            url = apply_set_query(&url, set_query, &ctx)?;
        }
        if let Some(set_headers) = &overrides.set_headers {
            check_no_sensitive_header_overrides(set_headers)?;
            for (name, value_template) in set_headers {
                headers.insert(name.clone(), template::resolve(value_template, &ctx)?);
            }
        }
    }

    let effective = EffectiveRequest { method: captured.method.clone(), url: url.clone(), headers: headers.clone(), body: body.clone() };
    let timeout = Duration::from_millis(crate::utils::constants::DEFAULT_REPLAY_TIMEOUT_MS);
    let response = driver.replay_in_browser_context(&effective, timeout).await?;
    let raw_body = String::from_utf8_lossy(&response.body).into_owned();

    let parsed = json_path::parse_body(params.response.as_, &raw_body);
    let mut writes = StepWrites::none();
    if let Some(save_as) = &params.save_as {
        writes.vars.insert(save_as.clone(), serde_json::Value::String(raw_body.clone()));
    }
    if let Some(out) = &params.out {
        let projected = json_path::apply_path(&parsed, params.response.path.as_deref(), &mut state.hints);
        writes.collectibles.insert(out.clone(), projected);
    }

    if let Some(store) = snapshot_out {
        let content_type = response.headers.get("content-type").or_else(|| response.headers.get("Content-Type")).cloned();
        store.put(
            step_id.to_string(),
            RequestSnapshot {
                method: captured.method.clone(),
                url_template: url,
                headers_template: headers,
                body_template: body,
                captured_at: now_unix(),
                ttl_secs: None,
                expected_status: Some(response.status),
                expected_content_type: content_type,
                expected_keys: None,
                response_as: params.response.as_,
                response_path: params.response.path.clone(),
            },
        );
    }

    Ok(writes)
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn apply_set_query(url: &str, set_query: &std::collections::HashMap<String, String>, ctx: &TemplateContext<'_>) -> Result<String> {
    let mut parsed = url::Url::parse(url).map_err(|e| ShowRunError::ReplayError(format!("overrides.setQuery target url '{url}' invalid: {e}")))?;
    let mut pairs: Vec<(String, String)> = parsed.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
    for (key, value_template) in set_query {
        let resolved = template::resolve(value_template, ctx)?;
        if let Some(existing) = pairs.iter_mut().find(|(k, _)| k == key) {
            existing.1 = resolved;
        } else {
            pairs.push((key.clone(), resolved));
        }
    }
    parsed.query_pairs_mut().clear().extend_pairs(&pairs);
    Ok(parsed.into())
}
