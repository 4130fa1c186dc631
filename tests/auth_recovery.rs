//! End-to-end: both the reactive (dispatch failure) and proactive (post-step
//! guard) auth signals run the pack's recovery flow and let the main flow
//! continue.

mod common;

use common::FakeDriver;
use serde_json::{json, Map};
use showrun_core::auth::AuthResilienceController;
use showrun_core::events::EventBus;
use showrun_core::interpreter::run_flow;
use showrun_core::interpreter::state::{OnceCache, RunState};
use showrun_core::pack::flow::FlowDocument;
use showrun_core::pack::manifest::{AuthConfig, AuthGuardConfig, AuthPolicyConfig};
use std::sync::atomic::Ordering;
use uuid::Uuid;

fn recovery_flow() -> Vec<showrun_core::pack::flow::Step> {
    serde_json::from_value(json!([
        {"id": "relogin", "type": "navigate", "params": {"url": "https://example.test/login"}}
    ]))
    .unwrap()
}

fn policy_with_recovery_flow() -> AuthConfig {
    AuthConfig {
        guard: Some(AuthGuardConfig { url_includes: Some("/logged_out".into()), target: None }),
        policy: Some(AuthPolicyConfig {
            on_status_codes: vec![401, 403],
            recovery_flow: recovery_flow(),
            max_recoveries_per_run: 1,
            max_step_retry_after_recovery: 1,
            cooldown_ms: 0,
        }),
    }
}

/// A guard expressed as a target visibility check instead of a URL
/// substring, exercising the other half of `guard_tripped`.
fn policy_with_target_guard() -> AuthConfig {
    AuthConfig {
        guard: Some(AuthGuardConfig { url_includes: None, target: Some(showrun_core::pack::flow::Target::css("#session_expired")) }),
        policy: Some(AuthPolicyConfig {
            on_status_codes: vec![401, 403],
            recovery_flow: recovery_flow(),
            max_recoveries_per_run: 1,
            max_step_retry_after_recovery: 1,
            cooldown_ms: 0,
        }),
    }
}

#[tokio::test]
async fn reactive_auth_failure_triggers_recovery_then_retries_step() {
    let flow: FlowDocument = serde_json::from_value(json!({
        "flow": [{
            "id": "submit",
            "type": "click",
            "params": {"selector": "#submit"},
            "retry": {"times": 1, "delay_ms": 0}
        }]
    }))
    .unwrap();

    let mut driver = FakeDriver::default();
    driver.fail_click_once.store(true, Ordering::SeqCst);

    let mut state = RunState::new(Map::new(), OnceCache::new());
    let secrets = std::collections::HashMap::new();
    let events = EventBus::new(16);
    let mut auth = AuthResilienceController::new(policy_with_recovery_flow());

    let outcome = run_flow(Uuid::new_v4(), &flow, &mut state, &mut driver, &secrets, &events, None, Some(&mut auth)).await;

    assert!(outcome.is_ok());
    assert_eq!(driver.navigated_urls.lock().as_slice(), ["https://example.test/login"]);
    assert_eq!(state.steps_executed, vec!["submit".to_string()]);
}

#[tokio::test]
async fn proactive_guard_runs_recovery_after_a_successful_step() {
    let flow: FlowDocument = serde_json::from_value(json!({
        "flow": [{"id": "goto", "type": "navigate", "params": {"url": "https://example.test/account"}}]
    }))
    .unwrap();

    let mut driver = FakeDriver::default();
    driver.guard_visible.store(true, Ordering::SeqCst);

    let mut state = RunState::new(Map::new(), OnceCache::new());
    let secrets = std::collections::HashMap::new();
    let events = EventBus::new(16);
    let mut auth = AuthResilienceController::new(policy_with_target_guard());

    run_flow(Uuid::new_v4(), &flow, &mut state, &mut driver, &secrets, &events, None, Some(&mut auth)).await.unwrap();

    let urls = driver.navigated_urls.lock().clone();
    assert_eq!(urls, vec!["https://example.test/account".to_string(), "https://example.test/login".to_string()]);
}

#[tokio::test]
async fn recovery_is_not_retried_past_max_step_retry_after_recovery() {
    let flow: FlowDocument = serde_json::from_value(json!({
        "flow": [{"id": "submit", "type": "click", "params": {"selector": "#submit"}}]
    }))
    .unwrap();

    let mut driver = FakeDriver::default();
    driver.fail_click_always.store(true, Ordering::SeqCst);

    let mut state = RunState::new(Map::new(), OnceCache::new());
    let secrets = std::collections::HashMap::new();
    let events = EventBus::new(16);
    let mut auth = AuthResilienceController::new(policy_with_recovery_flow());

    let outcome = run_flow(Uuid::new_v4(), &flow, &mut state, &mut driver, &secrets, &events, None, Some(&mut auth)).await;

    assert!(outcome.is_err());
    // One click attempt, one recovery-triggered retry, then the bound
    // (max_step_retry_after_recovery: 1) stops further recovery retries.
    assert_eq!(driver.click_calls.load(Ordering::SeqCst), 2);
    assert_eq!(driver.navigated_urls.lock().as_slice(), ["https://example.test/login"]);
}
