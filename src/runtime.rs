//! Top-level run orchestration: load -> validate -> pre-flight -> execute
//!
//! `run()` never returns `Err`: every failure, from a malformed pack to a
//! mid-flow dispatch error, is folded into a [`crate::result::RunResult`] with
//! `success: false` so a host never has to distinguish "the runtime itself
//! broke" from "the flow failed".

use std::collections::HashMap;
use std::time::Instant;

use chromiumoxide::browser::Browser;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::auth::AuthResilienceController;
use crate::browser_setup::launch_browser;
use crate::config::RunOptions;
use crate::driver::persistence::ActiveProfile;
use crate::driver::{BrowserDriver, ChromiumDriver};
use crate::error::{Result, ShowRunError};
use crate::events::{EventBus, RunEvent};
use crate::interpreter::state::{OnceCache, RunState};
use crate::pack::manifest::Persistence;
use crate::pack::{self, Pack};
use crate::result::RunResult;
use crate::snapshot::{self, SnapshotStore};

/// Once-caches keyed by `(pack id, session id)`, living for the process
/// lifetime so a session's `once` steps stay skipped across separate `run()`
/// calls.
static SESSION_ONCE_CACHES: once_cell::sync::Lazy<Mutex<HashMap<String, OnceCache>>> =
    once_cell::sync::Lazy::new(|| Mutex::new(HashMap::new()));

fn once_cache_key(pack_id: &str, session_id: Option<&str>) -> String {
    format!("{pack_id}::{}", session_id.unwrap_or("__no_session__"))
}

fn take_once_cache(pack_id: &str, session_id: Option<&str>) -> OnceCache {
    SESSION_ONCE_CACHES.lock().remove(&once_cache_key(pack_id, session_id)).unwrap_or_default()
}

fn store_once_cache(pack_id: &str, session_id: Option<&str>, cache: OnceCache) {
    SESSION_ONCE_CACHES.lock().insert(once_cache_key(pack_id, session_id), cache);
}

/// Run the pack in `options.run_dir` with `inputs`, returning a [`RunResult`]
/// regardless of outcome.
pub async fn run(inputs: Map<String, Value>, options: RunOptions) -> RunResult {
    let started = Instant::now();
    let events = EventBus::default();
    let run_id = Uuid::new_v4();

    match run_inner(inputs, &options, &events, run_id, started).await {
        Ok(result) => result,
        Err(error) => {
            let _ = events.publish(RunEvent::error(run_id, None, &error.to_string(), &[]));
            RunResult::failure(Map::new(), String::new(), started.elapsed().as_millis() as u64, Vec::new(), None, error.notes_line(&[]))
        }
    }
}

async fn run_inner(inputs: Map<String, Value>, options: &RunOptions, events: &EventBus, run_id: Uuid, started: Instant) -> Result<RunResult> {
    let pack = pack::load_and_validate(&options.run_dir)?;
    let inputs = pack.apply_input_defaults(inputs)?;
    let secrets = pack.secrets.clone();
    let secret_values: Vec<&str> = secrets.values().map(String::as_str).collect();

    let _ = events.publish(RunEvent::RunStarted { run_id, pack_id: pack.manifest.id.clone() });

    let mut snapshot_store = SnapshotStore::load(&pack.snapshot_file())?;
    let now = chrono::Utc::now().timestamp();
    let http_only = !options.skip_http_replay && snapshot::preflight_http_only_compatible(&pack.flow, &snapshot_store, now);

    let once_cache = take_once_cache(&pack.manifest.id, options.session_id.as_deref());
    let mut state = RunState::new(inputs, once_cache);

    let (outcome, current_url) = if http_only {
        let outcome = run_http_only(&pack, &mut state, &secrets, &snapshot_store).await;
        (outcome, String::new())
    } else if options.is_cancelled() {
        (Err(crate::interpreter::InterpretError { error: ShowRunError::Cancelled, failed_step_id: None }), String::new())
    } else {
        run_with_browser(&pack, &mut state, &secrets, events, run_id, &mut snapshot_store, options).await
    };

    let _ = snapshot_store.save();

    let duration_ms = started.elapsed().as_millis() as u64;
    let collectibles = state.collectibles.clone();
    let hints = state.hints.clone();
    store_once_cache(&pack.manifest.id, options.session_id.as_deref(), state.into_once_cache());

    let result = match outcome {
        Ok(()) => {
            let _ = events.publish(RunEvent::RunFinished { run_id, success: true, duration_ms });
            RunResult::success(collectibles, current_url, duration_ms, hints)
        }
        Err(interpret_error) => {
            let _ = events.publish(RunEvent::RunFinished { run_id, success: false, duration_ms });
            RunResult::failure(
                collectibles,
                current_url,
                duration_ms,
                hints,
                interpret_error.failed_step_id,
                interpret_error.error.notes_line(&secret_values),
            )
        }
    };
    Ok(result)
}

async fn run_http_only(
    pack: &Pack,
    state: &mut RunState,
    secrets: &HashMap<String, String>,
    store: &SnapshotStore,
) -> std::result::Result<(), crate::interpreter::InterpretError> {
    let client = reqwest::Client::new();
    crate::snapshot::http_replay::run_flow(&pack.flow, state, store, secrets, &client)
        .await
        .map_err(|decline| crate::interpreter::InterpretError { failed_step_id: decline.step_id.clone(), error: ShowRunError::from(decline) })
}

/// `options.profile_id`, when set, names the profile directory to use
/// regardless of the pack's own `persistence.profile.name` — letting one pack
/// definition serve multiple accounts.
fn effective_persistence(pack: &Pack, options: &RunOptions) -> Persistence {
    match &options.profile_id {
        Some(name) => Persistence::Profile { name: name.clone() },
        None => pack.manifest.browser.persistence.clone(),
    }
}

async fn run_with_browser(
    pack: &Pack,
    state: &mut RunState,
    secrets: &HashMap<String, String>,
    events: &EventBus,
    run_id: Uuid,
    snapshot_store: &mut SnapshotStore,
    options: &RunOptions,
) -> (std::result::Result<(), crate::interpreter::InterpretError>, String) {
    let persistence = effective_persistence(pack, options);
    let active_profile = match ActiveProfile::resolve(&persistence, &pack.dir, options.session_id.as_deref()) {
        Ok(profile) => profile,
        Err(error) => return (Err(crate::interpreter::InterpretError { error, failed_step_id: None }), String::new()),
    };

    let headless = options.headless && pack.manifest.browser.headless;

    let launch_result = if let Some(url) = &options.cdp_url {
        match Browser::connect(url).await {
            Ok((browser, mut handler)) => {
                let handler_task = tokio::spawn(async move {
                    use futures::StreamExt;
                    while handler.next().await.is_some() {}
                });
                Ok((browser, handler_task, active_profile.path().to_path_buf()))
            }
            Err(e) => Err(anyhow::anyhow!("connecting to {url}: {e}")),
        }
    } else {
        launch_browser(pack.manifest.browser.engine, headless, Some(active_profile.path().to_path_buf())).await
    };

    let (browser, handler_task, _data_dir) = match launch_result {
        Ok(triple) => triple,
        Err(e) => {
            return (
                Err(crate::interpreter::InterpretError { error: ShowRunError::internal(format!("launching browser: {e}"), &[]), failed_step_id: None }),
                String::new(),
            );
        }
    };

    let first_page = match browser.new_page("about:blank").await {
        Ok(page) => page,
        Err(e) => {
            return (
                Err(crate::interpreter::InterpretError { error: ShowRunError::internal(format!("opening initial tab: {e}"), &[]), failed_step_id: None }),
                String::new(),
            );
        }
    };

    let mut driver = match ChromiumDriver::attach(browser, handler_task, first_page).await {
        Ok(driver) => driver,
        Err(error) => return (Err(crate::interpreter::InterpretError { error, failed_step_id: None }), String::new()),
    };

    let mut auth = AuthResilienceController::new(pack.manifest.auth.clone());

    let run_future = crate::interpreter::run_flow(run_id, &pack.flow, state, &mut driver, secrets, events, Some(snapshot_store), Some(&mut auth));

    let outcome = match &options.cancellation_token {
        Some(token) => tokio::select! {
            result = run_future => result,
            () = token.cancelled() => Err(crate::interpreter::InterpretError { error: ShowRunError::Cancelled, failed_step_id: None }),
        },
        None => run_future.await,
    };

    let current_url = driver.current_url();
    let _ = driver.close().await;
    (outcome, current_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_cache_key_distinguishes_sessions() {
        assert_ne!(once_cache_key("pack-a", Some("s1")), once_cache_key("pack-a", Some("s2")));
        assert_ne!(once_cache_key("pack-a", None), once_cache_key("pack-b", None));
    }

    #[test]
    fn take_then_store_round_trips_a_cache() {
        let mut cache = OnceCache::new();
        cache.insert("s1".to_string(), crate::interpreter::state::OnceRecord::default());
        store_once_cache("pack-a", Some("session-1"), cache);
        let restored = take_once_cache("pack-a", Some("session-1"));
        assert!(restored.contains_key("s1"));
        // Taken caches are removed; a second take starts fresh.
        assert!(take_once_cache("pack-a", Some("session-1")).is_empty());
    }
}
