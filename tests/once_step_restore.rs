//! End-to-end: a `once` step's writes are replayed from the once-cache on a
//! second run of the same flow, without dispatching the step again.

mod common;

use common::FakeDriver;
use serde_json::{json, Map};
use showrun_core::events::EventBus;
use showrun_core::interpreter::run_flow;
use showrun_core::interpreter::state::RunState;
use showrun_core::pack::flow::FlowDocument;
use uuid::Uuid;

#[tokio::test]
async fn once_step_is_skipped_and_restored_on_a_second_run() {
    let flow: FlowDocument = serde_json::from_value(json!({
        "flow": [
            {"id": "login", "type": "navigate", "params": {"url": "https://example.test/login"}, "once": true},
            {"id": "title", "type": "extract_title", "params": {"out": "page_title"}}
        ]
    }))
    .unwrap();

    let mut driver = FakeDriver::with_title("Dashboard");
    let secrets = std::collections::HashMap::new();
    let events = EventBus::new(16);

    let mut state = RunState::new(Map::new(), Default::default());
    run_flow(Uuid::new_v4(), &flow, &mut state, &mut driver, &secrets, &events, None, None).await.unwrap();
    assert_eq!(driver.navigate_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    let once_cache = state.into_once_cache();
    assert!(once_cache.contains_key("login"));

    // A fresh RunState carrying the persisted once-cache, as `runtime::run`
    // threads it through a session's next call.
    let mut second_state = RunState::new(Map::new(), once_cache);
    run_flow(Uuid::new_v4(), &flow, &mut second_state, &mut driver, &secrets, &events, None, None).await.unwrap();

    // `navigate` was not dispatched again; only the untagged `extract_title`
    // step ran a second time.
    assert_eq!(driver.navigate_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(second_state.collectibles.get("page_title"), Some(&json!("Dashboard")));
}
