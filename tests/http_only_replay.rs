//! End-to-end: a flow with no DOM-coupled steps and a fresh snapshot runs
//! entirely through `snapshot::http_replay`, with no browser involved.

mod common;

use serde_json::{json, Map};
use showrun_core::interpreter::state::{OnceCache, RunState};
use showrun_core::pack::flow::{FlowDocument, ResponseAs};
use showrun_core::snapshot::{self, RequestSnapshot, SnapshotStore};

fn snapshot_store_with(step_id: &str, url_template: String) -> SnapshotStore {
    let dir = tempfile::tempdir().unwrap();
    let mut store = SnapshotStore::load(&dir.path().join("snapshots.json")).unwrap();
    store.put(
        step_id.to_string(),
        RequestSnapshot {
            method: "GET".into(),
            url_template,
            headers_template: std::collections::HashMap::new(),
            body_template: None,
            captured_at: 0,
            ttl_secs: None,
            expected_status: Some(200),
            expected_content_type: Some("application/json".into()),
            expected_keys: None,
            response_as: ResponseAs::Json,
            response_path: Some("items".into()),
        },
    );
    store
}

#[tokio::test]
async fn replays_purely_from_snapshot_with_no_browser() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/api/items")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"items":["a","b"]}"#)
        .create_async()
        .await;

    let store = snapshot_store_with("replay", format!("{}/api/items", server.url()));

    let flow: FlowDocument = serde_json::from_value(json!({
        "flow": [{
            "id": "replay",
            "type": "network_replay",
            "params": {"request_id": "unused", "out": "items", "response": {"as": "json", "path": "items"}}
        }]
    }))
    .unwrap();

    assert!(snapshot::preflight_http_only_compatible(&flow, &store, 0));

    let mut state = RunState::new(Map::new(), OnceCache::new());
    let secrets = std::collections::HashMap::new();
    let client = reqwest::Client::new();

    snapshot::http_replay::run_flow(&flow, &mut state, &store, &secrets, &client).await.unwrap();
    assert_eq!(state.collectibles.get("items"), Some(&json!(["a", "b"])));
}

#[tokio::test]
async fn unexpected_status_declines_with_step_id() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server.mock("GET", "/api/items").with_status(500).create_async().await;

    let store = snapshot_store_with("replay", format!("{}/api/items", server.url()));
    let flow: FlowDocument = serde_json::from_value(json!({
        "flow": [{
            "id": "replay",
            "type": "network_replay",
            "params": {"request_id": "unused", "out": "items", "response": {"as": "json", "path": "items"}}
        }]
    }))
    .unwrap();

    let mut state = RunState::new(Map::new(), OnceCache::new());
    let secrets = std::collections::HashMap::new();
    let client = reqwest::Client::new();

    let decline = snapshot::http_replay::run_flow(&flow, &mut state, &store, &secrets, &client).await.unwrap_err();
    assert_eq!(decline.step_id.as_deref(), Some("replay"));
}
