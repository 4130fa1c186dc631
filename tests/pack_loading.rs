//! End-to-end: `load_and_validate` reads a pack directory off disk, resolves
//! secrets, and catches a structural problem the unit-level validator tests
//! don't exercise against a real loaded `Pack`.

mod common;

use common::write_pack;
use serde_json::json;
use showrun_core::error::ShowRunError;
use showrun_core::pack::{self, loader::Pack};

#[test]
fn load_and_validate_succeeds_for_a_well_formed_pack() {
    let dir = tempfile::tempdir().unwrap();
    write_pack(
        dir.path(),
        &json!({"id": "demo-pack", "version": "1.0.0"}),
        &json!({
            "collectibles": [{"name": "title", "type": "string"}],
            "flow": [{"id": "title", "type": "extract_title", "params": {"out": "title"}}]
        }),
    );

    let pack = pack::load_and_validate(dir.path()).unwrap();
    assert_eq!(pack.manifest.id, "demo-pack");
    assert_eq!(pack.flow.flow.len(), 1);
}

#[test]
fn load_and_validate_rejects_a_collectible_nobody_writes() {
    let dir = tempfile::tempdir().unwrap();
    write_pack(
        dir.path(),
        &json!({"id": "demo-pack", "version": "1.0.0"}),
        &json!({
            "collectibles": [{"name": "never_written", "type": "string"}],
            "flow": []
        }),
    );

    let err = pack::load_and_validate(dir.path()).unwrap_err();
    assert!(matches!(err, ShowRunError::FlowValidationError(msg) if msg.contains("never written")));
}

#[test]
fn secrets_file_alongside_the_pack_is_resolved_into_pack_secrets() {
    let dir = tempfile::tempdir().unwrap();
    write_pack(
        dir.path(),
        &json!({
            "id": "demo-pack",
            "version": "1.0.0",
            "secrets": [{"name": "API_KEY", "required": true}]
        }),
        &json!({"flow": []}),
    );
    std::fs::write(
        dir.path().join(".secrets.json"),
        serde_json::to_string(&json!({"version": 1, "secrets": {"API_KEY": "sk-test"}})).unwrap(),
    )
    .unwrap();

    let pack = Pack::load(dir.path()).unwrap();
    assert_eq!(pack.secrets.get("API_KEY"), Some(&"sk-test".to_string()));
}
