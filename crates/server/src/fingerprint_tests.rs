// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use proptest::prelude::*;

fn cmd(raw: serde_json::Value) -> Command {
    serde_json::from_str(&raw.to_string()).expect("valid command json")
}

#[test]
fn retry_identity_fields_are_excluded() {
    let base = cmd(serde_json::json!({"type": "prompt", "sessionId": "s1", "text": "hi"}));
    let with_id = cmd(serde_json::json!({
        "type": "prompt", "sessionId": "s1", "text": "hi", "id": "c-42"
    }));
    let with_key = cmd(serde_json::json!({
        "type": "prompt", "sessionId": "s1", "text": "hi", "idempotencyKey": "k-1"
    }));
    let with_client = cmd(serde_json::json!({
        "type": "prompt", "sessionId": "s1", "text": "hi", "clientId": "cli-7"
    }));

    let fp = fingerprint(&base);
    assert_eq!(fp, fingerprint(&with_id));
    assert_eq!(fp, fingerprint(&with_key));
    assert_eq!(fp, fingerprint(&with_client));
}

#[test]
fn semantic_fields_are_included() {
    let a = cmd(serde_json::json!({"type": "prompt", "sessionId": "s1", "text": "hi"}));
    let b = cmd(serde_json::json!({"type": "prompt", "sessionId": "s1", "text": "bye"}));
    let c = cmd(serde_json::json!({"type": "prompt", "sessionId": "s2", "text": "hi"}));
    let d = cmd(serde_json::json!({"type": "steer", "sessionId": "s1", "text": "hi"}));
    let fp = fingerprint(&a);
    assert_ne!(fp, fingerprint(&b));
    assert_ne!(fp, fingerprint(&c));
    assert_ne!(fp, fingerprint(&d));
}

#[test]
fn insertion_order_does_not_matter() {
    let a = cmd(serde_json::json!({
        "type": "bash", "sessionId": "s1", "command": "ls", "timeoutMs": 5
    }));
    let b: Command = serde_json::from_str(
        r#"{"timeoutMs":5,"command":"ls","sessionId":"s1","type":"bash"}"#,
    )
    .expect("valid json");
    assert_eq!(fingerprint(&a), fingerprint(&b));
}

#[test]
fn nested_objects_are_canonicalized() {
    let a: Command = serde_json::from_str(
        r#"{"type":"create_session","config":{"b":1,"a":{"y":2,"x":3}}}"#,
    )
    .expect("valid json");
    let b: Command = serde_json::from_str(
        r#"{"type":"create_session","config":{"a":{"x":3,"y":2},"b":1}}"#,
    )
    .expect("valid json");
    assert_eq!(fingerprint(&a), fingerprint(&b));
}

#[test]
fn unspecified_fields_are_omitted_not_defaulted() {
    let explicit_null = cmd(serde_json::json!({
        "type": "get_state", "sessionId": "s1", "detail": null
    }));
    let absent = cmd(serde_json::json!({"type": "get_state", "sessionId": "s1"}));
    assert_ne!(fingerprint(&explicit_null), fingerprint(&absent));
}

#[test]
fn depends_on_order_is_semantic() {
    let a = cmd(serde_json::json!({
        "type": "get_state", "sessionId": "s1", "id": "x", "dependsOn": ["a", "b"]
    }));
    let b = cmd(serde_json::json!({
        "type": "get_state", "sessionId": "s1", "id": "x", "dependsOn": ["b", "a"]
    }));
    assert_ne!(fingerprint(&a), fingerprint(&b));
}

#[test]
fn canonical_form_is_stable_json() {
    let c = cmd(serde_json::json!({
        "type": "prompt", "sessionId": "s1", "text": "a \"quoted\" string\n"
    }));
    let fp = fingerprint(&c);
    let parsed: serde_json::Value =
        serde_json::from_str(fp.canonical()).expect("canonical form must be valid JSON");
    assert_eq!(parsed["type"], "prompt");
    assert_eq!(parsed["text"], "a \"quoted\" string\n");
    assert_eq!(fp.digest().len(), 64);
}

proptest! {
    #[test]
    fn digest_ignores_retry_identity(
        text in ".{0,64}",
        id in proptest::option::of("[a-z0-9]{1,16}"),
        key in proptest::option::of("[a-z0-9]{1,16}"),
    ) {
        let mut a = Command::new("prompt");
        a.session_id = Some("s1".to_owned());
        a.payload.insert("text".to_owned(), serde_json::Value::String(text));
        let mut b = a.clone();
        b.id = id;
        b.idempotency_key = key;
        prop_assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn equal_fingerprints_imply_equal_canonicals(text_a in ".{0,32}", text_b in ".{0,32}") {
        let mut a = Command::new("prompt");
        a.payload.insert("text".to_owned(), serde_json::Value::String(text_a.clone()));
        let mut b = Command::new("prompt");
        b.payload.insert("text".to_owned(), serde_json::Value::String(text_b.clone()));
        prop_assert_eq!(fingerprint(&a) == fingerprint(&b), text_a == text_b);
    }
}
