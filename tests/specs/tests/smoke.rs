// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `apiary` binary and exercise
//! the stdio transport.

use apiary_specs::ApiaryProcess;
use serde_json::json;

#[test]
fn greets_with_server_ready() -> anyhow::Result<()> {
    let mut apiary = ApiaryProcess::start()?;
    let ready = apiary.read_frame("server_ready")?;
    assert_eq!(ready["protocolVersion"], "1.0.0");
    assert_eq!(ready["transports"], json!(["stdio"]));
    Ok(())
}

#[test]
fn health_and_metrics_respond() -> anyhow::Result<()> {
    let mut apiary = ApiaryProcess::start()?;
    let _ = apiary.read_frame("server_ready")?;

    let health = apiary.request(&json!({"type": "health_check", "id": "h1"}))?;
    assert_eq!(health["success"], true);
    assert_eq!(health["data"]["status"], "running");

    let metrics = apiary.request(&json!({"type": "get_metrics", "id": "m1"}))?;
    assert_eq!(metrics["success"], true);
    assert!(metrics["data"]["governor"]["sessionCount"].is_number());
    Ok(())
}

#[test]
fn session_lifecycle_over_stdio() -> anyhow::Result<()> {
    let mut apiary = ApiaryProcess::start()?;
    let _ = apiary.read_frame("server_ready")?;

    let created = apiary.request(&json!({
        "type": "create_session", "sessionId": "smoke", "id": "c1"
    }))?;
    assert_eq!(created["success"], true, "create failed: {created}");
    assert_eq!(created["sessionVersion"], 0);

    let prompted = apiary.request(&json!({
        "type": "prompt", "sessionId": "smoke", "id": "p1", "text": "hello"
    }))?;
    assert_eq!(prompted["success"], true);
    assert_eq!(prompted["data"]["text"], "echo: hello");
    assert_eq!(prompted["sessionVersion"], 1);

    // The same id replays without re-executing.
    let replayed = apiary.request(&json!({
        "type": "prompt", "sessionId": "smoke", "id": "p1", "text": "hello"
    }))?;
    assert_eq!(replayed["replayed"], true);
    assert_eq!(replayed["data"]["text"], "echo: hello");

    let deleted = apiary.request(&json!({
        "type": "delete_session", "sessionId": "smoke", "id": "d1"
    }))?;
    assert_eq!(deleted["success"], true);
    Ok(())
}

#[test]
fn invalid_input_is_rejected_structurally() -> anyhow::Result<()> {
    let mut apiary = ApiaryProcess::start()?;
    let _ = apiary.read_frame("server_ready")?;

    let parse_error = apiary.request(&json!("not an object"))?;
    assert_eq!(parse_error["success"], false);
    assert_eq!(parse_error["command"], "unknown");

    let missing_session = apiary.request(&json!({"type": "get_state", "id": "v1"}))?;
    assert_eq!(missing_session["success"], false);

    Ok(())
}

#[test]
fn stdin_eof_shuts_the_server_down() -> anyhow::Result<()> {
    let mut apiary = ApiaryProcess::start()?;
    let _ = apiary.read_frame("server_ready")?;
    let status = apiary.finish()?;
    assert!(status.success(), "clean exit after EOF, got {status:?}");
    Ok(())
}
