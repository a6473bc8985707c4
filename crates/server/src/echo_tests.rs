// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn session() -> Arc<EchoSession> {
    let spec = CreateSpec {
        session_id: "s1".to_owned(),
        working_dir: None,
        payload: serde_json::Map::new(),
        resume: false,
    };
    EchoSession::new(&spec)
}

fn call(kind: CommandKind, payload: Value) -> AgentCall {
    let payload = match payload {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    AgentCall { kind, payload }
}

#[tokio::test]
async fn prompt_echoes_and_streams() {
    let session = session();
    let mut events = session.subscribe();
    let data = session
        .dispatch(call(CommandKind::Prompt, json!({"text": "hi"})))
        .await
        .expect("prompt ok");
    assert_eq!(data["text"], "echo: hi");

    let first = events.recv().await.expect("event");
    assert_eq!(first["kind"], "message_start");

    let messages = session
        .dispatch(call(CommandKind::GetMessages, json!({})))
        .await
        .expect("messages ok");
    assert_eq!(messages["messages"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn model_cycling_walks_the_list() {
    let session = session();
    let state = session.dispatch(call(CommandKind::GetState, json!({}))).await.expect("state");
    assert_eq!(state["model"], "echo-small");

    let next = session.dispatch(call(CommandKind::CycleModel, json!({}))).await.expect("cycle");
    assert_eq!(next["model"], "echo-large");

    let err = session
        .dispatch(call(CommandKind::SetModel, json!({"model": "gpt-42"})))
        .await
        .expect_err("unknown model");
    assert!(err.message().contains("gpt-42"));
}

#[tokio::test]
async fn compact_clears_history() {
    let session = session();
    let _ = session.dispatch(call(CommandKind::Prompt, json!({"text": "a"}))).await;
    let out = session.dispatch(call(CommandKind::Compact, json!({}))).await.expect("compact");
    assert_eq!(out["droppedMessages"], 2);
    let state = session.dispatch(call(CommandKind::GetState, json!({}))).await.expect("state");
    assert_eq!(state["messageCount"], 0);
}

#[tokio::test]
async fn factory_builds_sessions_with_requested_model() {
    let factory = EchoFactory::new();
    let mut payload = serde_json::Map::new();
    payload.insert("model".to_owned(), json!("echo-turbo"));
    let spec = CreateSpec {
        session_id: "s9".to_owned(),
        working_dir: None,
        payload,
        resume: false,
    };
    let agent = factory.create(&spec).await.expect("created");
    assert_eq!(agent.provider(), "echo");
    let state = agent.dispatch(call(CommandKind::GetState, json!({}))).await.expect("state");
    assert_eq!(state["model"], "echo-turbo");
}
