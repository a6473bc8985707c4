// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Built-in development backend.
//!
//! A self-contained [`AgentSession`] used when no real agent backend is
//! linked in: prompts echo their input as streamed events, state commands
//! mutate a small in-memory record, and reads report it. This is what the
//! shipped binary serves; production deployments inject their own
//! [`SessionFactory`].

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::agent::{AgentCall, AgentError, AgentSession, CreateSpec, SessionFactory};
use crate::command::{AbortKind, CommandKind};
use crate::manager::epoch_ms;

const MODELS: [&str; 3] = ["echo-small", "echo-large", "echo-turbo"];
const THINKING_LEVELS: [&str; 4] = ["off", "low", "medium", "high"];
const THEMES: [&str; 2] = ["dark", "light"];

struct EchoState {
    session_id: String,
    name: Option<String>,
    model: String,
    thinking_level: String,
    auto_compaction: bool,
    auto_retry: bool,
    messages: Vec<Value>,
}

pub struct EchoSession {
    state: parking_lot::Mutex<EchoState>,
    events_tx: broadcast::Sender<Value>,
}

impl EchoSession {
    fn new(spec: &CreateSpec) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(256);
        let model = spec
            .payload
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(MODELS[0])
            .to_owned();
        Arc::new(Self {
            state: parking_lot::Mutex::new(EchoState {
                session_id: spec.session_id.clone(),
                name: None,
                model,
                thinking_level: "off".to_owned(),
                auto_compaction: true,
                auto_retry: true,
                messages: Vec::new(),
            }),
            events_tx,
        })
    }

    fn prompt(&self, text: &str) -> Value {
        let reply = format!("echo: {text}");
        {
            let mut state = self.state.lock();
            state.messages.push(json!({"role": "user", "text": text, "atMs": epoch_ms()}));
            state.messages.push(json!({"role": "assistant", "text": reply, "atMs": epoch_ms()}));
        }
        let _ = self.events_tx.send(json!({"kind": "message_start", "role": "assistant"}));
        let _ = self.events_tx.send(json!({"kind": "text_delta", "text": reply}));
        let _ = self.events_tx.send(json!({"kind": "message_end"}));
        json!({ "text": reply })
    }

    fn cycle<const N: usize>(options: [&str; N], current: &str) -> String {
        let at = options.iter().position(|o| *o == current).unwrap_or(0);
        options[(at + 1) % N].to_owned()
    }
}

impl AgentSession for EchoSession {
    fn provider(&self) -> String {
        "echo".to_owned()
    }

    fn dispatch(&self, call: AgentCall) -> BoxFuture<'_, Result<Value, AgentError>> {
        async move {
            let text = call.payload.get("text").and_then(Value::as_str).unwrap_or_default();
            match call.kind {
                CommandKind::Prompt | CommandKind::Steer | CommandKind::FollowUp => {
                    Ok(self.prompt(text))
                }
                CommandKind::Abort
                | CommandKind::AbortCompaction
                | CommandKind::AbortRetry
                | CommandKind::AbortBash => Ok(json!({ "aborted": true })),
                CommandKind::GetState => {
                    let state = self.state.lock();
                    Ok(json!({
                        "sessionId": state.session_id,
                        "name": state.name,
                        "model": state.model,
                        "thinkingLevel": state.thinking_level,
                        "autoCompaction": state.auto_compaction,
                        "autoRetry": state.auto_retry,
                        "messageCount": state.messages.len(),
                    }))
                }
                CommandKind::GetMessages => {
                    Ok(json!({ "messages": self.state.lock().messages.clone() }))
                }
                CommandKind::GetSessionStats => {
                    let state = self.state.lock();
                    Ok(json!({
                        "messages": state.messages.len(),
                        "model": state.model,
                    }))
                }
                CommandKind::SetModel => {
                    let model = call
                        .payload
                        .get("model")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    if !MODELS.contains(&model) {
                        return Err(AgentError::Failed(format!("unknown model {model:?}")));
                    }
                    self.state.lock().model = model.to_owned();
                    Ok(json!({ "model": model }))
                }
                CommandKind::CycleModel => {
                    let mut state = self.state.lock();
                    state.model = Self::cycle(MODELS, &state.model);
                    Ok(json!({ "model": state.model }))
                }
                CommandKind::SetThinkingLevel => {
                    let level = call
                        .payload
                        .get("level")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    self.state.lock().thinking_level = level.to_owned();
                    Ok(json!({ "thinkingLevel": level }))
                }
                CommandKind::CycleThinkingLevel => {
                    let mut state = self.state.lock();
                    state.thinking_level = Self::cycle(THINKING_LEVELS, &state.thinking_level);
                    Ok(json!({ "thinkingLevel": state.thinking_level }))
                }
                CommandKind::SetAutoCompaction => {
                    let enabled = call.payload.get("enabled").and_then(Value::as_bool);
                    self.state.lock().auto_compaction = enabled.unwrap_or(true);
                    Ok(json!({ "autoCompaction": enabled.unwrap_or(true) }))
                }
                CommandKind::SetAutoRetry => {
                    let enabled = call.payload.get("enabled").and_then(Value::as_bool);
                    self.state.lock().auto_retry = enabled.unwrap_or(true);
                    Ok(json!({ "autoRetry": enabled.unwrap_or(true) }))
                }
                CommandKind::SetSessionName => {
                    let name = call.payload.get("name").and_then(Value::as_str);
                    self.state.lock().name = name.map(str::to_owned);
                    Ok(json!({ "name": name }))
                }
                CommandKind::Compact => {
                    let mut state = self.state.lock();
                    let dropped = state.messages.len();
                    state.messages.clear();
                    Ok(json!({ "compacted": true, "droppedMessages": dropped }))
                }
                CommandKind::Bash => {
                    let command =
                        call.payload.get("command").and_then(Value::as_str).unwrap_or_default();
                    Ok(json!({ "command": command, "exitCode": 0, "output": "" }))
                }
                CommandKind::ExportHtml => {
                    let state = self.state.lock();
                    Ok(json!({
                        "html": format!("<html><body>{} messages</body></html>", state.messages.len()),
                    }))
                }
                CommandKind::NewSession => {
                    self.state.lock().messages.clear();
                    Ok(json!({ "reset": true }))
                }
                CommandKind::SwitchSessionFile | CommandKind::Fork => {
                    let path = call.payload.get("path").and_then(Value::as_str);
                    Ok(json!({ "path": path }))
                }
                CommandKind::ListModels => Ok(json!({ "models": MODELS })),
                CommandKind::ListThemes => Ok(json!({ "themes": THEMES })),
                other => Err(AgentError::Failed(format!(
                    "{other} is not a session command"
                ))),
            }
        }
        .boxed()
    }

    fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.events_tx.subscribe()
    }

    fn abort(&self, kind: AbortKind) -> BoxFuture<'_, ()> {
        let _ = self.events_tx.send(json!({"kind": "aborted", "what": format!("{kind:?}")}));
        async {}.boxed()
    }

    fn dispose(&self) -> BoxFuture<'_, ()> {
        async {}.boxed()
    }
}

/// Factory for the development backend.
#[derive(Default)]
pub struct EchoFactory;

impl EchoFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl SessionFactory for EchoFactory {
    fn create(&self, spec: &CreateSpec) -> BoxFuture<'_, Result<Arc<dyn AgentSession>, String>> {
        let spec = spec.clone();
        async move { Ok(EchoSession::new(&spec) as Arc<dyn AgentSession>) }.boxed()
    }
}

#[cfg(test)]
#[path = "echo_tests.rs"]
mod tests;
