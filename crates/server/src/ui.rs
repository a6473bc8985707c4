// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Extension UI request registry.
//!
//! Correlates server-initiated UI prompts (select, confirm, input, editor,
//! notify, status, widget, title) with the `extension_ui_response` commands
//! clients send back. Requests are bounded in count, individually timed out,
//! and settled exactly once — the pending-map removal is the arbiter when a
//! response races a timeout or a session deletion.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::protocol::Command;

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub request_timeout: Duration,
    pub max_pending: usize,
}

/// Outcome delivered to whoever awaits a UI request.
pub type UiResult = Result<Value, String>;

struct PendingRequest {
    session_id: String,
    method: String,
    tx: oneshot::Sender<UiResult>,
}

/// A created request: the opaque id to put on the wire, the receiver for the
/// eventual response, and the timeout to advertise.
pub struct UiTicket {
    pub request_id: String,
    pub rx: oneshot::Receiver<UiResult>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiMetrics {
    pub pending_requests: usize,
    pub max_pending: usize,
}

pub struct ExtensionUiRegistry {
    config: UiConfig,
    inner: std::sync::Arc<parking_lot::Mutex<HashMap<String, PendingRequest>>>,
}

impl ExtensionUiRegistry {
    pub fn new(config: UiConfig) -> Self {
        Self { config, inner: std::sync::Arc::new(parking_lot::Mutex::new(HashMap::new())) }
    }

    /// Enqueue a pending UI request. Returns `None` when the pending cap is
    /// reached. The request times out on its own; callers only await the
    /// ticket's receiver.
    pub fn create_request(
        &self,
        session_id: &str,
        method: &str,
        timeout_override: Option<Duration>,
    ) -> Option<UiTicket> {
        let timeout = timeout_override.unwrap_or(self.config.request_timeout);
        let (tx, rx) = oneshot::channel();
        let request_id = {
            let mut map = self.inner.lock();
            if map.len() >= self.config.max_pending {
                debug!(session = session_id, method, "UI request rejected: pending cap reached");
                return None;
            }
            let epoch_ms = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64;
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            let request_id = format!("{session_id}:{epoch_ms}:{}", &suffix[..8]);
            map.insert(
                request_id.clone(),
                PendingRequest {
                    session_id: session_id.to_owned(),
                    method: method.to_owned(),
                    tx,
                },
            );
            request_id
        };

        // Individual timeout; settling a request that already resolved is a
        // no-op because the map entry is gone.
        let registry = std::sync::Arc::clone(&self.inner);
        let timeout_id = request_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(pending) = registry.lock().remove(&timeout_id) {
                let _ = pending
                    .tx
                    .send(Err(format!("UI request {} timed out", pending.method)));
            }
        });

        Some(UiTicket { request_id, rx, timeout })
    }

    /// Route a client's `extension_ui_response` to its pending request.
    pub fn handle_response(&self, cmd: &Command) -> Result<(), String> {
        let Some(request_id) = cmd.payload_str("requestId") else {
            return Err("extension_ui_response requires a requestId".to_owned());
        };
        let claimed_session =
            cmd.session_id.as_deref().or_else(|| cmd.payload_str("sessionId"));

        let pending = {
            let mut map = self.inner.lock();
            let Some(pending) = map.get(request_id) else {
                return Err(format!("no pending UI request {request_id:?}"));
            };
            if let Some(session) = claimed_session {
                if session != pending.session_id {
                    return Err(format!(
                        "UI request {request_id:?} belongs to a different session"
                    ));
                }
            }
            // Removal marks the request settled; a racing timeout now no-ops.
            map.remove(request_id)
        };

        if let Some(pending) = pending {
            let mut value = serde_json::Map::new();
            for (k, v) in &cmd.payload {
                if k != "requestId" && k != "sessionId" {
                    value.insert(k.clone(), v.clone());
                }
            }
            let _ = pending.tx.send(Ok(Value::Object(value)));
        }
        Ok(())
    }

    /// Reject every pending request for a deleted session.
    pub fn cancel_session_requests(&self, session_id: &str) {
        let cancelled: Vec<PendingRequest> = {
            let mut map = self.inner.lock();
            let ids: Vec<String> = map
                .iter()
                .filter(|(_, p)| p.session_id == session_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter().filter_map(|id| map.remove(&id)).collect()
        };
        for pending in cancelled {
            let _ = pending.tx.send(Err(format!(
                "session {session_id} deleted with UI request outstanding"
            )));
        }
    }

    /// Reject everything (shutdown).
    pub fn cancel_all(&self) {
        let cancelled: Vec<PendingRequest> = {
            let mut map = self.inner.lock();
            map.drain().map(|(_, p)| p).collect()
        };
        for pending in cancelled {
            let _ = pending.tx.send(Err("server shutting down".to_owned()));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn metrics(&self) -> UiMetrics {
        UiMetrics { pending_requests: self.pending_count(), max_pending: self.config.max_pending }
    }
}

#[cfg(test)]
#[path = "ui_tests.rs"]
mod tests;
