// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transports: thin wire adapters over the session manager.
//!
//! Both transports carry the same JSON documents — the socket transport in
//! length-prefixed binary frames, the stdio transport in newline-delimited
//! lines. Each connection is a select loop pairing an inbound frame stream
//! with an outbound frame channel registered on the subscriber hub.
//! Commands are submitted in arrival order (the manager's synchronous
//! pipeline prefix runs inline) and completed in detached tasks so a
//! dropped connection never cancels an outcome-store write.

pub mod socket;
pub mod stdio;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::manager::SessionManager;
use crate::protocol::{decode_command, Response, ServerFrame};

/// Per-connection command intake shared by both transports.
pub struct Connection {
    manager: Arc<SessionManager>,
    out_tx: mpsc::UnboundedSender<ServerFrame>,
    /// Hub keys this connection registered; all removed on drop.
    registered: Vec<String>,
}

impl Connection {
    /// Register a new connection on the hub and greet it with
    /// `server_ready`.
    pub fn open(
        manager: Arc<SessionManager>,
        label: &str,
        ready: ServerFrame,
    ) -> (Self, mpsc::UnboundedReceiver<ServerFrame>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let conn_id = format!("conn:{label}:{}", uuid::Uuid::new_v4().simple());
        manager.hub.register(&conn_id, out_tx.clone());
        let _ = out_tx.send(ready);
        (Self { manager, out_tx, registered: vec![conn_id] }, out_rx)
    }

    /// Handle one inbound frame: size admission, decode, client aliasing,
    /// ordered submission, detached completion.
    pub fn accept_frame(&mut self, raw: &[u8]) {
        if let Err(reason) = self.manager.governor.can_accept_message(raw.len()) {
            let _ = self.out_tx.send(ServerFrame::from(Response::parse_error(reason)));
            return;
        }
        let cmd = match decode_command(raw) {
            Ok(cmd) => cmd,
            Err(error_response) => {
                let _ = self.out_tx.send(ServerFrame::from(error_response));
                return;
            }
        };

        // A command naming a clientId binds that identity to this
        // connection so session subscriptions and UI prompts reach it.
        if let Some(client_id) = cmd.client_id.clone() {
            if !self.registered.contains(&client_id) {
                self.manager.hub.register(&client_id, self.out_tx.clone());
                self.registered.push(client_id);
            }
        }

        let future = self.manager.submit_command(cmd);
        let out_tx = self.out_tx.clone();
        tokio::spawn(async move {
            let response = future.await;
            if out_tx.send(ServerFrame::from(response)).is_err() {
                debug!("connection closed before response delivery");
            }
        });
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for key in &self.registered {
            self.manager.hub.unregister(key);
        }
        self.manager.governor.release_connection_slot();
    }
}

/// Encode one outbound frame as JSON bytes.
pub fn encode_frame(frame: &ServerFrame) -> Vec<u8> {
    serde_json::to_vec(frame).unwrap_or_else(|e| {
        // Frames are plain data; encoding cannot realistically fail. Keep a
        // structured fallback rather than dropping the frame silently.
        serde_json::to_vec(&ServerFrame::from(Response::parse_error(format!(
            "frame encoding failed: {e}"
        ))))
        .unwrap_or_default()
    })
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
