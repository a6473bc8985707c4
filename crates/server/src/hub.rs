// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscriber hub: client registry and frame fan-out.
//!
//! Transports register an outbound sender per client; the manager broadcasts
//! lifecycle frames to everyone and session events to subscribed clients.
//! Broadcasts iterate over a snapshot taken under the lock so a subscriber
//! removed mid-broadcast cannot invalidate iteration, and per-subscriber
//! send failures are swallowed — one broken client never blocks the rest.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::ServerFrame;

struct Subscriber {
    sender: mpsc::UnboundedSender<ServerFrame>,
    subscriptions: HashSet<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubMetrics {
    pub subscribers: usize,
    pub session_subscriptions: usize,
}

#[derive(Default)]
pub struct SubscriberHub {
    inner: parking_lot::Mutex<HashMap<String, Subscriber>>,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) a client's outbound channel.
    pub fn register(&self, client_id: &str, sender: mpsc::UnboundedSender<ServerFrame>) {
        let mut map = self.inner.lock();
        match map.get_mut(client_id) {
            Some(existing) => existing.sender = sender,
            None => {
                map.insert(
                    client_id.to_owned(),
                    Subscriber { sender, subscriptions: HashSet::new() },
                );
            }
        }
    }

    pub fn unregister(&self, client_id: &str) {
        self.inner.lock().remove(client_id);
    }

    /// Subscribe a client to a session's event stream.
    /// Returns false for unknown clients.
    pub fn subscribe(&self, client_id: &str, session_id: &str) -> bool {
        let mut map = self.inner.lock();
        match map.get_mut(client_id) {
            Some(sub) => {
                sub.subscriptions.insert(session_id.to_owned());
                true
            }
            None => false,
        }
    }

    /// Drop a session from every client's subscription set (session deleted).
    pub fn remove_session(&self, session_id: &str) {
        let mut map = self.inner.lock();
        for sub in map.values_mut() {
            sub.subscriptions.remove(session_id);
        }
    }

    /// Send a frame to every registered client.
    pub fn broadcast_all(&self, frame: &ServerFrame) {
        let targets: Vec<(String, mpsc::UnboundedSender<ServerFrame>)> = {
            let map = self.inner.lock();
            map.iter().map(|(id, s)| (id.clone(), s.sender.clone())).collect()
        };
        for (client_id, sender) in targets {
            if sender.send(frame.clone()).is_err() {
                debug!(client = %client_id, "dropping frame for disconnected subscriber");
            }
        }
    }

    /// Send a frame to clients subscribed to `session_id`.
    pub fn broadcast_session(&self, session_id: &str, frame: &ServerFrame) {
        let targets: Vec<(String, mpsc::UnboundedSender<ServerFrame>)> = {
            let map = self.inner.lock();
            map.iter()
                .filter(|(_, s)| s.subscriptions.contains(session_id))
                .map(|(id, s)| (id.clone(), s.sender.clone()))
                .collect()
        };
        for (client_id, sender) in targets {
            if sender.send(frame.clone()).is_err() {
                debug!(client = %client_id, "dropping session frame for disconnected subscriber");
            }
        }
    }

    pub fn metrics(&self) -> HubMetrics {
        let map = self.inner.lock();
        HubMetrics {
            subscribers: map.len(),
            session_subscriptions: map.values().map(|s| s.subscriptions.len()).sum(),
        }
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
