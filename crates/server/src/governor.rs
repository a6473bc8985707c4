// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Admission control: slot caps, message sizes, sliding-window rate limits,
//! and heartbeat-based zombie detection.
//!
//! Every decision is local, synchronous, and idempotent; failures come back
//! as values, never as panics or errors. Rate-window entries carry a
//! process-unique generation so a refund removes exactly the slot it paid
//! for — multiple admissions can share a millisecond timestamp, and
//! "remove the first entry with timestamp T" would corrupt counts.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::warn;

/// Governor tunables, derived from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    pub max_sessions: usize,
    pub max_connections: usize,
    pub max_message_bytes: usize,
    pub max_commands_per_minute: usize,
    pub max_ui_responses_per_minute: usize,
    pub rate_window: Duration,
    pub zombie_timeout: Duration,
    pub max_session_lifetime: Duration,
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    /// Admitted; `generation` addresses this admission for a later refund.
    Allowed { generation: u64 },
    Denied { reason: String },
}

impl RateDecision {
    pub fn generation(&self) -> Option<u64> {
        match self {
            Self::Allowed { generation } => Some(*generation),
            Self::Denied { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RateEntry {
    at: Instant,
    generation: u64,
}

#[derive(Default)]
struct Windows {
    per_session: HashMap<String, Vec<RateEntry>>,
    global: Vec<RateEntry>,
}

impl Windows {
    fn prune(&mut self, cutoff: Instant) {
        self.global.retain(|e| e.at > cutoff);
        self.per_session.retain(|_, entries| {
            entries.retain(|e| e.at > cutoff);
            !entries.is_empty()
        });
    }

    fn admit(
        &mut self,
        key: &str,
        per_session_max: usize,
        global_max: usize,
        generation: u64,
        now: Instant,
        label: &str,
    ) -> RateDecision {
        let session = self.per_session.entry(key.to_owned()).or_default();
        if session.len() >= per_session_max {
            return RateDecision::Denied {
                reason: format!("Rate limit exceeded for {key}: {per_session_max} {label} per minute"),
            };
        }
        if self.global.len() >= global_max {
            return RateDecision::Denied {
                reason: format!("Rate limit exceeded: {global_max} {label} per minute server-wide"),
            };
        }
        let entry = RateEntry { at: now, generation };
        session.push(entry);
        self.global.push(entry);
        RateDecision::Allowed { generation }
    }

    fn refund(&mut self, key: &str, generation: u64) {
        if let Some(entries) = self.per_session.get_mut(key) {
            entries.retain(|e| e.generation != generation);
            if entries.is_empty() {
                self.per_session.remove(key);
            }
        }
        self.global.retain(|e| e.generation != generation);
    }
}

struct GovernorInner {
    session_count: usize,
    connection_count: usize,
    double_unregister_errors: u64,
    generation: u64,
    commands: Windows,
    ui_responses: Windows,
    heartbeats: HashMap<String, Instant>,
    session_started: HashMap<String, Instant>,
}

/// Serializable governor snapshot for `get_metrics`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernorMetrics {
    pub session_count: usize,
    pub connection_count: usize,
    pub max_sessions: usize,
    pub max_connections: usize,
    pub double_unregister_errors: u64,
    pub command_window_entries: usize,
    pub ui_response_window_entries: usize,
    pub tracked_heartbeats: usize,
}

pub struct ResourceGovernor {
    config: GovernorConfig,
    inner: parking_lot::Mutex<GovernorInner>,
}

impl ResourceGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            inner: parking_lot::Mutex::new(GovernorInner {
                session_count: 0,
                connection_count: 0,
                double_unregister_errors: 0,
                generation: 0,
                commands: Windows::default(),
                ui_responses: Windows::default(),
                heartbeats: HashMap::new(),
                session_started: HashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    // -- Slot reservations ----------------------------------------------------

    /// Atomically reserve a session slot. `false` means the cap is reached.
    pub fn try_reserve_session_slot(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.session_count >= self.config.max_sessions {
            return false;
        }
        inner.session_count += 1;
        true
    }

    pub fn release_session_slot(&self) {
        let mut inner = self.inner.lock();
        if inner.session_count == 0 {
            inner.double_unregister_errors += 1;
            warn!("session slot released below zero; clamping");
            return;
        }
        inner.session_count -= 1;
    }

    pub fn try_reserve_connection_slot(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.connection_count >= self.config.max_connections {
            return false;
        }
        inner.connection_count += 1;
        true
    }

    pub fn release_connection_slot(&self) {
        let mut inner = self.inner.lock();
        if inner.connection_count == 0 {
            inner.double_unregister_errors += 1;
            warn!("connection slot released below zero; clamping");
            return;
        }
        inner.connection_count -= 1;
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().session_count
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().connection_count
    }

    // -- Message size ---------------------------------------------------------

    /// Check an encoded frame size against the ceiling.
    pub fn can_accept_message(&self, bytes: usize) -> Result<(), String> {
        if bytes > self.config.max_message_bytes {
            return Err(format!(
                "message of {bytes} bytes exceeds the {} byte limit",
                self.config.max_message_bytes
            ));
        }
        Ok(())
    }

    // -- Rate limiting --------------------------------------------------------

    /// Admit one command for `session_key` against both sliding windows.
    pub fn can_execute_command(&self, session_key: &str) -> RateDecision {
        self.admit(session_key, false)
    }

    /// Admit one UI-response command against the secondary (stricter) windows.
    pub fn can_execute_ui_response(&self, session_key: &str) -> RateDecision {
        self.admit(session_key, true)
    }

    fn admit(&self, session_key: &str, ui: bool) -> RateDecision {
        let now = Instant::now();
        let cutoff = now.checked_sub(self.config.rate_window).unwrap_or(now);
        let mut inner = self.inner.lock();
        inner.generation += 1;
        let generation = inner.generation;
        if ui {
            // The secondary UI window is a single global budget.
            inner.ui_responses.prune(cutoff);
            let max = self.config.max_ui_responses_per_minute;
            inner.ui_responses.admit(session_key, max, max, generation, now, "UI responses")
        } else {
            inner.commands.prune(cutoff);
            let per_session = self.config.max_commands_per_minute;
            // Global cap = per-session budget × max sessions: every session
            // slot keeps its full allowance, and the global window only
            // bites when traffic spreads past the session cap's reach
            // (see the `max_commands_per_minute` config docs).
            let global = per_session.saturating_mul(self.config.max_sessions.max(1));
            inner.commands.admit(session_key, per_session, global, generation, now, "commands")
        }
    }

    /// Remove the exact window entry identified by `generation`.
    pub fn refund_command(&self, session_key: &str, generation: u64) {
        self.inner.lock().commands.refund(session_key, generation);
    }

    pub fn refund_ui_response(&self, session_key: &str, generation: u64) {
        self.inner.lock().ui_responses.refund(session_key, generation);
    }

    // -- Heartbeats & lifetimes -----------------------------------------------

    pub fn record_heartbeat(&self, session_id: &str) {
        self.inner.lock().heartbeats.insert(session_id.to_owned(), Instant::now());
    }

    /// Track a session's creation time for lifetime expiry.
    pub fn record_session_start(&self, session_id: &str) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.session_started.insert(session_id.to_owned(), now);
        inner.heartbeats.insert(session_id.to_owned(), now);
    }

    /// Session ids whose last heartbeat is older than the zombie timeout.
    pub fn zombie_sessions(&self) -> Vec<String> {
        let cutoff = match Instant::now().checked_sub(self.config.zombie_timeout) {
            Some(c) => c,
            None => return Vec::new(),
        };
        let inner = self.inner.lock();
        inner
            .heartbeats
            .iter()
            .filter(|(_, at)| **at < cutoff)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Drop heartbeat entries for current zombies.
    pub fn cleanup_zombie_sessions(&self) {
        let zombies = self.zombie_sessions();
        let mut inner = self.inner.lock();
        for id in zombies {
            inner.heartbeats.remove(&id);
        }
    }

    /// Session ids that have exceeded the lifetime ceiling.
    pub fn expired_sessions(&self) -> Vec<String> {
        let cutoff = match Instant::now().checked_sub(self.config.max_session_lifetime) {
            Some(c) => c,
            None => return Vec::new(),
        };
        let inner = self.inner.lock();
        inner
            .session_started
            .iter()
            .filter(|(_, at)| **at < cutoff)
            .map(|(id, _)| id.clone())
            .collect()
    }

    // -- Cleanup --------------------------------------------------------------

    /// Evict rate-window entries older than the window. Called by the
    /// periodic sweep; admission checks also prune opportunistically.
    pub fn cleanup_rate_windows(&self) {
        let now = Instant::now();
        let cutoff = match now.checked_sub(self.config.rate_window) {
            Some(c) => c,
            None => return,
        };
        let mut inner = self.inner.lock();
        inner.commands.prune(cutoff);
        inner.ui_responses.prune(cutoff);
    }

    /// Purge per-session state for sessions no longer present.
    pub fn cleanup_stale_data(&self, active_session_ids: &[String]) {
        let mut inner = self.inner.lock();
        inner.commands.per_session.retain(|k, _| active_session_ids.iter().any(|a| a == k));
        inner.ui_responses.per_session.retain(|k, _| active_session_ids.iter().any(|a| a == k));
        inner.heartbeats.retain(|k, _| active_session_ids.iter().any(|a| a == k));
        inner.session_started.retain(|k, _| active_session_ids.iter().any(|a| a == k));
    }

    // -- Health & metrics -----------------------------------------------------

    /// Counters within their configured bounds.
    pub fn healthy(&self) -> bool {
        let inner = self.inner.lock();
        inner.session_count <= self.config.max_sessions
            && inner.connection_count <= self.config.max_connections
    }

    pub fn metrics(&self) -> GovernorMetrics {
        let inner = self.inner.lock();
        GovernorMetrics {
            session_count: inner.session_count,
            connection_count: inner.connection_count,
            max_sessions: self.config.max_sessions,
            max_connections: self.config.max_connections,
            double_unregister_errors: inner.double_unregister_errors,
            command_window_entries: inner.commands.global.len(),
            ui_response_window_entries: inner.ui_responses.global.len(),
            tracked_heartbeats: inner.heartbeats.len(),
        }
    }

    /// Drop all in-memory state (shutdown only).
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.commands = Windows::default();
        inner.ui_responses = Windows::default();
        inner.heartbeats.clear();
        inner.session_started.clear();
    }
}

#[cfg(test)]
#[path = "governor_tests.rs"]
mod tests;
