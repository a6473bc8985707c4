// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session optimistic concurrency counters.
//!
//! Counters start at 0 on session creation or load and advance only on
//! successful mutating commands. Clients fence writes with
//! `ifSessionVersion`; a mismatch fails before any mutation happens.

use std::collections::HashMap;

use serde::Serialize;

use crate::command::CommandKind;
use crate::protocol::Response;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMetrics {
    pub tracked_sessions: usize,
}

#[derive(Default)]
pub struct SessionVersionStore {
    versions: parking_lot::Mutex<HashMap<String, u64>>,
}

impl SessionVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize a session's counter at 0 (creation or load).
    pub fn init(&self, session_id: &str) {
        self.versions.lock().insert(session_id.to_owned(), 0);
    }

    pub fn remove(&self, session_id: &str) {
        self.versions.lock().remove(session_id);
    }

    pub fn get(&self, session_id: &str) -> Option<u64> {
        self.versions.lock().get(session_id).copied()
    }

    /// Check an expected version against the counter. `None` means the fence
    /// holds; `Some` is the failure response to return.
    pub fn check(&self, session_id: &str, expected: u64, kind: CommandKind) -> Option<Response> {
        let versions = self.versions.lock();
        let Some(current) = versions.get(session_id).copied() else {
            return Some(Response::fail(
                kind.as_str(),
                format!("session version check failed: unknown session {session_id:?}"),
            ));
        };
        if current != expected {
            return Some(Response::fail(
                kind.as_str(),
                format!("session version mismatch: expected {expected}, current {current}"),
            ));
        }
        None
    }

    /// Advance the counter for mutating commands and stamp the response with
    /// the resulting version. Non-mutating commands are stamped with the
    /// current version unchanged.
    pub fn apply(&self, kind: CommandKind, session_id: &str, response: Response) -> Response {
        let mut versions = self.versions.lock();
        let Some(current) = versions.get_mut(session_id) else {
            return response;
        };
        if kind.is_mutating() && response.success {
            *current += 1;
        }
        let stamped = *current;
        drop(versions);
        let mut response = response;
        response.session_version = Some(stamped);
        response
    }

    pub fn metrics(&self) -> VersionMetrics {
        VersionMetrics { tracked_sessions: self.versions.lock().len() }
    }

    pub fn clear(&self) {
        self.versions.lock().clear();
    }
}

#[cfg(test)]
#[path = "version_tests.rs"]
mod tests;
