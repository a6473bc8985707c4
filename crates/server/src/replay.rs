// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Replay and idempotency store.
//!
//! The contract this store exists to uphold: once a command with an explicit
//! identifier completes, that identifier returns the same response forever.
//! The manager writes the outcome synchronously before returning the
//! response (the atomic outcome rule); late completions from the original
//! execution are discarded.
//!
//! Three bounded stores, each bounded differently on purpose:
//! - outcome cache: FIFO eviction of the oldest entries;
//! - in-flight registry: *rejects* over capacity — evicting an entry that
//!   other commands list as a dependency would break dependency resolution;
//! - idempotency cache: TTL expiry.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant, SystemTime};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::fingerprint::Fingerprint;
use crate::protocol::{Command, Response, SYNTHETIC_ID_PREFIX};

/// A response future that any number of waiters can await.
pub type ResponseFuture = Shared<BoxFuture<'static, Response>>;

/// Wrap a oneshot receiver into a shareable response future. If the sender
/// is dropped without a value the waiters see a failure response.
pub fn response_future(rx: oneshot::Receiver<Response>, kind: &str) -> ResponseFuture {
    let kind = kind.to_owned();
    async move { rx.await.unwrap_or_else(|_| Response::fail(&kind, "command execution abandoned")) }
        .boxed()
        .shared()
}

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub max_outcomes: usize,
    pub max_in_flight: usize,
    pub idempotency_ttl: Duration,
}

/// Terminal record for an explicit command identifier.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub command_id: String,
    pub kind: String,
    pub lane: String,
    pub fingerprint: Fingerprint,
    pub success: bool,
    pub error: Option<String>,
    pub response: Response,
    pub session_version: Option<u64>,
    pub finished_at: SystemTime,
}

/// A currently-executing command.
#[derive(Clone)]
pub struct InFlightRecord {
    pub kind: String,
    pub lane: String,
    pub fingerprint: Fingerprint,
    pub future: ResponseFuture,
}

struct IdempotencyEntry {
    kind: String,
    fingerprint: Fingerprint,
    response: Response,
    inserted_at: Instant,
}

/// Verdict from consulting the store before executing a command.
pub enum ReplayCheck {
    /// Never seen: execute it.
    Proceed,
    /// A stored outcome or idempotency hit; return as-is.
    Cached(Response),
    /// The identifier is executing right now; await the same response.
    InFlight(ResponseFuture),
    /// Identifier or idempotency key reused with different content.
    Conflict(Response),
}

/// What the execution engine learns about a declared dependency.
pub enum DependencyLookup {
    InFlight { lane: String, future: ResponseFuture },
    Completed { success: bool, error: Option<String> },
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayMetrics {
    pub outcomes: usize,
    pub in_flight: usize,
    pub idempotency_entries: usize,
    pub max_in_flight: usize,
}

struct ReplayInner {
    outcomes: HashMap<String, CommandOutcome>,
    outcome_order: VecDeque<String>,
    in_flight: HashMap<String, InFlightRecord>,
    idempotency: HashMap<String, IdempotencyEntry>,
    synthetic_seq: u64,
}

pub struct ReplayStore {
    config: ReplayConfig,
    process_start_ms: u64,
    inner: parking_lot::Mutex<ReplayInner>,
}

impl ReplayStore {
    pub fn new(config: ReplayConfig) -> Self {
        let process_start_ms = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            config,
            process_start_ms,
            inner: parking_lot::Mutex::new(ReplayInner {
                outcomes: HashMap::new(),
                outcome_order: VecDeque::new(),
                in_flight: HashMap::new(),
                idempotency: HashMap::new(),
                synthetic_seq: 0,
            }),
        }
    }

    /// Return the command's identifier, minting a synthetic one when absent.
    /// The bool is true for synthetic identifiers, which bypass the outcome
    /// store entirely.
    pub fn get_or_create_command_id(&self, cmd: &Command) -> (String, bool) {
        if let Some(id) = &cmd.id {
            return (id.clone(), false);
        }
        let mut inner = self.inner.lock();
        inner.synthetic_seq += 1;
        (format!("{SYNTHETIC_ID_PREFIX}{}:{}", self.process_start_ms, inner.synthetic_seq), true)
    }

    /// Consult prior outcomes, in-flight executions, and the idempotency
    /// cache. Replay hits come back with the response id adjusted to the
    /// *current* request and `replayed` set; conflicts come back as failures.
    pub fn check_replay(&self, cmd: &Command, command_id: &str, fp: &Fingerprint) -> ReplayCheck {
        let inner = self.inner.lock();

        if let Some(outcome) = inner.outcomes.get(command_id) {
            if outcome.fingerprint == *fp {
                return ReplayCheck::Cached(
                    outcome.response.clone().adjusted_for(cmd.id.as_deref()).mark_replayed(),
                );
            }
            return ReplayCheck::Conflict(
                Response::fail(
                    &cmd.kind,
                    format!("command id {command_id:?} was already used for a different command"),
                )
                .with_id(cmd.id.clone()),
            );
        }

        if let Some(record) = inner.in_flight.get(command_id) {
            if record.fingerprint == *fp {
                return ReplayCheck::InFlight(record.future.clone());
            }
            return ReplayCheck::Conflict(
                Response::fail(
                    &cmd.kind,
                    format!("command id {command_id:?} is in flight with different content"),
                )
                .with_id(cmd.id.clone()),
            );
        }

        if let Some(key) = &cmd.idempotency_key {
            if let Some(entry) = inner.idempotency.get(key) {
                if entry.inserted_at.elapsed() < self.config.idempotency_ttl {
                    if entry.fingerprint == *fp {
                        return ReplayCheck::Cached(
                            entry.response.clone().adjusted_for(cmd.id.as_deref()).mark_replayed(),
                        );
                    }
                    return ReplayCheck::Conflict(
                        Response::fail(
                            &cmd.kind,
                            format!(
                                "idempotency key {key:?} was already used for a different {} command",
                                entry.kind
                            ),
                        )
                        .with_id(cmd.id.clone()),
                    );
                }
            }
        }

        ReplayCheck::Proceed
    }

    /// Register an execution. Returns `false` when the in-flight cap would be
    /// exceeded; callers surface that as "server busy" with no side effects.
    /// Re-registering an existing id is permitted (idempotent).
    pub fn register_in_flight(&self, command_id: &str, record: InFlightRecord) -> bool {
        let mut inner = self.inner.lock();
        if inner.in_flight.contains_key(command_id) {
            return true;
        }
        if inner.in_flight.len() >= self.config.max_in_flight {
            return false;
        }
        inner.in_flight.insert(command_id.to_owned(), record);
        true
    }

    pub fn unregister_in_flight(&self, command_id: &str) {
        self.inner.lock().in_flight.remove(command_id);
    }

    /// Store a terminal outcome, evicting the oldest entries above the cap.
    /// Synthetic identifiers never reach this method.
    pub fn store_outcome(&self, outcome: CommandOutcome) {
        let mut inner = self.inner.lock();
        if inner.outcomes.contains_key(&outcome.command_id) {
            // First writer wins; outcomes are immutable.
            return;
        }
        inner.outcome_order.push_back(outcome.command_id.clone());
        inner.outcomes.insert(outcome.command_id.clone(), outcome);
        while inner.outcome_order.len() > self.config.max_outcomes {
            if let Some(oldest) = inner.outcome_order.pop_front() {
                inner.outcomes.remove(&oldest);
            }
        }
    }

    /// Cache a response under its idempotency key.
    pub fn cache_idempotency(
        &self,
        key: &str,
        kind: &str,
        fingerprint: Fingerprint,
        response: Response,
    ) {
        let mut inner = self.inner.lock();
        inner.idempotency.insert(
            key.to_owned(),
            IdempotencyEntry {
                kind: kind.to_owned(),
                fingerprint,
                response,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop idempotency entries past their TTL.
    pub fn cleanup_idempotency(&self) {
        let ttl = self.config.idempotency_ttl;
        self.inner.lock().idempotency.retain(|_, e| e.inserted_at.elapsed() < ttl);
    }

    /// Resolve a declared dependency for the execution engine.
    pub fn lookup_dependency(&self, dep_id: &str) -> DependencyLookup {
        let inner = self.inner.lock();
        if let Some(record) = inner.in_flight.get(dep_id) {
            return DependencyLookup::InFlight {
                lane: record.lane.clone(),
                future: record.future.clone(),
            };
        }
        if let Some(outcome) = inner.outcomes.get(dep_id) {
            return DependencyLookup::Completed {
                success: outcome.success,
                error: outcome.error.clone(),
            };
        }
        DependencyLookup::Unknown
    }

    /// Snapshot of every in-flight future, for the shutdown drain.
    pub fn in_flight_futures(&self) -> Vec<ResponseFuture> {
        self.inner.lock().in_flight.values().map(|r| r.future.clone()).collect()
    }

    pub fn metrics(&self) -> ReplayMetrics {
        let inner = self.inner.lock();
        ReplayMetrics {
            outcomes: inner.outcomes.len(),
            in_flight: inner.in_flight.len(),
            idempotency_entries: inner.idempotency.len(),
            max_in_flight: self.config.max_in_flight,
        }
    }

    /// Drop all state (shutdown only).
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.outcomes.clear();
        inner.outcome_order.clear();
        inner.in_flight.clear();
        inner.idempotency.clear();
    }
}

#[cfg(test)]
#[path = "replay_tests.rs"]
mod tests;
