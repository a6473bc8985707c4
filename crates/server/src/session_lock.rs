// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session-id mutual exclusion with bounded FIFO waiter queues.
//!
//! Queues are capacity-bounded with explicit rejection — evicting a waiter
//! would starve it silently. Grant tokens make stale releases (double
//! release across retries) harmless: only the current holder's token can
//! release the lock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct LockConfig {
    pub acquire_timeout: Duration,
    pub max_waiters: usize,
    pub hold_warning: Duration,
}

#[derive(Debug, PartialEq, Eq)]
pub enum LockError {
    /// The acquire timeout elapsed while queued.
    Timeout,
    /// The waiter queue for this key is at capacity.
    QueueFull,
    /// The manager was cleared while this caller was queued.
    Cleared,
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => f.write_str("timed out waiting for session lock"),
            Self::QueueFull => f.write_str("too many waiters for session lock"),
            Self::Cleared => f.write_str("session lock manager cleared"),
        }
    }
}

/// Proof of ownership returned by [`SessionLockManager::acquire`].
#[derive(Debug)]
pub struct LockHandle {
    key: String,
    token: u64,
}

impl LockHandle {
    pub fn key(&self) -> &str {
        &self.key
    }
}

struct Holder {
    token: u64,
    tag: String,
    since: Instant,
}

struct Waiter {
    id: u64,
    tag: String,
    tx: oneshot::Sender<u64>,
}

#[derive(Default)]
struct KeyState {
    holder: Option<Holder>,
    waiters: VecDeque<Waiter>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockMetrics {
    pub held_keys: usize,
    pub queued_waiters: usize,
}

pub struct SessionLockManager {
    config: LockConfig,
    inner: parking_lot::Mutex<HashMap<String, KeyState>>,
    next_token: AtomicU64,
}

impl SessionLockManager {
    pub fn new(config: LockConfig) -> Self {
        Self {
            config,
            inner: parking_lot::Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Acquire the lock for `key`, queueing FIFO behind the current holder.
    pub async fn acquire(&self, key: &str, holder_tag: &str) -> Result<LockHandle, LockError> {
        let (waiter_id, rx) = {
            let mut map = self.inner.lock();
            let state = map.entry(key.to_owned()).or_default();
            if state.holder.is_none() {
                let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                state.holder = Some(Holder {
                    token,
                    tag: holder_tag.to_owned(),
                    since: Instant::now(),
                });
                return Ok(LockHandle { key: key.to_owned(), token });
            }
            if state.waiters.len() >= self.config.max_waiters {
                return Err(LockError::QueueFull);
            }
            let (tx, rx) = oneshot::channel();
            // The waiter id doubles as the grant token on handoff.
            let waiter_id = self.next_token.fetch_add(1, Ordering::Relaxed);
            state.waiters.push_back(Waiter { id: waiter_id, tag: holder_tag.to_owned(), tx });
            (waiter_id, rx)
        };

        match tokio::time::timeout(self.config.acquire_timeout, rx).await {
            Ok(Ok(token)) => Ok(LockHandle { key: key.to_owned(), token }),
            Ok(Err(_)) => Err(LockError::Cleared),
            Err(_) => {
                let mut map = self.inner.lock();
                let Some(state) = map.get_mut(key) else {
                    return Err(LockError::Timeout);
                };
                let before = state.waiters.len();
                state.waiters.retain(|w| w.id != waiter_id);
                if state.waiters.len() < before {
                    return Err(LockError::Timeout);
                }
                // Already popped: the grant raced the timeout. If the handoff
                // landed on us, pass ownership along rather than stranding it.
                if state.holder.as_ref().map(|h| h.token) == Some(waiter_id) {
                    Self::hand_over(state);
                    if state.holder.is_none() && state.waiters.is_empty() {
                        map.remove(key);
                    }
                }
                Err(LockError::Timeout)
            }
        }
    }

    /// Release a held lock. Releases with a stale handle are ignored.
    pub fn release(&self, handle: LockHandle) {
        let mut map = self.inner.lock();
        let Some(state) = map.get_mut(&handle.key) else {
            debug!(key = %handle.key, "release for unknown lock key ignored");
            return;
        };
        let Some(holder) = &state.holder else {
            debug!(key = %handle.key, "release of unheld lock ignored");
            return;
        };
        if holder.token != handle.token {
            debug!(key = %handle.key, "stale lock release ignored");
            return;
        }
        let held_for = holder.since.elapsed();
        if held_for > self.config.hold_warning {
            warn!(key = %handle.key, tag = %holder.tag, held_ms = held_for.as_millis() as u64,
                "session lock held past warning threshold");
        }
        Self::hand_over(state);
        if state.holder.is_none() && state.waiters.is_empty() {
            map.remove(&handle.key);
        }
    }

    /// Pop waiters until one accepts ownership; otherwise leave the key free.
    fn hand_over(state: &mut KeyState) {
        state.holder = None;
        while let Some(waiter) = state.waiters.pop_front() {
            let token = waiter.id;
            state.holder = Some(Holder {
                token,
                tag: waiter.tag.clone(),
                since: Instant::now(),
            });
            if waiter.tx.send(token).is_ok() {
                return;
            }
            // Receiver gave up (timeout); try the next in line.
            state.holder = None;
        }
    }

    /// Reject all waiters and drop held state. Shutdown and tests only.
    pub fn clear(&self) {
        let mut map = self.inner.lock();
        for (_, state) in map.iter_mut() {
            state.holder = None;
            // Dropping the senders resolves every waiter with `Cleared`.
            state.waiters.clear();
        }
        map.clear();
    }

    pub fn metrics(&self) -> LockMetrics {
        let map = self.inner.lock();
        LockMetrics {
            held_keys: map.values().filter(|s| s.holder.is_some()).count(),
            queued_waiters: map.values().map(|s| s.waiters.len()).sum(),
        }
    }
}

#[cfg(test)]
#[path = "session_lock_tests.rs"]
mod tests;
