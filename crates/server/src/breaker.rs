// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-provider circuit breakers guarding model-facing dispatches.
//!
//! One breaker per downstream provider, created lazily and reaped after an
//! idle period. Closed counts failures (errors, timeouts, and slow
//! completions — a slow success is one failure, never two) within a sliding
//! window; Open rejects with the remaining recovery time; Half-Open admits a
//! bounded number of concurrent probes and closes after enough successes.
//! Any failure while half-open reopens immediately.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub window: Duration,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: u32,
    pub success_threshold: u32,
    pub slow_call_threshold: Option<Duration>,
    pub idle_reap: Duration,
}

/// Breaker acceptance state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Why a completed call counts as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Error,
    Timeout,
    Slow,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerCounters {
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub slow_calls: u64,
    pub times_opened: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub provider: String,
    pub state: CircuitState,
    pub recent_failures: usize,
    pub counters: BreakerCounters,
}

struct Breaker {
    state: CircuitState,
    failure_log: VecDeque<Instant>,
    last_transition: Instant,
    half_open_successes: u32,
    half_open_in_flight: u32,
    counters: BreakerCounters,
    last_access: Instant,
}

impl Breaker {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            state: CircuitState::Closed,
            failure_log: VecDeque::new(),
            last_transition: now,
            half_open_successes: 0,
            half_open_in_flight: 0,
            counters: BreakerCounters::default(),
            last_access: now,
        }
    }

    fn prune_failures(&mut self, window: Duration) {
        let cutoff = match Instant::now().checked_sub(window) {
            Some(c) => c,
            None => return,
        };
        while self.failure_log.front().is_some_and(|at| *at < cutoff) {
            self.failure_log.pop_front();
        }
    }

    fn transition(&mut self, provider: &str, next: CircuitState) {
        if self.state == next {
            return;
        }
        info!(provider, from = ?self.state, to = ?next, "circuit transition");
        self.state = next;
        self.last_transition = Instant::now();
        match next {
            CircuitState::Open => self.counters.times_opened += 1,
            CircuitState::HalfOpen => {
                self.half_open_successes = 0;
                self.half_open_in_flight = 0;
            }
            CircuitState::Closed => {
                self.failure_log.clear();
                self.half_open_successes = 0;
                self.half_open_in_flight = 0;
            }
        }
    }
}

pub struct CircuitBreakerManager {
    config: BreakerConfig,
    breakers: parking_lot::Mutex<HashMap<String, Breaker>>,
}

impl CircuitBreakerManager {
    pub fn new(config: BreakerConfig) -> Self {
        Self { config, breakers: parking_lot::Mutex::new(HashMap::new()) }
    }

    /// Ask to place a call on `provider`. `Ok` admits the call and, in
    /// half-open, occupies one probe slot until the result is recorded.
    pub fn try_call(&self, provider: &str) -> Result<(), String> {
        let mut map = self.breakers.lock();
        let breaker = map.entry(provider.to_owned()).or_insert_with(Breaker::new);
        breaker.last_access = Instant::now();
        breaker.counters.total_calls += 1;

        match breaker.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = breaker.last_transition.elapsed();
                if elapsed >= self.config.recovery_timeout {
                    breaker.transition(provider, CircuitState::HalfOpen);
                    breaker.half_open_in_flight = 1;
                    return Ok(());
                }
                breaker.counters.rejected_calls += 1;
                let remaining = self.config.recovery_timeout.saturating_sub(elapsed);
                Err(format!(
                    "Circuit open for {provider}; retry in {}ms",
                    remaining.as_millis()
                ))
            }
            CircuitState::HalfOpen => {
                if breaker.half_open_in_flight >= self.config.half_open_max_calls {
                    breaker.counters.rejected_calls += 1;
                    return Err(format!(
                        "Circuit half-open for {provider}; probe slots exhausted"
                    ));
                }
                breaker.half_open_in_flight += 1;
                Ok(())
            }
        }
    }

    /// Record a successful completion with its latency. A completion slower
    /// than the slow-call threshold counts as one failure instead.
    pub fn record_success(&self, provider: &str, elapsed: Duration) {
        if let Some(slow) = self.config.slow_call_threshold {
            if elapsed >= slow {
                warn!(provider, elapsed_ms = elapsed.as_millis() as u64, "slow provider call");
                self.record_failure_kind(provider, FailureKind::Slow);
                return;
            }
        }
        let mut map = self.breakers.lock();
        let Some(breaker) = map.get_mut(provider) else { return };
        breaker.last_access = Instant::now();
        if breaker.state == CircuitState::HalfOpen {
            breaker.half_open_in_flight = breaker.half_open_in_flight.saturating_sub(1);
            breaker.half_open_successes += 1;
            if breaker.half_open_successes >= self.config.success_threshold {
                breaker.transition(provider, CircuitState::Closed);
            }
        }
    }

    /// Record a failed completion.
    pub fn record_failure(&self, provider: &str, kind: FailureKind) {
        self.record_failure_kind(provider, kind);
    }

    fn record_failure_kind(&self, provider: &str, kind: FailureKind) {
        let mut map = self.breakers.lock();
        let breaker = map.entry(provider.to_owned()).or_insert_with(Breaker::new);
        breaker.last_access = Instant::now();
        match kind {
            FailureKind::Error => breaker.counters.failures += 1,
            FailureKind::Timeout => breaker.counters.timeouts += 1,
            FailureKind::Slow => breaker.counters.slow_calls += 1,
        }
        match breaker.state {
            CircuitState::HalfOpen => {
                breaker.half_open_in_flight = breaker.half_open_in_flight.saturating_sub(1);
                breaker.transition(provider, CircuitState::Open);
            }
            CircuitState::Closed => {
                breaker.failure_log.push_back(Instant::now());
                breaker.prune_failures(self.config.window);
                if breaker.failure_log.len() >= self.config.failure_threshold as usize {
                    breaker.transition(provider, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// True if any provider's circuit is open. Used by liveness checks.
    pub fn has_open_circuit(&self) -> bool {
        self.breakers.lock().values().any(|b| b.state == CircuitState::Open)
    }

    pub fn state_of(&self, provider: &str) -> Option<CircuitState> {
        self.breakers.lock().get(provider).map(|b| b.state)
    }

    /// Administrative escape hatch: close every breaker and wipe history.
    pub fn reset_all(&self) {
        let mut map = self.breakers.lock();
        for (provider, breaker) in map.iter_mut() {
            breaker.transition(provider, CircuitState::Closed);
        }
    }

    /// Remove breakers idle past the reap threshold.
    pub fn reap_idle(&self) {
        let cutoff = match Instant::now().checked_sub(self.config.idle_reap) {
            Some(c) => c,
            None => return,
        };
        self.breakers.lock().retain(|_, b| b.last_access >= cutoff);
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let map = self.breakers.lock();
        let mut out: Vec<BreakerSnapshot> = map
            .iter()
            .map(|(provider, b)| BreakerSnapshot {
                provider: provider.clone(),
                state: b.state,
                recent_failures: b.failure_log.len(),
                counters: b.counters,
            })
            .collect();
        out.sort_by(|a, b| a.provider.cmp(&b.provider));
        out
    }

    pub fn clear(&self) {
        self.breakers.lock().clear();
    }
}

#[cfg(test)]
#[path = "breaker_tests.rs"]
mod tests;
