// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: builders, mocks, and assertion helpers.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::agent::{AgentCall, AgentError, AgentSession, CreateSpec, SessionFactory};
use crate::breaker::{BreakerConfig, CircuitBreakerManager};
use crate::command::AbortKind;
use crate::engine::TimeoutPolicy;
use crate::governor::{GovernorConfig, ResourceGovernor};
use crate::hub::SubscriberHub;
use crate::manager::SessionManager;
use crate::metadata::MetadataStore;
use crate::replay::{ReplayConfig, ReplayStore};
use crate::session_lock::{LockConfig, SessionLockManager};
use crate::ui::{ExtensionUiRegistry, UiConfig};
use crate::version::SessionVersionStore;

/// A scriptable agent session for deterministic pipeline tests.
///
/// Dispatches pop scripted results (falling back to an echo of the command
/// kind), optionally after a fixed delay. Calls, aborts, and disposal are
/// captured for assertions.
pub struct MockAgentSession {
    provider: String,
    events_tx: broadcast::Sender<Value>,
    script: parking_lot::Mutex<VecDeque<Result<Value, AgentError>>>,
    dispatch_delay: parking_lot::Mutex<Duration>,
    calls: parking_lot::Mutex<Vec<AgentCall>>,
    aborts: parking_lot::Mutex<Vec<AbortKind>>,
    disposed: AtomicBool,
}

impl MockAgentSession {
    pub fn new(provider: &str) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            provider: provider.to_owned(),
            events_tx,
            script: parking_lot::Mutex::new(VecDeque::new()),
            dispatch_delay: parking_lot::Mutex::new(Duration::ZERO),
            calls: parking_lot::Mutex::new(Vec::new()),
            aborts: parking_lot::Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        })
    }

    /// Queue the result for the next dispatch.
    pub fn push_result(&self, result: Result<Value, AgentError>) {
        self.script.lock().push_back(result);
    }

    /// Delay every dispatch by `delay` (timeout tests).
    pub fn set_dispatch_delay(&self, delay: Duration) {
        *self.dispatch_delay.lock() = delay;
    }

    /// Emit an event on the session's stream.
    pub fn emit(&self, event: Value) {
        let _ = self.events_tx.send(event);
    }

    pub fn calls(&self) -> Vec<AgentCall> {
        self.calls.lock().clone()
    }

    pub fn aborts(&self) -> Vec<AbortKind> {
        self.aborts.lock().clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl AgentSession for MockAgentSession {
    fn provider(&self) -> String {
        self.provider.clone()
    }

    fn dispatch(&self, call: AgentCall) -> BoxFuture<'_, Result<Value, AgentError>> {
        self.calls.lock().push(call.clone());
        let delay = *self.dispatch_delay.lock();
        let scripted = self.script.lock().pop_front();
        async move {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
            match scripted {
                Some(result) => result,
                None => Ok(json!({ "echo": call.kind.as_str() })),
            }
        }
        .boxed()
    }

    fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.events_tx.subscribe()
    }

    fn abort(&self, kind: AbortKind) -> BoxFuture<'_, ()> {
        self.aborts.lock().push(kind);
        async {}.boxed()
    }

    fn dispose(&self) -> BoxFuture<'_, ()> {
        self.disposed.store(true, Ordering::Release);
        async {}.boxed()
    }
}

/// Factory handing out [`MockAgentSession`]s and remembering them by id.
#[derive(Default)]
pub struct MockFactory {
    provider: parking_lot::Mutex<String>,
    fail_with: parking_lot::Mutex<Option<String>>,
    created: parking_lot::Mutex<Vec<(String, Arc<MockAgentSession>)>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        let factory = Self::default();
        *factory.provider.lock() = "mock-provider".to_owned();
        Arc::new(factory)
    }

    pub fn set_provider(&self, provider: &str) {
        *self.provider.lock() = provider.to_owned();
    }

    /// Make the next creations fail with `reason`.
    pub fn fail_with(&self, reason: &str) {
        *self.fail_with.lock() = Some(reason.to_owned());
    }

    pub fn succeed(&self) {
        *self.fail_with.lock() = None;
    }

    /// The mock behind a created session id, if any.
    pub fn session(&self, session_id: &str) -> Option<Arc<MockAgentSession>> {
        self.created
            .lock()
            .iter()
            .find(|(id, _)| id == session_id)
            .map(|(_, mock)| Arc::clone(mock))
    }

    pub fn created_ids(&self) -> Vec<String> {
        self.created.lock().iter().map(|(id, _)| id.clone()).collect()
    }
}

impl SessionFactory for MockFactory {
    fn create(&self, spec: &CreateSpec) -> BoxFuture<'_, Result<Arc<dyn AgentSession>, String>> {
        let session_id = spec.session_id.clone();
        async move {
            if let Some(reason) = self.fail_with.lock().clone() {
                return Err(reason);
            }
            let mock = MockAgentSession::new(&self.provider.lock().clone());
            self.created.lock().push((session_id, Arc::clone(&mock)));
            Ok(mock as Arc<dyn AgentSession>)
        }
        .boxed()
    }
}

/// Builder producing a fully wired [`SessionManager`] with tight, test-sized
/// limits. Components use the same defaults as production unless overridden.
pub struct ManagerBuilder {
    factory: Arc<MockFactory>,
    max_sessions: usize,
    max_commands_per_minute: usize,
    max_ui_responses_per_minute: usize,
    max_in_flight: usize,
    max_outcomes: usize,
    idempotency_ttl: Duration,
    policy: TimeoutPolicy,
    breaker: BreakerConfig,
    data_dir: Option<PathBuf>,
}

impl Default for ManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagerBuilder {
    pub fn new() -> Self {
        Self {
            factory: MockFactory::new(),
            max_sessions: 8,
            max_commands_per_minute: 1000,
            max_ui_responses_per_minute: 100,
            max_in_flight: 64,
            max_outcomes: 1000,
            idempotency_ttl: Duration::from_secs(300),
            policy: TimeoutPolicy::new(
                Duration::from_secs(30),
                Duration::from_secs(300),
                Duration::from_secs(30),
            ),
            breaker: BreakerConfig {
                failure_threshold: 5,
                window: Duration::from_secs(60),
                recovery_timeout: Duration::from_secs(30),
                half_open_max_calls: 5,
                success_threshold: 2,
                slow_call_threshold: None,
                idle_reap: Duration::from_secs(3600),
            },
            data_dir: None,
        }
    }

    pub fn factory(mut self, factory: Arc<MockFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn max_sessions(mut self, n: usize) -> Self {
        self.max_sessions = n;
        self
    }

    pub fn max_commands_per_minute(mut self, n: usize) -> Self {
        self.max_commands_per_minute = n;
        self
    }

    pub fn max_ui_responses_per_minute(mut self, n: usize) -> Self {
        self.max_ui_responses_per_minute = n;
        self
    }

    pub fn max_in_flight(mut self, n: usize) -> Self {
        self.max_in_flight = n;
        self
    }

    pub fn max_outcomes(mut self, n: usize) -> Self {
        self.max_outcomes = n;
        self
    }

    pub fn timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn breaker_config(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn data_dir(mut self, dir: PathBuf) -> Self {
        self.data_dir = Some(dir);
        self
    }

    pub fn build(self) -> Arc<SessionManager> {
        let governor = Arc::new(ResourceGovernor::new(GovernorConfig {
            max_sessions: self.max_sessions,
            max_connections: 16,
            max_message_bytes: 1_048_576,
            max_commands_per_minute: self.max_commands_per_minute,
            max_ui_responses_per_minute: self.max_ui_responses_per_minute,
            rate_window: Duration::from_secs(60),
            zombie_timeout: Duration::from_secs(300),
            max_session_lifetime: Duration::from_secs(86400),
        }));
        let locks = Arc::new(SessionLockManager::new(LockConfig {
            acquire_timeout: Duration::from_secs(5),
            max_waiters: 100,
            hold_warning: Duration::from_secs(30),
        }));
        let replay = Arc::new(ReplayStore::new(ReplayConfig {
            max_outcomes: self.max_outcomes,
            max_in_flight: self.max_in_flight,
            idempotency_ttl: self.idempotency_ttl,
        }));
        let data_dir = self.data_dir.unwrap_or_else(|| {
            std::env::temp_dir().join(format!("apiary-test-{}", uuid::Uuid::new_v4().simple()))
        });
        SessionManager::new(
            self.factory,
            governor,
            locks,
            replay,
            Arc::new(SessionVersionStore::new()),
            self.policy,
            Arc::new(CircuitBreakerManager::new(self.breaker)),
            Arc::new(ExtensionUiRegistry::new(UiConfig {
                request_timeout: Duration::from_secs(60),
                max_pending: 1000,
            })),
            Arc::new(SubscriberHub::new()),
            Arc::new(MetadataStore::new(&data_dir)),
        )
    }
}

/// Assert that a response failed with an error containing the substring.
#[macro_export]
macro_rules! assert_failure_contains {
    ($response:expr, $needle:expr) => {{
        let response = &$response;
        assert!(!response.success, "expected failure, got success: {response:?}");
        let error = response.error.clone().unwrap_or_default();
        assert!(
            error.contains($needle),
            "expected error containing {:?}, got: {error:?}",
            $needle
        );
    }};
}
