// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session manager: the single entry point that composes admission,
//! replay, lanes, versions, breakers, and the agent-session capability into
//! the end-to-end contract — for any explicit command identifier, the server
//! returns the same response forever.
//!
//! The execution pipeline for one command:
//!
//! 1. reject when shutting down;
//! 2. validate structurally (costs no quota);
//! 3. derive the identifier, broadcast `command_accepted`;
//! 4. consult the replay store — cache hits, in-flight joins, and conflicts
//!    return here, rate-free;
//! 5. charge the rate governor (plus the UI window for UI responses);
//! 6. register in flight (bounded; rejection means "server busy" with no
//!    side effects) and queue on the command's lane;
//! 7. in the lane: broadcast `command_started`, await dependencies, check
//!    the version fence, dispatch (through the provider breaker for
//!    model-facing kinds), stamp the session version;
//! 8. race the result against the type's timeout, firing the abort hook on
//!    expiry;
//! 9. store the outcome synchronously (explicit ids), resolve in-flight
//!    waiters, cache idempotency;
//! 10. broadcast `command_finished` and return.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime};

use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::{AgentCall, AgentSession, CreateSpec, SessionFactory};
use crate::breaker::{CircuitBreakerManager, FailureKind};
use crate::command::CommandKind;
use crate::engine::{self, TimeoutPolicy};
use crate::error::ErrorKind;
use crate::fingerprint;
use crate::governor::{RateDecision, ResourceGovernor};
use crate::hub::SubscriberHub;
use crate::lanes::{lane_for, LaneRunner, SERVER_LANE};
use crate::metadata::{MetadataStore, SessionMeta};
use crate::metrics::{FailureCounters, HealthSnapshot, MetricsSnapshot};
use crate::protocol::{Command, CommandLifecycle, Response, ServerFrame};
use crate::replay::{CommandOutcome, InFlightRecord, ReplayStore};
use crate::session_lock::SessionLockManager;
use crate::ui::ExtensionUiRegistry;
use crate::validate;
use crate::version::SessionVersionStore;

struct SessionEntry {
    agent: Arc<dyn AgentSession>,
    created_at_ms: u64,
    /// Pump forwarding the agent's event stream to subscribed clients;
    /// aborted when the session is deleted.
    event_task: JoinHandle<()>,
}

pub struct SessionManager {
    /// Self-handle for spawning 'static pipeline tails; set by `new`.
    self_ref: Weak<SessionManager>,
    started_at: Instant,
    factory: Arc<dyn SessionFactory>,
    sessions: parking_lot::RwLock<HashMap<String, SessionEntry>>,
    pub governor: Arc<ResourceGovernor>,
    pub locks: Arc<SessionLockManager>,
    pub replay: Arc<ReplayStore>,
    pub versions: Arc<SessionVersionStore>,
    pub lanes: LaneRunner,
    pub policy: TimeoutPolicy,
    pub breakers: Arc<CircuitBreakerManager>,
    pub ui: Arc<ExtensionUiRegistry>,
    pub hub: Arc<SubscriberHub>,
    pub metadata: Arc<MetadataStore>,
    failures: FailureCounters,
    shutting_down: AtomicBool,
    /// Commands still running when the drain deadline passed.
    pub pending_at_shutdown: AtomicU64,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        governor: Arc<ResourceGovernor>,
        locks: Arc<SessionLockManager>,
        replay: Arc<ReplayStore>,
        versions: Arc<SessionVersionStore>,
        policy: TimeoutPolicy,
        breakers: Arc<CircuitBreakerManager>,
        ui: Arc<ExtensionUiRegistry>,
        hub: Arc<SubscriberHub>,
        metadata: Arc<MetadataStore>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            started_at: Instant::now(),
            factory,
            sessions: parking_lot::RwLock::new(HashMap::new()),
            governor,
            locks,
            replay,
            versions,
            lanes: LaneRunner::new(),
            policy,
            breakers,
            ui,
            hub,
            metadata,
            failures: FailureCounters::new(),
            shutting_down: AtomicBool::new(false),
            pending_at_shutdown: AtomicU64::new(0),
        })
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn session_agent(&self, session_id: &str) -> Option<Arc<dyn AgentSession>> {
        self.sessions.read().get(session_id).map(|e| Arc::clone(&e.agent))
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    fn fail(&self, kind: ErrorKind, response: Response) -> Response {
        self.failures.record(kind);
        response
    }

    // -- The pipeline ---------------------------------------------------------

    pub async fn execute_command(&self, cmd: Command) -> Response {
        self.submit_command(cmd).await
    }

    /// Run the synchronous pipeline prefix (steps 1–6) immediately and
    /// return a future for the rest.
    ///
    /// The split is what gives transports their ordering guarantee: calling
    /// `submit_command` for frames in arrival order enqueues lane tasks in
    /// arrival order, while the returned futures are awaited in detached
    /// tasks so a dropped connection can never cancel the outcome store
    /// write.
    pub fn submit_command(&self, cmd: Command) -> BoxFuture<'static, Response> {
        let Some(kind) = CommandKind::parse(&cmd.kind) else {
            return ready_response(self.fail(
                ErrorKind::Validation,
                Response::parse_error(format!("unknown command type {:?}", cmd.kind))
                    .with_id(cmd.id.clone()),
            ));
        };

        if self.is_shutting_down() {
            return ready_response(self.fail(
                ErrorKind::Admission,
                Response::fail(kind.as_str(), "server is shutting down").with_id(cmd.id.clone()),
            ));
        }

        // 2. Structural validation, before any quota is consumed.
        if let Err(reason) = validate::validate(&cmd, kind) {
            return ready_response(self.fail(
                ErrorKind::Validation,
                Response::fail(kind.as_str(), reason).with_id(cmd.id.clone()),
            ));
        }

        // 3. Identifier derivation and acceptance broadcast.
        let (command_id, synthetic) = self.replay.get_or_create_command_id(&cmd);
        let lifecycle = CommandLifecycle::for_command(&command_id, &cmd);
        self.hub.broadcast_all(&ServerFrame::CommandAccepted { data: lifecycle.clone() });

        if kind.is_session_scoped() {
            if let Some(sid) = cmd.session_id.as_deref() {
                self.governor.record_heartbeat(sid);
            }
        }

        // 4. Replay consultation — replays cost zero rate quota.
        let fp = fingerprint::fingerprint(&cmd);
        match self.replay.check_replay(&cmd, &command_id, &fp) {
            crate::replay::ReplayCheck::Cached(response) => {
                return ready_response(self.finish(lifecycle, response));
            }
            crate::replay::ReplayCheck::Conflict(response) => {
                self.failures.record(ErrorKind::Conflict);
                return ready_response(self.finish(lifecycle, response));
            }
            crate::replay::ReplayCheck::InFlight(future) => {
                let Some(this) = self.self_ref.upgrade() else {
                    return ready_response(
                        Response::fail(kind.as_str(), "server is shutting down")
                            .with_id(cmd.id.clone()),
                    );
                };
                let request_id = cmd.id.clone();
                return Box::pin(async move {
                    let response =
                        future.await.adjusted_for(request_id.as_deref()).mark_replayed();
                    this.finish(lifecycle, response)
                });
            }
            crate::replay::ReplayCheck::Proceed => {}
        }

        // 5. Rate admission.
        let rate_key = cmd.session_id.clone().unwrap_or_else(|| SERVER_LANE.to_owned());
        let generation = match self.governor.can_execute_command(&rate_key) {
            RateDecision::Denied { reason } => {
                self.failures.record(ErrorKind::Admission);
                return ready_response(self.finish(
                    lifecycle,
                    Response::fail(kind.as_str(), reason).with_id(cmd.id.clone()),
                ));
            }
            RateDecision::Allowed { generation } => generation,
        };
        let ui_generation = if kind == CommandKind::ExtensionUiResponse {
            match self.governor.can_execute_ui_response(&rate_key) {
                RateDecision::Denied { reason } => {
                    // The command never executes; hand back the primary slot.
                    self.governor.refund_command(&rate_key, generation);
                    self.failures.record(ErrorKind::Admission);
                    return ready_response(self.finish(
                        lifecycle,
                        Response::fail(kind.as_str(), reason).with_id(cmd.id.clone()),
                    ));
                }
                RateDecision::Allowed { generation } => Some(generation),
            }
        } else {
            None
        };

        // 6. Bounded in-flight registration, then lane submission.
        let lane = lane_for(cmd.session_id.as_deref());
        let (final_tx, final_rx) = oneshot::channel();
        let shared = crate::replay::response_future(final_rx, kind.as_str());
        let record = InFlightRecord {
            kind: cmd.kind.clone(),
            lane: lane.clone(),
            fingerprint: fp.clone(),
            future: shared,
        };
        if !self.replay.register_in_flight(&command_id, record) {
            self.governor.refund_command(&rate_key, generation);
            if let Some(g) = ui_generation {
                self.governor.refund_ui_response(&rate_key, g);
            }
            self.failures.record(ErrorKind::Admission);
            return ready_response(self.finish(
                lifecycle,
                Response::fail(kind.as_str(), "Server busy: too many commands in flight")
                    .with_id(cmd.id.clone()),
            ));
        }

        let Some(this) = self.self_ref.upgrade() else {
            self.replay.unregister_in_flight(&command_id);
            return ready_response(
                Response::fail(kind.as_str(), "server is shutting down").with_id(cmd.id.clone()),
            );
        };
        let task = {
            let this = Arc::clone(&this);
            let cmd = cmd.clone();
            let command_id = command_id.clone();
            let lane = lane.clone();
            let lifecycle = lifecycle.clone();
            async move { this.run_on_lane(cmd, kind, command_id, lane, lifecycle).await }
        };
        let result_rx = self.lanes.submit(&lane, task);

        Box::pin(async move {
            // 8. Timeout race with the type's abort hook.
            let abort = {
                let this = Arc::clone(&this);
                let session_id = cmd.session_id.clone();
                move || async move {
                    let (Some(abort_kind), Some(sid)) = (kind.abort_kind(), session_id) else {
                        return;
                    };
                    if let Some(agent) = this.session_agent(&sid) {
                        agent.abort(abort_kind).await;
                    }
                }
            };
            let response =
                engine::run_with_timeout(kind, this.policy.budget(kind), result_rx, abort).await;
            if response.timed_out == Some(true) {
                this.failures.record(ErrorKind::Timeout);
            }
            let final_response = response.adjusted_for(cmd.id.as_deref());

            // 9. The atomic outcome rule: persist before anyone sees the response.
            if !synthetic {
                this.replay.store_outcome(CommandOutcome {
                    command_id: command_id.clone(),
                    kind: cmd.kind.clone(),
                    lane,
                    fingerprint: fp.clone(),
                    success: final_response.success,
                    error: final_response.error.clone(),
                    response: final_response.clone(),
                    session_version: final_response.session_version,
                    finished_at: SystemTime::now(),
                });
            }
            this.replay.unregister_in_flight(&command_id);
            if let Some(key) = &cmd.idempotency_key {
                this.replay.cache_idempotency(key, kind.as_str(), fp, final_response.clone());
            }
            let _ = final_tx.send(final_response.clone());

            this.finish(lifecycle, final_response)
        })
    }

    fn finish(&self, lifecycle: CommandLifecycle, response: Response) -> Response {
        self.hub
            .broadcast_all(&ServerFrame::CommandFinished { data: lifecycle.finished(&response) });
        response
    }

    /// Body of the lane task (pipeline step 7).
    async fn run_on_lane(
        self: Arc<Self>,
        cmd: Command,
        kind: CommandKind,
        command_id: String,
        lane: String,
        lifecycle: CommandLifecycle,
    ) -> Response {
        self.hub.broadcast_all(&ServerFrame::CommandStarted { data: lifecycle });

        if let Some(deps) = &cmd.depends_on {
            if let Err(reason) = engine::await_dependencies(
                &self.replay,
                &command_id,
                &lane,
                deps,
                self.policy.dependency_timeout(),
            )
            .await
            {
                self.failures.record(ErrorKind::Dependency);
                return Response::fail(kind.as_str(), reason);
            }
        }

        if let (Some(expected), Some(sid)) = (cmd.if_session_version, cmd.session_id.as_deref()) {
            if let Some(response) = self.versions.check(sid, expected, kind) {
                self.failures.record(ErrorKind::Precondition);
                return response;
            }
        }

        let response = if kind.is_session_scoped() {
            self.dispatch_session(&cmd, kind).await
        } else {
            self.dispatch_server(&cmd, kind).await
        };

        match cmd.session_id.as_deref() {
            Some(sid) if kind.is_session_scoped() => self.versions.apply(kind, sid, response),
            _ => response,
        }
    }

    // -- Dispatch -------------------------------------------------------------

    async fn dispatch_session(&self, cmd: &Command, kind: CommandKind) -> Response {
        let sid = cmd.session_id.as_deref().unwrap_or_default();
        let Some(agent) = self.session_agent(sid) else {
            return self.fail(
                ErrorKind::Validation,
                Response::fail(kind.as_str(), format!("unknown session {sid:?}")),
            );
        };
        let call = AgentCall { kind, payload: cmd.payload.clone() };

        let result = if kind.uses_model_provider() {
            let provider = agent.provider();
            if let Err(reason) = self.breakers.try_call(&provider) {
                return self.fail(ErrorKind::Circuit, Response::fail(kind.as_str(), reason));
            }
            let started = Instant::now();
            let result = agent.dispatch(call).await;
            match &result {
                Ok(_) => self.breakers.record_success(&provider, started.elapsed()),
                Err(e) => self.breakers.record_failure(
                    &provider,
                    if e.is_timeout() { FailureKind::Timeout } else { FailureKind::Error },
                ),
            }
            result
        } else {
            agent.dispatch(call).await
        };

        match result {
            Ok(Value::Null) => Response::ok(kind.as_str(), None),
            Ok(data) => Response::ok(kind.as_str(), Some(data)),
            Err(e) => {
                self.fail(ErrorKind::Downstream, Response::fail(kind.as_str(), e.to_string()))
            }
        }
    }

    async fn dispatch_server(&self, cmd: &Command, kind: CommandKind) -> Response {
        match kind {
            CommandKind::ListSessions => {
                let sessions: Vec<Value> = {
                    let map = self.sessions.read();
                    let mut rows: Vec<(&String, &SessionEntry)> = map.iter().collect();
                    rows.sort_by(|a, b| a.0.cmp(b.0));
                    rows.iter()
                        .map(|(id, entry)| {
                            json!({
                                "sessionId": id,
                                "provider": entry.agent.provider(),
                                "createdAtMs": entry.created_at_ms,
                                "sessionVersion": self.versions.get(id),
                            })
                        })
                        .collect()
                };
                Response::ok(kind.as_str(), Some(json!({ "sessions": sessions })))
            }
            CommandKind::CreateSession => self.create_session(cmd).await,
            CommandKind::DeleteSession => match Self::target_session(cmd) {
                Some(sid) => self.delete_session(&sid).await,
                None => self.fail(
                    ErrorKind::Validation,
                    Response::fail(kind.as_str(), "delete_session requires a sessionId"),
                ),
            },
            CommandKind::LoadSession => self.load_session(cmd).await,
            CommandKind::SwitchSession => self.switch_session(cmd),
            CommandKind::ListStoredSessions => {
                let stored = self.metadata.load_all();
                Response::ok(
                    kind.as_str(),
                    Some(json!({ "sessions": serde_json::to_value(stored).unwrap_or_default() })),
                )
            }
            CommandKind::GetMetrics => {
                let snapshot = self.metrics();
                Response::ok(kind.as_str(), serde_json::to_value(snapshot).ok())
            }
            CommandKind::HealthCheck => {
                let health = self.health();
                Response::ok(kind.as_str(), serde_json::to_value(health).ok())
            }
            CommandKind::ExtensionUiResponse => match self.ui.handle_response(cmd) {
                Ok(()) => Response::ok(kind.as_str(), None),
                Err(reason) => {
                    self.fail(ErrorKind::Validation, Response::fail(kind.as_str(), reason))
                }
            },
            // Session-scoped kinds never land here.
            _ => self.fail(
                ErrorKind::Validation,
                Response::fail(kind.as_str(), format!("{kind} is not a server command")),
            ),
        }
    }

    /// Target session for server-scoped lifecycle commands: the envelope
    /// field wins, the payload field is the fallback.
    fn target_session(cmd: &Command) -> Option<String> {
        cmd.session_id
            .clone()
            .or_else(|| cmd.payload_str("sessionId").map(str::to_owned))
            .filter(|s| !s.is_empty())
    }

    // -- Session lifecycle ----------------------------------------------------

    async fn create_session(&self, cmd: &Command) -> Response {
        let kind = CommandKind::CreateSession;
        let sid = Self::target_session(cmd).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if let Err(reason) = validate::validate_session_id(&sid) {
            return self.fail(ErrorKind::Validation, Response::fail(kind.as_str(), reason));
        }

        let lock = match self.locks.acquire(&sid, "create_session").await {
            Ok(lock) => lock,
            Err(e) => {
                return self.fail(
                    ErrorKind::Admission,
                    Response::fail(kind.as_str(), format!("session {sid:?}: {e}")),
                );
            }
        };

        if self.sessions.read().contains_key(&sid) {
            self.locks.release(lock);
            return self.fail(
                ErrorKind::Conflict,
                Response::fail(kind.as_str(), format!("session {sid:?} already exists")),
            );
        }
        if !self.governor.try_reserve_session_slot() {
            self.locks.release(lock);
            return self.fail(
                ErrorKind::Admission,
                Response::fail(
                    kind.as_str(),
                    format!("session limit reached ({})", self.governor.config().max_sessions),
                ),
            );
        }

        let spec = CreateSpec {
            session_id: sid.clone(),
            working_dir: cmd.payload_str("workingDir").map(PathBuf::from),
            payload: cmd.payload.clone(),
            resume: false,
        };
        match self.factory.create(&spec).await {
            Err(reason) => {
                // Undo the reservation; nothing else was touched yet.
                self.governor.release_session_slot();
                self.locks.release(lock);
                self.fail(
                    ErrorKind::Downstream,
                    Response::fail(kind.as_str(), format!("failed to create session: {reason}")),
                )
            }
            Ok(agent) => {
                let created_at_ms = epoch_ms();
                self.install_session(&sid, agent, created_at_ms);
                if let Err(e) = self.metadata.upsert(SessionMeta {
                    id: sid.clone(),
                    name: cmd.payload_str("name").map(str::to_owned),
                    working_dir: cmd.payload_str("workingDir").map(str::to_owned),
                    created_at_ms,
                }) {
                    warn!(session = %sid, "failed to persist session metadata: {e}");
                }
                self.hub.broadcast_all(&ServerFrame::SessionCreated { session_id: sid.clone() });
                self.locks.release(lock);
                info!(session = %sid, "session created");
                Response::ok(kind.as_str(), Some(json!({ "sessionId": sid })))
                    .with_session_version(0)
            }
        }
    }

    async fn load_session(&self, cmd: &Command) -> Response {
        let kind = CommandKind::LoadSession;
        let Some(sid) = Self::target_session(cmd) else {
            return self.fail(
                ErrorKind::Validation,
                Response::fail(kind.as_str(), "load_session requires a sessionId"),
            );
        };

        let lock = match self.locks.acquire(&sid, "load_session").await {
            Ok(lock) => lock,
            Err(e) => {
                return self.fail(
                    ErrorKind::Admission,
                    Response::fail(kind.as_str(), format!("session {sid:?}: {e}")),
                );
            }
        };

        if self.sessions.read().contains_key(&sid) {
            self.locks.release(lock);
            return self.fail(
                ErrorKind::Conflict,
                Response::fail(kind.as_str(), format!("session {sid:?} is already active")),
            );
        }
        let Some(meta) = self.metadata.load_all().into_iter().find(|m| m.id == sid) else {
            self.locks.release(lock);
            return self.fail(
                ErrorKind::Validation,
                Response::fail(kind.as_str(), format!("no stored session {sid:?}")),
            );
        };
        if !self.governor.try_reserve_session_slot() {
            self.locks.release(lock);
            return self.fail(
                ErrorKind::Admission,
                Response::fail(
                    kind.as_str(),
                    format!("session limit reached ({})", self.governor.config().max_sessions),
                ),
            );
        }

        let spec = CreateSpec {
            session_id: sid.clone(),
            working_dir: meta.working_dir.clone().map(PathBuf::from),
            payload: cmd.payload.clone(),
            resume: true,
        };
        match self.factory.create(&spec).await {
            Err(reason) => {
                self.governor.release_session_slot();
                self.locks.release(lock);
                self.fail(
                    ErrorKind::Downstream,
                    Response::fail(kind.as_str(), format!("failed to load session: {reason}")),
                )
            }
            Ok(agent) => {
                self.install_session(&sid, agent, meta.created_at_ms);
                self.hub.broadcast_all(&ServerFrame::SessionCreated { session_id: sid.clone() });
                self.locks.release(lock);
                info!(session = %sid, "stored session loaded");
                Response::ok(kind.as_str(), Some(json!({ "sessionId": sid })))
                    .with_session_version(0)
            }
        }
    }

    /// Shared tail of create/load: maps, version counter, lifetime tracking,
    /// and the event pump binding the agent's stream to subscribers.
    fn install_session(&self, sid: &str, agent: Arc<dyn AgentSession>, created_at_ms: u64) {
        let mut rx = agent.subscribe();
        let hub = Arc::clone(&self.hub);
        let pump_sid = sid.to_owned();
        let event_task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => hub.broadcast_session(
                        &pump_sid,
                        &ServerFrame::Event { session_id: pump_sid.clone(), event },
                    ),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(session = %pump_sid, skipped, "event pump lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.sessions
            .write()
            .insert(sid.to_owned(), SessionEntry { agent, created_at_ms, event_task });
        self.versions.init(sid);
        self.governor.record_session_start(sid);
    }

    /// Delete a session end to end. Also the zombie/expiry sweep path.
    pub async fn delete_session(&self, sid: &str) -> Response {
        let kind = CommandKind::DeleteSession;
        let lock = match self.locks.acquire(sid, "delete_session").await {
            Ok(lock) => lock,
            Err(e) => {
                return self.fail(
                    ErrorKind::Admission,
                    Response::fail(kind.as_str(), format!("session {sid:?}: {e}")),
                );
            }
        };

        self.ui.cancel_session_requests(sid);
        let Some(entry) = self.sessions.write().remove(sid) else {
            self.locks.release(lock);
            return self.fail(
                ErrorKind::Validation,
                Response::fail(kind.as_str(), format!("unknown session {sid:?}")),
            );
        };

        self.versions.remove(sid);
        self.governor.release_session_slot();
        entry.event_task.abort();
        entry.agent.dispose().await;
        self.hub.remove_session(sid);
        let active = self.session_ids();
        self.governor.cleanup_stale_data(&active);
        if let Err(e) = self.metadata.remove(sid) {
            warn!(session = %sid, "failed to delete session metadata: {e}");
        }
        self.hub.broadcast_all(&ServerFrame::SessionDeleted { session_id: sid.to_owned() });
        self.locks.release(lock);
        info!(session = %sid, "session deleted");
        Response::ok(kind.as_str(), Some(json!({ "sessionId": sid })))
    }

    fn switch_session(&self, cmd: &Command) -> Response {
        let kind = CommandKind::SwitchSession;
        let Some(sid) = Self::target_session(cmd) else {
            return self.fail(
                ErrorKind::Validation,
                Response::fail(kind.as_str(), "switch_session requires a sessionId"),
            );
        };
        if !self.sessions.read().contains_key(&sid) {
            return self.fail(
                ErrorKind::Validation,
                Response::fail(kind.as_str(), format!("unknown session {sid:?}")),
            );
        }
        let subscribed = match cmd.client_id.as_deref() {
            Some(client) => self.hub.subscribe(client, &sid),
            None => false,
        };
        Response::ok(kind.as_str(), Some(json!({ "sessionId": sid, "subscribed": subscribed })))
    }

    // -- Extension UI ---------------------------------------------------------

    /// Open a server-initiated UI prompt addressed to the session's
    /// subscribers. The pending request resolves when a client answers with
    /// `extension_ui_response`, or fails on timeout or session deletion.
    /// Returns `None` when the pending cap is reached.
    pub fn request_ui(
        &self,
        session_id: &str,
        method: &str,
        data: Value,
        timeout_override: Option<Duration>,
    ) -> Option<crate::ui::UiTicket> {
        let ticket = self.ui.create_request(session_id, method, timeout_override)?;
        self.hub.broadcast_session(
            session_id,
            &ServerFrame::ExtensionUiRequest {
                request_id: ticket.request_id.clone(),
                session_id: session_id.to_owned(),
                method: method.to_owned(),
                data,
                timeout_ms: ticket.timeout.as_millis() as u64,
            },
        );
        Some(ticket)
    }

    // -- Composites -----------------------------------------------------------

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            sessions: self.sessions.read().len(),
            active_lanes: self.lanes.active_lanes(),
            governor: self.governor.metrics(),
            locks: self.locks.metrics(),
            replay: self.replay.metrics(),
            versions: self.versions.metrics(),
            breakers: self.breakers.snapshots(),
            ui: self.ui.metrics(),
            hub: self.hub.metrics(),
            failures_by_kind: self.failures.snapshot(),
        }
    }

    pub fn health(&self) -> HealthSnapshot {
        let open_circuits = self.breakers.has_open_circuit();
        let healthy = self.governor.healthy() && !open_circuits;
        HealthSnapshot {
            status: if healthy { "running" } else { "degraded" }.to_owned(),
            healthy,
            open_circuits,
            sessions: self.sessions.read().len(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    // -- Maintenance ----------------------------------------------------------

    /// One maintenance tick: window pruning, cache expiry, breaker reaping,
    /// and zombie/lifetime session deletion through the full delete path.
    pub async fn sweep(&self) {
        self.governor.cleanup_rate_windows();
        self.replay.cleanup_idempotency();
        self.breakers.reap_idle();

        let mut doomed = self.governor.zombie_sessions();
        for sid in self.governor.expired_sessions() {
            if !doomed.contains(&sid) {
                doomed.push(sid);
            }
        }
        for sid in doomed {
            if self.sessions.read().contains_key(&sid) {
                info!(session = %sid, "sweeping dead session");
                let _ = self.delete_session(&sid).await;
            }
        }
        self.governor.cleanup_zombie_sessions();
    }

    // -- Shutdown -------------------------------------------------------------

    /// Flip the shutdown flag, notify clients, and drain in-flight commands
    /// within `drain`. The drain bounds the wait, not the work: commands
    /// still running at the deadline are counted and left to die with the
    /// process. Idempotent.
    pub async fn initiate_shutdown(&self, drain: Duration) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutdown initiated");
        self.hub.broadcast_all(&ServerFrame::ServerShutdown {});

        let futures = self.replay.in_flight_futures();
        if futures.is_empty() {
            return;
        }
        let drain_all = futures_util::future::join_all(futures);
        if tokio::time::timeout(drain, drain_all).await.is_err() {
            let pending = self.replay.metrics().in_flight as u64;
            self.pending_at_shutdown.store(pending, Ordering::Release);
            warn!(pending, "drain deadline reached with commands still running");
        }
    }

    /// Tear down every session and clear all component state.
    pub async fn dispose_all_sessions(&self) {
        let entries: Vec<(String, SessionEntry)> = self.sessions.write().drain().collect();
        for (sid, entry) in entries {
            self.ui.cancel_session_requests(&sid);
            entry.event_task.abort();
            entry.agent.dispose().await;
            self.governor.release_session_slot();
            self.hub.remove_session(&sid);
            self.versions.remove(&sid);
        }
        self.ui.cancel_all();
        self.locks.clear();
        self.replay.clear();
        self.versions.clear();
        self.governor.clear();
        self.breakers.clear();
        info!("all sessions disposed");
    }
}

fn ready_response(response: Response) -> BoxFuture<'static, Response> {
    Box::pin(std::future::ready(response))
}

/// Current epoch millis.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
