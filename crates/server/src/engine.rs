// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution-engine policy: timeout classification, the timeout/abort race,
//! and dependency resolution against the replay store.
//!
//! Lane serialization itself lives in `lanes.rs`; the manager composes both.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::command::{CommandKind, TimeoutClass};
use crate::protocol::Response;
use crate::replay::{DependencyLookup, ReplayStore};

/// The classification table mapping command types to timeout budgets.
///
/// Defaults come from [`CommandKind::timeout_class`]; deployments can
/// override individual kinds without touching call sites.
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    short: Duration,
    default: Duration,
    dependency: Duration,
    overrides: HashMap<CommandKind, TimeoutClass>,
}

impl TimeoutPolicy {
    pub fn new(short: Duration, default: Duration, dependency: Duration) -> Self {
        Self { short, default, dependency, overrides: HashMap::new() }
    }

    /// Override the class for one command kind.
    pub fn with_override(mut self, kind: CommandKind, class: TimeoutClass) -> Self {
        self.overrides.insert(kind, class);
        self
    }

    pub fn classify(&self, kind: CommandKind) -> TimeoutClass {
        self.overrides.get(&kind).copied().unwrap_or_else(|| kind.timeout_class())
    }

    /// The wall-clock budget for a command, or `None` for unbounded kinds.
    pub fn budget(&self, kind: CommandKind) -> Option<Duration> {
        match self.classify(kind) {
            TimeoutClass::None => None,
            TimeoutClass::Short => Some(self.short),
            TimeoutClass::Default => Some(self.default),
        }
    }

    pub fn dependency_timeout(&self) -> Duration {
        self.dependency
    }
}

/// Await the declared dependencies of a command.
///
/// Fails fast on self-dependency and on dependencies that share this
/// command's lane (a task queued behind us can never finish while we wait
/// for it). Cross-lane in-flight dependencies are awaited with a
/// per-dependency timeout; cycles across lanes are not detected — the
/// timeout is the safety net.
pub async fn await_dependencies(
    replay: &ReplayStore,
    command_id: &str,
    lane: &str,
    deps: &[String],
    per_dep_timeout: Duration,
) -> Result<(), String> {
    for dep in deps {
        if dep.is_empty() {
            return Err("dependency id must not be empty".to_owned());
        }
        if dep == command_id {
            return Err(format!("command {command_id:?} cannot depend on itself"));
        }
        match replay.lookup_dependency(dep) {
            DependencyLookup::Completed { success: true, .. } => {}
            DependencyLookup::Completed { success: false, error } => {
                return Err(format!(
                    "dependency {dep:?} failed: {}",
                    error.unwrap_or_else(|| "unknown error".to_owned())
                ));
            }
            DependencyLookup::Unknown => {
                return Err(format!("unknown dependency {dep:?}"));
            }
            DependencyLookup::InFlight { lane: dep_lane, future } => {
                if dep_lane == lane {
                    return Err(format!(
                        "dependency {dep:?} is queued on the same lane and would deadlock"
                    ));
                }
                match tokio::time::timeout(per_dep_timeout, future).await {
                    Err(_) => {
                        return Err(format!(
                            "timed out after {}ms waiting for dependency {dep:?}",
                            per_dep_timeout.as_millis()
                        ));
                    }
                    Ok(response) if !response.success => {
                        return Err(format!(
                            "dependency {dep:?} failed: {}",
                            response.error.unwrap_or_else(|| "unknown error".to_owned())
                        ));
                    }
                    Ok(_) => {}
                }
            }
        }
    }
    Ok(())
}

/// Race a command's result against its timeout budget.
///
/// On expiry the type's abort hook runs best-effort, and the timeout
/// response is returned regardless of whether the abort landed. The
/// original task keeps running on its lane; its eventual result is
/// dropped with the abandoned receiver.
pub async fn run_with_timeout<A, Fut>(
    kind: CommandKind,
    budget: Option<Duration>,
    result_rx: oneshot::Receiver<Response>,
    abort: A,
) -> Response
where
    A: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    let abandoned = || Response::fail(kind.as_str(), "command execution abandoned");
    match budget {
        None => result_rx.await.unwrap_or_else(|_| abandoned()),
        Some(limit) => match tokio::time::timeout(limit, result_rx).await {
            Ok(result) => result.unwrap_or_else(|_| abandoned()),
            Err(_) => {
                debug!(command = kind.as_str(), budget_ms = limit.as_millis() as u64,
                    "command timed out; firing abort hook");
                abort().await;
                Response::fail(
                    kind.as_str(),
                    format!("{kind} timed out after {}ms", limit.as_millis()),
                )
                .mark_timed_out()
            }
        },
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
