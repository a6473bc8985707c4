// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Composite metrics and health snapshots for `get_metrics` / `health_check`.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::breaker::BreakerSnapshot;
use crate::error::ErrorKind;
use crate::governor::GovernorMetrics;
use crate::hub::HubMetrics;
use crate::replay::ReplayMetrics;
use crate::session_lock::LockMetrics;
use crate::ui::UiMetrics;
use crate::version::VersionMetrics;

/// Everything `get_metrics` returns, assembled from each component.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub sessions: usize,
    pub active_lanes: usize,
    pub governor: GovernorMetrics,
    pub locks: LockMetrics,
    pub replay: ReplayMetrics,
    pub versions: VersionMetrics,
    pub breakers: Vec<BreakerSnapshot>,
    pub ui: UiMetrics,
    pub hub: HubMetrics,
    pub failures_by_kind: BTreeMap<String, u64>,
}

/// The `health_check` composite.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: String,
    pub healthy: bool,
    pub open_circuits: bool,
    pub sessions: usize,
    pub uptime_secs: u64,
}

/// Failure tally per [`ErrorKind`].
#[derive(Default)]
pub struct FailureCounters {
    counts: parking_lot::Mutex<BTreeMap<ErrorKind, u64>>,
}

impl FailureCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, kind: ErrorKind) {
        *self.counts.lock().entry(kind).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts
            .lock()
            .iter()
            .map(|(kind, count)| (kind.as_str().to_owned(), *count))
            .collect()
    }
}
