// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lane serialization: per-key FIFO execution domains.
//!
//! A lane is just a tail future in a map. Each submission takes the current
//! tail out of the map, installs its own completion signal as the new tail,
//! and spawns a task that waits for the previous tail before running. Errors
//! from the previous tail are swallowed so one failed task cannot wedge the
//! lane. When the just-finished task is still the tail, the entry is removed
//! — an absent lane is an idle lane.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::oneshot;

/// Lane key for commands without a session.
pub const SERVER_LANE: &str = "server";

/// Derive the lane key for a command.
pub fn lane_for(session_id: Option<&str>) -> String {
    match session_id {
        Some(id) if !id.is_empty() => format!("session:{id}"),
        _ => SERVER_LANE.to_owned(),
    }
}

struct LaneTail {
    generation: u64,
    done: oneshot::Receiver<()>,
}

#[derive(Default)]
struct LaneMap {
    tails: HashMap<String, LaneTail>,
    generation: u64,
}

#[derive(Default, Clone)]
pub struct LaneRunner {
    inner: Arc<parking_lot::Mutex<LaneMap>>,
}

impl LaneRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `task` behind the lane's current tail. The returned receiver
    /// resolves with the task's output; it errs only if the runtime drops
    /// the task wholesale (shutdown).
    pub fn submit<T, F>(&self, key: &str, task: F) -> oneshot::Receiver<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        let (prev, generation) = {
            let mut map = self.inner.lock();
            map.generation += 1;
            let generation = map.generation;
            // Only this submission will ever await the previous tail, so it
            // is moved out of the map rather than shared.
            let prev = map.tails.remove(key);
            map.tails.insert(key.to_owned(), LaneTail { generation, done: done_rx });
            (prev, generation)
        };

        let key = key.to_owned();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Some(prev) = prev {
                // A dropped or failed predecessor must not block the lane.
                let _ = prev.done.await;
            }
            let output = task.await;
            let _ = result_tx.send(output);
            {
                let mut map = inner.lock();
                if map.tails.get(&key).map(|t| t.generation) == Some(generation) {
                    map.tails.remove(&key);
                }
            }
            let _ = done_tx.send(());
        });
        result_rx
    }

    /// Number of lanes with queued or running work.
    pub fn active_lanes(&self) -> usize {
        self.inner.lock().tails.len()
    }
}

#[cfg(test)]
#[path = "lanes_tests.rs"]
mod tests;
