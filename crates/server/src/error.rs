// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure kinds shared across the command pipeline.
///
/// Nothing raises across component boundaries; every failure surfaces as a
/// `Response { success: false }` tagged (internally) with one of these kinds
/// so the manager can count failures per class in `get_metrics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed command: missing type, bad identifier, invalid enum value.
    Validation,
    /// Admission refused: rate limit, size limit, in-flight cap, shutdown.
    Admission,
    /// Identifier or idempotency key reused with different content.
    Conflict,
    /// Dependency unknown, same-lane, failed, or timed out.
    Dependency,
    /// Optimistic session-version fence did not hold.
    Precondition,
    /// Command exceeded its type's timeout budget.
    Timeout,
    /// Provider circuit breaker rejected the call.
    Circuit,
    /// The agent-session capability reported a failure.
    Downstream,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Admission => "admission",
            Self::Conflict => "conflict",
            Self::Dependency => "dependency",
            Self::Precondition => "precondition",
            Self::Timeout => "timeout",
            Self::Circuit => "circuit",
            Self::Downstream => "downstream",
        }
    }

    /// All kinds, for metrics table initialization.
    pub const ALL: [ErrorKind; 8] = [
        Self::Validation,
        Self::Admission,
        Self::Conflict,
        Self::Dependency,
        Self::Precondition,
        Self::Timeout,
        Self::Circuit,
        Self::Downstream,
    ];
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
