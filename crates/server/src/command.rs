// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The command taxonomy and its classification tables.
//!
//! Every behavioral distinction the pipeline makes between command types is
//! expressed here as a method on [`CommandKind`]: scope, timeout class,
//! version-bump eligibility, circuit-breaker guarding, and abort hooks.
//! `TimeoutPolicy` (see `engine.rs`) consumes `timeout_class` as its default
//! table and may override it per deployment.

use serde::{Deserialize, Serialize};
use std::fmt;

/// All command types this deployment accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    // Server-scoped.
    ListSessions,
    CreateSession,
    DeleteSession,
    SwitchSession,
    ListStoredSessions,
    LoadSession,
    GetMetrics,
    HealthCheck,
    ExtensionUiResponse,
    // Session-scoped.
    Prompt,
    Steer,
    FollowUp,
    Abort,
    GetState,
    GetMessages,
    SetModel,
    CycleModel,
    SetThinkingLevel,
    CycleThinkingLevel,
    Compact,
    AbortCompaction,
    SetAutoCompaction,
    SetAutoRetry,
    AbortRetry,
    Bash,
    AbortBash,
    GetSessionStats,
    SetSessionName,
    ExportHtml,
    NewSession,
    SwitchSessionFile,
    Fork,
    ListModels,
    ListThemes,
}

/// Timeout category a command type maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutClass {
    /// Long-lived lifecycle operations run without a deadline.
    None,
    /// Fast reads and small writes.
    Short,
    /// Model calls and other potentially slow work.
    Default,
}

/// Type-specific cancellation hook invoked when a timeout fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortKind {
    Generation,
    Shell,
    Compaction,
}

impl CommandKind {
    pub const ALL: [CommandKind; 34] = [
        Self::ListSessions,
        Self::CreateSession,
        Self::DeleteSession,
        Self::SwitchSession,
        Self::ListStoredSessions,
        Self::LoadSession,
        Self::GetMetrics,
        Self::HealthCheck,
        Self::ExtensionUiResponse,
        Self::Prompt,
        Self::Steer,
        Self::FollowUp,
        Self::Abort,
        Self::GetState,
        Self::GetMessages,
        Self::SetModel,
        Self::CycleModel,
        Self::SetThinkingLevel,
        Self::CycleThinkingLevel,
        Self::Compact,
        Self::AbortCompaction,
        Self::SetAutoCompaction,
        Self::SetAutoRetry,
        Self::AbortRetry,
        Self::Bash,
        Self::AbortBash,
        Self::GetSessionStats,
        Self::SetSessionName,
        Self::ExportHtml,
        Self::NewSession,
        Self::SwitchSessionFile,
        Self::Fork,
        Self::ListModels,
        Self::ListThemes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ListSessions => "list_sessions",
            Self::CreateSession => "create_session",
            Self::DeleteSession => "delete_session",
            Self::SwitchSession => "switch_session",
            Self::ListStoredSessions => "list_stored_sessions",
            Self::LoadSession => "load_session",
            Self::GetMetrics => "get_metrics",
            Self::HealthCheck => "health_check",
            Self::ExtensionUiResponse => "extension_ui_response",
            Self::Prompt => "prompt",
            Self::Steer => "steer",
            Self::FollowUp => "follow_up",
            Self::Abort => "abort",
            Self::GetState => "get_state",
            Self::GetMessages => "get_messages",
            Self::SetModel => "set_model",
            Self::CycleModel => "cycle_model",
            Self::SetThinkingLevel => "set_thinking_level",
            Self::CycleThinkingLevel => "cycle_thinking_level",
            Self::Compact => "compact",
            Self::AbortCompaction => "abort_compaction",
            Self::SetAutoCompaction => "set_auto_compaction",
            Self::SetAutoRetry => "set_auto_retry",
            Self::AbortRetry => "abort_retry",
            Self::Bash => "bash",
            Self::AbortBash => "abort_bash",
            Self::GetSessionStats => "get_session_stats",
            Self::SetSessionName => "set_session_name",
            Self::ExportHtml => "export_html",
            Self::NewSession => "new_session",
            Self::SwitchSessionFile => "switch_session_file",
            Self::Fork => "fork",
            Self::ListModels => "list_models",
            Self::ListThemes => "list_themes",
        }
    }

    /// Parse a wire type tag. `None` means an unknown command type.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }

    /// Session-scoped commands require a non-empty `sessionId` and execute
    /// against a live agent session.
    pub fn is_session_scoped(&self) -> bool {
        !matches!(
            self,
            Self::ListSessions
                | Self::CreateSession
                | Self::DeleteSession
                | Self::SwitchSession
                | Self::ListStoredSessions
                | Self::LoadSession
                | Self::GetMetrics
                | Self::HealthCheck
                | Self::ExtensionUiResponse
        )
    }

    /// Default timeout category. `TimeoutPolicy` may override per deployment.
    pub fn timeout_class(&self) -> TimeoutClass {
        match self {
            Self::CreateSession | Self::LoadSession | Self::DeleteSession => TimeoutClass::None,
            Self::Prompt
            | Self::Steer
            | Self::FollowUp
            | Self::Compact
            | Self::Bash
            | Self::Fork
            | Self::NewSession
            | Self::SwitchSessionFile => TimeoutClass::Default,
            _ => TimeoutClass::Short,
        }
    }

    /// Whether a successful execution advances the session version counter.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::Prompt
                | Self::Steer
                | Self::FollowUp
                | Self::Compact
                | Self::SetModel
                | Self::CycleModel
                | Self::SetThinkingLevel
                | Self::CycleThinkingLevel
                | Self::SetAutoCompaction
                | Self::SetAutoRetry
                | Self::SetSessionName
                | Self::Bash
                | Self::NewSession
                | Self::SwitchSessionFile
                | Self::Fork
        )
    }

    /// Model-adjacent commands dispatch through the provider's circuit breaker.
    pub fn uses_model_provider(&self) -> bool {
        matches!(self, Self::Prompt | Self::Steer | Self::FollowUp | Self::Compact)
    }

    /// The cancellation hook to fire when this command's timeout expires.
    pub fn abort_kind(&self) -> Option<AbortKind> {
        match self {
            Self::Prompt | Self::Steer | Self::FollowUp => Some(AbortKind::Generation),
            Self::Bash => Some(AbortKind::Shell),
            Self::Compact => Some(AbortKind::Compaction),
            _ => None,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
