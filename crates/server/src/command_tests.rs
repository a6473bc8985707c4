// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn parse_roundtrips_every_kind() {
    for kind in CommandKind::ALL {
        assert_eq!(CommandKind::parse(kind.as_str()), Some(kind));
    }
}

#[test]
fn parse_rejects_unknown() {
    assert_eq!(CommandKind::parse("definitely_not_a_command"), None);
    assert_eq!(CommandKind::parse(""), None);
    assert_eq!(CommandKind::parse("Prompt"), None);
}

#[test]
fn serde_tag_matches_as_str() {
    for kind in CommandKind::ALL {
        let json = serde_json::to_string(&kind).unwrap_or_default();
        assert_eq!(json, format!("\"{}\"", kind.as_str()));
    }
}

#[parameterized(
    list_sessions = { CommandKind::ListSessions, false },
    create_session = { CommandKind::CreateSession, false },
    extension_ui_response = { CommandKind::ExtensionUiResponse, false },
    prompt = { CommandKind::Prompt, true },
    bash = { CommandKind::Bash, true },
    list_models = { CommandKind::ListModels, true },
)]
fn session_scope(kind: CommandKind, scoped: bool) {
    assert_eq!(kind.is_session_scoped(), scoped);
}

#[test]
fn lifecycle_commands_have_no_timeout() {
    assert_eq!(CommandKind::CreateSession.timeout_class(), TimeoutClass::None);
    assert_eq!(CommandKind::LoadSession.timeout_class(), TimeoutClass::None);
    assert_eq!(CommandKind::DeleteSession.timeout_class(), TimeoutClass::None);
}

#[test]
fn model_calls_get_default_timeout_and_breaker() {
    for kind in [CommandKind::Prompt, CommandKind::Steer, CommandKind::FollowUp, CommandKind::Compact]
    {
        assert_eq!(kind.timeout_class(), TimeoutClass::Default);
        assert!(kind.uses_model_provider());
    }
    assert!(!CommandKind::Bash.uses_model_provider());
    assert!(!CommandKind::GetState.uses_model_provider());
}

#[test]
fn reads_never_mutate() {
    for kind in [
        CommandKind::GetState,
        CommandKind::GetMessages,
        CommandKind::GetSessionStats,
        CommandKind::ExportHtml,
        CommandKind::ListModels,
        CommandKind::ListThemes,
        CommandKind::Abort,
        CommandKind::AbortBash,
        CommandKind::AbortCompaction,
        CommandKind::AbortRetry,
    ] {
        assert!(!kind.is_mutating(), "{kind} must not bump versions");
    }
}

#[test]
fn abort_hooks_cover_the_long_runners() {
    assert_eq!(CommandKind::Prompt.abort_kind(), Some(AbortKind::Generation));
    assert_eq!(CommandKind::Bash.abort_kind(), Some(AbortKind::Shell));
    assert_eq!(CommandKind::Compact.abort_kind(), Some(AbortKind::Compaction));
    assert_eq!(CommandKind::GetState.abort_kind(), None);
}
