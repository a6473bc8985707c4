// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Structural command validation.
//!
//! Everything here runs before the command consumes rate quota; a rejected
//! command has no side effects. Rules are pure functions returning a
//! human-readable reason, never panicking and never raising.

use crate::command::CommandKind;
use crate::protocol::{Command, SYNTHETIC_ID_PREFIX};

/// Maximum byte length for client-supplied identifiers.
pub const MAX_ID_BYTES: usize = 256;
/// Maximum number of declared dependencies.
pub const MAX_DEPENDENCIES: usize = 32;
/// Maximum byte length for path-bearing fields.
pub const MAX_PATH_BYTES: usize = 4096;

/// Thinking levels accepted by `set_thinking_level`.
pub const THINKING_LEVELS: [&str; 4] = ["off", "low", "medium", "high"];

/// Validate a command against the structural rules. The command's type tag
/// has already been resolved to `kind`.
pub fn validate(cmd: &Command, kind: CommandKind) -> Result<(), String> {
    if let Some(id) = &cmd.id {
        validate_identifier("id", id)?;
    }
    if let Some(client_id) = &cmd.client_id {
        validate_identifier("clientId", client_id)?;
    }
    if let Some(key) = &cmd.idempotency_key {
        validate_identifier("idempotencyKey", key)?;
    }

    if kind.is_session_scoped() {
        match cmd.session_id.as_deref() {
            None | Some("") => {
                return Err(format!("{kind} requires a non-empty sessionId"));
            }
            Some(sid) => validate_session_id(sid)?,
        }
    } else if let Some(sid) = cmd.session_id.as_deref() {
        // Server-scoped commands may target a session (create/delete/load).
        validate_session_id(sid)?;
    }

    if cmd.if_session_version.is_some() && !kind.is_session_scoped() {
        return Err(format!("ifSessionVersion is not valid on {kind}"));
    }

    if let Some(deps) = &cmd.depends_on {
        if cmd.id.is_none() {
            return Err("dependsOn requires an explicit id".to_owned());
        }
        if deps.len() > MAX_DEPENDENCIES {
            return Err(format!("dependsOn lists {} ids; the maximum is {MAX_DEPENDENCIES}", deps.len()));
        }
        for dep in deps {
            if dep.is_empty() {
                return Err("dependsOn contains an empty id".to_owned());
            }
            validate_identifier("dependsOn entry", dep)?;
        }
    }

    validate_payload(cmd, kind)
}

/// Type-specific payload rules.
fn validate_payload(cmd: &Command, kind: CommandKind) -> Result<(), String> {
    match kind {
        CommandKind::CreateSession | CommandKind::LoadSession => {
            if let Some(dir) = cmd.payload_str("workingDir") {
                validate_working_dir(dir)?;
            }
            Ok(())
        }
        CommandKind::SwitchSessionFile | CommandKind::ExportHtml => {
            if let Some(path) = cmd.payload_str("path") {
                validate_working_dir(path)?;
            }
            Ok(())
        }
        CommandKind::SetThinkingLevel => match cmd.payload_str("level") {
            Some(level) if THINKING_LEVELS.contains(&level) => Ok(()),
            Some(level) => Err(format!(
                "invalid thinking level {level:?}; expected one of {THINKING_LEVELS:?}"
            )),
            None => Err("set_thinking_level requires a level".to_owned()),
        },
        CommandKind::SetModel => match cmd.payload_str("model") {
            Some(model) if !model.is_empty() => Ok(()),
            _ => Err("set_model requires a non-empty model".to_owned()),
        },
        CommandKind::Prompt | CommandKind::Steer | CommandKind::FollowUp => {
            match cmd.payload_str("text") {
                Some(text) if !text.is_empty() => Ok(()),
                _ => Err(format!("{kind} requires non-empty text")),
            }
        }
        CommandKind::Bash => match cmd.payload_str("command") {
            Some(sh) if !sh.is_empty() => Ok(()),
            _ => Err("bash requires a non-empty command".to_owned()),
        },
        CommandKind::ExtensionUiResponse => match cmd.payload_str("requestId") {
            Some(rid) if !rid.is_empty() => Ok(()),
            _ => Err("extension_ui_response requires a requestId".to_owned()),
        },
        _ => Ok(()),
    }
}

/// Opaque identifiers: non-empty, bounded length, never the reserved
/// synthetic prefix — that namespace belongs to server-minted ids.
fn validate_identifier(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{field} must be non-empty"));
    }
    if value.len() > MAX_ID_BYTES {
        return Err(format!("{field} exceeds {MAX_ID_BYTES} bytes"));
    }
    if value.starts_with(SYNTHETIC_ID_PREFIX) {
        return Err(format!(
            "{field} must not use the reserved '{SYNTHETIC_ID_PREFIX}' prefix"
        ));
    }
    Ok(())
}

/// Session identifiers: bounded length, restricted charset.
pub fn validate_session_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("sessionId must be non-empty".to_owned());
    }
    if id.len() > MAX_ID_BYTES {
        return Err(format!("sessionId exceeds {MAX_ID_BYTES} bytes"));
    }
    if !id.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-')) {
        return Err("sessionId may only contain [A-Za-z0-9_.-]".to_owned());
    }
    Ok(())
}

/// Working directories and other path-bearing fields.
pub fn validate_working_dir(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("path must be non-empty".to_owned());
    }
    if path.len() > MAX_PATH_BYTES {
        return Err(format!("path exceeds {MAX_PATH_BYTES} bytes"));
    }
    if path.contains('\0') {
        return Err("path contains a null byte".to_owned());
    }
    if path.starts_with('~') {
        return Err("path must not start with '~'".to_owned());
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err("path must not contain '..'".to_owned());
    }
    Ok(())
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
