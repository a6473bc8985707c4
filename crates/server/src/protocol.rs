// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire message types shared by the socket and stdio transports.
//!
//! Both transports carry the same JSON documents: a [`Command`] envelope
//! inbound, a tagged [`ServerFrame`] outbound. Frames use internally-tagged
//! enums (`{"type": "response", ...}`); field names are camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version advertised in `server_ready`.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Reserved prefix for server-minted command identifiers.
pub const SYNTHETIC_ID_PREFIX: &str = "anon:";

/// Client → server command envelope.
///
/// `type` routes the command; everything the envelope does not name lands in
/// `payload` and is interpreted by the command's handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_session_version: Option<u64>,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, Value>,
}

impl Command {
    /// Minimal constructor used by tests and internal callers.
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            id: None,
            client_id: None,
            session_id: None,
            depends_on: None,
            idempotency_key: None,
            if_session_version: None,
            payload: serde_json::Map::new(),
        }
    }

    /// Fetch a string payload field.
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }
}

/// Server → client response record.
///
/// Immutable once observed by any client: replays return stored responses
/// verbatim, with only the `id` adjusted to match the requesting command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub command: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replayed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timed_out: Option<bool>,
}

impl Response {
    pub fn ok(command: &str, data: Option<Value>) -> Self {
        Self {
            command: command.to_owned(),
            success: true,
            error: None,
            data,
            id: None,
            session_version: None,
            replayed: None,
            timed_out: None,
        }
    }

    pub fn fail(command: &str, error: impl Into<String>) -> Self {
        Self {
            command: command.to_owned(),
            success: false,
            error: Some(error.into()),
            data: None,
            id: None,
            session_version: None,
            replayed: None,
            timed_out: None,
        }
    }

    /// Failure response for input that never parsed into a command.
    pub fn parse_error(error: impl Into<String>) -> Self {
        Self::fail("unknown", error)
    }

    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }

    pub fn with_session_version(mut self, version: u64) -> Self {
        self.session_version = Some(version);
        self
    }

    /// Adjust the response identifier to match the current request: copied
    /// when the request carries one, stripped when it does not.
    pub fn adjusted_for(mut self, request_id: Option<&str>) -> Self {
        self.id = request_id.map(str::to_owned);
        self
    }

    pub fn mark_replayed(mut self) -> Self {
        self.replayed = Some(true);
        self
    }

    pub fn mark_timed_out(mut self) -> Self {
        self.timed_out = Some(true);
        self
    }
}

/// Command lifecycle broadcast payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandLifecycle {
    pub command_id: String,
    pub command_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_session_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replayed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timed_out: Option<bool>,
}

impl CommandLifecycle {
    /// Lifecycle payload for a command entering the pipeline.
    pub fn for_command(command_id: &str, cmd: &Command) -> Self {
        Self {
            command_id: command_id.to_owned(),
            command_type: cmd.kind.clone(),
            session_id: cmd.session_id.clone(),
            depends_on: cmd.depends_on.clone().unwrap_or_default(),
            if_session_version: cmd.if_session_version,
            idempotency_key: cmd.idempotency_key.clone(),
            success: None,
            error: None,
            session_version: None,
            replayed: None,
            timed_out: None,
        }
    }

    /// Fill in the outcome fields for a `command_finished` broadcast.
    pub fn finished(mut self, response: &Response) -> Self {
        self.success = Some(response.success);
        self.error = response.error.clone();
        self.session_version = response.session_version;
        self.replayed = response.replayed;
        self.timed_out = response.timed_out;
        self
    }
}

/// Server → client frames. The `type` tag discriminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Response {
        #[serde(flatten)]
        response: Response,
    },
    #[serde(rename_all = "camelCase")]
    Event {
        session_id: String,
        event: Value,
    },
    CommandAccepted {
        data: CommandLifecycle,
    },
    CommandStarted {
        data: CommandLifecycle,
    },
    CommandFinished {
        data: CommandLifecycle,
    },
    #[serde(rename_all = "camelCase")]
    ServerReady {
        version: String,
        protocol_version: String,
        transports: Vec<String>,
    },
    ServerShutdown {},
    #[serde(rename_all = "camelCase")]
    SessionCreated {
        session_id: String,
    },
    #[serde(rename_all = "camelCase")]
    SessionDeleted {
        session_id: String,
    },
    #[serde(rename_all = "camelCase")]
    ExtensionUiRequest {
        request_id: String,
        session_id: String,
        method: String,
        data: Value,
        timeout_ms: u64,
    },
}

impl From<Response> for ServerFrame {
    fn from(response: Response) -> Self {
        ServerFrame::Response { response }
    }
}

/// Decode one inbound frame. Parse failures are reported as a structured
/// error response with `command: "unknown"`, never as a dropped frame.
pub fn decode_command(raw: &[u8]) -> Result<Command, Response> {
    match serde_json::from_slice::<Command>(raw) {
        Ok(cmd) => Ok(cmd),
        Err(e) => Err(Response::parse_error(format!("failed to parse command: {e}"))),
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
