// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Semantic command fingerprints.
//!
//! A fingerprint digests a command's semantic content — every field except
//! the retry-identity fields (`id`, `clientId`, `idempotencyKey`). Two
//! commands that differ only in retry identity share a fingerprint, which is
//! what makes idempotency-key replay and conflict detection line up.
//!
//! Canonical form: a JSON rendering with recursively sorted object keys and
//! unspecified fields omitted (never defaulted). The digest is SHA-256 over
//! the canonical bytes; the canonical string itself is retained so equality
//! checks stay exact even under a digest collision.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::protocol::Command;

/// A command's semantic digest plus its canonical rendering.
#[derive(Debug, Clone, Eq)]
pub struct Fingerprint {
    digest: String,
    canonical: String,
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        // Digest first as the cheap filter; canonical equality decides.
        self.digest == other.digest && self.canonical == other.canonical
    }
}

impl Fingerprint {
    /// Hex SHA-256 digest of the canonical form.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// The canonical rendering the digest was computed over.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.digest)
    }
}

/// Compute the fingerprint for a command.
pub fn fingerprint(cmd: &Command) -> Fingerprint {
    let mut fields: Vec<(String, Value)> = Vec::with_capacity(cmd.payload.len() + 4);
    fields.push(("type".to_owned(), Value::String(cmd.kind.clone())));
    if let Some(sid) = &cmd.session_id {
        fields.push(("sessionId".to_owned(), Value::String(sid.clone())));
    }
    if let Some(deps) = &cmd.depends_on {
        fields.push((
            "dependsOn".to_owned(),
            Value::Array(deps.iter().map(|d| Value::String(d.clone())).collect()),
        ));
    }
    if let Some(v) = cmd.if_session_version {
        fields.push(("ifSessionVersion".to_owned(), Value::Number(v.into())));
    }
    for (k, v) in &cmd.payload {
        fields.push((k.clone(), v.clone()));
    }
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    let mut canonical = String::new();
    canonical.push('{');
    for (i, (key, value)) in fields.iter().enumerate() {
        if i > 0 {
            canonical.push(',');
        }
        write_canonical(&Value::String(key.clone()), &mut canonical);
        canonical.push(':');
        write_canonical(value, &mut canonical);
    }
    canonical.push('}');

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize().iter().map(|b| format!("{b:02x}")).collect::<String>();

    Fingerprint { digest, canonical }
}

/// Render a JSON value with recursively sorted object keys.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        // Value's Display performs correct JSON string escaping.
        Value::String(_) => out.push_str(&value.to_string()),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(&Value::String((*key).clone()), out);
                out.push(':');
                if let Some(v) = map.get(*key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
#[path = "fingerprint_tests.rs"]
mod tests;
