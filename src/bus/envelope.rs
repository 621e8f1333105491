//! Wire envelopes for dispenser command traffic.
//!
//! Every payload on the bus is a UTF-8 JSON document. Outbound commands
//! carry `{action, ...payload, timestamp, from}`; inbound responses carry
//! `{deviceId, command|action, result, message, timestamp}`. Dispensers
//! name the echoed command in either the `command` or the `action` field
//! depending on firmware revision, so both are accepted.

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ProtocolError;

// ---------------------------------------------------------------------------
// Outbound command envelope
// ---------------------------------------------------------------------------

/// Serialize a command envelope: the action name, the command-specific
/// payload fields, and the standard `timestamp`/`from` trailer.
pub fn command_envelope(
    action: &str,
    payload: Map<String, Value>,
    from: &str,
    now: NaiveDateTime,
) -> Vec<u8> {
    let mut doc = Map::new();
    doc.insert("action".into(), Value::String(action.into()));
    for (k, v) in payload {
        doc.insert(k, v);
    }
    doc.insert(
        "timestamp".into(),
        Value::String(now.format("%Y-%m-%dT%H:%M:%S").to_string()),
    );
    doc.insert("from".into(), Value::String(from.into()));
    Value::Object(doc).to_string().into_bytes()
}

/// The `{action:"discover"}` broadcast that asks dispensers to announce.
pub fn discover_request(from: &str, now: NaiveDateTime) -> Vec<u8> {
    command_envelope("discover", Map::new(), from, now)
}

// ---------------------------------------------------------------------------
// Inbound response
// ---------------------------------------------------------------------------

/// A device-published command response.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    /// Echo of the command name (older firmware uses `action`).
    pub command: Option<String>,
    pub action: Option<String>,
    pub result: Option<String>,
    pub message: Option<String>,
}

/// Terminal-vs-progress classification of a response `result`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// `success` or `completed` — the command finished.
    Success,
    /// A terminal failure; carries the device-supplied message.
    Failure(String),
    /// `received` — the firmware acknowledged the command but is still
    /// executing it. Not terminal; the pending operation stays registered.
    InProgress,
}

impl ResponseMessage {
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(payload).map_err(|_| ProtocolError::MalformedPayload)
    }

    /// The echoed command name, preferring `command` over `action`.
    pub fn command_name(&self) -> Option<&str> {
        self.command.as_deref().or(self.action.as_deref())
    }

    /// Classify the `result` field. A missing or unrecognised result is a
    /// failure — the device said *something* terminal we cannot act on.
    pub fn outcome(&self) -> ResponseOutcome {
        match self.result.as_deref() {
            Some("success" | "completed") => ResponseOutcome::Success,
            Some("received") => ResponseOutcome::InProgress,
            _ => ResponseOutcome::Failure(
                self.message
                    .clone()
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "device reported an error".to_string()),
            ),
        }
    }
}

/// Parse any inbound JSON object payload into a field map. Used for the
/// discovery/status/data topics, whose fields are device-defined.
pub fn parse_object(payload: &[u8]) -> Result<Map<String, Value>, ProtocolError> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(ProtocolError::MalformedPayload),
    }
}
