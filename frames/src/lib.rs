//! Push-transport envelope model and JSON codec.
//!
//! This crate owns the wire representation shared by the sync engine and the
//! CLI. Outbound envelopes are always `{type, payload, timestamp}`; inbound
//! envelopes are `{type, data|payload}` because older servers put the body
//! under `data` and newer ones under `payload`. Bodies stay flexible
//! (`serde_json::Value`) so shape handling lives with the router.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Error returned by [`decode_inbound`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The raw text is not valid JSON.
    #[error("failed to parse envelope JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The top-level JSON value is not an object.
    #[error("envelope is not a JSON object")]
    NotAnObject,
    /// The envelope has no string `type` field.
    #[error("envelope is missing a string `type`")]
    MissingType,
}

/// A change notification sent by this client to the push server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name, e.g. `"card-moved"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Event body.
    pub payload: Value,
    /// ISO-8601 instant the change was produced.
    pub timestamp: String,
}

impl Envelope {
    /// Build an envelope stamped with the current time.
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self::at(kind, payload, Utc::now())
    }

    /// Build an envelope stamped with an explicit instant.
    #[must_use]
    pub fn at(kind: impl Into<String>, payload: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: kind.into(),
            payload,
            timestamp: format_timestamp(timestamp),
        }
    }
}

/// A message received from the push server, with its body already unwrapped.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundFrame {
    /// Raw event name exactly as sent (either spelling).
    pub kind: String,
    /// Body taken from `data`, falling back to `payload`. `Null` when neither is set.
    pub body: Value,
}

/// Encode an outbound envelope as a JSON text frame.
#[must_use]
pub fn encode_envelope(envelope: &Envelope) -> String {
    // `Envelope` holds only strings and a `Value`, neither of which can fail
    // to serialize, so the fallback is unreachable.
    serde_json::to_string(envelope).unwrap_or_default()
}

/// Decode an inbound JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Json`] for malformed text, [`CodecError::NotAnObject`]
/// for non-object envelopes and [`CodecError::MissingType`] when `type` is
/// absent or not a string.
pub fn decode_inbound(text: &str) -> Result<InboundFrame, CodecError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut map) = value else {
        return Err(CodecError::NotAnObject);
    };
    let kind = match map.remove("type") {
        Some(Value::String(kind)) => kind,
        _ => return Err(CodecError::MissingType),
    };
    Ok(InboundFrame { kind, body: take_body(&mut map) })
}

fn take_body(map: &mut Map<String, Value>) -> Value {
    match map.remove("data") {
        Some(data) if !data.is_null() => data,
        _ => map.remove("payload").unwrap_or(Value::Null),
    }
}

/// Format an instant the way envelopes carry it: RFC 3339, millisecond precision, `Z` suffix.
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
