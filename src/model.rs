// src/model.rs

use std::fmt;

use serde::Deserialize;
use serde_json::{Map, Value};

/// The fixed set of channels this subscriber listens on, in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookingChannel {
    Created,
    Updated,
    Deleted,
    Reminder,
}

impl BookingChannel {
    pub const ALL: [BookingChannel; 4] = [
        BookingChannel::Created,
        BookingChannel::Updated,
        BookingChannel::Deleted,
        BookingChannel::Reminder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingChannel::Created => "booking.created",
            BookingChannel::Updated => "booking.updated",
            BookingChannel::Deleted => "booking.deleted",
            BookingChannel::Reminder => "booking.reminder",
        }
    }

    /// Exact, case-sensitive lookup of a wire-level channel name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|c| c.as_str()).collect()
    }
}

impl fmt::Display for BookingChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Redis' async pub/sub consumes subscription confirmations itself, so
/// `RedisSession` only yields `Message` and `Other` (pattern deliveries).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    SubscribeAck,
    Message,
    Other,
}

/// Message body as delivered by the broker, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum RawBody {
    Text(String),
    Bytes(Vec<u8>),
    Structured(Value),
}

impl RawBody {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(s) => RawBody::Text(s.to_string()),
            Err(_) => RawBody::Bytes(bytes.to_vec()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub kind: MessageKind,
    pub channel: String,
    pub body: RawBody,
}

impl InboundMessage {
    pub fn message(channel: impl Into<String>, body: RawBody) -> Self {
        InboundMessage {
            kind: MessageKind::Message,
            channel: channel.into(),
            body,
        }
    }
}

/// Result of decoding a [`RawBody`]: parsed JSON, or the raw value on fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
}

impl Payload {
    pub fn is_structured(&self) -> bool {
        matches!(self, Payload::Json(_))
    }

    /// Lenient view of the `{event, data, timestamp}` envelope. `None` unless
    /// the payload is a JSON object.
    pub fn envelope(&self) -> Option<BookingEnvelope> {
        match self {
            Payload::Json(v @ Value::Object(_)) => BookingEnvelope::deserialize(v).ok(),
            _ => None,
        }
    }

    /// Looks up `data.<key>` in the envelope.
    pub fn data_field(&self, key: &str) -> Option<Value> {
        self.envelope()?.data?.remove(key)
    }

    pub fn render_pretty(&self) -> String {
        match self {
            Payload::Json(v) => serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string()),
            Payload::Text(s) => Value::String(s.clone()).to_string(),
            Payload::Bytes(b) => format!("<{} bytes>", b.len()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BookingEnvelope {
    #[serde(deserialize_with = "lenient_string")]
    pub event: Option<String>,
    #[serde(deserialize_with = "lenient_object")]
    pub data: Option<Map<String, Value>>,
    #[serde(deserialize_with = "lenient_string")]
    pub timestamp: Option<String>,
}

// Payloads carry no schema; wrongly-typed envelope fields are treated as absent.
fn lenient_string<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(de)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

fn lenient_object<'de, D>(de: D) -> Result<Option<Map<String, Value>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(de)? {
        Value::Object(m) => Some(m),
        _ => None,
    })
}
