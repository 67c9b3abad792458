//! Event message flowing into the sink
//!
//! The payload is kept as `Bytes` so cloning a message for a retry or a
//! second destination only bumps a refcount.

use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;

/// A single log event
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use hdfs_sink::message::Message;
///
/// let msg = Message::new("web-01", "access", Bytes::from("GET /"));
/// assert_eq!(msg.source, "web-01");
/// assert_eq!(msg.field("type").as_deref(), Some("access"));
/// ```
#[derive(Debug, Clone)]
pub struct Message {
    /// Unique identifier (ULID by default)
    pub id: String,

    /// Unix timestamp in nanoseconds
    pub timestamp: i64,

    /// Origin identifier (e.g., host or service name)
    pub source: String,

    /// User-defined message type (e.g., "access", "audit")
    pub message_type: String,

    /// Arbitrary string fields, addressable from templates
    pub metadata: HashMap<String, String>,

    /// Raw event body
    pub payload: Bytes,

    /// Routing hints carried through from the producer
    pub route_to: Vec<String>,
}

impl Message {
    /// Create a new Message with auto-generated ID and current timestamp
    pub fn new(source: impl Into<String>, message_type: impl Into<String>, payload: Bytes) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            timestamp: Utc::now().timestamp_nanos_opt().unwrap_or(0),
            source: source.into(),
            message_type: message_type.into(),
            metadata: HashMap::new(),
            payload,
            route_to: Vec::new(),
        }
    }

    /// Create a Message with all fields specified
    pub fn with_id(
        id: impl Into<String>,
        timestamp: i64,
        source: impl Into<String>,
        message_type: impl Into<String>,
        payload: Bytes,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            source: source.into(),
            message_type: message_type.into(),
            metadata: HashMap::new(),
            payload,
            route_to: Vec::new(),
        }
    }

    /// Add metadata to the message
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set routing hints
    pub fn with_routes(mut self, routes: Vec<String>) -> Self {
        self.route_to = routes;
        self
    }

    /// Get payload as a string slice (if valid UTF-8)
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Event time as a UTC datetime
    pub fn datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.timestamp)
    }

    /// Look up a field by name for template interpolation
    ///
    /// Built-in names (`id`, `source`, `type`, `timestamp`, `payload`) win over
    /// metadata keys of the same name.
    pub fn field(&self, name: &str) -> Option<Cow<'_, str>> {
        match name {
            "id" => Some(Cow::Borrowed(&self.id)),
            "source" => Some(Cow::Borrowed(&self.source)),
            "type" => Some(Cow::Borrowed(&self.message_type)),
            "timestamp" => Some(Cow::Owned(self.datetime().to_rfc3339())),
            "payload" => Some(String::from_utf8_lossy(&self.payload)),
            other => self.metadata.get(other).map(|v| Cow::Borrowed(v.as_str())),
        }
    }

    /// Full structured serialization, used when no message format is configured
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&MessageJson::from(self))
    }

    /// Parse one line of newline-delimited JSON input
    ///
    /// Only `source` is required. Missing `id` and `timestamp` are generated,
    /// `timestamp` is RFC 3339, and a non-string `payload` is kept as its
    /// compact JSON text.
    pub fn from_json_line(line: &str) -> serde_json::Result<Self> {
        let input: MessageInput = serde_json::from_str(line)?;

        let mut msg = Message::new(input.source, input.message_type, Bytes::new());
        if let Some(id) = input.id {
            msg.id = id;
        }
        if let Some(ts) = input.timestamp {
            let parsed = DateTime::parse_from_rfc3339(&ts).map_err(|e| {
                <serde_json::Error as serde::de::Error>::custom(format!("timestamp: {e}"))
            })?;
            msg.timestamp = parsed.timestamp_nanos_opt().unwrap_or(0);
        }
        msg.payload = match input.payload {
            serde_json::Value::Null => Bytes::new(),
            serde_json::Value::String(text) => Bytes::from(text),
            other => Bytes::from(other.to_string()),
        };
        msg.metadata = input.metadata;
        msg.route_to = input.route_to;

        Ok(msg)
    }
}

/// Accepted input shape, the mirror of [`MessageJson`]
#[derive(Deserialize)]
struct MessageInput {
    id: Option<String>,
    timestamp: Option<String>,
    source: String,
    #[serde(rename = "type", default)]
    message_type: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    route_to: Vec<String>,
}

/// Serialized shape of a message
#[derive(Serialize)]
struct MessageJson<'a> {
    id: &'a str,
    timestamp: String,
    source: &'a str,
    #[serde(rename = "type")]
    message_type: &'a str,
    metadata: &'a HashMap<String, String>,
    payload: Cow<'a, str>,
    route_to: &'a [String],
}

impl<'a> From<&'a Message> for MessageJson<'a> {
    fn from(m: &'a Message) -> Self {
        // Text payloads stay readable, anything else is base64
        let payload = match m.payload_str() {
            Some(text) => Cow::Borrowed(text),
            None => Cow::Owned(STANDARD.encode(&m.payload)),
        };

        Self {
            id: &m.id,
            timestamp: m.datetime().to_rfc3339(),
            source: &m.source,
            message_type: &m.message_type,
            metadata: &m.metadata,
            payload,
            route_to: &m.route_to,
        }
    }
}
