//! Message envelopes for device-to-cloud and cloud-to-device traffic.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::CoreError;

/// Delivery acknowledgement requested from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckMode {
    None,
    Positive,
    Negative,
    Full,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::None => "none",
            AckMode::Positive => "positive",
            AckMode::Negative => "negative",
            AckMode::Full => "full",
        }
    }
}

/// Outgoing message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_id: String,

    #[serde(default)]
    pub body: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<AckMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,

    /// Envelope fields this tool does not interpret, kept as given.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// New message with a freshly generated id.
    pub fn new(body: impl Into<Value>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            body: body.into(),
            ack: None,
            correlation_id: None,
            properties: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    /// Build a message from command-line text.
    ///
    /// Text that parses as a JSON object with a truthy `messageId` is taken
    /// as a complete envelope, unknown fields included. Anything else,
    /// including text that is not JSON at all, becomes the body of a new
    /// message.
    pub fn from_argument(text: &str, ack: Option<AckMode>) -> Result<Self, CoreError> {
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            if value.get("messageId").is_some_and(is_truthy) {
                return Ok(serde_json::from_value(value)?);
            }
        }

        let mut message = Self::new(text);
        message.ack = ack;
        Ok(message)
    }

    /// Bytes that go on the wire: string bodies verbatim, anything else as JSON.
    pub fn payload(&self) -> Vec<u8> {
        match &self.body {
            Value::String(s) => s.clone().into_bytes(),
            Value::Null => Vec::new(),
            other => other.to_string().into_bytes(),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match &self.body {
            Value::String(_) | Value::Null => "text/plain",
            _ => "application/json",
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.payload()))
    }
}

/// Message delivered to a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    pub message_id: Option<String>,
    /// Token used to settle the message (HTTP `etag`).
    #[serde(skip)]
    pub lock_token: Option<String>,
    #[serde(skip)]
    pub body: Vec<u8>,
    pub properties: BTreeMap<String, String>,
}

impl ReceivedMessage {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
