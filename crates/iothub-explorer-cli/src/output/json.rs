//! JSON-formatted output for CLI.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use super::OutputFormatter;
use iothub_explorer_core::registry::DeviceIdentity;

pub struct JsonOutput;

impl JsonOutput {
    pub fn new() -> Self {
        Self
    }

    fn to_json<T: Serialize>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for JsonOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputFormatter for JsonOutput {
    fn format_devices(&self, devices: &[DeviceIdentity]) -> String {
        let output = json!({
            "devices": devices,
            "count": devices.len()
        });
        Self::to_json(&output)
    }

    fn format_device(&self, device: &DeviceIdentity, connection_string: Option<&str>) -> String {
        let mut output = serde_json::to_value(device).unwrap_or(json!({}));

        if let (Some(cs), Value::Object(map)) = (connection_string, &mut output) {
            map.insert("connectionString".to_string(), json!(cs));
        }

        Self::to_json(&output)
    }

    fn format_session(&self, host: &str, expires_at: Option<DateTime<Utc>>, path: &str) -> String {
        Self::to_json(&json!({
            "hostName": host,
            "expiresAt": expires_at.map(|t| t.to_rfc3339()),
            "sessionFile": path
        }))
    }

    fn format_message(&self, message: &str) -> String {
        // Pass JSON payloads through unchanged
        let value: Value = serde_json::from_str(message).unwrap_or_else(|_| json!(message));
        Self::to_json(&json!({ "message": value }))
    }
}
