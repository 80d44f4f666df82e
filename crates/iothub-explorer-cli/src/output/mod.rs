//! Output formatting for CLI results.

pub mod console;
pub mod json;
pub mod table;

pub use json::JsonOutput;
pub use table::TableOutput;

use chrono::{DateTime, Utc};
use iothub_explorer_core::registry::DeviceIdentity;

/// Output formatter trait
pub trait OutputFormatter {
    /// Format device list
    fn format_devices(&self, devices: &[DeviceIdentity]) -> String;

    /// Format one device, with its connection string when requested
    fn format_device(&self, device: &DeviceIdentity, connection_string: Option<&str>) -> String;

    /// Format a saved session
    fn format_session(&self, host: &str, expires_at: Option<DateTime<Utc>>, path: &str) -> String;

    /// Format a generic message
    fn format_message(&self, message: &str) -> String;
}

/// Get the appropriate formatter based on JSON flag
pub fn get_formatter(json: bool) -> Box<dyn OutputFormatter> {
    if json {
        Box::new(JsonOutput::new())
    } else {
        Box::new(TableOutput::new())
    }
}
