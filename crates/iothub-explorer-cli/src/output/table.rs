//! Table-formatted output for CLI.

use chrono::{DateTime, Utc};
use colored::*;
use comfy_table::{Cell, Color, ContentArrangement, Table};

use super::OutputFormatter;
use iothub_explorer_core::registry::{DeviceIdentity, DeviceStatus};

pub struct TableOutput;

impl TableOutput {
    pub fn new() -> Self {
        Self
    }

    fn status_cell(status: DeviceStatus) -> Cell {
        match status {
            DeviceStatus::Enabled => Cell::new(status.as_str()).fg(Color::Green),
            DeviceStatus::Disabled => Cell::new(status.as_str()).fg(Color::Red),
        }
    }
}

impl Default for TableOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputFormatter for TableOutput {
    fn format_devices(&self, devices: &[DeviceIdentity]) -> String {
        if devices.is_empty() {
            return "No devices found.".to_string();
        }

        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Device ID", "Status", "Connection", "Auth", "C2D Queue", "Last Activity"]);

        for device in devices {
            table.add_row(vec![
                Cell::new(&device.device_id),
                Self::status_cell(device.status),
                Cell::new(device.connection_state.as_deref().unwrap_or("-")),
                Cell::new(device.auth_summary()),
                Cell::new(
                    device
                        .cloud_to_device_message_count
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ),
                Cell::new(device.last_activity_time.as_deref().unwrap_or("-")),
            ]);
        }

        format!("{}\n\nFound {} device(s)", table, devices.len())
    }

    fn format_device(&self, device: &DeviceIdentity, connection_string: Option<&str>) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Device: {}", device.device_id));
        let status = match device.status {
            DeviceStatus::Enabled => device.status.as_str().green(),
            DeviceStatus::Disabled => device.status.as_str().red(),
        };
        lines.push(format!("  Status:       {}", status));
        if let Some(state) = &device.connection_state {
            lines.push(format!("  Connection:   {}", state));
        }
        if let Some(time) = &device.last_activity_time {
            lines.push(format!("  Last active:  {}", time));
        }
        if let Some(count) = device.cloud_to_device_message_count {
            lines.push(format!("  C2D queue:    {}", count));
        }
        lines.push(format!("  Auth:         {}", device.auth_summary()));

        let keys = &device.authentication.symmetric_key;
        if let Some(key) = &keys.primary_key {
            lines.push(format!("    Primary key:   {}", key));
        }
        if let Some(key) = &keys.secondary_key {
            lines.push(format!("    Secondary key: {}", key));
        }

        let thumbprints = &device.authentication.x509_thumbprint;
        if let Some(t) = &thumbprints.primary_thumbprint {
            lines.push(format!("    Primary thumbprint:   {}", t));
        }
        if let Some(t) = &thumbprints.secondary_thumbprint {
            lines.push(format!("    Secondary thumbprint: {}", t));
        }

        if let Some(cs) = connection_string {
            lines.push(format!("  Connection string: {}", cs));
        }

        lines.join("\n")
    }

    fn format_session(&self, host: &str, expires_at: Option<DateTime<Utc>>, path: &str) -> String {
        let expiry = expires_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "unknown".to_string());

        format!(
            "Session started for {}\n  Expires:  {}\n  Saved to: {}",
            host.bold(),
            expiry,
            path
        )
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}
