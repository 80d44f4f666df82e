//! Simulate-device command implementation.
//!
//! All argument checks run before any network I/O; the device identity is
//! then resolved (from the registry when only a device id is given), the
//! transport is built and the simulation runs until every requested
//! activity is done or the user presses Ctrl-C.

use std::path::Path;
use std::time::Duration;

use colored::*;
use serde_json::json;

use iothub_explorer_core::auth::{DeviceConnectionString, DeviceCredentials};
use iothub_explorer_core::device::{
    create_client, run_simulation, Protocol, ReceivePlan, SendPlan, SettlePolicy,
    SimulationObserver, SimulationPlan, SimulationSummary,
};
use iothub_explorer_core::message::{Message, ReceivedMessage};
use iothub_explorer_core::registry::validate_device_id;

use crate::cli::SimulateDeviceArgs;
use crate::error::{CliError, DeviceError};
use crate::output::console;

use super::get::connection_string_for;
use super::registry_client;

/// Where the device credentials come from.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceSource {
    ConnectionString(DeviceConnectionString),
    Registry {
        device_id: String,
        login: Option<String>,
    },
}

/// A validated simulate-device invocation.
#[derive(Debug, Clone)]
pub struct SimulationRequest {
    pub source: DeviceSource,
    pub protocol: Protocol,
    pub plan: SimulationPlan,
}

/// Run the simulate-device command
pub async fn run_simulate_device(
    args: SimulateDeviceArgs,
    timeout: u64,
    json: bool,
) -> Result<(), CliError> {
    let request = validate(&args)?;

    let cs = match request.source {
        DeviceSource::ConnectionString(cs) => cs,
        DeviceSource::Registry { device_id, login } => {
            let registry = registry_client(login.as_deref(), timeout).await?;
            let device = registry.get_device(&device_id).await?;
            connection_string_for(&device, registry.host())?.parse::<DeviceConnectionString>()?
        }
    };

    tracing::debug!(device = %cs.device_id, protocol = %request.protocol, "starting simulation");
    let client = create_client(&cs, request.protocol, Duration::from_millis(timeout))?;
    let observer = ConsoleObserver { json };

    let summary = tokio::select! {
        result = run_simulation(client.as_ref(), &request.plan, &observer) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, closing connection");
            client.close().await?;
            return Ok(());
        }
    };

    if json {
        println!("{}", summary_json(&summary));
    } else {
        console::print_success(&format!(
            "Simulation finished: {} sent, {} received",
            summary.sent, summary.received
        ));
    }

    Ok(())
}

/// Check arguments and build the simulation request.
pub fn validate(args: &SimulateDeviceArgs) -> Result<SimulationRequest, CliError> {
    let source = match (&args.connection_string, &args.device_id) {
        (Some(_), _) if args.login.is_some() => {
            return Err(CliError::InvalidArgument(
                "--connection-string and --login cannot be used together".to_string(),
            ));
        }
        (Some(_), Some(_)) => {
            return Err(CliError::InvalidArgument(
                "--connection-string and a device id cannot be used together".to_string(),
            ));
        }
        (Some(cs), None) => {
            let cs: DeviceConnectionString = cs.parse()?;
            if cs.credentials == DeviceCredentials::X509 {
                return Err(DeviceError::X509NotSupported(cs.device_id).into());
            }
            DeviceSource::ConnectionString(cs)
        }
        (None, Some(device_id)) => {
            validate_device_id(device_id)?;
            DeviceSource::Registry {
                device_id: device_id.clone(),
                login: args.login.clone(),
            }
        }
        (None, None) => {
            return Err(CliError::InvalidArgument(
                "a device id or --connection-string is required".to_string(),
            ));
        }
    };

    let protocol = Protocol::from(args.protocol);

    let settle = SettlePolicy::from(args.settle);
    settle.check_supported_by(protocol)?;

    if let Some(path) = &args.upload_file {
        if !path.is_file() {
            return Err(CliError::InvalidArgument(format!(
                "--upload-file {} does not exist or is not a file",
                path.display()
            )));
        }
    }

    let send = if args.send.is_some() || args.send_count.is_some() {
        let message = args.send.clone().flatten();
        if let Some(text) = &message {
            Message::from_argument(text, None)?;
        }
        Some(SendPlan {
            message,
            interval: Duration::from_millis(args.send_interval),
            count: args.send_count,
        })
    } else {
        None
    };

    let receive = (args.receive || args.receive_count.is_some()).then(|| ReceivePlan {
        count: args.receive_count,
        settle,
    });

    Ok(SimulationRequest {
        source,
        protocol,
        plan: SimulationPlan {
            send,
            receive,
            upload: args.upload_file.clone(),
        },
    })
}

/// Prints simulation events as they happen.
struct ConsoleObserver {
    json: bool,
}

impl SimulationObserver for ConsoleObserver {
    fn on_connected(&self, device_id: &str, protocol: Protocol) {
        if !self.json {
            println!("Device {} connected over {}", device_id.bold(), protocol);
        }
    }

    fn on_message_sent(&self, count: u64, message: &Message) {
        if self.json {
            let event = json!({
                "event": "sent",
                "count": count,
                "messageId": message.message_id,
                "body": message.body,
            });
            println!("{}", event);
        } else {
            println!("Message #{} sent: {}", count, message);
        }
    }

    fn on_message_received(&self, count: u64, message: &ReceivedMessage) {
        if self.json {
            let event = json!({
                "event": "received",
                "count": count,
                "messageId": message.message_id,
                "body": message.body_text(),
                "properties": message.properties,
            });
            println!("{}", event);
        } else {
            println!("{}", received_banner(message));
        }
    }

    fn on_message_settled(&self, message: &ReceivedMessage, policy: SettlePolicy) {
        tracing::debug!(message_id = ?message.message_id, policy = policy.as_str(), "message settled");
    }

    fn on_upload_complete(&self, file: &Path) {
        if self.json {
            println!("{}", json!({ "event": "uploaded", "file": file.display().to_string() }));
        } else {
            console::print_success(&format!("Uploaded {}", file.display()));
        }
    }

    fn on_upload_failed(&self, _file: &Path, error: &DeviceError) {
        console::service_error(&error.to_string());
    }
}

fn received_banner(message: &ReceivedMessage) -> String {
    let mut lines = vec!["==================".to_string(), "Message received:".to_string()];
    lines.push(message.body_text());
    if !message.properties.is_empty() {
        lines.push("Properties:".to_string());
        for (key, value) in &message.properties {
            lines.push(format!("  {}: {}", key, value));
        }
    }
    lines.push("==================".to_string());
    lines.join("\n")
}

fn summary_json(summary: &SimulationSummary) -> serde_json::Value {
    json!({
        "event": "finished",
        "sent": summary.sent,
        "received": summary.received,
        "uploaded": summary.uploaded,
    })
}
