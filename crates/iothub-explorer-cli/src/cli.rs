//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use iothub_explorer_core::device::{Protocol, SettlePolicy};

/// iothub-explorer - manage IoT hub devices and simulate device traffic
#[derive(Parser, Debug)]
#[command(name = "iothub-explorer")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// HTTP request and connect timeout in milliseconds
    #[arg(long, global = true, default_value = "30000", env = "IOTHUB_EXPLORER_TIMEOUT")]
    pub timeout: u64,

    /// Verbose output (debug logging to stderr)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a session from a hub connection string
    Login(LoginArgs),

    /// Terminate the current session
    Logout,

    /// List device identities
    List(ListArgs),

    /// Show a device identity
    Get(GetArgs),

    /// Register a new device identity
    Create(CreateArgs),

    /// Delete a device identity
    Delete(DeleteArgs),

    /// Simulate a device: send, receive and upload
    SimulateDevice(SimulateDeviceArgs),
}

// ==================== Session ====================

#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Hub connection string (HostName=...;SharedAccessKeyName=...;SharedAccessKey=...)
    pub connection_string: String,

    /// Session lifetime in seconds
    #[arg(long, default_value = "3600", value_parser = clap::value_parser!(u64).range(1..))]
    pub duration: u64,
}

// ==================== Registry ====================

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Maximum number of devices to list
    #[arg(long, default_value = "1000")]
    pub top: usize,

    /// Hub connection string to use instead of the saved session
    #[arg(short, long, value_name = "CONNECTION_STRING", env = "IOTHUB_CONNECTION_STRING")]
    pub login: Option<String>,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Device id
    pub device_id: String,

    /// Print the device connection string
    #[arg(long)]
    pub connection_string: bool,

    /// Hub connection string to use instead of the saved session
    #[arg(short, long, value_name = "CONNECTION_STRING", env = "IOTHUB_CONNECTION_STRING")]
    pub login: Option<String>,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Device id
    pub device_id: String,

    /// Primary symmetric key (base64); generated by the hub when omitted
    #[arg(long, conflicts_with = "x509")]
    pub primary_key: Option<String>,

    /// Secondary symmetric key (base64)
    #[arg(long, conflicts_with = "x509")]
    pub secondary_key: Option<String>,

    /// Use self-signed X.509 authentication
    #[arg(long, requires = "primary_thumbprint")]
    pub x509: bool,

    /// Primary X.509 thumbprint
    #[arg(long, requires = "x509")]
    pub primary_thumbprint: Option<String>,

    /// Secondary X.509 thumbprint
    #[arg(long, requires = "x509")]
    pub secondary_thumbprint: Option<String>,

    /// Print the device connection string
    #[arg(long)]
    pub connection_string: bool,

    /// Hub connection string to use instead of the saved session
    #[arg(short, long, value_name = "CONNECTION_STRING", env = "IOTHUB_CONNECTION_STRING")]
    pub login: Option<String>,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Device id
    pub device_id: String,

    /// Hub connection string to use instead of the saved session
    #[arg(short, long, value_name = "CONNECTION_STRING", env = "IOTHUB_CONNECTION_STRING")]
    pub login: Option<String>,
}

// ==================== Simulate ====================

#[derive(Args, Debug)]
pub struct SimulateDeviceArgs {
    /// Device id (looked up in the registry)
    pub device_id: Option<String>,

    /// Device connection string (instead of a device id)
    #[arg(long, value_name = "CONNECTION_STRING")]
    pub connection_string: Option<String>,

    /// Hub connection string to use instead of the saved session
    #[arg(short, long, value_name = "CONNECTION_STRING")]
    pub login: Option<String>,

    /// Device transport
    #[arg(long, value_enum, default_value = "mqtt")]
    pub protocol: ProtocolArg,

    /// Send messages; the text or envelope to send (default: numbered placeholder)
    #[arg(long, value_name = "MESSAGE", num_args = 0..=1)]
    pub send: Option<Option<String>>,

    /// Milliseconds between messages
    #[arg(long, value_name = "MS", default_value = "1000", value_parser = clap::value_parser!(u64).range(1..))]
    pub send_interval: u64,

    /// Number of messages to send (default: unlimited)
    #[arg(long, value_name = "N")]
    pub send_count: Option<u64>,

    /// Receive cloud-to-device messages
    #[arg(long)]
    pub receive: bool,

    /// Number of messages to receive (default: unlimited)
    #[arg(long, value_name = "N")]
    pub receive_count: Option<u64>,

    /// How to settle received messages
    #[arg(long, value_enum, default_value = "complete")]
    pub settle: SettleArg,

    /// Upload this file once
    #[arg(long, value_name = "PATH")]
    pub upload_file: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolArg {
    Amqp,
    AmqpWs,
    Http,
    Mqtt,
}

impl From<ProtocolArg> for Protocol {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Amqp => Protocol::Amqp,
            ProtocolArg::AmqpWs => Protocol::AmqpWs,
            ProtocolArg::Http => Protocol::Http,
            ProtocolArg::Mqtt => Protocol::Mqtt,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettleArg {
    Complete,
    Reject,
    Abandon,
}

impl From<SettleArg> for SettlePolicy {
    fn from(arg: SettleArg) -> Self {
        match arg {
            SettleArg::Complete => SettlePolicy::Complete,
            SettleArg::Reject => SettlePolicy::Reject,
            SettleArg::Abandon => SettlePolicy::Abandon,
        }
    }
}
