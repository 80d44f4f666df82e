//! Get command implementation.

use iothub_explorer_core::auth::device_connection_string;
use iothub_explorer_core::registry::{validate_device_id, DeviceIdentity};

use crate::cli::GetArgs;
use crate::error::{CliError, DeviceError};
use crate::output::get_formatter;

use super::registry_client;

/// Run the get command
pub async fn run_get(args: GetArgs, timeout: u64, json: bool) -> Result<(), CliError> {
    validate_device_id(&args.device_id)?;

    let registry = registry_client(args.login.as_deref(), timeout).await?;
    let device = registry.get_device(&args.device_id).await?;

    let cs = if args.connection_string {
        Some(connection_string_for(&device, registry.host())?)
    } else {
        None
    };

    println!("{}", get_formatter(json).format_device(&device, cs.as_deref()));
    Ok(())
}

/// Device connection string, or an error for a device without credentials.
pub(crate) fn connection_string_for(device: &DeviceIdentity, host: &str) -> Result<String, CliError> {
    device_connection_string(device, host)
        .ok_or_else(|| DeviceError::NoCredentials(device.device_id.clone()).into())
}
