//! Create command implementation.

use iothub_explorer_core::registry::{validate_device_id, DeviceIdentity};

use crate::cli::CreateArgs;
use crate::error::CliError;
use crate::output::get_formatter;

use super::get::connection_string_for;
use super::registry_client;

/// Run the create command
pub async fn run_create(args: CreateArgs, timeout: u64, json: bool) -> Result<(), CliError> {
    let identity = identity_from_args(&args)?;

    let registry = registry_client(args.login.as_deref(), timeout).await?;
    let device = registry.create_device(&identity).await?;
    tracing::info!(device = %device.device_id, "device created");

    let cs = if args.connection_string {
        Some(connection_string_for(&device, registry.host())?)
    } else {
        None
    };

    println!("{}", get_formatter(json).format_device(&device, cs.as_deref()));
    Ok(())
}

/// Identity to register, checked before anything is sent.
fn identity_from_args(args: &CreateArgs) -> Result<DeviceIdentity, CliError> {
    validate_device_id(&args.device_id)?;

    if args.x509 {
        let primary = args.primary_thumbprint.clone().ok_or_else(|| {
            CliError::InvalidArgument("--x509 requires --primary-thumbprint".to_string())
        })?;
        return Ok(DeviceIdentity::with_thumbprints(
            &args.device_id,
            primary,
            args.secondary_thumbprint.clone(),
        ));
    }

    Ok(DeviceIdentity::with_keys(
        &args.device_id,
        args.primary_key.clone(),
        args.secondary_key.clone(),
    ))
}
