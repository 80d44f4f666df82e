//! Delete command implementation.

use iothub_explorer_core::registry::validate_device_id;

use crate::cli::DeleteArgs;
use crate::error::CliError;
use crate::output::{console, get_formatter};

use super::registry_client;

/// Run the delete command
pub async fn run_delete(args: DeleteArgs, timeout: u64, json: bool) -> Result<(), CliError> {
    validate_device_id(&args.device_id)?;

    let registry = registry_client(args.login.as_deref(), timeout).await?;
    registry.delete_device(&args.device_id).await?;

    let message = format!("Deleted device {}", args.device_id);
    if json {
        println!("{}", get_formatter(true).format_message(&message));
    } else {
        console::print_success(&message);
    }

    Ok(())
}
