//! List command implementation.

use crate::cli::ListArgs;
use crate::error::CliError;
use crate::output::get_formatter;

use super::registry_client;

/// Run the list command
pub async fn run_list(args: ListArgs, timeout: u64, json: bool) -> Result<(), CliError> {
    if args.top == 0 {
        return Err(CliError::InvalidArgument("--top must be at least 1".to_string()));
    }

    let registry = registry_client(args.login.as_deref(), timeout).await?;
    let devices = registry.list_devices(args.top).await?;

    println!("{}", get_formatter(json).format_devices(&devices));
    Ok(())
}
