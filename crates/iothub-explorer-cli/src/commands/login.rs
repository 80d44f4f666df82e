//! Login command implementation.

use iothub_explorer_core::auth::{SasToken, ServiceConnectionString};
use iothub_explorer_core::storage::SessionStore;

use crate::cli::LoginArgs;
use crate::error::CliError;
use crate::output::get_formatter;

/// Run the login command
pub async fn run_login(args: LoginArgs, json: bool) -> Result<(), CliError> {
    let store = SessionStore::open_default()?;
    let token = login(&store, &args.connection_string, args.duration).await?;

    let formatter = get_formatter(json);
    println!(
        "{}",
        formatter.format_session(token.host(), token.expires_at(), &store.path().display().to_string())
    );

    Ok(())
}

/// Generate a hub token valid for `duration_secs` and cache it in `store`.
pub async fn login(
    store: &SessionStore,
    connection_string: &str,
    duration_secs: u64,
) -> Result<SasToken, CliError> {
    let cs: ServiceConnectionString = connection_string.parse()?;
    let ttl = i64::try_from(duration_secs)
        .map_err(|_| CliError::InvalidArgument(format!("--duration {} is too large", duration_secs)))?;

    let token = SasToken::for_service(&cs, ttl)?;
    store.save(&token.to_string()).await?;

    tracing::info!(host = %cs.host_name, ttl, "session started");
    Ok(token)
}
