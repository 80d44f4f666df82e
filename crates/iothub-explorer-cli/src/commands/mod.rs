//! Command implementations.

pub mod create;
pub mod delete;
pub mod get;
pub mod list;
pub mod login;
pub mod logout;
pub mod simulate;

pub use create::run_create;
pub use delete::run_delete;
pub use get::run_get;
pub use list::run_list;
pub use login::run_login;
pub use logout::run_logout;
pub use simulate::run_simulate_device;

use std::time::Duration;

use iothub_explorer_core::auth::{resolve_token, token_from_connection_string};
use iothub_explorer_core::registry::RegistryClient;
use iothub_explorer_core::storage::SessionStore;

use crate::error::CliError;

/// Registry client for `--login` or, without it, the saved session.
pub(crate) async fn registry_client(
    login: Option<&str>,
    timeout: u64,
) -> Result<RegistryClient, CliError> {
    // Only look for the session file when no connection string was given
    let token = match login {
        Some(cs) => token_from_connection_string(cs)?,
        None => resolve_token(None, &SessionStore::open_default()?).await?,
    };

    tracing::debug!(host = token.host(), "using service token");
    Ok(RegistryClient::new(token, Duration::from_millis(timeout))?)
}
