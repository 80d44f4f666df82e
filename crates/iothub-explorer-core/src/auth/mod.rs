//! Credentials: connection strings, shared access signatures and session
//! token resolution.

pub mod connection_string;
pub mod sas;

pub use connection_string::{
    device_connection_string, DeviceConnectionString, DeviceCredentials,
    ServiceConnectionString,
};
pub use sas::{SasToken, DEFAULT_TOKEN_TTL_SECS};

use crate::error::{AuthError, CoreError};
use crate::storage::SessionStore;

/// Token valid for [`DEFAULT_TOKEN_TTL_SECS`] from a service connection string.
pub fn token_from_connection_string(connection_string: &str) -> Result<SasToken, CoreError> {
    let cs: ServiceConnectionString = connection_string.parse()?;
    Ok(SasToken::for_service(&cs, DEFAULT_TOKEN_TTL_SECS)?)
}

/// Resolve the service token for a command.
///
/// A connection string given on the command line wins and yields a fresh
/// token valid for [`DEFAULT_TOKEN_TTL_SECS`]. Otherwise the token cached
/// by `login` is used. With neither, the user has to log in first.
pub async fn resolve_token(
    connection_string: Option<&str>,
    store: &SessionStore,
) -> Result<SasToken, CoreError> {
    if let Some(cs) = connection_string {
        return token_from_connection_string(cs);
    }

    match store.load().await? {
        Some(raw) => Ok(raw.parse::<SasToken>()?),
        None => Err(AuthError::NotLoggedIn.into()),
    }
}
