//! Error types for the iothub-explorer CLI.
//!
//! CliError wraps CoreError from the shared library and adds CLI-specific variants.

use iothub_explorer_core::error::CoreError;
use thiserror::Error;

// Re-export core error types so command modules can use them via crate::error
pub use iothub_explorer_core::error::{AuthError, DeviceError, RegistryError, StorageError};

/// Exit codes for the CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const INPUT_ERROR: i32 = 1;
    pub const SERVICE_ERROR: i32 = 1;

    /// Exit code for an argument parsing outcome.
    pub fn for_usage(err: &clap::Error) -> i32 {
        if err.use_stderr() {
            INPUT_ERROR
        } else {
            SUCCESS
        }
    }
}

/// Main error type for the CLI
#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("{0}")]
    InvalidArgument(String),
}

impl CliError {
    /// Whether the user has to fix the command line rather than retry.
    pub fn is_input_error(&self) -> bool {
        match self {
            CliError::InvalidArgument(_) => true,
            CliError::Core(e) => match e {
                CoreError::Auth(_) => true,
                CoreError::InvalidMessage(_) => true,
                CoreError::Storage(StorageError::UnsupportedPlatform(_)) => true,
                CoreError::Registry(RegistryError::InvalidDeviceId(_)) => true,
                CoreError::Device(
                    DeviceError::SettleNotSupported { .. }
                    | DeviceError::X509NotSupported(_)
                    | DeviceError::Auth(_),
                ) => true,
                _ => false,
            },
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        if self.is_input_error() {
            exit_codes::INPUT_ERROR
        } else {
            exit_codes::SERVICE_ERROR
        }
    }
}

// Conversions from core error subtypes to CliError
impl From<AuthError> for CliError {
    fn from(e: AuthError) -> Self {
        CliError::Core(CoreError::Auth(e))
    }
}

impl From<DeviceError> for CliError {
    fn from(e: DeviceError) -> Self {
        CliError::Core(CoreError::Device(e))
    }
}

impl From<RegistryError> for CliError {
    fn from(e: RegistryError) -> Self {
        CliError::Core(CoreError::Registry(e))
    }
}

impl From<StorageError> for CliError {
    fn from(e: StorageError) -> Self {
        CliError::Core(CoreError::Storage(e))
    }
}
