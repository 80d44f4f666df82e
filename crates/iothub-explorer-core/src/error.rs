//! Error types for iothub-explorer core.

use thiserror::Error;

/// Core error type for shared operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),
}

/// Credential and connection string errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Connection string is missing the {0} field")]
    MissingField(&'static str),

    #[error("Shared access key is not valid base64: {0}")]
    InvalidKey(String),

    #[error("Invalid shared access signature: {0}")]
    InvalidToken(String),

    #[error("You must first login with 'iothub-explorer login <connection-string>' or pass --login <connection-string>")]
    NotLoggedIn,
}

/// Device-side errors (transport, simulation)
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Could not connect to {host}: {message}")]
    ConnectFailed { host: String, message: String },

    #[error("Could not send message: {0}")]
    SendFailed(String),

    #[error("Could not receive messages: {0}")]
    ReceiveFailed(String),

    #[error("Could not {action} message: {message}")]
    SettleFailed {
        action: &'static str,
        message: String,
    },

    #[error("Could not upload {file}: {message}")]
    UploadFailed { file: String, message: String },

    #[error("Could not close connection: {0}")]
    CloseFailed(String),

    #[error("Connection lost")]
    Disconnected,

    #[error("The {protocol} transport only supports the 'complete' settle policy (got '{policy}')")]
    SettleNotSupported { protocol: String, policy: String },

    #[error("Device {0} uses X.509 authentication, which requires a client certificate")]
    X509NotSupported(String),

    #[error("Device {0} has no shared access keys or X.509 thumbprints")]
    NoCredentials(String),
}

/// Device registry (service side) errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Registry request failed: {0}")]
    Request(String),

    #[error("Registry returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid registry response: {0}")]
    InvalidResponse(String),

    #[error("Invalid device id '{0}'")]
    InvalidDeviceId(String),
}

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Failed to access storage directory: {0}")]
    DirectoryAccess(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
