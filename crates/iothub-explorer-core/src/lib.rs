//! Shared core library for iothub-explorer.
//!
//! Holds everything the command-line tool needs to talk to an IoT hub:
//! connection strings and shared access signatures, the device registry
//! client, device transports, the device simulator and the local session
//! cache.

pub mod auth;
pub mod device;
pub mod error;
pub mod message;
pub mod registry;
pub mod storage;

pub use error::{CoreError, Result};
