//! Device registry: identity records and the service-side REST client.

pub mod client;
pub mod types;

pub use client::{RegistryClient, REGISTRY_API_VERSION};
pub use types::{
    validate_device_id, AuthenticationType, Authentication, DeviceIdentity, DeviceStatus,
    SymmetricKey, X509Thumbprint,
};
