//! Device identity records as returned by the registry REST API.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Characters the registry accepts in a device id
static DEVICE_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9\-.%_*?!(),:=@$']+$").expect("device id pattern is valid")
});

/// Maximum device id length
const MAX_DEVICE_ID_LENGTH: usize = 128;

pub fn validate_device_id(id: &str) -> Result<(), RegistryError> {
    if id.is_empty() || id.len() > MAX_DEVICE_ID_LENGTH {
        return Err(RegistryError::InvalidDeviceId(format!(
            "{} (must be 1 to {} characters)",
            id, MAX_DEVICE_ID_LENGTH
        )));
    }

    if !DEVICE_ID_REGEX.is_match(id) {
        return Err(RegistryError::InvalidDeviceId(format!(
            "{} (allowed: alphanumerics and - . % _ * ? ! ( ) , : = @ $ ')",
            id
        )));
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthenticationType {
    #[default]
    Sas,
    SelfSigned,
    CertificateAuthority,
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    #[default]
    Enabled,
    Disabled,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Enabled => "enabled",
            DeviceStatus::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymmetricKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_key: Option<String>,
}

impl SymmetricKey {
    /// First non-empty key, primary before secondary.
    pub fn primary_or_secondary(&self) -> Option<&str> {
        [&self.primary_key, &self.secondary_key]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct X509Thumbprint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_thumbprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_thumbprint: Option<String>,
}

impl X509Thumbprint {
    pub fn has_any(&self) -> bool {
        [&self.primary_thumbprint, &self.secondary_thumbprint]
            .into_iter()
            .flatten()
            .any(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
    #[serde(default)]
    pub symmetric_key: SymmetricKey,
    #[serde(default)]
    pub x509_thumbprint: X509Thumbprint,
    #[serde(default, rename = "type")]
    pub auth_type: AuthenticationType,
}

/// A device identity in the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub device_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    #[serde(default)]
    pub status: DeviceStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_state: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_to_device_message_count: Option<u64>,

    #[serde(default)]
    pub authentication: Authentication,
}

impl DeviceIdentity {
    /// Identity to register: symmetric-key auth, keys generated by the service
    /// unless given.
    pub fn with_keys(device_id: &str, primary: Option<String>, secondary: Option<String>) -> Self {
        Self {
            device_id: device_id.to_string(),
            authentication: Authentication {
                symmetric_key: SymmetricKey {
                    primary_key: primary,
                    secondary_key: secondary,
                },
                auth_type: AuthenticationType::Sas,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Identity to register with self-signed X.509 thumbprints.
    pub fn with_thumbprints(device_id: &str, primary: String, secondary: Option<String>) -> Self {
        Self {
            device_id: device_id.to_string(),
            authentication: Authentication {
                x509_thumbprint: X509Thumbprint {
                    primary_thumbprint: Some(primary),
                    secondary_thumbprint: secondary,
                },
                auth_type: AuthenticationType::SelfSigned,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Short description of the configured authentication.
    pub fn auth_summary(&self) -> &'static str {
        match self.authentication.auth_type {
            AuthenticationType::Sas => "sas",
            AuthenticationType::SelfSigned => "x509 (self-signed)",
            AuthenticationType::CertificateAuthority => "x509 (CA)",
            AuthenticationType::None => "none",
        }
    }
}
