//! Service and device connection strings.
//!
//! Both are `;`-separated `Key=Value` lists. Values may themselves contain
//! `=` (base64 padding), so only the first `=` of each segment splits.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::AuthError;
use crate::registry::DeviceIdentity;

fn parse_fields(s: &str) -> Result<HashMap<&str, &str>, AuthError> {
    let mut fields = HashMap::new();

    for segment in s.trim().split(';').filter(|seg| !seg.trim().is_empty()) {
        let (key, value) = segment.split_once('=').ok_or_else(|| {
            AuthError::InvalidConnectionString(format!("segment '{}' is not Key=Value", segment))
        })?;
        fields.insert(key.trim(), value.trim());
    }

    if fields.is_empty() {
        return Err(AuthError::InvalidConnectionString(
            "connection string is empty".to_string(),
        ));
    }

    Ok(fields)
}

fn required<'a>(
    fields: &HashMap<&str, &'a str>,
    name: &'static str,
) -> Result<&'a str, AuthError> {
    fields
        .get(name)
        .copied()
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::MissingField(name))
}

/// Hub-level connection string (`HostName`, `SharedAccessKeyName`, `SharedAccessKey`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConnectionString {
    pub host_name: String,
    pub shared_access_key_name: String,
    pub shared_access_key: String,
}

impl FromStr for ServiceConnectionString {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = parse_fields(s)?;

        Ok(Self {
            host_name: required(&fields, "HostName")?.to_string(),
            shared_access_key_name: required(&fields, "SharedAccessKeyName")?.to_string(),
            shared_access_key: required(&fields, "SharedAccessKey")?.to_string(),
        })
    }
}

/// How a device proves its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCredentials {
    SharedAccessKey(String),
    X509,
}

/// Device-scoped connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConnectionString {
    pub host_name: String,
    pub device_id: String,
    pub credentials: DeviceCredentials,
}

impl FromStr for DeviceConnectionString {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = parse_fields(s)?;

        let host_name = required(&fields, "HostName")?.to_string();
        let device_id = required(&fields, "DeviceId")?.to_string();

        let credentials = match fields.get("SharedAccessKey").filter(|k| !k.is_empty()) {
            Some(key) => DeviceCredentials::SharedAccessKey(key.to_string()),
            None if fields
                .get("x509")
                .is_some_and(|v| v.eq_ignore_ascii_case("true")) =>
            {
                DeviceCredentials::X509
            }
            None => return Err(AuthError::MissingField("SharedAccessKey")),
        };

        Ok(Self {
            host_name,
            device_id,
            credentials,
        })
    }
}

impl fmt::Display for DeviceConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostName={};DeviceId={};", self.host_name, self.device_id)?;
        match &self.credentials {
            DeviceCredentials::SharedAccessKey(key) => write!(f, "SharedAccessKey={}", key),
            DeviceCredentials::X509 => write!(f, "x509=true"),
        }
    }
}

/// Build the device connection string for a registry identity.
///
/// Returns `None` when the identity carries neither a shared access key
/// nor an X.509 thumbprint, i.e. there is no way to authenticate it.
pub fn device_connection_string(device: &DeviceIdentity, hub_host_name: &str) -> Option<String> {
    let auth = &device.authentication;

    let credentials = if let Some(key) = auth.symmetric_key.primary_or_secondary() {
        DeviceCredentials::SharedAccessKey(key.to_string())
    } else if auth.x509_thumbprint.has_any() {
        DeviceCredentials::X509
    } else {
        return None;
    };

    Some(
        DeviceConnectionString {
            host_name: hub_host_name.to_string(),
            device_id: device.device_id.clone(),
            credentials,
        }
        .to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Authentication, SymmetricKey, X509Thumbprint};

    fn identity(authentication: Authentication) -> DeviceIdentity {
        DeviceIdentity {
            device_id: "sensor-7".to_string(),
            authentication,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_service_connection_string() {
        let cs: ServiceConnectionString =
            "HostName=hub.azure-devices.net;SharedAccessKeyName=iothubowner;SharedAccessKey=abc=="
                .parse()
                .unwrap();

        assert_eq!(cs.host_name, "hub.azure-devices.net");
        assert_eq!(cs.shared_access_key_name, "iothubowner");
        assert_eq!(cs.shared_access_key, "abc==");
    }

    #[test]
    fn test_service_connection_string_missing_key() {
        let err = "HostName=hub.azure-devices.net;SharedAccessKeyName=iothubowner"
            .parse::<ServiceConnectionString>()
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingField("SharedAccessKey")));
    }

    #[test]
    fn test_service_connection_string_garbage() {
        assert!("not a connection string"
            .parse::<ServiceConnectionString>()
            .is_err());
        assert!("".parse::<ServiceConnectionString>().is_err());
    }

    #[test]
    fn test_parse_device_connection_string() {
        let cs: DeviceConnectionString =
            "HostName=hub.azure-devices.net;DeviceId=sensor-7;SharedAccessKey=a2V5;"
                .parse()
                .unwrap();

        assert_eq!(cs.device_id, "sensor-7");
        assert_eq!(
            cs.credentials,
            DeviceCredentials::SharedAccessKey("a2V5".to_string())
        );
    }

    #[test]
    fn test_parse_x509_device_connection_string() {
        let cs: DeviceConnectionString = "HostName=hub.azure-devices.net;DeviceId=cam;x509=true"
            .parse()
            .unwrap();
        assert_eq!(cs.credentials, DeviceCredentials::X509);
        assert_eq!(
            cs.to_string(),
            "HostName=hub.azure-devices.net;DeviceId=cam;x509=true"
        );
    }

    #[test]
    fn test_device_connection_string_without_credentials() {
        let err = "HostName=hub.azure-devices.net;DeviceId=cam"
            .parse::<DeviceConnectionString>()
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingField("SharedAccessKey")));
    }

    #[test]
    fn test_synthesize_with_symmetric_key() {
        let device = identity(Authentication {
            symmetric_key: SymmetricKey {
                primary_key: Some("cHJpbWFyeQ==".to_string()),
                secondary_key: Some("c2Vjb25kYXJ5".to_string()),
            },
            ..Default::default()
        });

        assert_eq!(
            device_connection_string(&device, "hub.azure-devices.net").as_deref(),
            Some("HostName=hub.azure-devices.net;DeviceId=sensor-7;SharedAccessKey=cHJpbWFyeQ==")
        );
    }

    #[test]
    fn test_synthesize_with_thumbprint() {
        let device = identity(Authentication {
            x509_thumbprint: X509Thumbprint {
                primary_thumbprint: None,
                secondary_thumbprint: Some("AB12".to_string()),
            },
            ..Default::default()
        });

        assert_eq!(
            device_connection_string(&device, "hub").as_deref(),
            Some("HostName=hub;DeviceId=sensor-7;x509=true")
        );
    }

    #[test]
    fn test_synthesize_without_credentials_is_none() {
        let empty_strings = Authentication {
            symmetric_key: SymmetricKey {
                primary_key: Some(String::new()),
                secondary_key: None,
            },
            x509_thumbprint: X509Thumbprint {
                primary_thumbprint: None,
                secondary_thumbprint: Some(String::new()),
            },
            ..Default::default()
        };

        for auth in [Authentication::default(), empty_strings] {
            assert!(device_connection_string(&identity(auth), "hub").is_none());
        }
    }
}
