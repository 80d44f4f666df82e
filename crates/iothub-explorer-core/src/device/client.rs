//! Transport-agnostic device client.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::amqp::AmqpTransport;
use super::http::HttpTransport;
use super::mqtt::MqttTransport;
use crate::auth::{DeviceConnectionString, DeviceCredentials, SasToken, DEFAULT_TOKEN_TTL_SECS};
use crate::error::DeviceError;
use crate::message::{Message, ReceivedMessage};

/// API version sent on device-facing requests
pub const DEVICE_API_VERSION: &str = "2020-09-30";

/// Device wire protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Protocol {
    Amqp,
    AmqpWs,
    Http,
    #[default]
    Mqtt,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Amqp => "amqp",
            Protocol::AmqpWs => "amqp-ws",
            Protocol::Http => "http",
            Protocol::Mqtt => "mqtt",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a received cloud-to-device message is acknowledged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SettlePolicy {
    #[default]
    Complete,
    Reject,
    Abandon,
}

impl SettlePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlePolicy::Complete => "complete",
            SettlePolicy::Reject => "reject",
            SettlePolicy::Abandon => "abandon",
        }
    }

    /// MQTT only has the implicit acknowledgement, i.e. `complete`.
    pub fn check_supported_by(self, protocol: Protocol) -> Result<(), DeviceError> {
        if protocol == Protocol::Mqtt && self != SettlePolicy::Complete {
            return Err(DeviceError::SettleNotSupported {
                protocol: protocol.to_string(),
                policy: self.as_str().to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for SettlePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared access key credentials for one device.
#[derive(Debug, Clone)]
pub struct DeviceAuth {
    pub host_name: String,
    pub device_id: String,
    key: String,
    base_url: String,
}

impl DeviceAuth {
    pub fn new(host_name: &str, device_id: &str, key: &str) -> Self {
        Self {
            host_name: host_name.to_string(),
            device_id: device_id.to_string(),
            key: key.to_string(),
            base_url: format!("https://{}", host_name),
        }
    }

    /// Send device REST calls to `base_url` instead of `https://<host>`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Scheme of the REST endpoint, reused for storage URIs.
    pub fn scheme(&self) -> &str {
        self.base_url.split_once("://").map_or("https", |(scheme, _)| scheme)
    }

    /// Hub name, i.e. the first label of the host name.
    pub fn hub_name(&self) -> &str {
        self.host_name.split('.').next().unwrap_or(&self.host_name)
    }

    /// Fresh device-scoped token.
    pub fn token(&self) -> Result<SasToken, DeviceError> {
        Ok(SasToken::for_device(
            &self.host_name,
            &self.device_id,
            &self.key,
            DEFAULT_TOKEN_TTL_SECS,
        )?)
    }

    /// `https://<host>/devices/<id>/<path>`
    pub fn device_url(&self, path: &str) -> String {
        format!(
            "{}/devices/{}/{}",
            self.base_url,
            urlencoding::encode(&self.device_id),
            path
        )
    }
}

/// A connected (or connectable) device.
///
/// All methods take `&self` so sending, receiving and uploading can be
/// multiplexed over one client.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    fn device_id(&self) -> &str;

    fn protocol(&self) -> Protocol;

    async fn open(&self) -> Result<(), DeviceError>;

    async fn send_event(&self, message: &Message) -> Result<(), DeviceError>;

    /// Start delivering cloud-to-device messages on the returned channel.
    async fn start_receiving(&self) -> Result<mpsc::Receiver<ReceivedMessage>, DeviceError>;

    async fn stop_receiving(&self) -> Result<(), DeviceError>;

    async fn settle(
        &self,
        message: &ReceivedMessage,
        policy: SettlePolicy,
    ) -> Result<(), DeviceError>;

    async fn upload_to_blob(&self, blob_name: &str, data: Vec<u8>) -> Result<(), DeviceError>;

    async fn close(&self) -> Result<(), DeviceError>;
}

/// Build the client for a device connection string and protocol.
///
/// Fails without touching the network when the credentials cannot be used.
pub fn create_client(
    cs: &DeviceConnectionString,
    protocol: Protocol,
    timeout: Duration,
) -> Result<Box<dyn DeviceClient>, DeviceError> {
    let auth = match &cs.credentials {
        DeviceCredentials::SharedAccessKey(key) => {
            DeviceAuth::new(&cs.host_name, &cs.device_id, key)
        }
        DeviceCredentials::X509 => return Err(DeviceError::X509NotSupported(cs.device_id.clone())),
    };

    // Surface a malformed key now rather than on first use
    auth.token()?;

    match protocol {
        Protocol::Http => Ok(Box::new(HttpTransport::new(auth, timeout)?)),
        Protocol::Mqtt => Ok(Box::new(MqttTransport::new(auth, timeout)?)),
        Protocol::Amqp | Protocol::AmqpWs => {
            Ok(Box::new(AmqpTransport::new(auth, protocol, timeout)?))
        }
    }
}
