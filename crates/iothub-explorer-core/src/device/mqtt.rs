//! MQTT device transport using rumqttc.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport,
};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::client::{DeviceAuth, DeviceClient, Protocol, SettlePolicy, DEVICE_API_VERSION};
use super::upload::FileUploadClient;
use crate::error::DeviceError;
use crate::message::{Message, ReceivedMessage};

/// MQTT over TLS
pub const MQTT_PORT: u16 = 8883;

const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Cloud-to-device messages can be up to 64 KiB plus topic properties
const MAX_PACKET_SIZE: usize = 256 * 1024;

type Inbox = Arc<Mutex<Option<mpsc::Sender<ReceivedMessage>>>>;

struct Session {
    client: AsyncClient,
    events: JoinHandle<()>,
}

pub struct MqttTransport {
    auth: DeviceAuth,
    timeout: Duration,
    uploader: FileUploadClient,
    session: Mutex<Option<Session>>,
    inbox: Inbox,
}

impl MqttTransport {
    pub fn new(auth: DeviceAuth, timeout: Duration) -> Result<Self, DeviceError> {
        Ok(Self {
            uploader: FileUploadClient::new(auth.clone(), timeout)?,
            auth,
            timeout,
            session: Mutex::new(None),
            inbox: Arc::new(Mutex::new(None)),
        })
    }

    fn events_topic(&self) -> String {
        format!("devices/{}/messages/events/", self.auth.device_id)
    }

    fn devicebound_filter(&self) -> String {
        format!("devices/{}/messages/devicebound/#", self.auth.device_id)
    }

    async fn client(&self) -> Result<AsyncClient, DeviceError> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.client.clone())
            .ok_or(DeviceError::Disconnected)
    }

    fn options(&self) -> Result<MqttOptions, DeviceError> {
        let token = self.auth.token()?;
        let username = format!(
            "{}/{}/?api-version={}",
            self.auth.host_name, self.auth.device_id, DEVICE_API_VERSION
        );

        let mut options = MqttOptions::new(&self.auth.device_id, &self.auth.host_name, MQTT_PORT);
        options.set_credentials(username, token.to_string());
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(false);
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        options.set_transport(Transport::tls_with_default_config());
        Ok(options)
    }
}

/// Poll until the broker accepts the connection.
async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), String> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(format!("connection refused: {:?}", ack.code))
                };
            }
            Ok(_) => continue,
            Err(e) => return Err(e.to_string()),
        }
    }
}

/// Drive the event loop, forwarding cloud-to-device publishes to the inbox.
///
/// Ends on disconnect or on the first connection error; dropping the inbox
/// sender then tells the receiver the connection is gone.
async fn run_event_loop(mut event_loop: EventLoop, device_id: String, inbox: Inbox) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let Some(message) = parse_devicebound(&device_id, &publish.topic, &publish.payload)
                else {
                    tracing::debug!(topic = %publish.topic, "ignoring publish on unexpected topic");
                    continue;
                };

                let sender = inbox.lock().await.clone();
                if let Some(tx) = sender {
                    if tx.send(message).await.is_err() {
                        tracing::debug!("receiver dropped, discarding message");
                    }
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "mqtt connection lost");
                break;
            }
        }
    }

    inbox.lock().await.take();
}

/// Parse `devices/<id>/messages/devicebound/<url-encoded property bag>`.
fn parse_devicebound(device_id: &str, topic: &str, payload: &[u8]) -> Option<ReceivedMessage> {
    let prefix = format!("devices/{}/messages/devicebound/", device_id);
    let bag = topic.strip_prefix(&prefix)?;

    let mut message = ReceivedMessage {
        body: payload.to_vec(),
        ..Default::default()
    };

    for pair in bag.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = urlencoding::decode(key).map(|k| k.into_owned()).unwrap_or_else(|_| key.to_string());
        let value = urlencoding::decode(value)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| value.to_string());

        match key.as_str() {
            "$.mid" => message.message_id = Some(value),
            k if k.starts_with("$.") => {}
            _ => {
                message.properties.insert(key, value);
            }
        }
    }

    Some(message)
}

/// Telemetry topic suffix carrying system and application properties.
fn property_bag(message: &Message) -> String {
    let mut pairs: BTreeMap<String, String> = message.properties.clone();
    pairs.insert("$.mid".to_string(), message.message_id.clone());
    pairs.insert("$.ct".to_string(), message.content_type().to_string());
    pairs.insert("$.ce".to_string(), "utf-8".to_string());
    if let Some(correlation_id) = &message.correlation_id {
        pairs.insert("$.cid".to_string(), correlation_id.clone());
    }

    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[async_trait]
impl DeviceClient for MqttTransport {
    fn device_id(&self) -> &str {
        &self.auth.device_id
    }

    fn protocol(&self) -> Protocol {
        Protocol::Mqtt
    }

    async fn open(&self) -> Result<(), DeviceError> {
        let (client, mut event_loop) = AsyncClient::new(self.options()?, 10);

        let connect_failed = |message: String| DeviceError::ConnectFailed {
            host: self.auth.host_name.clone(),
            message,
        };

        timeout(self.timeout, wait_for_connack(&mut event_loop))
            .await
            .map_err(|_| connect_failed("timed out waiting for CONNACK".to_string()))?
            .map_err(connect_failed)?;

        tracing::debug!(host = %self.auth.host_name, device = %self.auth.device_id, "mqtt connected");

        let events = tokio::spawn(run_event_loop(
            event_loop,
            self.auth.device_id.clone(),
            Arc::clone(&self.inbox),
        ));

        if let Some(previous) = self.session.lock().await.replace(Session { client, events }) {
            previous.events.abort();
        }

        Ok(())
    }

    async fn send_event(&self, message: &Message) -> Result<(), DeviceError> {
        let topic = format!("{}{}", self.events_topic(), property_bag(message));

        self.client()
            .await?
            .publish(topic, QoS::AtLeastOnce, false, message.payload())
            .await
            .map_err(|e| DeviceError::SendFailed(e.to_string()))
    }

    async fn start_receiving(&self) -> Result<mpsc::Receiver<ReceivedMessage>, DeviceError> {
        let client = self.client().await?;
        let (tx, rx) = mpsc::channel(32);
        *self.inbox.lock().await = Some(tx);

        client
            .subscribe(self.devicebound_filter(), QoS::AtLeastOnce)
            .await
            .map_err(|e| DeviceError::ReceiveFailed(e.to_string()))?;

        Ok(rx)
    }

    async fn stop_receiving(&self) -> Result<(), DeviceError> {
        self.inbox.lock().await.take();

        self.client()
            .await?
            .unsubscribe(self.devicebound_filter())
            .await
            .map_err(|e| DeviceError::ReceiveFailed(e.to_string()))
    }

    async fn settle(
        &self,
        _message: &ReceivedMessage,
        policy: SettlePolicy,
    ) -> Result<(), DeviceError> {
        // PUBACK is sent by the event loop; that is the completion.
        policy.check_supported_by(Protocol::Mqtt)
    }

    async fn upload_to_blob(&self, blob_name: &str, data: Vec<u8>) -> Result<(), DeviceError> {
        self.uploader.upload(blob_name, data).await
    }

    async fn close(&self) -> Result<(), DeviceError> {
        let Some(mut session) = self.session.lock().await.take() else {
            return Ok(());
        };

        session
            .client
            .disconnect()
            .await
            .map_err(|e| DeviceError::CloseFailed(e.to_string()))?;

        // Give the event loop a moment to flush DISCONNECT
        if timeout(Duration::from_secs(2), &mut session.events).await.is_err() {
            session.events.abort();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_devicebound_topic() {
        let message = parse_devicebound(
            "sim-1",
            "devices/sim-1/messages/devicebound/%24.mid=m-7&%24.to=%2Fdevices%2Fsim-1&color=dark%20blue",
            b"hello",
        )
        .unwrap();

        assert_eq!(message.message_id.as_deref(), Some("m-7"));
        assert_eq!(message.body_text(), "hello");
        assert_eq!(message.properties.len(), 1);
        assert_eq!(message.properties["color"], "dark blue");
        assert!(message.lock_token.is_none());
    }

    #[test]
    fn test_parse_devicebound_other_device() {
        assert!(parse_devicebound("sim-1", "devices/sim-2/messages/devicebound/", b"").is_none());
        assert!(parse_devicebound("sim-1", "$iothub/twin/res/200/", b"").is_none());
    }

    #[test]
    fn test_property_bag() {
        let mut message = Message::new("hi");
        message.message_id = "m 1".to_string();
        message.properties.insert("level".to_string(), "warn".to_string());

        assert_eq!(
            property_bag(&message),
            "%24.ce=utf-8&%24.ct=text%2Fplain&%24.mid=m%201&level=warn"
        );
    }

    #[tokio::test]
    async fn test_operations_before_open() {
        let transport = MqttTransport::new(
            DeviceAuth::new("hub.azure-devices.net", "sim-1", "a2V5"),
            Duration::from_secs(5),
        )
        .unwrap();

        let err = transport.send_event(&Message::new("x")).await.unwrap_err();
        assert!(matches!(err, DeviceError::Disconnected));
        assert!(transport.close().await.is_ok());
        assert!(transport
            .settle(&ReceivedMessage::default(), SettlePolicy::Reject)
            .await
            .is_err());
    }
}
