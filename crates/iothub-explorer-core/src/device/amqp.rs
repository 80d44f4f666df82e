//! AMQP device transport using fe2o3-amqp, over TLS or WebSockets.
//!
//! One connection carries one session with a sender link on the telemetry
//! address. Receiving attaches a second link on the devicebound address,
//! owned by a background task that also performs settlements so deliveries
//! never leave the task that received them.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use fe2o3_amqp::connection::ConnectionHandle;
use fe2o3_amqp::link::delivery::DeliveryInfo;
use fe2o3_amqp::sasl_profile::SaslProfile;
use fe2o3_amqp::session::SessionHandle;
use fe2o3_amqp::types::definitions;
use fe2o3_amqp::types::messaging::{
    AmqpValue, ApplicationProperties, Body, Data, Message as AmqpMessage, MessageId, Outcome,
    Properties,
};
use fe2o3_amqp::types::primitives::{Binary, SimpleValue, Value};
use fe2o3_amqp::{Connection, Receiver, Sender, Session};
use fe2o3_amqp_ws::WebSocketStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use super::client::{DeviceAuth, DeviceClient, Protocol, SettlePolicy};
use super::upload::FileUploadClient;
use crate::error::DeviceError;
use crate::message::{Message, ReceivedMessage};

/// AMQP over TLS
pub const AMQP_PORT: u16 = 5671;

/// AMQP over WebSockets shares the HTTPS port
pub const AMQP_WS_PORT: u16 = 443;

const WS_PATH: &str = "/$iothub/websocket";

/// Received messages held while the consumer is busy
const MAX_BACKLOG: usize = 32;

struct Link {
    connection: ConnectionHandle<()>,
    session: SessionHandle<()>,
    sender: Sender,
}

struct Settlement {
    lock_token: String,
    policy: SettlePolicy,
    reply: oneshot::Sender<Result<(), String>>,
}

struct Inbound {
    settlements: mpsc::Sender<Settlement>,
    task: JoinHandle<()>,
}

pub struct AmqpTransport {
    auth: DeviceAuth,
    protocol: Protocol,
    timeout: Duration,
    uploader: FileUploadClient,
    link: Mutex<Option<Link>>,
    inbound: Mutex<Option<Inbound>>,
}

impl AmqpTransport {
    /// `protocol` picks the carrier: [`Protocol::AmqpWs`] tunnels through a
    /// WebSocket, anything else connects straight to the AMQPS port.
    pub fn new(auth: DeviceAuth, protocol: Protocol, timeout: Duration) -> Result<Self, DeviceError> {
        Ok(Self {
            uploader: FileUploadClient::new(auth.clone(), timeout)?,
            auth,
            protocol,
            timeout,
            link: Mutex::new(None),
            inbound: Mutex::new(None),
        })
    }

    async fn connect(&self, password: String) -> Result<Link, String> {
        let builder = Connection::builder()
            .container_id(format!("{}-{}", self.auth.device_id, Uuid::new_v4()))
            .hostname(self.auth.host_name.as_str())
            .sasl_profile(SaslProfile::Plain {
                username: sasl_username(&self.auth),
                password,
            });

        let mut connection = match self.protocol {
            Protocol::AmqpWs => {
                let url = websocket_url(&self.auth.host_name);
                let stream = WebSocketStream::connect(url.as_str())
                    .await
                    .map_err(|e| format!("websocket upgrade failed: {}", e))?;
                builder.open_with_stream(stream).await
            }
            _ => builder.open(amqps_url(&self.auth.host_name).as_str()).await,
        }
        .map_err(|e| e.to_string())?;

        let mut session = Session::begin(&mut connection)
            .await
            .map_err(|e| format!("session refused: {}", e))?;

        let sender = Sender::attach(
            &mut session,
            format!("sender-{}", Uuid::new_v4()),
            events_address(&self.auth.device_id),
        )
        .await
        .map_err(|e| format!("telemetry link refused: {}", e))?;

        Ok(Link {
            connection,
            session,
            sender,
        })
    }
}

/// SASL PLAIN user for shared access signatures: `<device>@sas.<hub name>`.
fn sasl_username(auth: &DeviceAuth) -> String {
    format!("{}@sas.{}", auth.device_id, auth.hub_name())
}

fn amqps_url(host_name: &str) -> String {
    format!("amqps://{}:{}", host_name, AMQP_PORT)
}

fn websocket_url(host_name: &str) -> String {
    format!("wss://{}:{}{}", host_name, AMQP_WS_PORT, WS_PATH)
}

fn events_address(device_id: &str) -> String {
    format!("/devices/{}/messages/events", device_id)
}

fn devicebound_address(device_id: &str) -> String {
    format!("/devices/{}/messages/devicebound", device_id)
}

/// Telemetry message with system properties in the AMQP properties section.
fn outgoing(message: &Message) -> AmqpMessage<Data> {
    let mut properties = Properties::builder()
        .message_id(message.message_id.clone())
        .content_type(message.content_type())
        .content_encoding("utf-8");
    if let Some(correlation_id) = &message.correlation_id {
        properties = properties.correlation_id(correlation_id.clone());
    }

    let mut application = ApplicationProperties::builder();
    for (key, value) in &message.properties {
        application = application.insert(key.clone(), value.clone());
    }

    AmqpMessage::builder()
        .properties(properties.build())
        .application_properties(application.build())
        .data(Binary::from(message.payload()))
        .build()
}

fn message_id_text(id: &MessageId) -> String {
    match id {
        MessageId::String(s) => s.clone(),
        MessageId::Ulong(n) => n.to_string(),
        other => format!("{:?}", other),
    }
}

fn property_text(value: &SimpleValue) -> String {
    match value {
        SimpleValue::String(s) => s.clone(),
        SimpleValue::Bool(b) => b.to_string(),
        SimpleValue::Int(n) => n.to_string(),
        SimpleValue::Long(n) => n.to_string(),
        SimpleValue::Uint(n) => n.to_string(),
        SimpleValue::Ulong(n) => n.to_string(),
        other => format!("{:?}", other),
    }
}

/// Payload bytes: data sections concatenated, string and binary values as-is.
fn body_bytes(body: &Body<Value>) -> Vec<u8> {
    match body {
        Body::Data(batch) => batch.iter().flat_map(|data| data.0.iter().copied()).collect(),
        Body::Value(AmqpValue(Value::String(s))) => s.clone().into_bytes(),
        Body::Value(AmqpValue(Value::Binary(b))) => b.to_vec(),
        Body::Value(AmqpValue(other)) => format!("{:?}", other).into_bytes(),
        _ => Vec::new(),
    }
}

fn received<B>(message: &AmqpMessage<B>, body: Vec<u8>, lock_token: String) -> ReceivedMessage {
    let message_id = message
        .properties
        .as_ref()
        .and_then(|p| p.message_id.as_ref())
        .map(message_id_text);

    let properties: BTreeMap<String, String> = message
        .application_properties
        .as_ref()
        .map(|props| {
            props
                .0
                .iter()
                .map(|(key, value)| (key.clone(), property_text(value)))
                .collect()
        })
        .unwrap_or_default();

    ReceivedMessage {
        message_id,
        lock_token: Some(lock_token),
        body,
        properties,
    }
}

async fn settle_delivery(
    receiver: &mut Receiver,
    delivery: DeliveryInfo,
    policy: SettlePolicy,
) -> Result<(), String> {
    let result = match policy {
        SettlePolicy::Complete => receiver.accept(delivery).await,
        SettlePolicy::Reject => receiver.reject(delivery, None::<definitions::Error>).await,
        SettlePolicy::Abandon => receiver.release(delivery).await,
    };
    result.map_err(|e| e.to_string())
}

/// Own the devicebound link: hand deliveries to the inbox under a fresh
/// lock token and settle them on request.
///
/// Ends when the link fails, the inbox is dropped or the settlement channel
/// closes; the link is detached on the way out.
async fn run_receiver(
    mut receiver: Receiver,
    inbox: mpsc::Sender<ReceivedMessage>,
    mut settlements: mpsc::Receiver<Settlement>,
) {
    let mut unsettled: HashMap<String, DeliveryInfo> = HashMap::new();
    let mut backlog: VecDeque<ReceivedMessage> = VecDeque::new();

    loop {
        tokio::select! {
            delivery = receiver.recv::<Body<Value>>(), if backlog.len() < MAX_BACKLOG => {
                match delivery {
                    Ok(delivery) => {
                        let lock_token = Uuid::new_v4().to_string();
                        let message = received(
                            delivery.message(),
                            body_bytes(delivery.body()),
                            lock_token.clone(),
                        );
                        tracing::debug!(message_id = ?message.message_id, "cloud-to-device message received");
                        unsettled.insert(lock_token, DeliveryInfo::from(&delivery));
                        backlog.push_back(message);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "amqp receive link lost");
                        break;
                    }
                }
            }
            permit = inbox.reserve(), if !backlog.is_empty() => {
                let Ok(permit) = permit else {
                    tracing::debug!("receiver dropped, discarding messages");
                    break;
                };
                if let Some(message) = backlog.pop_front() {
                    permit.send(message);
                }
            }
            settlement = settlements.recv() => {
                let Some(settlement) = settlement else {
                    break;
                };
                let result = match unsettled.remove(&settlement.lock_token) {
                    Some(delivery) => settle_delivery(&mut receiver, delivery, settlement.policy).await,
                    None => Err(format!("unknown lock token {}", settlement.lock_token)),
                };
                let _ = settlement.reply.send(result);
            }
        }
    }

    if let Err(e) = receiver.close().await {
        tracing::debug!(error = %e, "amqp receive link did not detach cleanly");
    }
}

#[async_trait]
impl DeviceClient for AmqpTransport {
    fn device_id(&self) -> &str {
        &self.auth.device_id
    }

    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn open(&self) -> Result<(), DeviceError> {
        let token = self.auth.token()?;

        let connect_failed = |message: String| DeviceError::ConnectFailed {
            host: self.auth.host_name.clone(),
            message,
        };

        let link = timeout(self.timeout, self.connect(token.to_string()))
            .await
            .map_err(|_| connect_failed("timed out opening AMQP connection".to_string()))?
            .map_err(connect_failed)?;

        tracing::debug!(
            host = %self.auth.host_name,
            device = %self.auth.device_id,
            protocol = %self.protocol,
            "amqp connected"
        );

        *self.link.lock().await = Some(link);
        Ok(())
    }

    async fn send_event(&self, message: &Message) -> Result<(), DeviceError> {
        let mut guard = self.link.lock().await;
        let link = guard.as_mut().ok_or(DeviceError::Disconnected)?;

        let outcome = link
            .sender
            .send(outgoing(message))
            .await
            .map_err(|e| DeviceError::SendFailed(e.to_string()))?;

        match outcome {
            Outcome::Accepted(_) => Ok(()),
            other => Err(DeviceError::SendFailed(format!("message not accepted: {:?}", other))),
        }
    }

    async fn start_receiving(&self) -> Result<mpsc::Receiver<ReceivedMessage>, DeviceError> {
        let receiver = {
            let mut guard = self.link.lock().await;
            let link = guard.as_mut().ok_or(DeviceError::Disconnected)?;
            Receiver::attach(
                &mut link.session,
                format!("receiver-{}", Uuid::new_v4()),
                devicebound_address(&self.auth.device_id),
            )
            .await
            .map_err(|e| DeviceError::ReceiveFailed(e.to_string()))?
        };

        let (tx, rx) = mpsc::channel(MAX_BACKLOG);
        let (settlements, requests) = mpsc::channel(8);
        let task = tokio::spawn(run_receiver(receiver, tx, requests));

        if let Some(previous) = self.inbound.lock().await.replace(Inbound { settlements, task }) {
            previous.task.abort();
        }

        Ok(rx)
    }

    async fn stop_receiving(&self) -> Result<(), DeviceError> {
        let Some(inbound) = self.inbound.lock().await.take() else {
            return Ok(());
        };

        // Closing the settlement channel ends the task, which detaches the link
        let Inbound { settlements, mut task } = inbound;
        drop(settlements);
        if timeout(Duration::from_secs(2), &mut task).await.is_err() {
            task.abort();
        }
        Ok(())
    }

    async fn settle(
        &self,
        message: &ReceivedMessage,
        policy: SettlePolicy,
    ) -> Result<(), DeviceError> {
        let failed = |message: String| DeviceError::SettleFailed {
            action: policy.as_str(),
            message,
        };

        let lock_token = message
            .lock_token
            .as_deref()
            .ok_or_else(|| failed("message has no lock token".to_string()))?;

        let settlements = self
            .inbound
            .lock()
            .await
            .as_ref()
            .map(|inbound| inbound.settlements.clone())
            .ok_or(DeviceError::Disconnected)?;

        let (reply, outcome) = oneshot::channel();
        settlements
            .send(Settlement {
                lock_token: lock_token.to_string(),
                policy,
                reply,
            })
            .await
            .map_err(|_| DeviceError::Disconnected)?;

        outcome
            .await
            .map_err(|_| DeviceError::Disconnected)?
            .map_err(failed)
    }

    async fn upload_to_blob(&self, blob_name: &str, data: Vec<u8>) -> Result<(), DeviceError> {
        self.uploader.upload(blob_name, data).await
    }

    async fn close(&self) -> Result<(), DeviceError> {
        self.stop_receiving().await?;

        let Some(link) = self.link.lock().await.take() else {
            return Ok(());
        };
        let Link {
            mut connection,
            mut session,
            sender,
        } = link;

        sender
            .close()
            .await
            .map_err(|e| DeviceError::CloseFailed(e.to_string()))?;
        session
            .end()
            .await
            .map_err(|e| DeviceError::CloseFailed(e.to_string()))?;
        connection
            .close()
            .await
            .map_err(|e| DeviceError::CloseFailed(e.to_string()))?;

        tracing::debug!(device = %self.auth.device_id, "amqp connection closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> DeviceAuth {
        DeviceAuth::new("contoso-hub.azure-devices.net", "sim-1", "a2V5")
    }

    #[test]
    fn test_sasl_username_uses_hub_name() {
        assert_eq!(sasl_username(&auth()), "sim-1@sas.contoso-hub");
    }

    #[test]
    fn test_endpoints() {
        assert_eq!(amqps_url("hub.azure-devices.net"), "amqps://hub.azure-devices.net:5671");
        assert_eq!(
            websocket_url("hub.azure-devices.net"),
            "wss://hub.azure-devices.net:443/$iothub/websocket"
        );
        assert_eq!(events_address("sim-1"), "/devices/sim-1/messages/events");
        assert_eq!(devicebound_address("sim-1"), "/devices/sim-1/messages/devicebound");
    }

    #[test]
    fn test_outgoing_carries_properties() {
        let mut message = Message::new("hi");
        message.message_id = "m-1".to_string();
        message.correlation_id = Some("c-1".to_string());
        message.properties.insert("level".to_string(), "warn".to_string());

        let amqp = outgoing(&message);

        let properties = amqp.properties.as_ref().unwrap();
        assert_eq!(properties.message_id.as_ref().map(message_id_text).as_deref(), Some("m-1"));
        assert_eq!(
            properties.correlation_id.as_ref().map(message_id_text).as_deref(),
            Some("c-1")
        );

        let application = amqp.application_properties.as_ref().unwrap();
        assert_eq!(application.0.get("level"), Some(&SimpleValue::String("warn".to_string())));
        assert_eq!(amqp.body.0.to_vec(), b"hi".to_vec());
    }

    #[test]
    fn test_received_message_fields() {
        let amqp = AmqpMessage::builder()
            .properties(Properties::builder().message_id(String::from("m-9")).build())
            .application_properties(ApplicationProperties::builder().insert("room", String::from("hall")).build())
            .data(Binary::from(b"turn on".to_vec()))
            .build();

        let message = received(&amqp, b"turn on".to_vec(), "lock-1".to_string());

        assert_eq!(message.message_id.as_deref(), Some("m-9"));
        assert_eq!(message.lock_token.as_deref(), Some("lock-1"));
        assert_eq!(message.properties["room"], "hall");
        assert_eq!(message.body_text(), "turn on");
    }

    #[test]
    fn test_value_bodies() {
        let text = Body::Value(AmqpValue(Value::String("on".to_string())));
        assert_eq!(body_bytes(&text), b"on".to_vec());
        assert!(body_bytes(&Body::<Value>::Empty).is_empty());
    }

    #[tokio::test]
    async fn test_operations_before_open() {
        for protocol in [Protocol::Amqp, Protocol::AmqpWs] {
            let transport = AmqpTransport::new(auth(), protocol, Duration::from_secs(5)).unwrap();
            assert_eq!(transport.protocol(), protocol);

            let err = transport.send_event(&Message::new("x")).await.unwrap_err();
            assert!(matches!(err, DeviceError::Disconnected));

            let err = transport.start_receiving().await.unwrap_err();
            assert!(matches!(err, DeviceError::Disconnected));

            let locked = ReceivedMessage {
                lock_token: Some("lock-1".to_string()),
                ..Default::default()
            };
            let err = transport.settle(&locked, SettlePolicy::Abandon).await.unwrap_err();
            assert!(matches!(err, DeviceError::Disconnected));

            let err = transport
                .settle(&ReceivedMessage::default(), SettlePolicy::Reject)
                .await
                .unwrap_err();
            assert!(matches!(err, DeviceError::SettleFailed { action: "reject", .. }));

            assert!(transport.close().await.is_ok());
        }
    }
}
