//! HTTPS device transport.
//!
//! Stateless request/response: telemetry is a POST per message and
//! cloud-to-device messages are fetched by polling.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::client::{DeviceAuth, DeviceClient, Protocol, SettlePolicy, DEVICE_API_VERSION};
use super::upload::FileUploadClient;
use crate::error::DeviceError;
use crate::message::{Message, ReceivedMessage};

/// Delay between polls when no cloud-to-device message is waiting
pub const HTTP_RECEIVE_POLL_INTERVAL: Duration = Duration::from_secs(5);

const APP_PROPERTY_PREFIX: &str = "iothub-app-";

pub struct HttpTransport {
    http: Client,
    auth: DeviceAuth,
    uploader: FileUploadClient,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl HttpTransport {
    pub fn new(auth: DeviceAuth, timeout: Duration) -> Result<Self, DeviceError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeviceError::ConnectFailed {
                host: auth.host_name.clone(),
                message: format!("HTTP client error: {}", e),
            })?;

        Ok(Self {
            http,
            uploader: FileUploadClient::new(auth.clone(), timeout)?,
            auth,
            poller: Mutex::new(None),
        })
    }

    fn settle_url(&self, lock_token: &str, suffix: &str) -> String {
        self.auth.device_url(&format!(
            "messages/deviceBound/{}{}",
            urlencoding::encode(lock_token),
            suffix
        ))
    }
}

#[async_trait]
impl DeviceClient for HttpTransport {
    fn device_id(&self) -> &str {
        &self.auth.device_id
    }

    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    async fn open(&self) -> Result<(), DeviceError> {
        // No connection to hold; fail early if the credentials are unusable.
        self.auth.token()?;
        tracing::debug!(host = %self.auth.host_name, device = %self.auth.device_id, "http transport ready");
        Ok(())
    }

    async fn send_event(&self, message: &Message) -> Result<(), DeviceError> {
        let token = self.auth.token()?;

        let mut request = self
            .http
            .post(self.auth.device_url("messages/events"))
            .query(&[("api-version", DEVICE_API_VERSION)])
            .header(reqwest::header::AUTHORIZATION, token.to_string())
            .header(reqwest::header::CONTENT_TYPE, message.content_type())
            .header("iothub-messageid", &message.message_id);

        if let Some(correlation_id) = &message.correlation_id {
            request = request.header("iothub-correlationid", correlation_id);
        }
        for (key, value) in &message.properties {
            request = request.header(format!("{}{}", APP_PROPERTY_PREFIX, key), value);
        }

        let response = request
            .body(message.payload())
            .send()
            .await
            .map_err(|e| DeviceError::SendFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DeviceError::SendFailed(status_message(response).await));
        }

        Ok(())
    }

    async fn start_receiving(&self) -> Result<mpsc::Receiver<ReceivedMessage>, DeviceError> {
        let (tx, rx) = mpsc::channel(32);
        let http = self.http.clone();
        let auth = self.auth.clone();

        let handle = tokio::spawn(async move {
            loop {
                match receive_once(&http, &auth).await {
                    Ok(Some(message)) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                        // More may be queued; poll again right away
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "cloud-to-device poll failed"),
                }
                tokio::time::sleep(HTTP_RECEIVE_POLL_INTERVAL).await;
            }
        });

        if let Some(previous) = self.poller.lock().await.replace(handle) {
            previous.abort();
        }

        Ok(rx)
    }

    async fn stop_receiving(&self) -> Result<(), DeviceError> {
        if let Some(handle) = self.poller.lock().await.take() {
            handle.abort();
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
        let token = self.auth.token()?;

        let request = match policy {
            SettlePolicy::Complete => self.http.delete(self.settle_url(lock_token, "")),
            SettlePolicy::Reject => self.http.delete(self.settle_url(lock_token, "?reject")),
            SettlePolicy::Abandon => self.http.post(self.settle_url(lock_token, "/abandon")),
        };

        let response = request
            .query(&[("api-version", DEVICE_API_VERSION)])
            .header(reqwest::header::AUTHORIZATION, token.to_string())
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(failed(status_message(response).await));
        }

        Ok(())
    }

    async fn upload_to_blob(&self, blob_name: &str, data: Vec<u8>) -> Result<(), DeviceError> {
        self.uploader.upload(blob_name, data).await
    }

    async fn close(&self) -> Result<(), DeviceError> {
        self.stop_receiving().await
    }
}

/// Fetch one waiting cloud-to-device message, if any.
async fn receive_once(
    http: &Client,
    auth: &DeviceAuth,
) -> Result<Option<ReceivedMessage>, DeviceError> {
    let token = auth.token()?;
    let response = http
        .get(auth.device_url("messages/deviceBound"))
        .query(&[("api-version", DEVICE_API_VERSION)])
        .header(reqwest::header::AUTHORIZATION, token.to_string())
        .send()
        .await
        .map_err(|e| DeviceError::ReceiveFailed(e.to_string()))?;

    match response.status() {
        StatusCode::NO_CONTENT => Ok(None),
        status if status.is_success() => {
            let mut message = message_from_headers(response.headers());
            message.body = response
                .bytes()
                .await
                .map_err(|e| DeviceError::ReceiveFailed(e.to_string()))?
                .to_vec();
            tracing::debug!(message_id = ?message.message_id, "cloud-to-device message received");
            Ok(Some(message))
        }
        _ => Err(DeviceError::ReceiveFailed(status_message(response).await)),
    }
}

fn message_from_headers(headers: &HeaderMap) -> ReceivedMessage {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let properties: BTreeMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(APP_PROPERTY_PREFIX)?;
            Some((key.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect();

    ReceivedMessage {
        message_id: header("iothub-messageid"),
        lock_token: header("etag").map(|etag| etag.trim_matches('"').to_string()),
        body: Vec::new(),
        properties,
    }
}

async fn status_message(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if body.trim().is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, body.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use reqwest::header::HeaderValue;

    fn mocked(server: &MockServer) -> HttpTransport {
        let auth = DeviceAuth::new("hub.azure-devices.net", "sim-1", "a2V5")
            .with_base_url(server.base_url());
        HttpTransport::new(auth, Duration::from_secs(5)).unwrap()
    }

    fn locked(lock_token: &str) -> ReceivedMessage {
        ReceivedMessage {
            lock_token: Some(lock_token.to_string()),
            ..Default::default()
        }
    }

    fn transport() -> HttpTransport {
        HttpTransport::new(
            DeviceAuth::new("hub.azure-devices.net", "sim-1", "a2V5"),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_message_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("etag", HeaderValue::from_static("\"lock-123\""));
        headers.insert("iothub-messageid", HeaderValue::from_static("m-1"));
        headers.insert("iothub-app-priority", HeaderValue::from_static("high"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));

        let message = message_from_headers(&headers);

        assert_eq!(message.lock_token.as_deref(), Some("lock-123"));
        assert_eq!(message.message_id.as_deref(), Some("m-1"));
        assert_eq!(message.properties.len(), 1);
        assert_eq!(message.properties["priority"], "high");
    }

    #[test]
    fn test_settle_urls() {
        let transport = transport();

        assert_eq!(
            transport.settle_url("lock-1", ""),
            "https://hub.azure-devices.net/devices/sim-1/messages/deviceBound/lock-1"
        );
        assert_eq!(
            transport.settle_url("lock-1", "/abandon"),
            "https://hub.azure-devices.net/devices/sim-1/messages/deviceBound/lock-1/abandon"
        );
    }

    #[tokio::test]
    async fn test_settle_without_lock_token_fails() {
        let transport = transport();
        let err = transport
            .settle(&ReceivedMessage::default(), SettlePolicy::Complete)
            .await
            .unwrap_err();

        assert!(matches!(err, DeviceError::SettleFailed { action: "complete", .. }));
    }

    #[tokio::test]
    async fn test_stop_receiving_without_poller() {
        let transport = transport();
        assert!(transport.stop_receiving().await.is_ok());
        assert!(transport.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_send_event_headers() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/devices/sim-1/messages/events")
                .query_param("api-version", DEVICE_API_VERSION)
                .header_exists("authorization")
                .header("content-type", "text/plain")
                .header("iothub-messageid", "m-1")
                .header("iothub-correlationid", "c-1")
                .header("iothub-app-room", "kitchen")
                .body("hello");
            then.status(204);
        });

        let mut message = Message::new("hello");
        message.message_id = "m-1".to_string();
        message.correlation_id = Some("c-1".to_string());
        message.properties.insert("room".to_string(), "kitchen".to_string());

        mocked(&server).send_event(&message).await.unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn test_send_event_rejected() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/devices/sim-1/messages/events");
            then.status(401).body("IotHubUnauthorizedAccess");
        });

        let err = mocked(&server).send_event(&Message::new("x")).await.unwrap_err();
        match err {
            DeviceError::SendFailed(message) => {
                assert!(message.contains("401"));
                assert!(message.contains("IotHubUnauthorizedAccess"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_poll_yields_nothing() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/devices/sim-1/messages/deviceBound")
                .query_param("api-version", DEVICE_API_VERSION);
            then.status(204);
        });

        let transport = mocked(&server);
        let received = receive_once(&transport.http, &transport.auth).await.unwrap();

        mock.assert();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_poll_returns_message() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/devices/sim-1/messages/deviceBound");
            then.status(200)
                .header("etag", "\"lock-9\"")
                .header("iothub-messageid", "m-9")
                .header("iothub-app-room", "hall")
                .body("turn on");
        });

        let transport = mocked(&server);
        let message = receive_once(&transport.http, &transport.auth)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(message.lock_token.as_deref(), Some("lock-9"));
        assert_eq!(message.message_id.as_deref(), Some("m-9"));
        assert_eq!(message.properties["room"], "hall");
        assert_eq!(message.body_text(), "turn on");
    }

    #[tokio::test]
    async fn test_complete_deletes_message() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(DELETE)
                .path("/devices/sim-1/messages/deviceBound/lock-1")
                .query_param("api-version", DEVICE_API_VERSION);
            then.status(204);
        });

        mocked(&server)
            .settle(&locked("lock-1"), SettlePolicy::Complete)
            .await
            .unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn test_reject_deletes_with_reject_flag() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(DELETE)
                .path("/devices/sim-1/messages/deviceBound/lock-1")
                .query_param_exists("reject")
                .query_param("api-version", DEVICE_API_VERSION);
            then.status(204);
        });

        mocked(&server)
            .settle(&locked("lock-1"), SettlePolicy::Reject)
            .await
            .unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn test_abandon_posts_to_abandon() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/devices/sim-1/messages/deviceBound/lock-1/abandon")
                .query_param("api-version", DEVICE_API_VERSION);
            then.status(204);
        });

        mocked(&server)
            .settle(&locked("lock-1"), SettlePolicy::Abandon)
            .await
            .unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn test_settle_failure_names_action() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/devices/sim-1/messages/deviceBound/lock-1/abandon");
            then.status(412).body("PreconditionFailed");
        });

        let err = mocked(&server)
            .settle(&locked("lock-1"), SettlePolicy::Abandon)
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::SettleFailed { action: "abandon", .. }));
    }
}
