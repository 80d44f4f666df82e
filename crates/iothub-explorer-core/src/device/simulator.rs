//! Simulated device session.
//!
//! Opens the client, then multiplexes up to three activities on one task:
//! periodic telemetry, cloud-to-device receive-and-settle, and a single
//! file upload. A drain tick checks whether every requested activity has
//! finished and closes the client when they have.

use std::future::pending;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use super::client::{DeviceClient, Protocol, SettlePolicy};
use crate::error::{CoreError, DeviceError};
use crate::message::{Message, ReceivedMessage};

pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_millis(1000);

/// How often completion of all activities is checked
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Periodic telemetry.
#[derive(Debug, Clone)]
pub struct SendPlan {
    /// Message text or envelope; `None` sends a numbered placeholder.
    pub message: Option<String>,
    pub interval: Duration,
    /// Stop after this many sends; `None` never stops.
    pub count: Option<u64>,
}

/// Cloud-to-device receive.
#[derive(Debug, Clone)]
pub struct ReceivePlan {
    /// Stop after this many messages; `None` never stops.
    pub count: Option<u64>,
    pub settle: SettlePolicy,
}

/// Activities requested for one simulation run.
#[derive(Debug, Clone, Default)]
pub struct SimulationPlan {
    pub send: Option<SendPlan>,
    pub receive: Option<ReceivePlan>,
    pub upload: Option<PathBuf>,
}

/// What happened during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationSummary {
    pub sent: u64,
    pub received: u64,
    /// `Some(true)` uploaded, `Some(false)` failed, `None` not requested.
    pub uploaded: Option<bool>,
}

/// Receives simulation events.
///
/// The CLI prints them; tests record them.
pub trait SimulationObserver: Send + Sync {
    fn on_connected(&self, _device_id: &str, _protocol: Protocol) {}
    fn on_message_sent(&self, count: u64, message: &Message);
    fn on_message_received(&self, count: u64, message: &ReceivedMessage);
    fn on_message_settled(&self, _message: &ReceivedMessage, _policy: SettlePolicy) {}
    fn on_upload_complete(&self, file: &Path);
    fn on_upload_failed(&self, file: &Path, error: &DeviceError);
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl SimulationObserver for NoopObserver {
    fn on_message_sent(&self, _count: u64, _message: &Message) {}
    fn on_message_received(&self, _count: u64, _message: &ReceivedMessage) {}
    fn on_upload_complete(&self, _file: &Path) {}
    fn on_upload_failed(&self, _file: &Path, _error: &DeviceError) {}
}

/// Run a simulation to completion.
///
/// Send, settle, open and close failures end the run with an error. An
/// upload failure is reported to the observer and the run carries on.
pub async fn run_simulation<C, O>(
    client: &C,
    plan: &SimulationPlan,
    observer: &O,
) -> Result<SimulationSummary, CoreError>
where
    C: DeviceClient + ?Sized,
    O: SimulationObserver + ?Sized,
{
    client.open().await?;
    observer.on_connected(client.device_id(), client.protocol());

    let mut summary = SimulationSummary::default();

    let mut send_timer = plan
        .send
        .as_ref()
        .filter(|s| s.count != Some(0))
        .map(|s| {
            let mut timer = interval_at(Instant::now() + s.interval, s.interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });

    let mut inbox = match plan.receive.as_ref().filter(|r| r.count != Some(0)) {
        Some(_) => Some(client.start_receiving().await?),
        None => None,
    };

    let mut upload: Option<BoxFuture<'_, Result<(), DeviceError>>> = plan
        .upload
        .as_deref()
        .map(|path| upload_file(client, path).boxed());

    let mut drain = interval_at(Instant::now() + DRAIN_POLL_INTERVAL, DRAIN_POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = next_tick(&mut send_timer) => {
                let Some(send) = plan.send.as_ref() else { continue };

                summary.sent += 1;
                let message = match &send.message {
                    Some(text) => Message::from_argument(text, None)?,
                    None => Message::new(format!("Simulated message: #{}", summary.sent)),
                };
                client.send_event(&message).await?;
                observer.on_message_sent(summary.sent, &message);

                if send.count.is_some_and(|count| summary.sent >= count) {
                    tracing::debug!(sent = summary.sent, "send count reached");
                    send_timer = None;
                }
            }
            received = next_message(&mut inbox) => {
                let Some(receive) = plan.receive.as_ref() else { continue };
                let message = received.ok_or(DeviceError::Disconnected)?;

                summary.received += 1;
                observer.on_message_received(summary.received, &message);
                client.settle(&message, receive.settle).await?;
                observer.on_message_settled(&message, receive.settle);

                if receive.count.is_some_and(|count| summary.received >= count) {
                    tracing::debug!(received = summary.received, "receive count reached");
                    client.stop_receiving().await?;
                    inbox = None;
                }
            }
            result = next_upload(&mut upload) => {
                upload = None;
                let Some(path) = plan.upload.as_deref() else { continue };

                match result {
                    Ok(()) => {
                        summary.uploaded = Some(true);
                        observer.on_upload_complete(path);
                    }
                    Err(e) => {
                        summary.uploaded = Some(false);
                        observer.on_upload_failed(path, &e);
                    }
                }
            }
            _ = drain.tick() => {
                if send_timer.is_none() && inbox.is_none() && upload.is_none() {
                    break;
                }
            }
        }
    }

    client.close().await?;
    Ok(summary)
}

async fn upload_file<C>(client: &C, path: &Path) -> Result<(), DeviceError>
where
    C: DeviceClient + ?Sized,
{
    let blob_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload.bin")
        .to_string();

    let data = tokio::fs::read(path)
        .await
        .map_err(|e| DeviceError::UploadFailed {
            file: path.display().to_string(),
            message: e.to_string(),
        })?;

    client.upload_to_blob(&blob_name, data).await
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => pending().await,
    }
}

async fn next_message(
    inbox: &mut Option<mpsc::Receiver<ReceivedMessage>>,
) -> Option<ReceivedMessage> {
    match inbox {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn next_upload(
    upload: &mut Option<BoxFuture<'_, Result<(), DeviceError>>>,
) -> Result<(), DeviceError> {
    match upload {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeClient {
        inbound: Mutex<Option<mpsc::Receiver<ReceivedMessage>>>,
        sent: Mutex<Vec<Message>>,
        settled: Mutex<Vec<(Option<String>, SettlePolicy)>>,
        uploads: Mutex<Vec<(String, Vec<u8>)>>,
        fail_send: bool,
        fail_upload: bool,
        opened: AtomicBool,
        closed: AtomicBool,
        stopped_receiving: AtomicBool,
    }

    impl FakeClient {
        fn with_inbound(rx: mpsc::Receiver<ReceivedMessage>) -> Self {
            Self {
                inbound: Mutex::new(Some(rx)),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl DeviceClient for FakeClient {
        fn device_id(&self) -> &str {
            "fake-device"
        }

        fn protocol(&self) -> Protocol {
            Protocol::Http
        }

        async fn open(&self) -> Result<(), DeviceError> {
            self.opened.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send_event(&self, message: &Message) -> Result<(), DeviceError> {
            if self.fail_send {
                return Err(DeviceError::SendFailed("HTTP 401".to_string()));
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn start_receiving(&self) -> Result<mpsc::Receiver<ReceivedMessage>, DeviceError> {
            self.inbound
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| DeviceError::ReceiveFailed("no inbound channel".to_string()))
        }

        async fn stop_receiving(&self) -> Result<(), DeviceError> {
            self.stopped_receiving.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn settle(
            &self,
            message: &ReceivedMessage,
            policy: SettlePolicy,
        ) -> Result<(), DeviceError> {
            self.settled
                .lock()
                .unwrap()
                .push((message.message_id.clone(), policy));
            Ok(())
        }

        async fn upload_to_blob(&self, blob_name: &str, data: Vec<u8>) -> Result<(), DeviceError> {
            if self.fail_upload {
                return Err(DeviceError::UploadFailed {
                    file: blob_name.to_string(),
                    message: "storage returned HTTP 403".to_string(),
                });
            }
            self.uploads.lock().unwrap().push((blob_name.to_string(), data));
            Ok(())
        }

        async fn close(&self) -> Result<(), DeviceError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    impl SimulationObserver for RecordingObserver {
        fn on_message_sent(&self, count: u64, _message: &Message) {
            self.events.lock().unwrap().push(format!("sent {}", count));
        }

        fn on_message_received(&self, count: u64, _message: &ReceivedMessage) {
            self.events.lock().unwrap().push(format!("received {}", count));
        }

        fn on_upload_complete(&self, file: &Path) {
            self.events.lock().unwrap().push(format!("uploaded {}", file.display()));
        }

        fn on_upload_failed(&self, _file: &Path, error: &DeviceError) {
            self.events.lock().unwrap().push(format!("upload failed: {}", error));
        }
    }

    fn inbound(id: &str) -> ReceivedMessage {
        ReceivedMessage {
            message_id: Some(id.to_string()),
            lock_token: Some(format!("lock-{}", id)),
            body: id.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    fn send_plan(message: Option<&str>, count: Option<u64>) -> SendPlan {
        SendPlan {
            message: message.map(str::to_string),
            interval: DEFAULT_SEND_INTERVAL,
            count,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_count_stops_sending() {
        let client = FakeClient::default();
        let plan = SimulationPlan {
            send: Some(send_plan(None, Some(3))),
            ..Default::default()
        };

        let start = Instant::now();
        let summary = run_simulation(&client, &plan, &NoopObserver).await.unwrap();

        assert_eq!(summary.sent, 3);
        let sent = client.sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].body, serde_json::json!("Simulated message: #1"));
        assert_eq!(sent[2].body, serde_json::json!("Simulated message: #3"));
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(client.opened.load(Ordering::SeqCst));
        assert!(client.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_uses_given_message() {
        let client = FakeClient::default();
        let plan = SimulationPlan {
            send: Some(send_plan(Some(r#"{"messageId":"fixed","body":"payload"}"#), Some(2))),
            ..Default::default()
        };

        run_simulation(&client, &plan, &NoopObserver).await.unwrap();

        let sent = client.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| m.message_id == "fixed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_keeps_loop_alive_after_sending_stops() {
        let (tx, rx) = mpsc::channel(8);
        let client = FakeClient::with_inbound(rx);
        let plan = SimulationPlan {
            send: Some(send_plan(Some("ping"), Some(1))),
            receive: Some(ReceivePlan {
                count: Some(2),
                settle: SettlePolicy::Abandon,
            }),
            upload: None,
        };

        tx.send(inbound("c2d-1")).await.unwrap();
        let late = tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            late.send(inbound("c2d-2")).await.unwrap();
        });

        let start = Instant::now();
        let observer = RecordingObserver::default();
        let summary = run_simulation(&client, &plan, &observer).await.unwrap();

        assert_eq!(summary.sent, 1);
        assert_eq!(summary.received, 2);
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert!(client.stopped_receiving.load(Ordering::SeqCst));
        assert_eq!(
            *client.settled.lock().unwrap(),
            vec![
                (Some("c2d-1".to_string()), SettlePolicy::Abandon),
                (Some("c2d-2".to_string()), SettlePolicy::Abandon),
            ]
        );
        assert!(observer.events.lock().unwrap().contains(&"sent 1".to_string()));
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_count_ignores_extra_messages() {
        let (tx, rx) = mpsc::channel(8);
        let client = FakeClient::with_inbound(rx);
        let plan = SimulationPlan {
            receive: Some(ReceivePlan {
                count: Some(2),
                settle: SettlePolicy::Complete,
            }),
            ..Default::default()
        };

        for id in ["a", "b", "c"] {
            tx.send(inbound(id)).await.unwrap();
        }

        let summary = run_simulation(&client, &plan, &NoopObserver).await.unwrap();

        assert_eq!(summary.received, 2);
        assert_eq!(client.settled.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_inbox_is_fatal() {
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        let client = FakeClient::with_inbound(rx);
        let plan = SimulationPlan {
            receive: Some(ReceivePlan {
                count: None,
                settle: SettlePolicy::Complete,
            }),
            ..Default::default()
        };

        let err = run_simulation(&client, &plan, &NoopObserver).await.unwrap_err();
        assert!(matches!(err, CoreError::Device(DeviceError::Disconnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_is_fatal() {
        let client = FakeClient {
            fail_send: true,
            ..Default::default()
        };
        let plan = SimulationPlan {
            send: Some(send_plan(None, None)),
            ..Default::default()
        };

        let err = run_simulation(&client, &plan, &NoopObserver).await.unwrap_err();
        assert!(matches!(err, CoreError::Device(DeviceError::SendFailed(_))));
        assert!(!client.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.csv");
        std::fs::write(&path, b"t,v\n1,2\n").unwrap();

        let client = FakeClient::default();
        let plan = SimulationPlan {
            upload: Some(path.clone()),
            ..Default::default()
        };

        let summary = run_simulation(&client, &plan, &NoopObserver).await.unwrap();

        assert_eq!(summary.uploaded, Some(true));
        let uploads = client.uploads.lock().unwrap();
        assert_eq!(uploads[0].0, "readings.csv");
        assert_eq!(uploads[0].1, b"t,v\n1,2\n".to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.png");
        std::fs::write(&path, b"png").unwrap();

        let client = FakeClient {
            fail_upload: true,
            ..Default::default()
        };
        let plan = SimulationPlan {
            send: Some(send_plan(None, Some(2))),
            upload: Some(path),
            ..Default::default()
        };
        let observer = RecordingObserver::default();

        let summary = run_simulation(&client, &plan, &observer).await.unwrap();

        assert_eq!(summary.uploaded, Some(false));
        assert_eq!(summary.sent, 2);
        assert!(client.closed.load(Ordering::SeqCst));
        assert!(observer
            .events
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.starts_with("upload failed")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_requested_closes_immediately() {
        let client = FakeClient::default();

        let summary = run_simulation(&client, &SimulationPlan::default(), &NoopObserver)
            .await
            .unwrap();

        assert_eq!(summary, SimulationSummary::default());
        assert!(client.closed.load(Ordering::SeqCst));
    }
}
