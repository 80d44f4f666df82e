//! Device-side communication layer.
//!
//! Provides the transport-agnostic [`DeviceClient`] trait, the AMQP, HTTP
//! and MQTT transports, blob file upload and the device simulator.

pub mod amqp;
pub mod client;
pub mod http;
pub mod mqtt;
pub mod simulator;
pub mod upload;

pub use client::{create_client, DeviceAuth, DeviceClient, Protocol, SettlePolicy, DEVICE_API_VERSION};
pub use simulator::{
    run_simulation, NoopObserver, ReceivePlan, SendPlan, SimulationObserver, SimulationPlan,
    SimulationSummary, DEFAULT_SEND_INTERVAL, DRAIN_POLL_INTERVAL,
};
