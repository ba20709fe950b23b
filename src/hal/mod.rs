//! Contracts for the physical primitives the node runs on.
//!
//! The channel and orchestrator code only talks to these traits. `host`
//! binds them to the operating system (UDP, MQTT over TCP), `sim` provides
//! in-process stand-ins for lab runs and tests.

pub mod host;
pub mod sim;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::HardwareError;

/// Long-range radio: framed, unacknowledged transmit and polled receive.
#[async_trait]
pub trait RadioDriver: Send {
    async fn begin(&mut self) -> Result<(), HardwareError>;

    async fn transmit(&mut self, frame: &[u8]) -> Result<(), HardwareError>;

    /// Returns one pending inbound frame without waiting.
    fn try_receive(&mut self) -> Option<Vec<u8>>;
}

/// Physical network association (the WiFi station link).
pub trait NetworkLink: Send {
    fn is_up(&self) -> bool;

    /// Tears down and restarts association. Does not wait for the result.
    fn reconnect(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Application-level session with a message broker.
#[async_trait]
pub trait BrokerSession: Send {
    async fn connect(&mut self, params: &SessionParams) -> Result<(), HardwareError>;

    fn is_connected(&self) -> bool;

    async fn subscribe(&mut self, topic: &str) -> Result<(), HardwareError>;

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), HardwareError>;

    /// Processes pending protocol traffic and returns at most one message.
    async fn poll(&mut self) -> Option<InboundMessage>;
}

pub trait PowerControl: Send {
    fn arm_wake_timer(&mut self, after: Duration);
}

/// A single on/off output, e.g. the status LED.
pub trait IndicatorOutput: Send {
    fn write(&mut self, on: bool);
}
