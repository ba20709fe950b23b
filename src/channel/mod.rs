//! Pluggable telemetry transports.
//!
//! A [`TelemetryChannel`] publishes telemetry and pushes inbound command text
//! into a [`CommandSink`]. Exactly one channel is active at a time; it lives
//! in a [`ChannelSlot`] and is only ever swapped through
//! [`ChannelSlot::rebuild`], which replaces and re-initializes it under the
//! slot's lock.

mod backoff;
mod broker;
mod radio;

pub use backoff::Backoff;
pub use broker::BrokerChannel;
pub use radio::RadioChannel;

use async_trait::async_trait;
use std::fmt;
use tokio::sync::{mpsc, Mutex};
use tracing::info;

use crate::config::NodeConfig;
use crate::hal::{BrokerSession, NetworkLink, RadioDriver};

/// Where channels deliver raw inbound command text.
pub type CommandSink = mpsc::UnboundedSender<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Radio,
    Broker,
}

impl TransportKind {
    pub fn for_config(config: &NodeConfig) -> Self {
        if config.use_radio {
            Self::Radio
        } else {
            Self::Broker
        }
    }

    /// Whether the transport can carry a firmware image download.
    pub fn supports_bulk_transfer(self) -> bool {
        matches!(self, Self::Broker)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Radio => f.write_str("radio"),
            Self::Broker => f.write_str("broker"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[async_trait]
pub trait TelemetryChannel: Send {
    fn kind(&self) -> TransportKind;

    async fn initialize(&mut self, config: &NodeConfig) -> bool;

    /// Sends one payload. Never waits for a session to come up.
    async fn publish(&mut self, payload: &[u8]) -> bool;

    /// One non-blocking progress step: reconnect work and inbound delivery.
    async fn pump(&mut self);

    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn set_command_sink(&mut self, sink: CommandSink);
}

/// Source of fresh hardware handles for each transport.
pub trait TransportFactory: Send + Sync {
    fn radio(&self) -> Box<dyn RadioDriver>;

    fn broker(&self) -> (Box<dyn NetworkLink>, Box<dyn BrokerSession>);
}

pub fn create_channel(
    factory: &dyn TransportFactory,
    kind: TransportKind,
) -> Box<dyn TelemetryChannel> {
    match kind {
        TransportKind::Radio => Box::new(RadioChannel::new(factory.radio())),
        TransportKind::Broker => {
            let (link, session) = factory.broker();
            Box::new(BrokerChannel::new(link, session))
        }
    }
}

/// The single active channel, shared between workers.
pub struct ChannelSlot {
    inner: Mutex<Box<dyn TelemetryChannel>>,
}

impl ChannelSlot {
    pub fn new(channel: Box<dyn TelemetryChannel>) -> Self {
        Self {
            inner: Mutex::new(channel),
        }
    }

    pub async fn pump(&self) {
        self.inner.lock().await.pump().await;
    }

    pub async fn publish(&self, payload: &[u8]) -> bool {
        self.inner.lock().await.publish(payload).await
    }

    pub async fn kind(&self) -> TransportKind {
        self.inner.lock().await.kind()
    }

    /// Destroys the active channel and installs `next` in its place, wiring
    /// the sink and initializing it before the lock is released.
    pub async fn rebuild(
        &self,
        next: Box<dyn TelemetryChannel>,
        sink: CommandSink,
        config: &NodeConfig,
    ) -> bool {
        let mut active = self.inner.lock().await;
        info!(from = %active.kind(), to = %next.kind(), "Replacing telemetry channel");
        *active = next;
        active.set_command_sink(sink);
        active.initialize(config).await
    }
}
