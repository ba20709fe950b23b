use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{CommandSink, ConnectionState, TelemetryChannel, TransportKind};
use crate::config::NodeConfig;
use crate::hal::RadioDriver;

/// Fire-and-forget radio uplink.
///
/// There is no delivery acknowledgment on this link, so `publish` only
/// reports local transmit faults. Every received frame is forwarded as a
/// command: nothing at this layer checks who sent it.
pub struct RadioChannel {
    driver: Box<dyn RadioDriver>,
    initialized: bool,
    sink: Option<CommandSink>,
}

impl RadioChannel {
    pub fn new(driver: Box<dyn RadioDriver>) -> Self {
        Self {
            driver,
            initialized: false,
            sink: None,
        }
    }
}

#[async_trait]
impl TelemetryChannel for RadioChannel {
    fn kind(&self) -> TransportKind {
        TransportKind::Radio
    }

    async fn initialize(&mut self, _config: &NodeConfig) -> bool {
        match self.driver.begin().await {
            Ok(()) => {
                info!("Radio initialized");
                self.initialized = true;
            }
            Err(e) => {
                warn!(error = %e, "Failed to start radio");
                self.initialized = false;
            }
        }
        self.initialized
    }

    async fn publish(&mut self, payload: &[u8]) -> bool {
        if !self.initialized {
            return false;
        }
        match self.driver.transmit(payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Radio transmit failed");
                false
            }
        }
    }

    async fn pump(&mut self) {
        if !self.initialized {
            return;
        }
        while let Some(frame) = self.driver.try_receive() {
            let text = String::from_utf8_lossy(&frame).into_owned();
            match &self.sink {
                Some(sink) => {
                    if sink.send(text).is_err() {
                        debug!("Command sink closed; frame dropped");
                    }
                }
                None => debug!(bytes = frame.len(), "No command sink; frame dropped"),
            }
        }
    }

    fn state(&self) -> ConnectionState {
        if self.initialized {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    fn set_command_sink(&mut self, sink: CommandSink) {
        self.sink = Some(sink);
    }
}
