use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{CommandDispatcher, NodeContext, Signal};
use crate::indicator::Pattern;
use crate::types::TelemetryRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkStep {
    /// No sample arrived within the wait.
    Idle,
    /// Woken with an empty mailbox.
    NothingToSend,
    Published,
    PublishFailed,
}

pub struct UplinkWorker {
    ctx: Arc<NodeContext>,
    dispatcher: CommandDispatcher,
    commands: mpsc::UnboundedReceiver<String>,
    wait: Duration,
    firmware_version: String,
}

impl UplinkWorker {
    pub fn new(
        ctx: Arc<NodeContext>,
        dispatcher: CommandDispatcher,
        commands: mpsc::UnboundedReceiver<String>,
        wait: Duration,
        firmware_version: String,
    ) -> Self {
        Self {
            ctx,
            dispatcher,
            commands,
            wait,
            firmware_version,
        }
    }

    pub async fn run(mut self) {
        loop {
            self.step().await;
        }
    }

    /// Pumps the channel, applies queued commands and, if a sample is
    /// signalled within the wait, publishes it. Uplink completion is
    /// signalled for every sample wake-up whatever the publish result.
    pub async fn step(&mut self) -> UplinkStep {
        self.ctx.channel.pump().await;
        self.apply_commands();

        if !self
            .ctx
            .signals
            .take_timeout(Signal::SampleReady, self.wait)
            .await
        {
            return UplinkStep::Idle;
        }

        let step = self.publish_latest().await;
        self.ctx.signals.raise(Signal::UplinkComplete);
        step
    }

    fn apply_commands(&mut self) {
        while let Ok(text) = self.commands.try_recv() {
            debug!(bytes = text.len(), "Inbound command");
            self.dispatcher.dispatch(&text);
        }
    }

    async fn publish_latest(&mut self) -> UplinkStep {
        let Some(snapshot) = self.ctx.mailbox.take() else {
            debug!("Sample signal with an empty mailbox");
            return UplinkStep::NothingToSend;
        };

        let config = self.ctx.config();
        let record = TelemetryRecord::from_snapshot(&snapshot, &config, &self.firmware_version);
        let payload = match record.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Failed to serialize telemetry");
                self.ctx.show(Pattern::Error);
                return UplinkStep::PublishFailed;
            }
        };

        if self.ctx.channel.publish(payload.as_bytes()).await {
            info!(bytes = payload.len(), sensors_ok = snapshot.ok, "Telemetry published");
            self.ctx.show(Pattern::Ok);
            UplinkStep::Published
        } else {
            warn!("Telemetry publish failed");
            self.ctx.show(Pattern::Error);
            UplinkStep::PublishFailed
        }
    }
}
