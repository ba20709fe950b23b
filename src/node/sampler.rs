use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use super::{NodeContext, Signal};
use crate::sensors::SensorBank;

pub struct Sampler {
    ctx: Arc<NodeContext>,
    sensors: SensorBank,
}

impl Sampler {
    pub fn new(ctx: Arc<NodeContext>, sensors: SensorBank) -> Self {
        Self { ctx, sensors }
    }

    pub async fn run(mut self) {
        loop {
            self.ctx.sample_request.notified().await;
            self.sample_once();
        }
    }

    /// Reads all sensors, replaces the mailbox content and raises
    /// [`Signal::SampleReady`].
    pub fn sample_once(&mut self) {
        let timestamp_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        let snapshot = self.sensors.sample(timestamp_ms);
        debug!(ok = snapshot.ok, timestamp_ms, "Sample taken");
        if self.ctx.mailbox.post(snapshot) {
            debug!("Unsent sample replaced");
        }
        self.ctx.signals.raise(Signal::SampleReady);
    }
}
