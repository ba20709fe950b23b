use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{NodeContext, PowerDown, Signal};
use crate::channel::{create_channel, CommandSink, TransportFactory, TransportKind};
use crate::config::{NodeConfig, SleepStrategy};
use crate::hal::PowerControl;
use crate::indicator::Pattern;
use crate::ota::UpdateFetcher;

pub struct PowerWorker {
    ctx: Arc<NodeContext>,
    transports: Arc<dyn TransportFactory>,
    sink: CommandSink,
    updater: Box<dyn UpdateFetcher>,
    power: Box<dyn PowerControl>,
    attempted_url: Option<String>,
}

impl PowerWorker {
    pub fn new(
        ctx: Arc<NodeContext>,
        transports: Arc<dyn TransportFactory>,
        sink: CommandSink,
        updater: Box<dyn UpdateFetcher>,
        power: Box<dyn PowerControl>,
    ) -> Self {
        Self {
            ctx,
            transports,
            sink,
            updater,
            power,
            attempted_url: None,
        }
    }

    /// Requests the first sample, then handles one completed cycle at a
    /// time until the boot ends.
    pub async fn run(mut self) -> PowerDown {
        self.ctx.sample_request.notify_one();
        loop {
            self.ctx.signals.take(Signal::UplinkComplete).await;
            if let Some(down) = self.after_cycle().await {
                return down;
            }
        }
    }

    /// Applies pending work, then either schedules the next sample or
    /// returns the terminal state.
    pub async fn after_cycle(&mut self) -> Option<PowerDown> {
        if self.ctx.pending.take_reconfigure() {
            let latest = self.ctx.config();
            self.rebuild_channel(&latest).await;
        }

        if self.ctx.pending.update.load(Ordering::SeqCst) {
            if let Some(down) = self.try_update().await {
                return Some(down);
            }
        }

        let config = self.ctx.config();
        let interval = Duration::from_secs(u64::from(config.publish_interval_secs));
        match config.sleep_strategy {
            SleepStrategy::StayAwake => {
                debug!(secs = interval.as_secs(), "Staying awake until next sample");
                tokio::time::sleep(interval).await;
                self.ctx.sample_request.notify_one();
                None
            }
            SleepStrategy::DeepSleep => {
                self.power.arm_wake_timer(interval);
                info!(secs = interval.as_secs(), "Entering deep sleep");
                Some(PowerDown::DeepSleep {
                    wake_after: interval,
                })
            }
        }
    }

    async fn rebuild_channel(&mut self, config: &NodeConfig) {
        let kind = TransportKind::for_config(config);
        let next = create_channel(self.transports.as_ref(), kind);
        if !self.ctx.channel.rebuild(next, self.sink.clone(), config).await {
            warn!(transport = %kind, "Rebuilt channel did not come up; pump will retry");
        }
    }

    async fn try_update(&mut self) -> Option<PowerDown> {
        let kind = self.ctx.channel.kind().await;
        if !kind.supports_bulk_transfer() {
            info!(transport = %kind, "Update deferred until a broker transport is active");
            return None;
        }
        // Clear before reading the record: a URL stored after this point
        // raises the flag again.
        if !self.ctx.pending.update.swap(false, Ordering::SeqCst) {
            return None;
        }

        let url = self.ctx.config().ota_url;
        if url.is_empty() {
            warn!("Update requested without a stored URL");
            return None;
        }
        if self.attempted_url.as_deref() == Some(url.as_str()) {
            debug!(url = %url, "Update already attempted this boot");
            return None;
        }
        self.attempted_url = Some(url.clone());

        self.ctx.show(Pattern::UpdateInProgress);
        match self.updater.fetch(&url).await {
            Ok(outcome) => {
                info!(?outcome, "Update installed; restarting");
                Some(PowerDown::Restart)
            }
            Err(e) => {
                error!(url = %url, error = %e, "Update failed");
                self.ctx.show(Pattern::Error);
                None
            }
        }
    }
}
