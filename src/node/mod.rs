//! The node's concurrent workers and the state they share.
//!
//! Three workers cooperate through a [`NodeContext`]:
//!
//! * the sampler reads every sensor when asked and posts the snapshot to a
//!   latest-wins mailbox, then raises [`Signal::SampleReady`];
//! * the uplink worker pumps the active channel, applies inbound commands,
//!   publishes whatever snapshot is waiting and raises
//!   [`Signal::UplinkComplete`] after every attempt;
//! * the power worker waits for uplink completion, applies pending
//!   reconfiguration and updates, then either schedules the next sample or
//!   ends the boot with a [`PowerDown`].

mod dispatch;
mod power;
mod sampler;
mod sync;
mod uplink;

pub use dispatch::{parse_command, Command, CommandDispatcher, Dispatched};
pub use power::PowerWorker;
pub use sampler::Sampler;
pub use sync::{Mailbox, Signal, Signals};
pub use uplink::{UplinkStep, UplinkWorker};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{info, warn, Instrument};

use crate::channel::{create_channel, ChannelSlot, TransportFactory, TransportKind};
use crate::config::{ConfigStore, NodeConfig};
use crate::hal::PowerControl;
use crate::indicator::Pattern;
use crate::ota::UpdateFetcher;
use crate::sensors::SensorBank;
use crate::types::SensorSnapshot;

/// How a boot ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerDown {
    /// Wake timer armed; the next boot starts from scratch.
    DeepSleep { wake_after: Duration },
    /// A new image is installed and needs a reboot.
    Restart,
}

/// Work requested by commands and carried out by the power worker between
/// cycles.
#[derive(Debug, Default)]
pub struct Pending {
    pub reconfigure: AtomicBool,
    pub update: AtomicBool,
}

impl Pending {
    pub fn request_reconfigure(&self) {
        self.reconfigure.store(true, Ordering::SeqCst);
    }

    pub fn request_update(&self) {
        self.update.store(true, Ordering::SeqCst);
    }

    pub fn take_reconfigure(&self) -> bool {
        self.reconfigure.swap(false, Ordering::SeqCst)
    }
}

pub struct NodeContext {
    pub mailbox: Mailbox<SensorSnapshot>,
    pub signals: Signals,
    pub sample_request: Notify,
    pub channel: ChannelSlot,
    pub config: watch::Receiver<NodeConfig>,
    pub pending: Arc<Pending>,
    pub indicator: watch::Sender<Pattern>,
}

impl NodeContext {
    /// Copy of the current configuration record.
    pub fn config(&self) -> NodeConfig {
        self.config.borrow().clone()
    }

    pub fn show(&self, pattern: Pattern) {
        self.indicator.send_replace(pattern);
    }
}

/// Board-specific pieces the node runs on.
pub struct Hardware {
    pub transports: Arc<dyn TransportFactory>,
    pub sensors: SensorBank,
    pub updater: Box<dyn UpdateFetcher>,
    pub power: Box<dyn PowerControl>,
}

#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// Upper bound on one uplink wait before the channel is pumped again.
    pub uplink_wait: Duration,
    pub firmware_version: String,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            uplink_wait: Duration::from_millis(250),
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

pub struct Node {
    ctx: Arc<NodeContext>,
    sampler: Sampler,
    uplink: UplinkWorker,
    power: PowerWorker,
}

impl Node {
    /// Brings up sensors and the configured channel and wires the workers.
    pub async fn boot(hardware: Hardware, store: ConfigStore, options: NodeOptions) -> Self {
        let Hardware {
            transports,
            mut sensors,
            updater,
            power,
        } = hardware;

        let config = store.current();
        info!(
            transport = %TransportKind::for_config(&config),
            sleep = %config.sleep_strategy,
            interval_secs = config.publish_interval_secs,
            durable = store.is_durable(),
            "Node booting"
        );

        if !sensors.begin() {
            warn!("Some sensors failed to start; their readings will be zeroed");
        }

        let (config_tx, config_rx) = watch::channel(config.clone());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (indicator, _) = watch::channel(Pattern::Off);
        let pending = Arc::new(Pending::default());

        let mut channel = create_channel(transports.as_ref(), TransportKind::for_config(&config));
        channel.set_command_sink(commands_tx.clone());
        if !channel.initialize(&config).await {
            warn!(transport = %channel.kind(), "Channel did not come up at boot; pump will retry");
        }

        let ctx = Arc::new(NodeContext {
            mailbox: Mailbox::new(),
            signals: Signals::new(),
            sample_request: Notify::new(),
            channel: ChannelSlot::new(channel),
            config: config_rx,
            pending: Arc::clone(&pending),
            indicator,
        });

        let dispatcher = CommandDispatcher::new(store, config_tx, pending);
        Self {
            sampler: Sampler::new(Arc::clone(&ctx), sensors),
            uplink: UplinkWorker::new(
                Arc::clone(&ctx),
                dispatcher,
                commands_rx,
                options.uplink_wait,
                options.firmware_version,
            ),
            power: PowerWorker::new(Arc::clone(&ctx), transports, commands_tx, updater, power),
            ctx,
        }
    }

    pub fn context(&self) -> Arc<NodeContext> {
        Arc::clone(&self.ctx)
    }

    /// Patterns for the status indicator, starting with the current one.
    pub fn indicator_patterns(&self) -> watch::Receiver<Pattern> {
        self.ctx.indicator.subscribe()
    }

    /// Runs until the power worker ends the boot.
    pub async fn run(self) -> PowerDown {
        let sampler = tokio::spawn(self.sampler.run().in_current_span());
        let uplink = tokio::spawn(self.uplink.run().in_current_span());

        let down = self.power.run().await;

        sampler.abort();
        uplink.abort();
        info!(?down, "Boot finished");
        down
    }
}
