use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use fieldnode::config::ConfigStore;
use fieldnode::hal::host::{HostTransports, LogIndicator, LogPower};
use fieldnode::hal::sim::{SimPower, SimTransports};
use fieldnode::indicator;
use fieldnode::node::{Hardware, Node, NodeOptions, PowerDown};
use fieldnode::ota::HttpUpdateFetcher;
use fieldnode::sensors::SensorBank;
use fieldnode::settings::{HardwareMode, LogFormat, Settings};

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn hardware(settings: &Settings) -> Hardware {
    let updater = Box::new(HttpUpdateFetcher::new(settings.firmware_dir()));
    match settings.hardware {
        HardwareMode::Lab => Hardware {
            transports: Arc::new(SimTransports::new()),
            sensors: SensorBank::lab(),
            updater,
            power: Box::new(SimPower::default()),
        },
        HardwareMode::Host => Hardware {
            transports: Arc::new(HostTransports {
                radio_bind: settings.radio_bind.clone(),
                radio_gateway: settings.radio_gateway.clone(),
            }),
            sensors: SensorBank::lab(),
            updater,
            power: Box::new(LogPower),
        },
    }
}

fn open_store(settings: &Settings) -> ConfigStore {
    if let Err(e) = std::fs::create_dir_all(&settings.state_dir) {
        error!(error = %e, dir = %settings.state_dir.display(), "Cannot create state directory");
    }
    let path = settings.database_path();
    ConfigStore::initialize(&path).unwrap_or_else(|e| {
        error!(
            error = %e,
            path = %path.display(),
            "Persistent storage unavailable; running non-durable"
        );
        ConfigStore::in_memory()
    })
}

/// One boot: everything is rebuilt from scratch, as after a hardware reset.
async fn boot(settings: &Settings) -> PowerDown {
    let store = open_store(settings);
    let options = NodeOptions {
        uplink_wait: settings.uplink_wait,
        ..NodeOptions::default()
    };
    let node = Node::boot(hardware(settings), store, options).await;

    let patterns = node.indicator_patterns();
    let status = tokio::spawn(
        indicator::run(LogIndicator, patterns, settings.indicator_tick).in_current_span(),
    );
    let down = node.run().await;
    status.abort();
    down
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env()?;
    init_tracing(settings.log_format);
    info!(?settings, version = env!("CARGO_PKG_VERSION"), "Field node starting");

    let mut boots: u64 = 0;
    loop {
        boots += 1;
        let span = info_span!("boot", id = %Uuid::new_v4(), n = boots);
        let down = boot(&settings).instrument(span).await;

        if settings.max_boots != 0 && boots >= settings.max_boots {
            info!(boots, "Boot limit reached; exiting");
            return Ok(());
        }
        match down {
            PowerDown::DeepSleep { wake_after } => {
                info!(secs = wake_after.as_secs(), "Asleep until wake timer fires");
                tokio::time::sleep(wake_after).await;
            }
            PowerDown::Restart => info!("Restarting into new image"),
        }
    }
}
