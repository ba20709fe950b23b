use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::error::SettingsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareMode {
    /// Simulated devices, everything in-process.
    Lab,
    /// UDP radio gateway, real MQTT broker, sqlite state on disk.
    Host,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Process settings read from the environment. The persisted node
/// configuration is separate and only changes through commands.
#[derive(Debug, Clone)]
pub struct Settings {
    pub hardware: HardwareMode,
    pub state_dir: PathBuf,
    pub radio_bind: String,
    pub radio_gateway: String,
    pub uplink_wait: Duration,
    pub indicator_tick: Duration,
    pub log_format: LogFormat,
    /// Boots to run before exiting; 0 runs forever.
    pub max_boots: u64,
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        let hardware = match env::var("NODE_HARDWARE").as_deref() {
            Err(_) | Ok("lab") => HardwareMode::Lab,
            Ok("host") => HardwareMode::Host,
            Ok(other) => return Err(SettingsError::UnknownHardware(other.to_string())),
        };
        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Err(_) | Ok("pretty") => LogFormat::Pretty,
            Ok("json") => LogFormat::Json,
            Ok(other) => return Err(SettingsError::UnknownLogFormat(other.to_string())),
        };

        Ok(Settings {
            hardware,
            state_dir: PathBuf::from(env::var("STATE_DIR").unwrap_or_else(|_| ".".to_string())),
            radio_bind: env::var("RADIO_BIND").unwrap_or_else(|_| "0.0.0.0:0".to_string()),
            radio_gateway: env::var("RADIO_GATEWAY")
                .unwrap_or_else(|_| "127.0.0.1:1700".to_string()),
            uplink_wait: Duration::from_millis(get_env_var_u64("UPLINK_WAIT_MS", 250)),
            indicator_tick: Duration::from_millis(get_env_var_u64("INDICATOR_TICK_MS", 25)),
            log_format,
            max_boots: get_env_var_u64("MAX_BOOTS", 0),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.state_dir.join("node_state.db")
    }

    pub fn firmware_dir(&self) -> PathBuf {
        self.state_dir.join("firmware")
    }
}

fn get_env_var_u64(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(name, value = %raw, default, "Ignoring unparseable setting");
            default
        }),
        Err(_) => default,
    }
}
