use thiserror::Error;

/// Failures reported by the physical transmit/receive primitives.
#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("radio not initialized")]
    RadioNotReady,

    #[error("radio transmit failed: {0}")]
    Transmit(String),

    #[error("broker session is down")]
    SessionDown,

    #[error("broker rejected connection: {0}")]
    ConnectRejected(String),

    #[error("broker client error: {0}")]
    Broker(String),

    #[error("operation timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a stored configuration blob is not trusted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobError {
    #[error("blob is {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("format tag {0:#010x} does not match")]
    BadTag(u32),

    #[error("format version {0} is not supported")]
    BadVersion(u32),
}

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("slot state is unreadable: {0}")]
    SlotState(#[from] serde_json::Error),

    #[error("update image is empty")]
    EmptyImage,
}

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("sensor not initialized")]
    NotReady,

    #[error("sensor disconnected")]
    Disconnected,

    #[error("reading out of range: {0}")]
    OutOfRange(f32),
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("unknown hardware mode {0:?} (expected \"lab\" or \"host\")")]
    UnknownHardware(String),

    #[error("unknown log format {0:?} (expected \"pretty\" or \"json\")")]
    UnknownLogFormat(String),
}
