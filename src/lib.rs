pub mod calibration;
pub mod channel;
pub mod config;
pub mod error;
pub mod hal;
pub mod indicator;
pub mod node;
pub mod ota;
pub mod sensors;
pub mod settings;
pub mod storage;
pub mod types;
