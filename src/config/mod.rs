//! The persisted node configuration record and its fixed binary layout.
//!
//! The blob is the compatibility gate between firmware builds: a stored
//! record is trusted only if its size, format tag and format version all
//! match this build, otherwise the compiled default is used instead.

mod store;

pub use store::{ConfigStore, LoadOutcome, LoadStatus, UpdateOutcome};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::BlobError;

pub const FORMAT_TAG: u32 = 0x5647_4E44;
pub const FORMAT_VERSION: u32 = 1;
pub const MIN_PUBLISH_INTERVAL_SECS: u32 = 60;

pub(crate) const HOST_LEN: usize = 64;
pub(crate) const USER_LEN: usize = 32;
pub(crate) const PASSWORD_LEN: usize = 64;
pub(crate) const IDENT_LEN: usize = 32;
pub(crate) const URL_LEN: usize = 128;

/// Size in bytes of an encoded [`NodeConfig`].
pub const BLOB_SIZE: usize = 4 + 4 + 4 + 1 + 1
    + HOST_LEN
    + 2
    + USER_LEN
    + PASSWORD_LEN
    + IDENT_LEN * 3
    + URL_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SleepStrategy {
    DeepSleep,
    StayAwake,
}

impl SleepStrategy {
    /// Case-insensitive parse; unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("deepsleep") {
            Some(Self::DeepSleep)
        } else if name.eq_ignore_ascii_case("stayawake") {
            Some(Self::StayAwake)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeepSleep => "deepSleep",
            Self::StayAwake => "stayAwake",
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Self::DeepSleep => 0,
            Self::StayAwake => 1,
        }
    }

    fn from_byte(b: u8) -> Self {
        if b == 1 {
            Self::StayAwake
        } else {
            Self::DeepSleep
        }
    }
}

impl fmt::Display for SleepStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub tag: u32,
    pub version: u32,
    pub publish_interval_secs: u32,
    pub sleep_strategy: SleepStrategy,
    pub use_radio: bool,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_password: String,
    pub org_id: String,
    pub site_id: String,
    pub node_id: String,
    pub ota_url: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            tag: FORMAT_TAG,
            version: FORMAT_VERSION,
            publish_interval_secs: 900,
            sleep_strategy: SleepStrategy::DeepSleep,
            use_radio: true,
            mqtt_host: "lab-broker.local".to_string(),
            mqtt_port: 1883,
            mqtt_user: "lab".to_string(),
            mqtt_password: "lab".to_string(),
            org_id: "vineguard".to_string(),
            site_id: "lab".to_string(),
            node_id: "esp32-node".to_string(),
            ota_url: String::new(),
        }
    }
}

impl NodeConfig {
    /// Broker topic carrying this node's telemetry.
    pub fn telemetry_topic(&self) -> String {
        format!("/{}/{}/{}/telemetry", self.org_id, self.site_id, self.node_id)
    }

    /// Broker topic this node accepts commands on.
    pub fn command_topic(&self) -> String {
        format!("/{}/{}/{}/cmd", self.org_id, self.site_id, self.node_id)
    }

    /// Stamps tag and version, then encodes into the fixed layout.
    pub fn to_blob(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BLOB_SIZE);
        out.extend_from_slice(&FORMAT_TAG.to_le_bytes());
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&self.publish_interval_secs.to_le_bytes());
        out.push(self.sleep_strategy.to_byte());
        out.push(u8::from(self.use_radio));
        put_str(&mut out, &self.mqtt_host, HOST_LEN);
        out.extend_from_slice(&self.mqtt_port.to_le_bytes());
        put_str(&mut out, &self.mqtt_user, USER_LEN);
        put_str(&mut out, &self.mqtt_password, PASSWORD_LEN);
        put_str(&mut out, &self.org_id, IDENT_LEN);
        put_str(&mut out, &self.site_id, IDENT_LEN);
        put_str(&mut out, &self.node_id, IDENT_LEN);
        put_str(&mut out, &self.ota_url, URL_LEN);
        debug_assert_eq!(out.len(), BLOB_SIZE);
        out
    }

    pub fn from_blob(blob: &[u8]) -> Result<Self, BlobError> {
        if blob.len() != BLOB_SIZE {
            return Err(BlobError::SizeMismatch {
                expected: BLOB_SIZE,
                actual: blob.len(),
            });
        }
        let mut r = Reader { buf: blob, pos: 0 };
        let tag = r.u32();
        if tag != FORMAT_TAG {
            return Err(BlobError::BadTag(tag));
        }
        let version = r.u32();
        if version != FORMAT_VERSION {
            return Err(BlobError::BadVersion(version));
        }
        Ok(Self {
            tag,
            version,
            publish_interval_secs: r.u32(),
            sleep_strategy: SleepStrategy::from_byte(r.u8()),
            use_radio: r.u8() != 0,
            mqtt_host: r.str(HOST_LEN),
            mqtt_port: r.u16(),
            mqtt_user: r.str(USER_LEN),
            mqtt_password: r.str(PASSWORD_LEN),
            org_id: r.str(IDENT_LEN),
            site_id: r.str(IDENT_LEN),
            node_id: r.str(IDENT_LEN),
            ota_url: r.str(URL_LEN),
        })
    }
}

/// Longest prefix of `s` that fits `cap - 1` bytes without splitting a char.
pub(crate) fn fit(s: &str, cap: usize) -> &str {
    let max = cap.saturating_sub(1);
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn put_str(out: &mut Vec<u8>, s: &str, cap: usize) {
    let bytes = fit(s, cap).as_bytes();
    out.extend_from_slice(bytes);
    out.resize(out.len() + (cap - bytes.len()), 0);
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut b = [0u8; N];
        b.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        b
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn str(&mut self, cap: usize) -> String {
        let field = &self.buf[self.pos..self.pos + cap];
        self.pos += cap;
        let end = field.iter().position(|&b| b == 0).unwrap_or(cap);
        String::from_utf8_lossy(&field[..end]).into_owned()
    }
}
