use serde_json::{json, Map, Value};
use std::path::Path;
use tracing::{debug, error, info, warn};

use super::{
    fit, NodeConfig, SleepStrategy, BLOB_SIZE, HOST_LEN, IDENT_LEN, MIN_PUBLISH_INTERVAL_SECS,
    PASSWORD_LEN, URL_LEN, USER_LEN,
};
use crate::error::{BlobError, StorageError};
use crate::storage::{KeyValueStore, MemoryStore, SqliteStore};

pub const NAMESPACE: &str = "nodecfg";
const CONFIG_KEY: &str = "config";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Stored,
    Absent,
    Rejected(BlobError),
    Unreadable,
}

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub record: NodeConfig,
    pub status: LoadStatus,
}

impl LoadOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self.status, LoadStatus::Stored | LoadStatus::Absent)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub changed: bool,
    pub update_requested: bool,
}

/// Owner of the node's configuration record.
///
/// The record only changes through [`ConfigStore::apply_update`] and
/// [`ConfigStore::set_update_url`]; everyone else works from copies handed
/// out by [`ConfigStore::current`]. Every accepted change is written through
/// to the backend before the call returns.
pub struct ConfigStore {
    backend: Box<dyn KeyValueStore>,
    record: NodeConfig,
}

impl ConfigStore {
    /// Opens the durable namespace at `path` and loads the stored record.
    pub fn initialize(path: &Path) -> Result<Self, StorageError> {
        let backend = SqliteStore::open(path, NAMESPACE)?;
        Ok(Self::with_backend(Box::new(backend)))
    }

    /// Non-durable store for when the persistent backend is unavailable.
    pub fn in_memory() -> Self {
        Self::with_backend(Box::new(MemoryStore::new()))
    }

    pub fn with_backend(backend: Box<dyn KeyValueStore>) -> Self {
        let mut store = Self {
            backend,
            record: NodeConfig::default(),
        };
        // Only a blob that was read and rejected is overwritten.
        let outcome = store.load();
        if let LoadStatus::Rejected(_) = outcome.status {
            let defaults = outcome.record;
            if !store.save(&defaults) {
                warn!("Could not write default configuration back to storage");
            }
        }
        store
    }

    pub fn is_durable(&self) -> bool {
        self.backend.is_durable()
    }

    pub fn current(&self) -> NodeConfig {
        self.record.clone()
    }

    /// Reads the stored blob. Anything that fails the size, tag or version
    /// check is replaced by the compiled default.
    pub fn load(&mut self) -> LoadOutcome {
        let status = match self.backend.get(CONFIG_KEY) {
            Ok(None) => {
                self.record = NodeConfig::default();
                LoadStatus::Absent
            }
            Ok(Some(blob)) => match NodeConfig::from_blob(&blob) {
                Ok(record) => {
                    self.record = record;
                    LoadStatus::Stored
                }
                Err(e) => {
                    warn!(error = %e, "Stored configuration rejected; using defaults");
                    self.record = NodeConfig::default();
                    LoadStatus::Rejected(e)
                }
            },
            Err(e) => {
                error!(error = %e, "Could not read stored configuration; using defaults");
                self.record = NodeConfig::default();
                LoadStatus::Unreadable
            }
        };
        info!(status = ?status, node = %self.record.node_id, "Configuration loaded");
        LoadOutcome {
            record: self.record.clone(),
            status,
        }
    }

    /// Adopts `record` as current and writes it. Returns whether the whole
    /// blob reached the backend.
    pub fn save(&mut self, record: &NodeConfig) -> bool {
        let blob = record.to_blob();
        self.record = NodeConfig::from_blob(&blob).unwrap_or_else(|_| record.clone());
        match self.backend.put(CONFIG_KEY, &blob) {
            Ok(written) => written == BLOB_SIZE,
            Err(e) => {
                error!(error = %e, "Failed to persist configuration");
                false
            }
        }
    }

    /// Applies the allow-listed fields present in `json`.
    ///
    /// Each field is checked on its own; a bad value is skipped without
    /// affecting the others. Unparseable input changes nothing.
    pub fn apply_update(&mut self, json: &str) -> UpdateOutcome {
        let doc: Value = match serde_json::from_str(json) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed configuration update");
                return UpdateOutcome::default();
            }
        };
        let Some(doc) = doc.as_object() else {
            warn!("Configuration update is not a JSON object");
            return UpdateOutcome::default();
        };
        self.apply_fields(doc)
    }

    pub(crate) fn apply_fields(&mut self, doc: &Map<String, Value>) -> UpdateOutcome {
        let mut next = self.record.clone();
        let mut outcome = UpdateOutcome::default();

        if let Some(v) = doc.get("publishIntervalSeconds").and_then(Value::as_u64) {
            match u32::try_from(v) {
                Ok(v) if v >= MIN_PUBLISH_INTERVAL_SECS && v != next.publish_interval_secs => {
                    next.publish_interval_secs = v;
                    outcome.changed = true;
                }
                Ok(v) if v < MIN_PUBLISH_INTERVAL_SECS => {
                    warn!(value = v, "Publish interval below minimum; ignored");
                }
                _ => {}
            }
        }

        if let Some(name) = doc.get("sleepStrategy").and_then(Value::as_str) {
            match SleepStrategy::parse(name) {
                Some(s) if s != next.sleep_strategy => {
                    next.sleep_strategy = s;
                    outcome.changed = true;
                }
                Some(_) => {}
                None => warn!(value = name, "Unknown sleep strategy; ignored"),
            }
        }

        if let Some(use_radio) = doc.get("useLoRa").and_then(Value::as_bool) {
            if use_radio != next.use_radio {
                next.use_radio = use_radio;
                outcome.changed = true;
            }
        }

        if let Some(mqtt) = doc.get("mqtt").and_then(Value::as_object) {
            outcome.changed |= set_str(&mut next.mqtt_host, mqtt.get("host"), HOST_LEN);
            if let Some(port) = mqtt.get("port").and_then(Value::as_u64) {
                if let Ok(port) = u16::try_from(port) {
                    if port != 0 && port != next.mqtt_port {
                        next.mqtt_port = port;
                        outcome.changed = true;
                    }
                }
            }
            outcome.changed |= set_str(&mut next.mqtt_user, mqtt.get("username"), USER_LEN);
            outcome.changed |=
                set_str(&mut next.mqtt_password, mqtt.get("password"), PASSWORD_LEN);
        }

        if let Some(ident) = doc.get("identity").and_then(Value::as_object) {
            outcome.changed |= set_str(&mut next.org_id, ident.get("org"), IDENT_LEN);
            outcome.changed |= set_str(&mut next.site_id, ident.get("site"), IDENT_LEN);
            outcome.changed |= set_str(&mut next.node_id, ident.get("node"), IDENT_LEN);
        }

        if set_str(&mut next.ota_url, doc.get("otaUrl"), URL_LEN) {
            outcome.changed = true;
            outcome.update_requested = true;
        }

        if outcome.changed {
            if !self.save(&next) {
                warn!("Configuration changed but could not be persisted");
            }
            info!(
                update_requested = outcome.update_requested,
                "Configuration updated"
            );
        } else {
            debug!("Configuration update had no effect");
        }
        outcome
    }

    /// Stores a new update-source URL. Returns false for an empty URL.
    pub fn set_update_url(&mut self, url: &str) -> bool {
        if url.is_empty() {
            return false;
        }
        let mut next = self.record.clone();
        next.ota_url = fit(url, URL_LEN).to_string();
        if !self.save(&next) {
            warn!("Update URL stored in memory only");
        }
        true
    }

    /// Logical fields of the current record as JSON, without tag or version.
    pub fn to_json(&self) -> String {
        let c = &self.record;
        let mut doc = json!({
            "publishIntervalSeconds": c.publish_interval_secs,
            "sleepStrategy": c.sleep_strategy.as_str(),
            "useLoRa": c.use_radio,
            "mqtt": {
                "host": c.mqtt_host,
                "port": c.mqtt_port,
                "username": c.mqtt_user,
                "password": c.mqtt_password,
            },
            "identity": {
                "org": c.org_id,
                "site": c.site_id,
                "node": c.node_id,
            },
        });
        if !c.ota_url.is_empty() {
            doc["otaUrl"] = Value::String(c.ota_url.clone());
        }
        doc.to_string()
    }
}

/// Replaces `field` with a non-empty string `value` that differs from it,
/// after truncating to what the stored layout can hold.
fn set_str(field: &mut String, value: Option<&Value>, cap: usize) -> bool {
    let Some(value) = value.and_then(Value::as_str) else {
        return false;
    };
    let value = fit(value, cap);
    if value.is_empty() || value == field.as_str() {
        return false;
    }
    *field = value.to_string();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FORMAT_TAG;

    /// Backend whose contents the test can inspect and corrupt.
    #[derive(Clone, Default)]
    struct SharedStore(std::sync::Arc<std::sync::Mutex<Option<Vec<u8>>>>);

    impl KeyValueStore for SharedStore {
        fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            Ok(self.0.lock().unwrap().clone())
        }

        fn put(&mut self, _key: &str, value: &[u8]) -> Result<usize, StorageError> {
            *self.0.lock().unwrap() = Some(value.to_vec());
            Ok(value.len())
        }

        fn is_durable(&self) -> bool {
            true
        }
    }

    /// Backend whose reads always fail; counts the writes it receives.
    #[derive(Clone, Default)]
    struct UnreadableStore(std::sync::Arc<std::sync::Mutex<usize>>);

    impl KeyValueStore for UnreadableStore {
        fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            Err(StorageError::Io(std::io::Error::other("read failed")))
        }

        fn put(&mut self, _key: &str, value: &[u8]) -> Result<usize, StorageError> {
            *self.0.lock().unwrap() += 1;
            Ok(value.len())
        }

        fn is_durable(&self) -> bool {
            true
        }
    }

    fn blob(shared: &SharedStore) -> Vec<u8> {
        shared.0.lock().unwrap().clone().unwrap()
    }

    #[test]
    fn first_boot_uses_defaults_without_writing() {
        let shared = SharedStore::default();
        let store = ConfigStore::with_backend(Box::new(shared.clone()));
        assert_eq!(store.current(), NodeConfig::default());
        assert!(shared.0.lock().unwrap().is_none());
    }

    #[test]
    fn unreadable_backend_is_not_overwritten() {
        let backend = UnreadableStore::default();
        let mut store = ConfigStore::with_backend(Box::new(backend.clone()));
        assert_eq!(store.current(), NodeConfig::default());
        assert_eq!(*backend.0.lock().unwrap(), 0);

        let outcome = store.load();
        assert_eq!(outcome.status, LoadStatus::Unreadable);
        assert!(!outcome.is_valid());
        assert_eq!(*backend.0.lock().unwrap(), 0);
    }

    #[test]
    fn corrupt_blob_falls_back_to_exact_default() {
        let shared = SharedStore::default();
        let mut store = ConfigStore::with_backend(Box::new(shared.clone()));
        store.apply_update(r#"{"publishIntervalSeconds": 300, "identity": {"node": "n-7"}}"#);

        let good = blob(&shared);

        let mut flipped = good.clone();
        flipped[1] ^= 0xFF;
        *shared.0.lock().unwrap() = Some(flipped);
        let outcome = store.load();
        assert!(matches!(outcome.status, LoadStatus::Rejected(BlobError::BadTag(_))));
        assert_eq!(outcome.record, NodeConfig::default());
        assert_eq!(store.current(), NodeConfig::default());

        *shared.0.lock().unwrap() = Some(good[..good.len() - 1].to_vec());
        let outcome = store.load();
        assert!(matches!(outcome.status, LoadStatus::Rejected(BlobError::SizeMismatch { .. })));
        assert_eq!(outcome.record, NodeConfig::default());
    }

    #[test]
    fn rejected_blob_is_replaced_on_initialize() {
        let shared = SharedStore::default();
        *shared.0.lock().unwrap() = Some(vec![0u8; 17]);
        let store = ConfigStore::with_backend(Box::new(shared.clone()));
        assert_eq!(store.current(), NodeConfig::default());
        assert_eq!(blob(&shared), NodeConfig::default().to_blob());
    }

    #[test]
    fn save_stamps_tag_and_version() {
        let shared = SharedStore::default();
        let mut store = ConfigStore::with_backend(Box::new(shared.clone()));
        let mut record = NodeConfig::default();
        record.tag = 0;
        record.version = 99;
        assert!(store.save(&record));
        assert_eq!(store.current().tag, FORMAT_TAG);
        assert_eq!(store.current().version, 1);
        assert_eq!(&blob(&shared)[..4], &FORMAT_TAG.to_le_bytes());
    }

    #[test]
    fn partial_update_is_idempotent() {
        let shared = SharedStore::default();
        let mut store = ConfigStore::with_backend(Box::new(shared.clone()));
        let doc = r#"{
            "publishIntervalSeconds": 120,
            "sleepStrategy": "STAYAWAKE",
            "useLoRa": false,
            "mqtt": {"host": "broker.example", "port": 8883, "username": "u", "password": "p"},
            "identity": {"org": "o", "site": "s", "node": "n"}
        }"#;

        let first = store.apply_update(doc);
        assert!(first.changed);
        assert!(!first.update_requested);
        let after_first = store.current();
        let stored_first = blob(&shared);

        let second = store.apply_update(doc);
        assert!(!second.changed);
        assert_eq!(store.current(), after_first);
        assert_eq!(blob(&shared), stored_first);

        assert_eq!(after_first.publish_interval_secs, 120);
        assert_eq!(after_first.sleep_strategy, SleepStrategy::StayAwake);
        assert!(!after_first.use_radio);
        assert_eq!(after_first.mqtt_port, 8883);
        assert_eq!(after_first.command_topic(), "/o/s/n/cmd");
    }

    #[test]
    fn invalid_fields_are_skipped_individually() {
        let mut store = ConfigStore::in_memory();
        let outcome = store.apply_update(
            r#"{
                "publishIntervalSeconds": 30,
                "sleepStrategy": "hibernate",
                "mqtt": {"host": "", "port": 0},
                "identity": {"org": "", "site": "field-3"}
            }"#,
        );
        assert!(outcome.changed);
        let c = store.current();
        assert_eq!(c.publish_interval_secs, 900);
        assert_eq!(c.sleep_strategy, SleepStrategy::DeepSleep);
        assert_eq!(c.mqtt_host, "lab-broker.local");
        assert_eq!(c.mqtt_port, 1883);
        assert_eq!(c.org_id, "vineguard");
        assert_eq!(c.site_id, "field-3");
    }

    #[test]
    fn malformed_json_changes_nothing() {
        let mut store = ConfigStore::in_memory();
        let before = store.current();
        assert_eq!(store.apply_update("{not json"), UpdateOutcome::default());
        assert_eq!(store.apply_update("[1,2,3]"), UpdateOutcome::default());
        assert_eq!(store.current(), before);
    }

    #[test]
    fn ota_url_requests_update_once() {
        let mut store = ConfigStore::in_memory();
        let doc = r#"{"otaUrl": "https://ota.example/fw-2.bin"}"#;
        let first = store.apply_update(doc);
        assert!(first.changed && first.update_requested);
        assert_eq!(store.current().ota_url, "https://ota.example/fw-2.bin");
        assert_eq!(store.apply_update(doc), UpdateOutcome::default());
        assert_eq!(store.apply_update(r#"{"otaUrl": ""}"#), UpdateOutcome::default());
    }

    #[test]
    fn oversized_strings_stay_idempotent() {
        let mut store = ConfigStore::in_memory();
        let long = "x".repeat(80);
        let doc = format!(r#"{{"identity": {{"node": "{long}"}}}}"#);
        assert!(store.apply_update(&doc).changed);
        assert_eq!(store.current().node_id.len(), IDENT_LEN - 1);
        assert!(!store.apply_update(&doc).changed);
    }

    #[test]
    fn introspection_omits_internal_fields() {
        let mut store = ConfigStore::in_memory();
        let doc: Value = serde_json::from_str(&store.to_json()).unwrap();
        assert_eq!(doc["publishIntervalSeconds"], 900);
        assert_eq!(doc["sleepStrategy"], "deepSleep");
        assert_eq!(doc["useLoRa"], true);
        assert_eq!(doc["mqtt"]["port"], 1883);
        assert_eq!(doc["identity"]["node"], "esp32-node");
        assert!(doc.get("tag").is_none());
        assert!(doc.get("version").is_none());
        assert!(doc.get("otaUrl").is_none());

        assert!(store.set_update_url("https://ota.example/a.bin"));
        let doc: Value = serde_json::from_str(&store.to_json()).unwrap();
        assert_eq!(doc["otaUrl"], "https://ota.example/a.bin");
    }

    #[test]
    fn sqlite_backed_store_persists_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node_state.db");
        {
            let mut store = ConfigStore::initialize(&path).unwrap();
            assert!(store.is_durable());
            store.apply_update(r#"{"sleepStrategy": "stayAwake"}"#);
        }
        let store = ConfigStore::initialize(&path).unwrap();
        assert_eq!(store.current().sleep_strategy, SleepStrategy::StayAwake);
    }
}
