use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use super::Pending;
use crate::config::{ConfigStore, NodeConfig};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetConfig(Map<String, Value>),
    RequestUpdate(String),
    Unknown(String),
}

/// Parses inbound command text. Anything that is not a recognizable
/// command comes back as `Unknown` with a short description.
pub fn parse_command(text: &str) -> Command {
    let doc: Value = match serde_json::from_str(text.trim()) {
        Ok(v) => v,
        Err(e) => return Command::Unknown(format!("invalid JSON: {e}")),
    };
    let Some(doc) = doc.as_object() else {
        return Command::Unknown("not a JSON object".to_string());
    };

    match doc.get("cmd") {
        Some(Value::String(cmd)) => match cmd.as_str() {
            "set_config" => match doc.get("config") {
                Some(Value::Object(partial)) => Command::SetConfig(partial.clone()),
                _ => Command::Unknown("set_config without a config object".to_string()),
            },
            "ota" => ota_url(doc)
                .map(Command::RequestUpdate)
                .unwrap_or_else(|| Command::Unknown("ota without otaUrl".to_string())),
            other => Command::Unknown(format!("unrecognized cmd {other:?}")),
        },
        Some(_) => Command::Unknown("cmd is not a string".to_string()),
        None => ota_url(doc)
            .map(Command::RequestUpdate)
            .unwrap_or_else(|| Command::Unknown("no cmd field".to_string())),
    }
}

fn ota_url(doc: &Map<String, Value>) -> Option<String> {
    doc.get("otaUrl")
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Reconfigured { update_requested: bool },
    Unchanged,
    UpdateRequested,
    Ignored,
}

/// Applies inbound commands. Sole writer of the configuration record; the
/// current record is republished to the other workers after every change.
pub struct CommandDispatcher {
    store: ConfigStore,
    published: watch::Sender<NodeConfig>,
    pending: Arc<Pending>,
}

impl CommandDispatcher {
    pub fn new(
        store: ConfigStore,
        published: watch::Sender<NodeConfig>,
        pending: Arc<Pending>,
    ) -> Self {
        Self {
            store,
            published,
            pending,
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn dispatch(&mut self, text: &str) -> Dispatched {
        match parse_command(text) {
            Command::SetConfig(partial) => {
                let outcome = self.store.apply_fields(&partial);
                if !outcome.changed {
                    return Dispatched::Unchanged;
                }
                self.published.send_replace(self.store.current());
                self.pending.request_reconfigure();
                if outcome.update_requested {
                    self.pending.request_update();
                }
                info!(
                    update_requested = outcome.update_requested,
                    config = %self.store.to_json(),
                    "Configuration changed by command"
                );
                Dispatched::Reconfigured {
                    update_requested: outcome.update_requested,
                }
            }
            Command::RequestUpdate(url) => {
                if !self.store.set_update_url(&url) {
                    return Dispatched::Ignored;
                }
                self.published.send_replace(self.store.current());
                self.pending.request_update();
                info!(url = %url, "Update requested");
                Dispatched::UpdateRequested
            }
            Command::Unknown(reason) => {
                warn!(reason = %reason, "Ignoring inbound command");
                Dispatched::Ignored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    fn dispatcher() -> (CommandDispatcher, watch::Receiver<NodeConfig>, Arc<Pending>) {
        let store = ConfigStore::in_memory();
        let (tx, rx) = watch::channel(store.current());
        let pending = Arc::new(Pending::default());
        (CommandDispatcher::new(store, tx, Arc::clone(&pending)), rx, pending)
    }

    #[test]
    fn parses_the_three_shapes() {
        assert!(matches!(
            parse_command(r#"{"cmd":"set_config","config":{"useLoRa":false}}"#),
            Command::SetConfig(_)
        ));
        assert_eq!(
            parse_command(r#"{"cmd":"ota","otaUrl":"http://fw"}"#),
            Command::RequestUpdate("http://fw".into())
        );
        assert_eq!(
            parse_command(r#"{"otaUrl":"http://fw"}"#),
            Command::RequestUpdate("http://fw".into())
        );
    }

    #[test]
    fn rejects_everything_else() {
        for text in [
            "",
            "garbage",
            "[]",
            r#"{"cmd":"reboot"}"#,
            r#"{"cmd":7}"#,
            r#"{"cmd":"ota"}"#,
            r#"{"cmd":"ota","otaUrl":""}"#,
            r#"{"cmd":"set_config","config":"x"}"#,
            r#"{"hello":"world"}"#,
        ] {
            assert!(matches!(parse_command(text), Command::Unknown(_)), "{text}");
        }
    }

    #[test]
    fn set_config_publishes_and_marks_reconfigure() {
        let (mut d, rx, pending) = dispatcher();
        let r = d.dispatch(
            r#"{"cmd":"set_config","config":{"useLoRa":false,"publishIntervalSeconds":60}}"#,
        );
        assert_eq!(r, Dispatched::Reconfigured { update_requested: false });
        assert!(!rx.borrow().use_radio);
        assert_eq!(rx.borrow().publish_interval_secs, 60);
        assert!(pending.reconfigure.load(Ordering::SeqCst));
        assert!(!pending.update.load(Ordering::SeqCst));

        pending.reconfigure.store(false, Ordering::SeqCst);
        let again = d.dispatch(r#"{"cmd":"set_config","config":{"useLoRa":false}}"#);
        assert_eq!(again, Dispatched::Unchanged);
        assert!(!pending.reconfigure.load(Ordering::SeqCst));
    }

    #[test]
    fn set_config_with_ota_url_requests_update() {
        let (mut d, rx, pending) = dispatcher();
        let r = d.dispatch(r#"{"cmd":"set_config","config":{"otaUrl":"http://fw/2"}}"#);
        assert_eq!(r, Dispatched::Reconfigured { update_requested: true });
        assert_eq!(rx.borrow().ota_url, "http://fw/2");
        assert!(pending.update.load(Ordering::SeqCst));
    }

    #[test]
    fn ota_command_stores_url() {
        let (mut d, rx, pending) = dispatcher();
        assert_eq!(d.dispatch(r#"{"otaUrl":"http://fw/3"}"#), Dispatched::UpdateRequested);
        assert_eq!(rx.borrow().ota_url, "http://fw/3");
        assert_eq!(d.store().current().ota_url, "http://fw/3");
        assert!(pending.update.load(Ordering::SeqCst));
        assert!(!pending.reconfigure.load(Ordering::SeqCst));
    }

    #[test]
    fn unknown_command_mutates_nothing() {
        let (mut d, rx, pending) = dispatcher();
        assert_eq!(d.dispatch(r#"{"cmd":"selfdestruct"}"#), Dispatched::Ignored);
        assert_eq!(*rx.borrow(), NodeConfig::default());
        assert!(!pending.reconfigure.load(Ordering::SeqCst));
        assert!(!pending.update.load(Ordering::SeqCst));
    }
}
