use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{Backoff, CommandSink, ConnectionState, TelemetryChannel, TransportKind};
use crate::config::NodeConfig;
use crate::hal::{BrokerSession, NetworkLink, SessionParams};

pub const LINK_RETRY_SPACING: Duration = Duration::from_secs(5);
pub const SESSION_RETRY_SPACING: Duration = Duration::from_secs(2);

struct Route {
    params: SessionParams,
    telemetry_topic: String,
    command_topic: String,
}

/// Network link plus broker session, with a two-tier reconnect policy.
///
/// While the link is down only link re-association is attempted, at most
/// every [`LINK_RETRY_SPACING`]. Once the link is up, the broker session is
/// retried at most every [`SESSION_RETRY_SPACING`], and a new session always
/// re-subscribes to the node's command topic.
pub struct BrokerChannel {
    link: Box<dyn NetworkLink>,
    session: Box<dyn BrokerSession>,
    route: Option<Route>,
    link_retry: Backoff,
    session_retry: Backoff,
    subscribed: bool,
    sink: Option<CommandSink>,
}

impl BrokerChannel {
    pub fn new(link: Box<dyn NetworkLink>, session: Box<dyn BrokerSession>) -> Self {
        Self {
            link,
            session,
            route: None,
            link_retry: Backoff::new(LINK_RETRY_SPACING),
            session_retry: Backoff::new(SESSION_RETRY_SPACING),
            subscribed: false,
            sink: None,
        }
    }

    async fn ensure_connected(&mut self) {
        let Some(route) = &self.route else {
            return;
        };
        let now = Instant::now();

        if !self.link.is_up() {
            self.subscribed = false;
            if self.link_retry.ready(now) {
                info!("Network link down; re-associating");
                self.link.reconnect();
            }
            return;
        }

        if !self.session.is_connected() {
            self.subscribed = false;
            if !self.session_retry.ready(now) {
                return;
            }
            info!(host = %route.params.host, port = route.params.port, "Connecting to broker");
            if let Err(e) = self.session.connect(&route.params).await {
                warn!(error = %e, "Broker connect failed");
                return;
            }
        } else if self.subscribed || !self.session_retry.ready(now) {
            return;
        }

        match self.session.subscribe(&route.command_topic).await {
            Ok(()) => {
                self.subscribed = true;
                info!(topic = %route.command_topic, "Broker session up; subscribed");
            }
            Err(e) => warn!(error = %e, topic = %route.command_topic, "Subscribe failed"),
        }
    }

    async fn process_one(&mut self) {
        let Some(route) = &self.route else {
            return;
        };
        if !self.session.is_connected() {
            return;
        }
        let Some(msg) = self.session.poll().await else {
            return;
        };
        if msg.topic != route.command_topic {
            debug!(topic = %msg.topic, "Ignoring message for another topic");
            return;
        }
        let text = String::from_utf8_lossy(&msg.payload).into_owned();
        match &self.sink {
            Some(sink) => {
                if sink.send(text).is_err() {
                    debug!("Command sink closed; message dropped");
                }
            }
            None => debug!("No command sink; message dropped"),
        }
    }
}

#[async_trait]
impl TelemetryChannel for BrokerChannel {
    fn kind(&self) -> TransportKind {
        TransportKind::Broker
    }

    async fn initialize(&mut self, config: &NodeConfig) -> bool {
        self.route = Some(Route {
            params: SessionParams {
                host: config.mqtt_host.clone(),
                port: config.mqtt_port,
                client_id: config.node_id.clone(),
                username: config.mqtt_user.clone(),
                password: config.mqtt_password.clone(),
            },
            telemetry_topic: config.telemetry_topic(),
            command_topic: config.command_topic(),
        });
        self.link_retry.reset();
        self.session_retry.reset();
        self.subscribed = false;
        self.ensure_connected().await;
        true
    }

    async fn publish(&mut self, payload: &[u8]) -> bool {
        let Some(route) = &self.route else {
            return false;
        };
        if !self.link.is_up() || !self.session.is_connected() {
            return false;
        }
        match self.session.publish(&route.telemetry_topic, payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Broker publish failed");
                false
            }
        }
    }

    async fn pump(&mut self) {
        self.ensure_connected().await;
        self.process_one().await;
    }

    fn state(&self) -> ConnectionState {
        if self.route.is_none() || !self.link.is_up() {
            ConnectionState::Disconnected
        } else if !self.session.is_connected() {
            ConnectionState::Connecting
        } else {
            ConnectionState::Connected
        }
    }

    fn set_command_sink(&mut self, sink: CommandSink) {
        self.sink = Some(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::{SimBroker, SimLink};
    use tokio::sync::mpsc;
    use tokio::time::advance;

    fn channel(link: &SimLink, broker: &SimBroker) -> BrokerChannel {
        BrokerChannel::new(Box::new(link.clone()), Box::new(broker.clone()))
    }

    fn config() -> NodeConfig {
        let mut c = NodeConfig::default();
        c.use_radio = false;
        c.org_id = "acme".into();
        c.site_id = "north".into();
        c.node_id = "n1".into();
        c
    }

    #[tokio::test(start_paused = true)]
    async fn connects_authenticates_and_subscribes() {
        let (link, broker) = (SimLink::new(true), SimBroker::new());
        let mut ch = channel(&link, &broker);
        assert_eq!(ch.state(), ConnectionState::Disconnected);

        assert!(ch.initialize(&config()).await);
        assert_eq!(ch.state(), ConnectionState::Connected);
        let attempts = broker.connect_attempts();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].client_id, "n1");
        assert_eq!(attempts[0].username, "lab");
        assert_eq!(broker.subscriptions(), vec!["/acme/north/n1/cmd".to_string()]);

        assert!(ch.publish(b"{}").await);
        assert_eq!(broker.published()[0].0, "/acme/north/n1/telemetry");
    }

    #[tokio::test(start_paused = true)]
    async fn link_retries_are_spaced_and_session_waits_for_link() {
        let (link, broker) = (SimLink::new(false), SimBroker::new());
        let mut ch = channel(&link, &broker);
        ch.initialize(&config()).await;
        assert_eq!(link.reconnects(), 1);

        for _ in 0..10 {
            advance(Duration::from_millis(400)).await;
            ch.pump().await;
        }
        assert_eq!(link.reconnects(), 1, "4s elapsed, below link spacing");
        advance(Duration::from_secs(1)).await;
        ch.pump().await;
        assert_eq!(link.reconnects(), 2);
        assert!(broker.connect_attempts().is_empty());
        assert!(!ch.publish(b"x").await);

        link.set_up(true);
        ch.pump().await;
        assert_eq!(broker.connect_attempts().len(), 1);
        assert_eq!(ch.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn session_retries_are_spaced() {
        let (link, broker) = (SimLink::new(true), SimBroker::new());
        broker.set_accepting(false);
        let mut ch = channel(&link, &broker);
        ch.initialize(&config()).await;
        assert_eq!(ch.state(), ConnectionState::Connecting);
        assert_eq!(broker.connect_attempts().len(), 1);

        advance(Duration::from_millis(1500)).await;
        ch.pump().await;
        assert_eq!(broker.connect_attempts().len(), 1);

        advance(Duration::from_millis(600)).await;
        ch.pump().await;
        assert_eq!(broker.connect_attempts().len(), 2);
        assert!(!ch.publish(b"x").await);

        broker.set_accepting(true);
        advance(Duration::from_secs(2)).await;
        ch.pump().await;
        assert!(ch.is_connected());
        assert!(ch.publish(b"x").await);
        assert_eq!(link.reconnects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribes_after_session_loss() {
        let (link, broker) = (SimLink::new(true), SimBroker::new());
        let mut ch = channel(&link, &broker);
        ch.initialize(&config()).await;

        broker.drop_session();
        assert!(!ch.publish(b"x").await);
        advance(Duration::from_secs(2)).await;
        ch.pump().await;
        assert_eq!(broker.connect_attempts().len(), 2);
        assert_eq!(broker.subscriptions(), vec!["/acme/north/n1/cmd".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn only_own_command_topic_reaches_sink() {
        let (link, broker) = (SimLink::new(true), SimBroker::new());
        let mut ch = channel(&link, &broker);
        let (tx, mut rx) = mpsc::unbounded_channel();
        ch.set_command_sink(tx);
        ch.initialize(&config()).await;

        broker.deliver("/acme/north/n2/cmd", b"{\"cmd\":\"ota\"}");
        broker.deliver("/acme/north/n1/cmd", b"{\"cmd\":\"set_config\"}");
        ch.pump().await;
        ch.pump().await;

        assert_eq!(rx.try_recv().unwrap(), "{\"cmd\":\"set_config\"}");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn uninitialized_channel_tolerates_calls() {
        let (link, broker) = (SimLink::new(true), SimBroker::new());
        let mut ch = channel(&link, &broker);
        for _ in 0..5 {
            ch.pump().await;
            assert!(!ch.publish(b"x").await);
        }
        assert!(broker.connect_attempts().is_empty());
    }
}
