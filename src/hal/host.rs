//! Hardware bindings for running the node on an ordinary host.
//!
//! The radio is replaced by UDP datagrams exchanged with a lab gateway, the
//! broker session is a real MQTT client, and the network link is whatever
//! the operating system provides.

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::channel::TransportFactory;

use super::{
    BrokerSession, HardwareError, IndicatorOutput, InboundMessage, NetworkLink, PowerControl,
    RadioDriver, SessionParams,
};

const MAX_FRAME: usize = 255;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_BUDGET: Duration = Duration::from_millis(20);

pub struct UdpRadio {
    bind: String,
    gateway: String,
    socket: Option<UdpSocket>,
}

impl UdpRadio {
    pub fn new(bind: impl Into<String>, gateway: impl Into<String>) -> Self {
        Self {
            bind: bind.into(),
            gateway: gateway.into(),
            socket: None,
        }
    }
}

#[async_trait]
impl RadioDriver for UdpRadio {
    async fn begin(&mut self) -> Result<(), HardwareError> {
        let socket = UdpSocket::bind(&self.bind).await?;
        info!(local = ?socket.local_addr().ok(), gateway = %self.gateway, "UDP radio ready");
        self.socket = Some(socket);
        Ok(())
    }

    async fn transmit(&mut self, frame: &[u8]) -> Result<(), HardwareError> {
        let socket = self.socket.as_ref().ok_or(HardwareError::RadioNotReady)?;
        if frame.len() > MAX_FRAME {
            return Err(HardwareError::Transmit(format!(
                "frame of {} bytes exceeds {MAX_FRAME}",
                frame.len()
            )));
        }
        socket.send_to(frame, &self.gateway).await?;
        Ok(())
    }

    fn try_receive(&mut self) -> Option<Vec<u8>> {
        let socket = self.socket.as_ref()?;
        let mut buf = [0u8; MAX_FRAME];
        match socket.try_recv_from(&mut buf) {
            Ok((n, from)) => {
                debug!(%from, bytes = n, "UDP radio frame received");
                Some(buf[..n].to_vec())
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => None,
            Err(e) => {
                warn!(error = %e, "UDP radio receive failed");
                None
            }
        }
    }
}

/// The host's own network stack; association is managed by the OS.
pub struct HostLink;

impl NetworkLink for HostLink {
    fn is_up(&self) -> bool {
        true
    }

    fn reconnect(&mut self) {
        debug!("Host link reconnect requested; nothing to do");
    }
}

#[derive(Default)]
pub struct MqttSession {
    client: Option<AsyncClient>,
    eventloop: Option<EventLoop>,
    inbox: VecDeque<InboundMessage>,
}

impl MqttSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn teardown(&mut self, reason: &str) {
        if self.client.is_some() {
            warn!(reason, "MQTT session lost");
        }
        self.client = None;
        self.eventloop = None;
    }

    /// Drives the event loop until `done` matches an event, buffering any
    /// inbound publishes seen on the way.
    async fn drive_until(&mut self, done: fn(&Event) -> bool) -> Result<(), HardwareError> {
        let Some(eventloop) = self.eventloop.as_mut() else {
            return Err(HardwareError::SessionDown);
        };
        let inbox = &mut self.inbox;
        let result = timeout(FLUSH_TIMEOUT, async {
            loop {
                let event = eventloop
                    .poll()
                    .await
                    .map_err(|e| HardwareError::Broker(e.to_string()))?;
                if let Event::Incoming(Packet::Publish(p)) = &event {
                    inbox.push_back(InboundMessage {
                        topic: p.topic.clone(),
                        payload: p.payload.to_vec(),
                    });
                }
                if done(&event) {
                    return Ok(());
                }
            }
        })
        .await;
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.teardown("event loop error");
                Err(e)
            }
            Err(_) => Err(HardwareError::Timeout),
        }
    }
}

async fn handshake(eventloop: &mut EventLoop) -> Result<(), HardwareError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(HardwareError::ConnectRejected(format!("{:?}", ack.code)))
                };
            }
            Ok(_) => continue,
            Err(e) => return Err(HardwareError::Broker(e.to_string())),
        }
    }
}

#[async_trait]
impl BrokerSession for MqttSession {
    async fn connect(&mut self, params: &SessionParams) -> Result<(), HardwareError> {
        self.teardown("reconnecting");
        let mut options = MqttOptions::new(&params.client_id, &params.host, params.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        if !params.username.is_empty() {
            options.set_credentials(&params.username, &params.password);
        }
        let (client, mut eventloop) = AsyncClient::new(options, 16);
        match timeout(CONNECT_TIMEOUT, handshake(&mut eventloop)).await {
            Ok(Ok(())) => {
                info!(host = %params.host, port = params.port, "MQTT session established");
                self.client = Some(client);
                self.eventloop = Some(eventloop);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(HardwareError::Timeout),
        }
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), HardwareError> {
        let client = self.client.as_ref().ok_or(HardwareError::SessionDown)?;
        client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| HardwareError::Broker(e.to_string()))?;
        self.drive_until(|e| matches!(e, Event::Outgoing(Outgoing::Subscribe(_))))
            .await
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), HardwareError> {
        let client = self.client.as_ref().ok_or(HardwareError::SessionDown)?;
        client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .map_err(|e| HardwareError::Broker(e.to_string()))?;
        self.drive_until(|e| matches!(e, Event::Outgoing(Outgoing::Publish(_))))
            .await
    }

    async fn poll(&mut self) -> Option<InboundMessage> {
        if let Some(msg) = self.inbox.pop_front() {
            return Some(msg);
        }
        let eventloop = self.eventloop.as_mut()?;
        match timeout(POLL_BUDGET, eventloop.poll()).await {
            Ok(Ok(Event::Incoming(Packet::Publish(p)))) => Some(InboundMessage {
                topic: p.topic.clone(),
                payload: p.payload.to_vec(),
            }),
            Ok(Ok(_)) | Err(_) => None,
            Ok(Err(e)) => {
                warn!(error = %e, "MQTT poll failed");
                self.teardown("poll error");
                None
            }
        }
    }
}

/// Builds UDP radios and MQTT sessions for the channels the node creates.
#[derive(Debug, Clone)]
pub struct HostTransports {
    pub radio_bind: String,
    pub radio_gateway: String,
}

impl TransportFactory for HostTransports {
    fn radio(&self) -> Box<dyn RadioDriver> {
        Box::new(UdpRadio::new(self.radio_bind.clone(), self.radio_gateway.clone()))
    }

    fn broker(&self) -> (Box<dyn NetworkLink>, Box<dyn BrokerSession>) {
        (Box::new(HostLink), Box::new(MqttSession::new()))
    }
}

pub struct LogPower;

impl PowerControl for LogPower {
    fn arm_wake_timer(&mut self, after: Duration) {
        info!(wake_after_secs = after.as_secs(), "Wake timer armed");
    }
}

pub struct LogIndicator;

impl IndicatorOutput for LogIndicator {
    fn write(&mut self, on: bool) {
        debug!(on, "Status indicator");
    }
}
