//! In-process hardware for lab runs and tests.
//!
//! Every simulated device is a cheap `Clone` handle over shared state, so a
//! test can keep one handle to inspect or steer the device while the node
//! owns another.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::info;

use crate::channel::TransportFactory;

use super::{
    BrokerSession, HardwareError, IndicatorOutput, InboundMessage, NetworkLink, PowerControl,
    RadioDriver, SessionParams,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct RadioState {
    absent: bool,
    started: bool,
    fail_transmit: bool,
    sent: Vec<Vec<u8>>,
    inbox: VecDeque<Vec<u8>>,
}

#[derive(Clone, Default)]
pub struct SimRadio {
    state: Arc<Mutex<RadioState>>,
}

impl SimRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// A radio whose initialization always fails.
    pub fn absent() -> Self {
        let radio = Self::default();
        lock(&radio.state).absent = true;
        radio
    }

    pub fn inject(&self, frame: &[u8]) {
        lock(&self.state).inbox.push_back(frame.to_vec());
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        lock(&self.state).sent.clone()
    }

    pub fn set_transmit_failure(&self, fail: bool) {
        lock(&self.state).fail_transmit = fail;
    }
}

#[async_trait]
impl RadioDriver for SimRadio {
    async fn begin(&mut self) -> Result<(), HardwareError> {
        let mut s = lock(&self.state);
        if s.absent {
            return Err(HardwareError::RadioNotReady);
        }
        s.started = true;
        Ok(())
    }

    async fn transmit(&mut self, frame: &[u8]) -> Result<(), HardwareError> {
        let mut s = lock(&self.state);
        if !s.started {
            return Err(HardwareError::RadioNotReady);
        }
        if s.fail_transmit {
            return Err(HardwareError::Transmit("simulated transmit fault".into()));
        }
        info!(bytes = frame.len(), "[sim radio] frame transmitted");
        s.sent.push(frame.to_vec());
        Ok(())
    }

    fn try_receive(&mut self) -> Option<Vec<u8>> {
        let mut s = lock(&self.state);
        if !s.started {
            return None;
        }
        s.inbox.pop_front()
    }
}

#[derive(Clone)]
pub struct SimLink {
    up: Arc<AtomicBool>,
    reconnects: Arc<AtomicUsize>,
}

impl SimLink {
    pub fn new(up: bool) -> Self {
        Self {
            up: Arc::new(AtomicBool::new(up)),
            reconnects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }
}

impl NetworkLink for SimLink {
    fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    fn reconnect(&mut self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }
}

struct BrokerState {
    accepting: bool,
    connected: bool,
    connects: Vec<SessionParams>,
    subscriptions: Vec<String>,
    published: Vec<(String, Vec<u8>)>,
    inbox: VecDeque<InboundMessage>,
}

#[derive(Clone)]
pub struct SimBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl Default for SimBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                accepting: true,
                connected: false,
                connects: Vec::new(),
                subscriptions: Vec::new(),
                published: Vec::new(),
                inbox: VecDeque::new(),
            })),
        }
    }

    pub fn set_accepting(&self, accepting: bool) {
        lock(&self.state).accepting = accepting;
    }

    /// Simulates the broker closing the session.
    pub fn drop_session(&self) {
        lock(&self.state).connected = false;
    }

    /// Queues a message as if the broker routed it to this client.
    pub fn deliver(&self, topic: &str, payload: &[u8]) {
        lock(&self.state).inbox.push_back(InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
    }

    pub fn connect_attempts(&self) -> Vec<SessionParams> {
        lock(&self.state).connects.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.state).subscriptions.clone()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        lock(&self.state).published.clone()
    }
}

#[async_trait]
impl BrokerSession for SimBroker {
    async fn connect(&mut self, params: &SessionParams) -> Result<(), HardwareError> {
        let mut s = lock(&self.state);
        s.connects.push(params.clone());
        if !s.accepting {
            return Err(HardwareError::ConnectRejected("not authorized".into()));
        }
        s.connected = true;
        s.subscriptions.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), HardwareError> {
        let mut s = lock(&self.state);
        if !s.connected {
            return Err(HardwareError::SessionDown);
        }
        s.subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), HardwareError> {
        let mut s = lock(&self.state);
        if !s.connected {
            return Err(HardwareError::SessionDown);
        }
        info!(topic, bytes = payload.len(), "[sim broker] message published");
        s.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn poll(&mut self) -> Option<InboundMessage> {
        let mut s = lock(&self.state);
        if !s.connected {
            return None;
        }
        s.inbox.pop_front()
    }
}

#[derive(Clone, Default)]
pub struct SimPower {
    armed: Arc<Mutex<Vec<Duration>>>,
}

impl SimPower {
    pub fn armed(&self) -> Vec<Duration> {
        lock(&self.armed).clone()
    }
}

impl PowerControl for SimPower {
    fn arm_wake_timer(&mut self, after: Duration) {
        lock(&self.armed).push(after);
    }
}

/// Records every level written, for asserting on transitions.
#[derive(Clone, Default)]
pub struct RecordingOutput {
    writes: Arc<Mutex<Vec<bool>>>,
}

impl RecordingOutput {
    pub fn writes(&self) -> Vec<bool> {
        lock(&self.writes).clone()
    }
}

impl IndicatorOutput for RecordingOutput {
    fn write(&mut self, on: bool) {
        lock(&self.writes).push(on);
    }
}

/// Hands the same simulated devices to every channel the node builds.
///
/// A new broker channel gets a fresh session, so the shared broker state is
/// disconnected before it is handed out.
#[derive(Clone)]
pub struct SimTransports {
    pub radio: SimRadio,
    pub link: SimLink,
    pub broker: SimBroker,
}

impl Default for SimTransports {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTransports {
    pub fn new() -> Self {
        Self {
            radio: SimRadio::new(),
            link: SimLink::new(true),
            broker: SimBroker::new(),
        }
    }
}

impl TransportFactory for SimTransports {
    fn radio(&self) -> Box<dyn RadioDriver> {
        Box::new(self.radio.clone())
    }

    fn broker(&self) -> (Box<dyn NetworkLink>, Box<dyn BrokerSession>) {
        self.broker.drop_session();
        (Box::new(self.link.clone()), Box::new(self.broker.clone()))
    }
}
