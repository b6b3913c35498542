//! Scripted in-memory transport.
//!
//! Replies are queued per `(device, command)` and delivered to every live
//! subscription on that device as soon as the command is written. Every
//! transport call is recorded so tests can check ordering.

use crate::domain::models::{Advertisement, BleDevice, Notification};
use crate::error::TransportError;
use crate::infrastructure::bluetooth::transport::{
    NotificationEvent, ScanCallback, ScanOptions, Subscription, Transport,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use uuid::Uuid;

/// One scripted notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFrame {
    Data(Vec<u8>),
    /// Payload passed through as-is, for malformed base64
    Raw(String),
    /// Notification without payload
    End,
}

impl MockFrame {
    pub fn text(text: &str) -> Self {
        Self::Data(text.as_bytes().to_vec())
    }

    fn into_notification(self) -> Notification {
        match self {
            Self::Data(bytes) => Notification::with_payload(STANDARD.encode(bytes)),
            Self::Raw(payload) => Notification::with_payload(payload),
            Self::End => Notification::end_of_stream(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Connect(String),
    Disconnect(String),
    Discover(String),
    Subscribe {
        device_id: String,
        characteristic: Uuid,
    },
    Write {
        device_id: String,
        characteristic: Uuid,
        command: String,
    },
    Unsubscribe(String),
    StartScan,
    StopScan,
}

#[derive(Default)]
struct MockState {
    devices: HashMap<String, Option<String>>,
    connected: HashSet<String>,
    replies: HashMap<(String, String), VecDeque<Vec<MockFrame>>>,
    subscriptions: HashMap<u64, (String, mpsc::UnboundedSender<NotificationEvent>)>,
    next_subscription: u64,
    connect_failures: VecDeque<TransportError>,
    write_failures: VecDeque<TransportError>,
    advertisements: Vec<Result<Advertisement, TransportError>>,
    scanning: bool,
    events: Vec<MockEvent>,
}

#[derive(Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_device(&self, address: &str, name: &str) {
        self.state()
            .devices
            .insert(address.to_string(), Some(name.to_string()));
    }

    /// A device that reports no name after discovery.
    pub fn add_unnamed_device(&self, address: &str) {
        self.state().devices.insert(address.to_string(), None);
    }

    pub fn set_connected(&self, address: &str) {
        self.state().connected.insert(address.to_string());
    }

    /// Queue a reply for the next write of `command` to `address`.
    pub fn respond(&self, address: &str, command: &str, frames: Vec<MockFrame>) {
        self.state()
            .replies
            .entry((address.to_string(), command.to_string()))
            .or_default()
            .push_back(frames);
    }

    pub fn fail_connects(&self, count: usize, error: TransportError) {
        self.state()
            .connect_failures
            .extend(std::iter::repeat(error).take(count));
    }

    pub fn fail_writes(&self, count: usize, error: TransportError) {
        self.state()
            .write_failures
            .extend(std::iter::repeat(error).take(count));
    }

    pub fn add_advertisement(&self, advertisement: Result<Advertisement, TransportError>) {
        self.state().advertisements.push(advertisement);
    }

    /// Deliver an unsolicited notification; returns how many live
    /// subscriptions received it.
    pub fn push_notification(&self, address: &str, frame: MockFrame) -> usize {
        let state = self.state();
        deliver(&state, address, vec![frame])
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.state().events.clone()
    }

    pub fn subscribe_count(&self) -> usize {
        self.count(|e| matches!(e, MockEvent::Subscribe { .. }))
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.count(|e| matches!(e, MockEvent::Unsubscribe(_)))
    }

    pub fn connect_count(&self) -> usize {
        self.count(|e| matches!(e, MockEvent::Connect(_)))
    }

    pub fn disconnect_count(&self) -> usize {
        self.count(|e| matches!(e, MockEvent::Disconnect(_)))
    }

    pub fn is_scanning(&self) -> bool {
        self.state().scanning
    }

    fn count(&self, predicate: impl Fn(&MockEvent) -> bool) -> usize {
        self.state().events.iter().filter(|e| predicate(e)).count()
    }

    fn device(&self, state: &MockState, address: &str) -> Result<BleDevice, TransportError> {
        state
            .devices
            .get(address)
            .map(|name| BleDevice {
                id: address.to_string(),
                name: name.clone(),
            })
            .ok_or_else(|| TransportError::DeviceNotFound(address.to_string()))
    }
}

fn deliver(state: &MockState, address: &str, frames: Vec<MockFrame>) -> usize {
    let targets: Vec<_> = state
        .subscriptions
        .values()
        .filter(|(device_id, _)| device_id == address)
        .map(|(_, sender)| sender)
        .collect();
    for frame in frames {
        let notification = frame.into_notification();
        for sender in &targets {
            let _ = sender.send(Ok(notification.clone()));
        }
    }
    targets.len()
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<BleDevice, TransportError> {
        let mut state = self.state();
        state.events.push(MockEvent::Connect(address.to_string()));
        if let Some(error) = state.connect_failures.pop_front() {
            return Err(error);
        }
        let device = self.device(&state, address)?;
        state.connected.insert(address.to_string());
        Ok(device)
    }

    async fn is_connected(&self, address: &str) -> Result<bool, TransportError> {
        Ok(self.state().connected.contains(address))
    }

    async fn disconnect(&self, address: &str) -> Result<(), TransportError> {
        let mut state = self.state();
        state.events.push(MockEvent::Disconnect(address.to_string()));
        state.connected.remove(address);
        Ok(())
    }

    async fn discover_all(&self, address: &str) -> Result<BleDevice, TransportError> {
        let mut state = self.state();
        state.events.push(MockEvent::Discover(address.to_string()));
        if !state.connected.contains(address) {
            return Err(TransportError::Discovery(format!("{} is not connected", address)));
        }
        self.device(&state, address)
    }

    async fn start_scan(
        &self,
        _service_uuids: Option<Vec<Uuid>>,
        _options: ScanOptions,
        callback: ScanCallback,
    ) -> Result<(), TransportError> {
        let advertisements = {
            let mut state = self.state();
            state.events.push(MockEvent::StartScan);
            state.scanning = true;
            state.advertisements.clone()
        };
        for advertisement in advertisements {
            callback(advertisement);
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.scanning {
            state.events.push(MockEvent::StopScan);
            state.scanning = false;
        }
        Ok(())
    }

    async fn write_without_response(
        &self,
        device_id: &str,
        _service: Uuid,
        characteristic: Uuid,
        base64_payload: &str,
    ) -> Result<(), TransportError> {
        let command = STANDARD
            .decode(base64_payload)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_else(|_| base64_payload.to_string());

        let mut state = self.state();
        state.events.push(MockEvent::Write {
            device_id: device_id.to_string(),
            characteristic,
            command: command.clone(),
        });
        if let Some(error) = state.write_failures.pop_front() {
            return Err(error);
        }

        let reply = state
            .replies
            .get_mut(&(device_id.to_string(), command))
            .and_then(VecDeque::pop_front);
        if let Some(frames) = reply {
            deliver(&state, device_id, frames);
        }
        Ok(())
    }

    async fn monitor(
        &self,
        device_id: &str,
        _service: Uuid,
        characteristic: Uuid,
    ) -> Result<Subscription, TransportError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.state();
            state.events.push(MockEvent::Subscribe {
                device_id: device_id.to_string(),
                characteristic,
            });
            let id = state.next_subscription;
            state.next_subscription += 1;
            state
                .subscriptions
                .insert(id, (device_id.to_string(), sender));
            id
        };

        let shared = self.state.clone();
        Ok(Subscription::new(receiver, move || {
            let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((device_id, _)) = state.subscriptions.remove(&id) {
                state.events.push(MockEvent::Unsubscribe(device_id));
            }
        }))
    }
}
