//! Radio transport interface.
//!
//! The protocol layer never touches a Bluetooth stack directly. Anything
//! that can connect, discover, write and notify can drive it; payloads
//! cross this boundary as base64 text.

use crate::domain::models::{Advertisement, BleDevice, Notification};
use crate::error::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

/// Radio duty cycle requested while scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    Opportunistic,
    LowPower,
    Balanced,
    #[default]
    LowLatency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanOptions {
    pub scan_mode: ScanMode,
}

/// Receives every advertisement (or per-advertisement error) while a scan
/// is running.
pub type ScanCallback = Arc<dyn Fn(Result<Advertisement, TransportError>) + Send + Sync>;

/// Item delivered on a monitored characteristic.
pub type NotificationEvent = Result<Notification, TransportError>;

type UnsubscribeFn = Box<dyn FnOnce() + Send>;

/// An active notification subscription.
///
/// Dropping the subscription unsubscribes, so an abandoned command cannot
/// leave a listener behind on the characteristic.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<NotificationEvent>,
    unsubscribe: Option<UnsubscribeFn>,
}

impl Subscription {
    pub fn new(
        receiver: mpsc::UnboundedReceiver<NotificationEvent>,
        unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            receiver,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Next notification in arrival order; `None` once the transport has
    /// closed the stream.
    pub async fn next(&mut self) -> Option<NotificationEvent> {
        self.receiver.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
        self.receiver.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

/// Unsubscribe calls still running in the background, keyed by device and
/// characteristic.
///
/// A transport whose unsubscribe is asynchronous records the teardown task
/// here and settles it before subscribing to the same characteristic again,
/// so a late unsubscribe cannot switch off the next exchange.
#[derive(Debug, Clone, Default)]
pub struct PendingUnsubscribes {
    tasks: Arc<Mutex<HashMap<(String, Uuid), JoinHandle<()>>>>,
}

impl PendingUnsubscribes {
    pub fn track(&self, device_id: &str, characteristic: Uuid, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((device_id.to_string(), characteristic), task);
    }

    pub fn is_pending(&self, device_id: &str, characteristic: Uuid) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&(device_id.to_string(), characteristic))
    }

    /// Wait for the recorded unsubscribe on this characteristic, if any.
    pub async fn settle(&self, device_id: &str, characteristic: Uuid) {
        let task = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(device_id.to_string(), characteristic));
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Pending unsubscribe from {} did not finish: {}", characteristic, e);
            }
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, address: &str) -> Result<BleDevice, TransportError>;

    async fn is_connected(&self, address: &str) -> Result<bool, TransportError>;

    async fn disconnect(&self, address: &str) -> Result<(), TransportError>;

    /// Discover all services and characteristics of a connected device.
    async fn discover_all(&self, address: &str) -> Result<BleDevice, TransportError>;

    async fn start_scan(
        &self,
        service_uuids: Option<Vec<Uuid>>,
        options: ScanOptions,
        callback: ScanCallback,
    ) -> Result<(), TransportError>;

    /// Stops the running scan. Must be a no-op when no scan is running.
    async fn stop_scan(&self) -> Result<(), TransportError>;

    async fn write_without_response(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
        base64_payload: &str,
    ) -> Result<(), TransportError>;

    async fn monitor(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Subscription, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscription_unsubscribes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = mpsc::unbounded_channel();
        let counter = calls.clone();
        let subscription = Subscription::new(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        subscription.unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_subscription_unsubscribes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel();
        let counter = calls.clone();
        {
            let _subscription = Subscription::new(rx, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(tx.send(Ok(Notification::end_of_stream())).is_err());
    }

    #[tokio::test]
    async fn test_notifications_arrive_in_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscription = Subscription::new(rx, || {});
        tx.send(Ok(Notification::with_payload("AQ=="))).unwrap();
        tx.send(Ok(Notification::with_payload("Ag=="))).unwrap();
        drop(tx);

        let first = subscription.next().await.unwrap().unwrap();
        let second = subscription.next().await.unwrap().unwrap();
        assert_eq!(first.value.as_deref(), Some("AQ=="));
        assert_eq!(second.value.as_deref(), Some("Ag=="));
        assert!(subscription.next().await.is_none());
    }

    #[tokio::test]
    async fn test_settle_waits_for_pending_unsubscribe() {
        let notify = Uuid::from_u128(1);
        let pending = PendingUnsubscribes::default();
        let done = Arc::new(AtomicUsize::new(0));
        let flag = done.clone();
        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _ = wait.await;
            flag.fetch_add(1, Ordering::SeqCst);
        });

        pending.track("AA", notify, task);
        assert!(pending.is_pending("AA", notify));
        release.send(()).unwrap();

        pending.settle("AA", notify).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(!pending.is_pending("AA", notify));
    }

    #[tokio::test]
    async fn test_settle_only_waits_on_same_characteristic() {
        let pending = PendingUnsubscribes::default();
        let (_release, wait) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _ = wait.await;
        });
        pending.track("AA", Uuid::from_u128(1), task);

        let other = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            pending.settle("AA", Uuid::from_u128(2)),
        )
        .await;
        assert!(other.is_ok());
        let other_device = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            pending.settle("BB", Uuid::from_u128(1)),
        )
        .await;
        assert!(other_device.is_ok());
        assert!(pending.is_pending("AA", Uuid::from_u128(1)));
    }
}
