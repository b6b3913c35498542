//! btleplug-backed transport.
//!
//! Adapts btleplug's peripheral API to [`Transport`]: devices are looked up
//! by address string, payloads are base64 at the boundary and the
//! notification stream is forwarded through the subscription channel.

use crate::domain::models::{Advertisement, BleDevice, Notification};
use crate::error::TransportError;
use crate::infrastructure::bluetooth::transport::{
    PendingUnsubscribes, ScanCallback, ScanOptions, Subscription, Transport,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, PeripheralProperties,
    ScanFilter as BtScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

pub struct BtleplugTransport {
    adapter: Adapter,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    pending_unsubscribes: PendingUnsubscribes,
}

impl BtleplugTransport {
    /// Use the first Bluetooth adapter on the system
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new()
            .await
            .map_err(|e| TransportError::Adapter(e.to_string()))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| TransportError::Adapter(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Adapter("No Bluetooth adapter found".to_string()))?;
        Ok(Self::with_adapter(adapter))
    }

    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            scan_task: Mutex::new(None),
            pending_unsubscribes: PendingUnsubscribes::default(),
        }
    }

    async fn peripheral(&self, address: &str) -> Result<Peripheral, TransportError> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| TransportError::Adapter(e.to_string()))?;
        peripherals
            .into_iter()
            .find(|p| {
                p.address().to_string().eq_ignore_ascii_case(address)
                    || p.id().to_string() == address
            })
            .ok_or_else(|| TransportError::DeviceNotFound(address.to_string()))
    }

    async fn describe(address: &str, peripheral: &Peripheral) -> BleDevice {
        let name = match peripheral.properties().await {
            Ok(Some(props)) => props.local_name,
            _ => None,
        };
        BleDevice {
            id: address.to_string(),
            name,
        }
    }

    fn characteristic(
        peripheral: &Peripheral,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Characteristic, TransportError> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or(TransportError::CharacteristicNotFound(characteristic))
    }

    fn take_scan_task(&self) -> Option<JoinHandle<()>> {
        self.scan_task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }
}

/// Re-assemble manufacturer data the way mobile BLE stacks report it:
/// company identifier (little-endian) followed by the payload.
fn advertisement(address: String, props: PeripheralProperties) -> Advertisement {
    let manufacturer_data = props
        .manufacturer_data
        .iter()
        .min_by_key(|(id, _)| **id)
        .map(|(id, data)| {
            let mut bytes = id.to_le_bytes().to_vec();
            bytes.extend_from_slice(data);
            STANDARD.encode(bytes)
        });
    Advertisement {
        id: address,
        name: props.local_name,
        rssi: props.rssi,
        manufacturer_data,
    }
}

#[async_trait]
impl Transport for BtleplugTransport {
    async fn connect(&self, address: &str) -> Result<BleDevice, TransportError> {
        let peripheral = self.peripheral(address).await?;
        peripheral
            .connect()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self::describe(address, &peripheral).await)
    }

    async fn is_connected(&self, address: &str) -> Result<bool, TransportError> {
        match self.peripheral(address).await {
            Ok(peripheral) => peripheral
                .is_connected()
                .await
                .map_err(|e| TransportError::Connection(e.to_string())),
            Err(TransportError::DeviceNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn disconnect(&self, address: &str) -> Result<(), TransportError> {
        let peripheral = self.peripheral(address).await?;
        peripheral
            .disconnect()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }

    async fn discover_all(&self, address: &str) -> Result<BleDevice, TransportError> {
        let peripheral = self.peripheral(address).await?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| TransportError::Discovery(e.to_string()))?;
        debug!(
            "Discovered {} characteristics on {}",
            peripheral.characteristics().len(),
            address
        );
        Ok(Self::describe(address, &peripheral).await)
    }

    async fn start_scan(
        &self,
        service_uuids: Option<Vec<Uuid>>,
        options: ScanOptions,
        callback: ScanCallback,
    ) -> Result<(), TransportError> {
        // btleplug has no duty-cycle control
        debug!("Scan mode {:?} requested", options.scan_mode);

        let mut events = self
            .adapter
            .events()
            .await
            .map_err(|e| TransportError::Scan(e.to_string()))?;
        self.adapter
            .start_scan(BtScanFilter {
                services: service_uuids.unwrap_or_default(),
            })
            .await
            .map_err(|e| TransportError::Scan(e.to_string()))?;

        let adapter = self.adapter.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) => id,
                    CentralEvent::ManufacturerDataAdvertisement { id, .. } => id,
                    _ => continue,
                };
                let peripheral = match adapter.peripheral(&id).await {
                    Ok(p) => p,
                    Err(e) => {
                        callback(Err(TransportError::Scan(e.to_string())));
                        continue;
                    }
                };
                match peripheral.properties().await {
                    Ok(Some(props)) => {
                        let address = peripheral.address().to_string();
                        callback(Ok(advertisement(address, props)));
                    }
                    Ok(None) => trace!("No properties for {:?}", id),
                    Err(e) => callback(Err(TransportError::Scan(e.to_string()))),
                }
            }
        });

        if let Some(previous) = self
            .scan_task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .replace(task)
        {
            previous.abort();
        }
        info!("btleplug scan started");
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        let Some(task) = self.take_scan_task() else {
            return Ok(());
        };
        task.abort();
        self.adapter
            .stop_scan()
            .await
            .map_err(|e| TransportError::Scan(e.to_string()))
    }

    async fn write_without_response(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
        base64_payload: &str,
    ) -> Result<(), TransportError> {
        let bytes = STANDARD
            .decode(base64_payload)
            .map_err(|e| TransportError::Write(e.to_string()))?;
        let peripheral = self.peripheral(device_id).await?;
        let target = Self::characteristic(&peripheral, service, characteristic)?;
        peripheral
            .write(&target, &bytes, WriteType::WithoutResponse)
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn monitor(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Subscription, TransportError> {
        let peripheral = self.peripheral(device_id).await?;
        let target = Self::characteristic(&peripheral, service, characteristic)?;

        // The previous exchange's unsubscribe must land before this subscribe
        self.pending_unsubscribes
            .settle(device_id, characteristic)
            .await;

        let mut notifications = peripheral
            .notifications()
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        peripheral
            .subscribe(&target)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let forward = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != characteristic {
                    continue;
                }
                let value = (!notification.value.is_empty())
                    .then(|| STANDARD.encode(&notification.value));
                if sender.send(Ok(Notification { value })).is_err() {
                    return;
                }
            }
            // Stream ended: the link is gone
            let _ = sender.send(Ok(Notification::end_of_stream()));
        });

        let pending = self.pending_unsubscribes.clone();
        let device_id = device_id.to_string();
        Ok(Subscription::new(receiver, move || {
            forward.abort();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let task = handle.spawn(async move {
                        if let Err(e) = peripheral.unsubscribe(&target).await {
                            warn!("Unsubscribe from {} failed: {}", target.uuid, e);
                        }
                    });
                    pending.track(&device_id, characteristic, task);
                }
                Err(_) => warn!("No runtime to unsubscribe from {}", target.uuid),
            }
        }))
    }
}
