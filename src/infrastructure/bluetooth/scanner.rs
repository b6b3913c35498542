//! BLE Scanner Module
//!
//! Handles discovery of supported temperature sensors.

use crate::domain::device_type::{DeviceType, KNOWN_MANUFACTURER_IDS};
use crate::domain::models::Advertisement;
use crate::error::TransportError;
use crate::infrastructure::bluetooth::transport::{ScanCallback, ScanMode, ScanOptions, Transport};
use crate::infrastructure::codec::Codec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, trace, warn};

/// Accepts only advertisements carrying a known manufacturer ID.
#[derive(Clone)]
pub struct ScanFilter {
    codec: Arc<dyn Codec>,
}

impl ScanFilter {
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self { codec }
    }

    /// Little-endian company identifier at the start of the manufacturer
    /// data, if there is one.
    pub fn manufacturer_id(&self, advertisement: &Advertisement) -> Option<u16> {
        let encoded = advertisement.manufacturer_data.as_deref()?;
        let bytes = self.codec.base64_decode(encoded).ok()?;
        match bytes.as_slice() {
            [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
            _ => None,
        }
    }

    pub fn accept(&self, advertisement: &Advertisement) -> bool {
        self.manufacturer_id(advertisement)
            .is_some_and(|id| KNOWN_MANUFACTURER_IDS.contains(&id))
    }

    /// Family suggested by the advertisement. Commands still resolve the
    /// family from the connected name.
    pub fn device_type(&self, advertisement: &Advertisement) -> Option<DeviceType> {
        self.manufacturer_id(advertisement)
            .and_then(DeviceType::from_manufacturer_id)
    }
}

/// Runs transport scans and forwards only supported sensors.
pub struct SensorScanner {
    transport: Arc<dyn Transport>,
    filter: ScanFilter,
    scan_mode: ScanMode,
    scanning: AtomicBool,
}

impl SensorScanner {
    pub fn new(transport: Arc<dyn Transport>, filter: ScanFilter) -> Self {
        Self {
            transport,
            filter,
            scan_mode: ScanMode::LowLatency,
            scanning: AtomicBool::new(false),
        }
    }

    pub fn with_scan_mode(mut self, scan_mode: ScanMode) -> Self {
        self.scan_mode = scan_mode;
        self
    }

    /// Start scanning. `callback` sees accepted advertisements and every
    /// transport error; a bad advertisement never stops the scan.
    pub async fn start(&self, callback: ScanCallback) -> Result<(), TransportError> {
        self.stop().await?;

        info!("Starting BLE scan for sensors ({:?})", self.scan_mode);
        let filter = self.filter.clone();
        let filtered: ScanCallback =
            Arc::new(move |event: Result<Advertisement, TransportError>| match event {
                Ok(advertisement) => {
                    if filter.accept(&advertisement) {
                        trace!("Found sensor {} ({:?})", advertisement.id, advertisement.name);
                        callback(Ok(advertisement));
                    }
                }
                Err(e) => {
                    warn!("Scan error: {}", e);
                    callback(Err(e));
                }
            });

        let options = ScanOptions {
            scan_mode: self.scan_mode,
        };
        self.transport.start_scan(None, options, filtered).await?;
        self.scanning.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stop scanning. Safe to call when no scan is running.
    pub async fn stop(&self) -> Result<(), TransportError> {
        if self.scanning.swap(false, Ordering::SeqCst) {
            info!("Stopping BLE scan...");
        }
        self.transport.stop_scan().await
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::mock::{MockEvent, MockTransport};
    use crate::infrastructure::codec::Base64Codec;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use std::sync::Mutex;

    fn advertisement(id: &str, data: Option<&[u8]>) -> Advertisement {
        Advertisement {
            id: id.to_string(),
            name: None,
            rssi: Some(-60),
            manufacturer_data: data.map(|d| STANDARD.encode(d)),
        }
    }

    fn filter() -> ScanFilter {
        ScanFilter::new(Arc::new(Base64Codec))
    }

    #[test]
    fn test_accepts_known_manufacturers() {
        let filter = filter();
        for id in KNOWN_MANUFACTURER_IDS {
            let mut data = id.to_le_bytes().to_vec();
            data.extend([0x0D, 0x01, 0x64]);
            assert!(filter.accept(&advertisement("a", Some(&data))));
        }
        assert_eq!(
            filter.device_type(&advertisement("a", Some(&[0x33, 0x01]))),
            Some(DeviceType::BlueMaestro)
        );
    }

    #[test]
    fn test_rejects_other_ids() {
        let filter = filter();
        for id in [0u16, 0x004C, 229, 306, 0xE400, 0x3301, u16::MAX] {
            assert!(!filter.accept(&advertisement("a", Some(&id.to_le_bytes()))));
        }
        // Big-endian 307 must not match
        assert!(!filter.accept(&advertisement("a", Some(&307u16.to_be_bytes()))));
    }

    #[test]
    fn test_rejects_missing_or_malformed_data() {
        let filter = filter();
        assert!(!filter.accept(&advertisement("a", None)));
        assert!(!filter.accept(&advertisement("a", Some(&[0xE4]))));
        assert!(!filter.accept(&advertisement("a", Some(&[]))));

        let mut garbage = advertisement("a", None);
        garbage.manufacturer_data = Some("***".to_string());
        assert!(!filter.accept(&garbage));
    }

    #[tokio::test]
    async fn test_scanner_forwards_sensors_and_errors() {
        let mock = Arc::new(MockTransport::new());
        mock.add_advertisement(Ok(advertisement("phone", Some(&[0x4C, 0x00]))));
        mock.add_advertisement(Ok(advertisement("logger", Some(&[0x33, 0x01]))));
        mock.add_advertisement(Err(TransportError::Scan("adapter hiccup".to_string())));
        mock.add_advertisement(Ok(advertisement("bare", None)));
        mock.add_advertisement(Ok(advertisement("bt510", Some(&[0xE4, 0x00]))));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let scanner = SensorScanner::new(mock.clone(), filter());
        scanner
            .start(Arc::new(move |event: Result<Advertisement, TransportError>| {
                sink.lock().unwrap().push(event.map(|a| a.id));
            }))
            .await
            .unwrap();

        assert!(scanner.is_scanning());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Ok("logger".to_string()),
                Err(TransportError::Scan("adapter hiccup".to_string())),
                Ok("bt510".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mock = Arc::new(MockTransport::new());
        let scanner = SensorScanner::new(mock.clone(), filter());
        scanner
            .start(Arc::new(|_: Result<Advertisement, TransportError>| {}))
            .await
            .unwrap();

        scanner.stop().await.unwrap();
        scanner.stop().await.unwrap();
        assert!(!scanner.is_scanning());
        assert!(!mock.is_scanning());

        let stops = mock
            .events()
            .into_iter()
            .filter(|e| *e == MockEvent::StopScan)
            .count();
        assert_eq!(stops, 1);
    }
}
