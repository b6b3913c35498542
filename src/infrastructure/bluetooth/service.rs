//! Sensor Service Module
//!
//! Public command surface. Every command reconnects, resolves the sensor
//! family from the discovered name and runs exactly one channel exchange.

use crate::domain::models::{
    CommandOutcome, InfoLog, SensorCommand, SensorLog, TypedDevice,
};
use crate::domain::retry::with_retries;
use crate::error::Result;
use crate::infrastructure::bluetooth::{
    connection::CommandChannel,
    protocol::{self, AckPattern},
    scanner::{ScanFilter, SensorScanner},
    transport::{ScanCallback, ScanMode, Transport},
};
use crate::infrastructure::codec::Codec;
use std::sync::Arc;
use tracing::{debug, info};

/// Main service coordinating all sensor operations
pub struct SensorService {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    channel: CommandChannel,
    scanner: SensorScanner,
}

impl SensorService {
    pub fn new(transport: Arc<dyn Transport>, codec: Arc<dyn Codec>) -> Self {
        Self {
            channel: CommandChannel::new(transport.clone(), codec.clone()),
            scanner: SensorScanner::new(transport.clone(), ScanFilter::new(codec.clone())),
            transport,
            codec,
        }
    }

    pub fn with_scan_mode(mut self, scan_mode: ScanMode) -> Self {
        self.scanner = self.scanner.with_scan_mode(scan_mode);
        self
    }

    /// Start scanning for supported sensors
    pub async fn scan_for_sensors(&self, callback: ScanCallback) -> Result<()> {
        Ok(self.scanner.start(callback).await?)
    }

    /// Stop scanning
    pub async fn stop_scan(&self) -> Result<()> {
        Ok(self.scanner.stop().await?)
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    /// Connect to a sensor and resolve its family.
    pub async fn connect(&self, address: &str) -> Result<TypedDevice> {
        let _lease = self.channel.acquire(address)?;
        self.connect_and_discover(address).await
    }

    pub async fn disconnect(&self, address: &str) -> Result<()> {
        info!("Disconnecting from {}", address);
        Ok(self.transport.disconnect(address).await?)
    }

    /// A stale connection cannot be reused for discovery, so an existing
    /// link is dropped first.
    async fn connect_and_discover(&self, address: &str) -> Result<TypedDevice> {
        if self.transport.is_connected(address).await? {
            debug!("{} already connected, reconnecting", address);
            self.transport.disconnect(address).await?;
        }

        info!("Connecting to sensor {}", address);
        self.transport.connect(address).await?;
        let discovered = self.transport.discover_all(address).await?;
        let device = TypedDevice::resolve(discovered)?;
        info!(
            "Connected to {} ({:?}) as {:?}",
            device.name, device.id, device.device_type
        );
        Ok(device)
    }

    /// Download every stored temperature record.
    pub async fn download_logs(&self, address: &str) -> Result<Vec<SensorLog>> {
        let lease = self.channel.acquire(address)?;
        let device = self.connect_and_discover(address).await?;
        let command = device.device_type.command(SensorCommand::DownloadLogs);
        let codec = self.codec.as_ref();

        let logs = lease
            .write_and_collect(&device, &command, |frames| {
                protocol::decode_logs(codec, device.device_type, frames)
            })
            .await?;
        info!("Downloaded {} records from {}", logs.len(), address);
        Ok(logs)
    }

    pub async fn get_info(&self, address: &str) -> Result<InfoLog> {
        let lease = self.channel.acquire(address)?;
        let device = self.connect_and_discover(address).await?;
        let command = device.device_type.command(SensorCommand::GetInfo);
        let codec = self.codec.as_ref();

        lease
            .write_and_collect(&device, &command, |frames| {
                protocol::decode_info(codec, frames)
            })
            .await
    }

    pub async fn blink(&self, address: &str) -> Result<bool> {
        self.acknowledged(address, SensorCommand::Blink, AckPattern::Ok)
            .await
    }

    pub async fn toggle_button(&self, address: &str) -> Result<bool> {
        self.acknowledged(address, SensorCommand::ToggleButton, AckPattern::Ok)
            .await
    }

    /// Set the logging interval in seconds.
    pub async fn update_log_interval(&self, address: &str, seconds: u32) -> Result<bool> {
        self.acknowledged(
            address,
            SensorCommand::UpdateLogInterval(seconds),
            AckPattern::Interval,
        )
        .await
    }

    async fn acknowledged(
        &self,
        address: &str,
        command: SensorCommand,
        pattern: AckPattern,
    ) -> Result<bool> {
        let lease = self.channel.acquire(address)?;
        let device = self.connect_and_discover(address).await?;
        let wire = device.device_type.command(command);
        let codec = self.codec.as_ref();

        let acked = lease
            .write_with_single_response(&device, &wire, |frame| {
                protocol::decode_ack(codec, frame, pattern)
            })
            .await?;
        debug!("{:?} on {} acknowledged: {}", command, address, acked);
        Ok(acked)
    }

    /// Run any command and wrap its result.
    pub async fn execute(&self, address: &str, command: SensorCommand) -> Result<CommandOutcome> {
        Ok(match command {
            SensorCommand::DownloadLogs => CommandOutcome::Logs(self.download_logs(address).await?),
            SensorCommand::GetInfo => CommandOutcome::Info(self.get_info(address).await?),
            SensorCommand::Blink => CommandOutcome::Ack(self.blink(address).await?),
            SensorCommand::ToggleButton => CommandOutcome::Ack(self.toggle_button(address).await?),
            SensorCommand::UpdateLogInterval(seconds) => {
                CommandOutcome::Ack(self.update_log_interval(address, seconds).await?)
            }
        })
    }

    pub async fn connect_with_retries(
        &self,
        address: &str,
        max_attempts: u32,
    ) -> Result<TypedDevice> {
        with_retries(max_attempts, move || self.connect(address)).await
    }

    pub async fn download_logs_with_retries(
        &self,
        address: &str,
        max_attempts: u32,
    ) -> Result<Vec<SensorLog>> {
        with_retries(max_attempts, move || self.download_logs(address)).await
    }

    pub async fn get_info_with_retries(&self, address: &str, max_attempts: u32) -> Result<InfoLog> {
        with_retries(max_attempts, move || self.get_info(address)).await
    }

    pub async fn blink_with_retries(&self, address: &str, max_attempts: u32) -> Result<bool> {
        with_retries(max_attempts, move || self.blink(address)).await
    }

    pub async fn toggle_button_with_retries(
        &self,
        address: &str,
        max_attempts: u32,
    ) -> Result<bool> {
        with_retries(max_attempts, move || self.toggle_button(address)).await
    }

    pub async fn update_log_interval_with_retries(
        &self,
        address: &str,
        seconds: u32,
        max_attempts: u32,
    ) -> Result<bool> {
        with_retries(max_attempts, move || {
            self.update_log_interval(address, seconds)
        })
        .await
    }

    pub async fn execute_with_retries(
        &self,
        address: &str,
        command: SensorCommand,
        max_attempts: u32,
    ) -> Result<CommandOutcome> {
        with_retries(max_attempts, move || self.execute(address, command)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::device_type::DeviceType;
    use crate::domain::models::Advertisement;
    use crate::error::{SensorError, TransportError};
    use crate::infrastructure::bluetooth::mock::{MockEvent, MockFrame, MockTransport};
    use crate::infrastructure::codec::Base64Codec;
    use std::sync::Mutex;

    const BM: &str = "C4:7C:8D:6A:01:02";
    const LAIRD: &str = "D0:11:22:33:44:55";

    fn setup() -> (Arc<MockTransport>, SensorService) {
        let mock = Arc::new(MockTransport::new());
        mock.add_device(BM, "C47C8D6A0102");
        mock.add_device(LAIRD, "BT510");
        let service = SensorService::new(mock.clone(), Arc::new(Base64Codec));
        (mock, service)
    }

    fn download_reply() -> Vec<MockFrame> {
        vec![
            MockFrame::text("*logall"),
            MockFrame::Data(vec![0x00, 0xD2, 0x00]),
            MockFrame::Data(vec![0xDC, 0xFF, 0xEC, 0x2E, 0x00, 0x12]),
            MockFrame::End,
        ]
    }

    #[tokio::test]
    async fn test_download_logs() {
        let (mock, service) = setup();
        mock.respond(BM, "*logall", download_reply());

        let logs = service.download_logs(BM).await.unwrap();
        let temperatures: Vec<f64> = logs.iter().map(|l| l.temperature).collect();
        assert_eq!(temperatures, vec![21.0, 22.0, -2.0]);

        let device_type = DeviceType::BlueMaestro;
        assert_eq!(
            mock.events(),
            vec![
                MockEvent::Connect(BM.to_string()),
                MockEvent::Discover(BM.to_string()),
                MockEvent::Subscribe {
                    device_id: BM.to_string(),
                    characteristic: device_type.notify_characteristic_uuid(),
                },
                MockEvent::Write {
                    device_id: BM.to_string(),
                    characteristic: device_type.write_characteristic_uuid(),
                    command: "*logall".to_string(),
                },
                MockEvent::Unsubscribe(BM.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_reconnects_when_already_connected() {
        let (mock, service) = setup();
        mock.set_connected(BM);
        mock.respond(BM, "*bd", vec![MockFrame::text("OK")]);

        assert!(service.toggle_button(BM).await.unwrap());
        let events = mock.events();
        assert_eq!(events[0], MockEvent::Disconnect(BM.to_string()));
        assert_eq!(events[1], MockEvent::Connect(BM.to_string()));
    }

    #[tokio::test]
    async fn test_unknown_device_is_rejected_before_any_command() {
        let (mock, service) = setup();
        mock.add_unnamed_device("00:00:00:00:00:01");

        let err = service.blink("00:00:00:00:00:01").await.unwrap_err();
        assert_eq!(err, SensorError::UnknownDevice(None));
        assert_eq!(mock.subscribe_count(), 0);
        assert!(!mock
            .events()
            .iter()
            .any(|e| matches!(e, MockEvent::Write { .. })));
    }

    #[tokio::test]
    async fn test_bt510_blink_uses_json_rpc() {
        let (mock, service) = setup();
        mock.respond(
            LAIRD,
            DeviceType::Bt510.blink_command().as_str(),
            vec![MockFrame::text(r#"{"jsonrpc":"2.0","id":2,"result":"ok"}"#)],
        );

        assert!(service.blink(LAIRD).await.unwrap());
        let write = mock
            .events()
            .into_iter()
            .find(|e| matches!(e, MockEvent::Write { .. }))
            .unwrap();
        assert_eq!(
            write,
            MockEvent::Write {
                device_id: LAIRD.to_string(),
                characteristic: DeviceType::Bt510.write_characteristic_uuid(),
                command: r#"{"jsonrpc":"2.0","method":"ledTest","params":[200],"id":2}"#
                    .to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_blink_without_ok_is_not_acknowledged() {
        let (mock, service) = setup();
        mock.respond(BM, "*blink", vec![MockFrame::text("Unknown command")]);
        assert!(!service.blink(BM).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_info() {
        let (mock, service) = setup();
        mock.respond(
            BM,
            "*info",
            vec![
                MockFrame::text("Blue Maestro Pebble"),
                MockFrame::text("Batt lvl: 100"),
                MockFrame::text("Btn on/off: 0"),
                MockFrame::End,
            ],
        );

        let info = service.get_info(BM).await.unwrap();
        assert_eq!(
            info,
            InfoLog {
                battery_level: Some(100),
                is_disabled: false
            }
        );
    }

    #[tokio::test]
    async fn test_update_log_interval() {
        let (mock, service) = setup();
        mock.respond(BM, "*lint600", vec![MockFrame::text("Interval: 600s")]);

        assert!(service.update_log_interval(BM, 600).await.unwrap());
    }

    #[tokio::test]
    async fn test_execute_wraps_outcome() {
        let (mock, service) = setup();
        mock.respond(BM, "*bd", vec![MockFrame::text("ok")]);
        mock.respond(BM, "*info", vec![MockFrame::text("Btn on/off: 1"), MockFrame::End]);

        assert_eq!(
            service.execute(BM, SensorCommand::ToggleButton).await.unwrap(),
            CommandOutcome::Ack(true)
        );
        assert_eq!(
            service.execute(BM, SensorCommand::GetInfo).await.unwrap(),
            CommandOutcome::Info(InfoLog::default())
        );
    }

    #[tokio::test]
    async fn test_command_rejected_while_device_busy() {
        let (mock, service) = setup();
        let _lease = service.channel.acquire(BM).unwrap();

        let err = service.get_info(BM).await.unwrap_err();
        assert_eq!(err, SensorError::DeviceBusy(BM.to_string()));
        assert_eq!(mock.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_download_with_retries_recovers() {
        let (mock, service) = setup();
        mock.fail_connects(2, TransportError::Connection("GATT 133".to_string()));
        mock.respond(BM, "*logall", download_reply());

        let logs = service.download_logs_with_retries(BM, 3).await.unwrap();
        assert_eq!(logs.len(), 3);
        assert_eq!(mock.connect_count(), 3);
    }

    #[tokio::test]
    async fn test_retries_surface_last_error() {
        let (mock, service) = setup();
        mock.respond(BM, "*blink", vec![MockFrame::End]);
        mock.respond(BM, "*blink", vec![MockFrame::End]);

        let err = service.blink_with_retries(BM, 2).await.unwrap_err();
        assert_eq!(
            err,
            SensorError::CommandFailed {
                command: "*blink".to_string()
            }
        );
        assert_eq!(mock.subscribe_count(), 2);
        assert_eq!(mock.unsubscribe_count(), 2);
    }

    #[tokio::test]
    async fn test_scan_for_sensors() {
        let (mock, service) = setup();
        mock.add_advertisement(Ok(Advertisement {
            id: LAIRD.to_string(),
            name: Some("BT510".to_string()),
            rssi: Some(-71),
            manufacturer_data: Some("5AABAg==".to_string()),
        }));

        let found = Arc::new(Mutex::new(Vec::new()));
        let sink = found.clone();
        let callback: ScanCallback =
            Arc::new(move |event: std::result::Result<Advertisement, TransportError>| {
                if let Ok(advertisement) = event {
                    sink.lock().unwrap().push(advertisement.id);
                }
            });
        service.scan_for_sensors(callback).await.unwrap();
        assert!(service.is_scanning());
        assert_eq!(*found.lock().unwrap(), vec![LAIRD.to_string()]);

        service.stop_scan().await.unwrap();
        assert!(!service.is_scanning());
    }
}
