use crate::domain::device_type::DeviceType;
use serde::{Deserialize, Serialize};

/// One decoded temperature record from a sensor log download.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorLog {
    /// Degrees Celsius
    pub temperature: f64,
}

/// Status reported by the `*info` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoLog {
    pub battery_level: Option<i32>,
    pub is_disabled: bool,
}

impl Default for InfoLog {
    fn default() -> Self {
        Self {
            battery_level: None,
            is_disabled: true,
        }
    }
}

/// Result of one sensor command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CommandOutcome {
    Logs(Vec<SensorLog>),
    Info(InfoLog),
    Ack(bool),
}

/// The uniform command vocabulary exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorCommand {
    DownloadLogs,
    GetInfo,
    Blink,
    ToggleButton,
    /// Log interval in seconds
    UpdateLogInterval(u32),
}

/// A notification payload as delivered by the transport (base64 text).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame(String);

impl RawFrame {
    pub fn new(payload: impl Into<String>) -> Self {
        Self(payload.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A single notification. `value == None` is the transport's
/// "no payload" marker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Notification {
    pub value: Option<String>,
}

impl Notification {
    pub fn with_payload(base64: impl Into<String>) -> Self {
        Self {
            value: Some(base64.into()),
        }
    }

    pub fn end_of_stream() -> Self {
        Self { value: None }
    }

    /// Empty strings count as "no payload", matching what the radio stack
    /// reports for zero-length notifications.
    pub fn into_frame(self) -> Option<RawFrame> {
        self.value.filter(|v| !v.is_empty()).map(RawFrame)
    }
}

/// What the transport knows about a connected peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BleDevice {
    pub id: String,
    pub name: Option<String>,
}

/// A peripheral handle paired with its resolved device family.
///
/// Only built through [`TypedDevice::resolve`], so a command can never be
/// issued against a device whose family was guessed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedDevice {
    pub id: String,
    pub name: String,
    pub device_type: DeviceType,
}

impl TypedDevice {
    pub fn resolve(device: BleDevice) -> crate::error::Result<Self> {
        let device_type = DeviceType::resolve(device.name.as_deref())?;
        Ok(Self {
            id: device.id,
            // resolve() rejects absent names
            name: device.name.unwrap_or_default(),
            device_type,
        })
    }
}

/// A broadcast packet seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub id: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    /// Base64 manufacturer data, company identifier first (little-endian)
    pub manufacturer_data: Option<String>,
}
