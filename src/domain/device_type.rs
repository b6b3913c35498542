//! Sensor families and their protocol constants.
//!
//! Blue Maestro loggers and Laird BT510 sensors speak the same command
//! vocabulary over different UART-style GATT services. Everything that
//! differs between the two lives here, behind one accessor surface.

use crate::domain::models::SensorCommand;
use crate::error::{Result, SensorError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Advertised name of every BT510 unit.
pub const BT510_NAME: &str = "BT510";

/// Manufacturer IDs accepted while scanning.
pub const KNOWN_MANUFACTURER_IDS: [u16; 2] = [
    DeviceType::BlueMaestro.manufacturer_id(),
    DeviceType::Bt510.manufacturer_id(),
];

/// Command strings shared by both families
pub mod commands {
    pub const DOWNLOAD: &str = "*logall";
    pub const INFO: &str = "*info";
    pub const UPDATE_LOG_INTERVAL: &str = "*lint";
    pub const DISABLE_BUTTON: &str = "*bd";
    pub const BLUE_MAESTRO_BLINK: &str = "*blink";
}

/// End-of-data markers in a Blue Maestro log download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogDelimiters {
    /// Only recognised at even offsets (0x2E00)
    pub even_offset: i16,
    /// Recognised at any offset (0x2C2C)
    pub any_offset: i16,
}

pub const BLUE_MAESTRO_DELIMITERS: LogDelimiters = LogDelimiters {
    even_offset: 11776,
    any_offset: 11308,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    BlueMaestro,
    Bt510,
}

/// JSON-RPC envelope the BT510 expects for its LED test.
pub const BT510_BLINK: &str = r#"{"jsonrpc":"2.0","method":"ledTest","params":[200],"id":2}"#;

impl DeviceType {
    /// Resolve the family from an advertised or connected device name.
    ///
    /// BT510 units always report the same literal name. Blue Maestro
    /// loggers embed part of their MAC address in the name, so any other
    /// non-empty name is taken to be one.
    pub fn resolve(name: Option<&str>) -> Result<Self> {
        match name {
            None | Some("") => Err(SensorError::UnknownDevice(name.map(str::to_string))),
            Some(BT510_NAME) => Ok(Self::Bt510),
            Some(_) => Ok(Self::BlueMaestro),
        }
    }

    pub fn from_manufacturer_id(id: u16) -> Option<Self> {
        [Self::BlueMaestro, Self::Bt510]
            .into_iter()
            .find(|t| t.manufacturer_id() == id)
    }

    pub const fn manufacturer_id(self) -> u16 {
        match self {
            Self::BlueMaestro => 307,
            Self::Bt510 => 228, // 0xE4
        }
    }

    pub const fn service_uuid(self) -> Uuid {
        match self {
            Self::BlueMaestro => Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e),
            Self::Bt510 => Uuid::from_u128(0x569a1101_b87f_490c_92cb_11ba5ea5167c),
        }
    }

    /// Characteristic the host writes commands to
    pub const fn write_characteristic_uuid(self) -> Uuid {
        match self {
            Self::BlueMaestro => Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e),
            Self::Bt510 => Uuid::from_u128(0x569a2001_b87f_490c_92cb_11ba5ea5167c),
        }
    }

    /// Characteristic the sensor notifies responses on
    pub const fn notify_characteristic_uuid(self) -> Uuid {
        match self {
            Self::BlueMaestro => Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e),
            Self::Bt510 => Uuid::from_u128(0x569a2000_b87f_490c_92cb_11ba5ea5167c),
        }
    }

    pub const fn temperature_divisor(self) -> f64 {
        10.0
    }

    /// Log downloads from both families are decoded with the Blue Maestro
    /// layout.
    pub const fn log_delimiters(self) -> LogDelimiters {
        BLUE_MAESTRO_DELIMITERS
    }

    pub fn blink_command(self) -> String {
        match self {
            Self::BlueMaestro => commands::BLUE_MAESTRO_BLINK.to_string(),
            Self::Bt510 => BT510_BLINK.to_string(),
        }
    }

    /// Exact wire string for `command` on this family.
    pub fn command(self, command: SensorCommand) -> String {
        match command {
            SensorCommand::DownloadLogs => commands::DOWNLOAD.to_string(),
            SensorCommand::GetInfo => commands::INFO.to_string(),
            SensorCommand::Blink => self.blink_command(),
            SensorCommand::ToggleButton => commands::DISABLE_BUTTON.to_string(),
            SensorCommand::UpdateLogInterval(seconds) => {
                format!("{}{}", commands::UPDATE_LOG_INTERVAL, seconds)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        assert_eq!(DeviceType::resolve(Some("BT510")).unwrap(), DeviceType::Bt510);
        assert_eq!(
            DeviceType::resolve(Some("BM_A1B2")).unwrap(),
            DeviceType::BlueMaestro
        );
        assert_eq!(
            DeviceType::resolve(None).unwrap_err(),
            SensorError::UnknownDevice(None)
        );
        assert_eq!(
            DeviceType::resolve(Some("")).unwrap_err(),
            SensorError::UnknownDevice(Some(String::new()))
        );
    }

    #[test]
    fn test_resolve_is_case_sensitive() {
        assert_eq!(
            DeviceType::resolve(Some("bt510")).unwrap(),
            DeviceType::BlueMaestro
        );
    }

    #[test]
    fn test_manufacturer_ids() {
        assert_eq!(KNOWN_MANUFACTURER_IDS, [307, 228]);
        assert_eq!(
            DeviceType::from_manufacturer_id(228),
            Some(DeviceType::Bt510)
        );
        assert_eq!(
            DeviceType::from_manufacturer_id(307),
            Some(DeviceType::BlueMaestro)
        );
        assert_eq!(DeviceType::from_manufacturer_id(0x004C), None);
    }

    #[test]
    fn test_uuids() {
        assert_eq!(
            DeviceType::BlueMaestro.service_uuid().to_string(),
            "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert_eq!(
            DeviceType::BlueMaestro.write_characteristic_uuid().to_string(),
            "6e400002-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert_eq!(
            DeviceType::Bt510.notify_characteristic_uuid().to_string(),
            "569a2000-b87f-490c-92cb-11ba5ea5167c"
        );
    }

    #[test]
    fn test_command_strings() {
        let bm = DeviceType::BlueMaestro;
        assert_eq!(bm.command(SensorCommand::DownloadLogs), "*logall");
        assert_eq!(bm.command(SensorCommand::GetInfo), "*info");
        assert_eq!(bm.command(SensorCommand::ToggleButton), "*bd");
        assert_eq!(bm.command(SensorCommand::UpdateLogInterval(300)), "*lint300");
        assert_eq!(bm.command(SensorCommand::Blink), "*blink");
        assert_eq!(
            DeviceType::Bt510.command(SensorCommand::Blink),
            r#"{"jsonrpc":"2.0","method":"ledTest","params":[200],"id":2}"#
        );
    }

    #[test]
    fn test_delimiters() {
        let d = DeviceType::BlueMaestro.log_delimiters();
        assert_eq!(d.even_offset.to_be_bytes(), [0x2E, 0x00]);
        assert_eq!(d.any_offset.to_be_bytes(), [0x2C, 0x2C]);
    }
}
