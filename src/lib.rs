//! Protocol layer for Blue Maestro and Laird BT510 BLE temperature loggers.
//!
//! ```ignore
//! use coldchain_ble::{Base64Codec, SensorService};
//! use std::sync::Arc;
//!
//! let transport = Arc::new(coldchain_ble::infrastructure::bluetooth::btleplug_transport::BtleplugTransport::new().await?);
//! let service = SensorService::new(transport, Arc::new(Base64Codec));
//! let logs = service.download_logs_with_retries("C4:7C:8D:6A:01:02", 3).await?;
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::device_type::DeviceType;
pub use domain::models::{CommandOutcome, InfoLog, SensorCommand, SensorLog, TypedDevice};
pub use error::{ParseError, SensorError, TransportError};
pub use infrastructure::bluetooth::SensorService;
pub use infrastructure::codec::{Base64Codec, Codec};
