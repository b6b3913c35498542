//! Sensor-independent domain types: device families, readings, retries and
//! settings.

pub mod device_type;
pub mod models;
pub mod retry;
pub mod settings;
