//! Bluetooth Module
//!
//! Talks to Blue Maestro and BT510 temperature loggers over BLE.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     SensorService                        │
//! │  (Public command surface, wrapped by with_retries)       │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │  Scanner  │  │ Connection │  │ Protocol │
//! │           │  │            │  │          │
//! │ - Mfr ID  │  │ - Lease    │  │ - Encode │
//! │   filter  │  │ - Write +  │  │ - Logs   │
//! │           │  │   monitor  │  │ - Info   │
//! └─────┬─────┘  └─────┬──────┘  └──────────┘
//!       │              │
//!       └──────┬───────┘
//!              ▼
//!       ┌────────────┐
//!       │ Transport  │  (btleplug, mock, or your own)
//!       └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`transport`] - Radio transport interface and notification subscriptions
//! - [`protocol`] - Command encoding and frame decoding
//! - [`scanner`] - Manufacturer-ID scan filter
//! - [`connection`] - Write-then-monitor command channel
//! - [`service`] - Main service coordinator
//! - [`mock`] - Scripted in-memory transport

#[cfg(feature = "btleplug")]
pub mod btleplug_transport;
pub mod connection;
pub mod mock;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod transport;

// Re-export main service for convenience
pub use service::SensorService;
