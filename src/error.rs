//! Error types shared by the protocol layer.

use thiserror::Error;
use uuid::Uuid;

/// Failures reported by the radio transport, passed through unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("no Bluetooth adapter available: {0}")]
    Adapter(String),

    #[error("device {0} not found")]
    DeviceNotFound(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("service discovery failed: {0}")]
    Discovery(String),

    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("write failed: {0}")]
    Write(String),

    #[error("subscription failed: {0}")]
    Subscribe(String),

    #[error("scan failed: {0}")]
    Scan(String),
}

/// Failures of the byte/text codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),
}

/// Raised by frame decoders on data that cannot be interpreted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("frame {index}: {source}")]
    Frame {
        index: usize,
        #[source]
        source: CodecError,
    },
}

/// Error surfaced by every sensor operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    #[error("unknown device type for name {0:?}")]
    UnknownDevice(Option<String>),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("command {command:?} failed: no response payload")]
    CommandFailed { command: String },

    #[error("parsing failed: {0}")]
    Parse(#[from] ParseError),

    #[error("device {0} already has a command in flight")]
    DeviceBusy(String),

    #[error("retry budget exhausted before any attempt was made")]
    NoAttempts,
}

pub type Result<T, E = SensorError> = std::result::Result<T, E>;
