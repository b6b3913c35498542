//! Byte/text helpers used at the transport boundary.
//!
//! Every payload crossing the [`Transport`](crate::infrastructure::bluetooth::transport::Transport)
//! is base64 text, so the protocol layer needs a way to get back to bytes
//! and strings.

use crate::error::CodecError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::ops::RangeInclusive;

pub trait Codec: Send + Sync {
    fn base64_encode(&self, text: &str) -> String;

    fn base64_decode(&self, encoded: &str) -> Result<Vec<u8>, CodecError>;

    fn text_from_base64(&self, encoded: &str) -> Result<String, CodecError>;

    /// Map `value` from `range` onto a 0..=100 scale.
    fn normalize(&self, value: i32, range: RangeInclusive<i32>) -> i32;
}

/// Standard-alphabet base64 with lossy UTF-8 text conversion.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Codec;

impl Codec for Base64Codec {
    fn base64_encode(&self, text: &str) -> String {
        STANDARD.encode(text.as_bytes())
    }

    fn base64_decode(&self, encoded: &str) -> Result<Vec<u8>, CodecError> {
        STANDARD
            .decode(encoded)
            .map_err(|e| CodecError::InvalidBase64(e.to_string()))
    }

    fn text_from_base64(&self, encoded: &str) -> Result<String, CodecError> {
        // Sensor firmware pads replies with NULs and the odd stray byte
        let bytes = self.base64_decode(encoded)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn normalize(&self, value: i32, range: RangeInclusive<i32>) -> i32 {
        let (min, max) = (*range.start(), *range.end());
        if max <= min {
            return 100;
        }
        let scaled = (value - min) as f64 * 100.0 / (max - min) as f64;
        scaled.round().clamp(0.0, 100.0) as i32
    }
}
