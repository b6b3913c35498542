//! Sensor Frame Protocol
//!
//! Encodes outgoing commands and decodes the notification frames that come
//! back, for both sensor families.

use crate::domain::device_type::DeviceType;
use crate::domain::models::{InfoLog, RawFrame, SensorLog};
use crate::error::ParseError;
use crate::infrastructure::codec::Codec;
use std::ops::RangeInclusive;
use tracing::{debug, trace};

/// Raw battery readings outside this range are discarded.
pub const BATTERY_RANGE: RangeInclusive<i32> = 70..=100;

const BATTERY_PREFIX: &str = "Batt lvl: ";
const BUTTON_PREFIX: &str = "Btn on/off: ";

/// What a single-frame reply must contain to count as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckPattern {
    /// `*blink`, `*bd` and the BT510 LED test reply "OK"
    Ok,
    /// `*lint` echoes the new interval
    Interval,
}

impl AckPattern {
    fn needle(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Interval => "interval",
        }
    }
}

/// Encode a command string for the write characteristic
pub fn encode_command(codec: &dyn Codec, command: &str) -> String {
    codec.base64_encode(command)
}

fn frame_bytes(codec: &dyn Codec, index: usize, frame: &RawFrame) -> Result<Vec<u8>, ParseError> {
    codec
        .base64_decode(frame.as_str())
        .map_err(|source| ParseError::Frame { index, source })
}

fn frame_text(codec: &dyn Codec, index: usize, frame: &RawFrame) -> Result<String, ParseError> {
    codec
        .text_from_base64(frame.as_str())
        .map_err(|source| ParseError::Frame { index, source })
}

fn read_i16_be(buffer: &[u8], offset: usize) -> Option<i16> {
    let bytes = buffer.get(offset..offset + 2)?;
    Some(i16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Decode a `*logall` download.
///
/// # Log Layout
///
/// ```text
/// frame 0        : header / command echo (discarded)
/// frames 1..n    : concatenated into one buffer
///
/// buffer         : [i16 BE temperature * 10] ... [delimiter] [trailer]
/// ```
pub fn decode_logs(
    codec: &dyn Codec,
    device_type: DeviceType,
    frames: &[RawFrame],
) -> Result<Vec<SensorLog>, ParseError> {
    let mut buffer = Vec::new();
    for (index, frame) in frames.iter().enumerate().skip(1) {
        buffer.extend(frame_bytes(codec, index, frame)?);
    }

    #[cfg(debug_assertions)]
    trace!("Log buffer: {:02X?}", &buffer);

    let boundary = find_log_boundary(device_type, &buffer);
    let divisor = device_type.temperature_divisor();

    // Words are read from the full buffer, so a boundary at an odd offset
    // still yields the word straddling it.
    let logs: Vec<SensorLog> = (0..boundary)
        .step_by(2)
        .filter_map(|offset| read_i16_be(&buffer, offset))
        .map(|raw| SensorLog {
            temperature: raw as f64 / divisor,
        })
        .collect();

    debug!(
        "Decoded {} log records from {} bytes (boundary {})",
        logs.len(),
        buffer.len(),
        boundary
    );
    Ok(logs)
}

/// Offset where valid log data ends.
///
/// The even-offset delimiter is only recognised on word boundaries while
/// the any-offset delimiter matches anywhere, including mid-word. Device
/// captures depend on exactly this search, so it must not be "fixed"
/// without new captures. Returns the buffer length when neither is found.
pub fn find_log_boundary(device_type: DeviceType, buffer: &[u8]) -> usize {
    let delimiters = device_type.log_delimiters();
    (0..buffer.len())
        .find(|&offset| match read_i16_be(buffer, offset) {
            Some(word) => {
                (offset % 2 == 0 && word == delimiters.even_offset)
                    || word == delimiters.any_offset
            }
            None => false,
        })
        .unwrap_or(buffer.len())
}

/// Text following the first occurrence of `prefix` that is directly
/// followed by a digit.
fn after_prefix<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    text.match_indices(prefix)
        .map(|(start, _)| &text[start + prefix.len()..])
        .find(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
}

fn parse_battery_level(codec: &dyn Codec, text: &str) -> Option<i32> {
    let digits: String = after_prefix(text, BATTERY_PREFIX)?
        .chars()
        .take_while(char::is_ascii_digit)
        .take(3)
        .collect();
    let level: i32 = digits.parse().ok()?;
    BATTERY_RANGE
        .contains(&level)
        .then(|| codec.normalize(level, BATTERY_RANGE))
}

fn parse_is_disabled(text: &str) -> Option<bool> {
    let rest = after_prefix(text, BUTTON_PREFIX)?;
    Some(rest.starts_with('1'))
}

/// Decode an `*info` reply. Each frame may carry either field; the last
/// frame that mentions a field wins.
pub fn decode_info(codec: &dyn Codec, frames: &[RawFrame]) -> Result<InfoLog, ParseError> {
    frames
        .iter()
        .enumerate()
        .try_fold(InfoLog::default(), |mut info, (index, frame)| {
            let text = frame_text(codec, index, frame)?;
            trace!("Info frame {}: {:?}", index, text);

            if let Some(level) = parse_battery_level(codec, &text) {
                info.battery_level = Some(level);
            }
            if let Some(disabled) = parse_is_disabled(&text) {
                info.is_disabled = disabled;
            }
            Ok(info)
        })
}

/// Decode the single reply of an acknowledged command.
pub fn decode_ack(
    codec: &dyn Codec,
    frame: &RawFrame,
    pattern: AckPattern,
) -> Result<bool, ParseError> {
    let text = frame_text(codec, 0, frame)?;
    debug!("Command reply: {:?}", text);
    Ok(text.to_ascii_lowercase().contains(pattern.needle()))
}
