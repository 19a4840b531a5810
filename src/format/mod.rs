//! Message format definitions.
//!
//! A [`MessageFormat`] describes the single frame shape the scanner knows how
//! to find: a fixed `message_size`, up to four sync bytes at the start of the
//! frame, one or two end bytes at the end of it, and a timestamp field at a
//! fixed offset.
//!
//! ```text
//!  0    1    2    3                               size-2 size-1
//! +----+----+----+----+-----------+--------------+------+------+
//! | S1 | S2 | S3 | S4 | ...       | timestamp    | E1   | E2   |
//! +----+----+----+----+-----------+--------------+------+------+
//!                                  ^ timestamp_byte_offset
//! ```
//!
//! S1, S2 and E1 are mandatory anchors. S3, S4 and E2 set to `0` are
//! wildcards: those bytes are not checked.
//!
//! Formats arrive from the configuration collaborator as a
//! [`MessageFormatRecord`] (serde-friendly, loosely typed) and become an
//! immutable, validated [`MessageFormat`] through [`MessageFormat::from_record`]
//! or [`MessageFormatRecord::build`].

pub mod catalog;

pub use catalog::FormatCatalog;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::{ReplayError, Result};

/// Maximum number of sync bytes a format can declare.
pub const MAX_SYNC_BYTES: usize = 4;

/// Maximum number of end bytes a format can declare.
pub const MAX_END_BYTES: usize = 2;

/// Smallest frame that holds every sync slot and both end slots.
pub const MIN_MESSAGE_SIZE: usize = MAX_SYNC_BYTES;

/// Byte order of the timestamp field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// Most significant byte first (network order).
    #[default]
    Big,
    /// Least significant byte first.
    Little,
}

/// Loosely typed message format as supplied by the configuration collaborator.
///
/// Sync and end bytes may be written as integers (`170`) or as decimal/hex
/// strings (`"0xAA"`). Timestamp scaling may be a number or a power
/// expression such as `"10^6"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageFormatRecord {
    pub name: String,
    #[serde(deserialize_with = "deserialize_byte_list")]
    pub sync_bytes: Vec<u8>,
    #[serde(deserialize_with = "deserialize_byte_list")]
    pub end_bytes: Vec<u8>,
    pub message_size: u32,
    pub timestamp_byte_offset: u32,
    pub timestamp_size: u32,
    #[serde(default = "default_scaling", deserialize_with = "deserialize_scaling")]
    pub timestamp_scaling: f64,
    #[serde(default)]
    pub byte_order: ByteOrder,
}

fn default_scaling() -> f64 {
    1.0
}

impl MessageFormatRecord {
    /// Start a record with the given name and frame size.
    ///
    /// The timestamp defaults to a 4-byte field at offset 0 with scaling 1.
    pub fn new(name: impl Into<String>, message_size: u32) -> Self {
        Self {
            name: name.into(),
            sync_bytes: Vec::new(),
            end_bytes: Vec::new(),
            message_size,
            timestamp_byte_offset: 0,
            timestamp_size: 4,
            timestamp_scaling: 1.0,
            byte_order: ByteOrder::Big,
        }
    }

    /// Set the sync bytes (up to four).
    pub fn sync(mut self, bytes: &[u8]) -> Self {
        self.sync_bytes = bytes.to_vec();
        self
    }

    /// Set the end bytes (up to two).
    pub fn end(mut self, bytes: &[u8]) -> Self {
        self.end_bytes = bytes.to_vec();
        self
    }

    /// Set the timestamp field location, width and divisor.
    pub fn timestamp(mut self, offset: u32, size: u32, scaling: f64) -> Self {
        self.timestamp_byte_offset = offset;
        self.timestamp_size = size;
        self.timestamp_scaling = scaling;
        self
    }

    /// Set the timestamp byte order.
    pub fn byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    /// Validate the record into an immutable [`MessageFormat`].
    pub fn build(&self) -> Result<MessageFormat> {
        MessageFormat::from_record(self)
    }
}

/// A validated, immutable frame shape.
#[derive(Debug, Clone)]
pub struct MessageFormat {
    name: String,
    sync: [u8; MAX_SYNC_BYTES],
    end: [u8; MAX_END_BYTES],
    message_size: usize,
    timestamp_offset: usize,
    timestamp_size: usize,
    scaling: f64,
    byte_order: ByteOrder,
}

impl MessageFormat {
    /// Validate a record.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::InvalidFormat`] if:
    /// - the name is blank
    /// - more than four sync bytes or two end bytes are given
    /// - sync byte 1, sync byte 2 or end byte 1 is zero (or missing)
    /// - `message_size <= timestamp_byte_offset + timestamp_size`
    /// - the scaling is zero or not finite
    pub fn from_record(record: &MessageFormatRecord) -> Result<Self> {
        let name = record.name.trim().to_string();
        if name.is_empty() {
            return Err(ReplayError::invalid_format("<unnamed>", "name must not be empty"));
        }

        if record.sync_bytes.len() > MAX_SYNC_BYTES {
            return Err(ReplayError::invalid_format(
                &name,
                format!("{} sync bytes given, at most {}", record.sync_bytes.len(), MAX_SYNC_BYTES),
            ));
        }
        if record.end_bytes.len() > MAX_END_BYTES {
            return Err(ReplayError::invalid_format(
                &name,
                format!("{} end bytes given, at most {}", record.end_bytes.len(), MAX_END_BYTES),
            ));
        }

        let mut sync = [0u8; MAX_SYNC_BYTES];
        sync[..record.sync_bytes.len()].copy_from_slice(&record.sync_bytes);
        let mut end = [0u8; MAX_END_BYTES];
        end[..record.end_bytes.len()].copy_from_slice(&record.end_bytes);

        if sync[0] == 0 || sync[1] == 0 {
            return Err(ReplayError::invalid_format(&name, "sync bytes 1 and 2 must be non-zero"));
        }
        if end[0] == 0 {
            return Err(ReplayError::invalid_format(&name, "end byte 1 must be non-zero"));
        }

        if (record.message_size as usize) < MIN_MESSAGE_SIZE {
            return Err(ReplayError::invalid_format(
                &name,
                format!(
                    "message size {} cannot hold the sync and end slots (at least {} bytes)",
                    record.message_size, MIN_MESSAGE_SIZE
                ),
            ));
        }

        let timestamp_end =
            u64::from(record.timestamp_byte_offset) + u64::from(record.timestamp_size);
        if u64::from(record.message_size) <= timestamp_end {
            return Err(ReplayError::invalid_format(
                &name,
                format!(
                    "message size {} must exceed timestamp offset {} + size {}",
                    record.message_size, record.timestamp_byte_offset, record.timestamp_size
                ),
            ));
        }

        if !record.timestamp_scaling.is_finite() || record.timestamp_scaling == 0.0 {
            return Err(ReplayError::invalid_format(
                &name,
                format!("timestamp scaling {} must be finite and non-zero", record.timestamp_scaling),
            ));
        }

        if !matches!(record.timestamp_size, 4 | 8) {
            warn!(
                "Format '{}' uses a {}-byte timestamp; only 4 and 8 are decoded, all timestamps will read as 0.0",
                name, record.timestamp_size
            );
        }

        Ok(Self {
            name,
            sync,
            end,
            message_size: record.message_size as usize,
            timestamp_offset: record.timestamp_byte_offset as usize,
            timestamp_size: record.timestamp_size as usize,
            scaling: record.timestamp_scaling,
            byte_order: record.byte_order,
        })
    }

    /// Convert back into a record, e.g. for exporting a catalog.
    pub fn to_record(&self) -> MessageFormatRecord {
        MessageFormatRecord {
            name: self.name.clone(),
            sync_bytes: self.sync.to_vec(),
            end_bytes: self.end.to_vec(),
            message_size: self.message_size as u32,
            timestamp_byte_offset: self.timestamp_offset as u32,
            timestamp_size: self.timestamp_size as u32,
            timestamp_scaling: self.scaling,
            byte_order: self.byte_order,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sync bytes, zero meaning "not checked" for slots 3 and 4.
    pub fn sync_bytes(&self) -> [u8; MAX_SYNC_BYTES] {
        self.sync
    }

    /// End bytes, zero meaning "not checked" for slot 2.
    pub fn end_bytes(&self) -> [u8; MAX_END_BYTES] {
        self.end
    }

    pub fn message_size(&self) -> usize {
        self.message_size
    }

    pub fn timestamp_byte_offset(&self) -> usize {
        self.timestamp_offset
    }

    pub fn timestamp_size(&self) -> usize {
        self.timestamp_size
    }

    pub fn timestamp_scaling(&self) -> f64 {
        self.scaling
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Whether a frame of this format starts at `window[0]`.
    ///
    /// Returns `false` if the window is shorter than `message_size`.
    #[inline]
    pub fn matches_at(&self, window: &[u8]) -> bool {
        let size = self.message_size;
        if window.len() < size {
            return false;
        }
        window[0] == self.sync[0]
            && window[1] == self.sync[1]
            && (self.sync[2] == 0 || window[2] == self.sync[2])
            && (self.sync[3] == 0 || window[3] == self.sync[3])
            && window[size - 2] == self.end[0]
            && (self.end[1] == 0 || window[size - 1] == self.end[1])
    }

    /// Decode and scale the timestamp of a frame starting at `frame[0]`.
    ///
    /// 4-byte fields are unsigned integers, 8-byte fields IEEE-754 doubles.
    /// Any other width, or a frame too short to hold the field, yields `0.0`.
    pub fn decode_timestamp(&self, frame: &[u8]) -> f64 {
        let start = self.timestamp_offset;
        let Some(field) = frame.get(start..start + self.timestamp_size) else {
            return 0.0;
        };

        let raw = match self.timestamp_size {
            4 => {
                let bytes: [u8; 4] = match field.try_into() {
                    Ok(bytes) => bytes,
                    Err(_) => return 0.0,
                };
                f64::from(match self.byte_order {
                    ByteOrder::Big => u32::from_be_bytes(bytes),
                    ByteOrder::Little => u32::from_le_bytes(bytes),
                })
            }
            8 => {
                let bytes: [u8; 8] = match field.try_into() {
                    Ok(bytes) => bytes,
                    Err(_) => return 0.0,
                };
                match self.byte_order {
                    ByteOrder::Big => f64::from_be_bytes(bytes),
                    ByteOrder::Little => f64::from_le_bytes(bytes),
                }
            }
            _ => return 0.0,
        };

        raw / self.scaling
    }

    /// Field-wise comparison of everything except the name.
    pub(crate) fn same_layout(&self, other: &MessageFormat) -> bool {
        self.sync == other.sync
            && self.end == other.end
            && self.message_size == other.message_size
            && self.timestamp_offset == other.timestamp_offset
            && self.timestamp_size == other.timestamp_size
            && self.scaling.to_bits() == other.scaling.to_bits()
            && self.byte_order == other.byte_order
    }
}

impl TryFrom<MessageFormatRecord> for MessageFormat {
    type Error = ReplayError;

    fn try_from(record: MessageFormatRecord) -> Result<Self> {
        MessageFormat::from_record(&record)
    }
}

/// Parse a byte written as decimal (`"170"`) or hex (`"0xAA"`).
///
/// Blank input is `0`, i.e. "not checked".
pub fn parse_byte(text: &str) -> std::result::Result<u8, String> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(0);
    }
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => text.parse::<u8>(),
    };
    parsed.map_err(|e| format!("invalid byte '{}': {}", text, e))
}

/// Parse a timestamp divisor: a plain number or a `base^exponent` expression.
pub fn parse_scaling(text: &str) -> std::result::Result<f64, String> {
    let text = text.trim();
    let value = match text.split_once('^') {
        Some((base, exponent)) => {
            let base: f64 =
                base.trim().parse().map_err(|e| format!("invalid base in '{}': {}", text, e))?;
            let exponent: f64 = exponent
                .trim()
                .parse()
                .map_err(|e| format!("invalid exponent in '{}': {}", text, e))?;
            base.powf(exponent)
        }
        None => text.parse().map_err(|e| format!("invalid scaling '{}': {}", text, e))?,
    };
    Ok(value)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ByteValue {
    Int(u8),
    Text(String),
}

fn deserialize_byte_list<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<ByteValue>::deserialize(deserializer)?;
    values
        .into_iter()
        .map(|value| match value {
            ByteValue::Int(byte) => Ok(byte),
            ByteValue::Text(text) => parse_byte(&text).map_err(serde::de::Error::custom),
        })
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScalingValue {
    Number(f64),
    Text(String),
}

fn deserialize_scaling<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match ScalingValue::deserialize(deserializer)? {
        ScalingValue::Number(value) => Ok(value),
        ScalingValue::Text(text) => parse_scaling(&text).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nav_record() -> MessageFormatRecord {
        MessageFormatRecord::new("nav", 16).sync(&[0xAA, 0x55]).end(&[0x0D, 0x0A]).timestamp(4, 4, 1.0)
    }

    fn frame_with_timestamp(format: &MessageFormat, field: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; format.message_size()];
        let start = format.timestamp_byte_offset();
        frame[start..start + field.len()].copy_from_slice(field);
        frame
    }

    #[test]
    fn four_byte_timestamp_is_scaled() {
        let format = nav_record().build().unwrap();
        let frame = frame_with_timestamp(&format, &[0x00, 0x00, 0x00, 0x0A]);
        assert_eq!(format.decode_timestamp(&frame), 10.0);

        let halved = nav_record().timestamp(4, 4, 2.0).build().unwrap();
        assert_eq!(halved.decode_timestamp(&frame), 5.0);
    }

    #[test]
    fn little_endian_timestamps_decode() {
        let format = nav_record().byte_order(ByteOrder::Little).build().unwrap();
        let frame = frame_with_timestamp(&format, &[0x0A, 0x00, 0x00, 0x00]);
        assert_eq!(format.decode_timestamp(&frame), 10.0);
    }

    #[test]
    fn eight_byte_timestamp_is_a_double() {
        let format = MessageFormatRecord::new("imu", 24)
            .sync(&[0x7E, 0x7E])
            .end(&[0xFF])
            .timestamp(8, 8, 1000.0)
            .build()
            .unwrap();
        let frame = frame_with_timestamp(&format, &1500.0f64.to_be_bytes());
        assert!((format.decode_timestamp(&frame) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn unsupported_timestamp_width_reads_zero() {
        let format = nav_record().timestamp(4, 2, 1.0).build().unwrap();
        let frame = frame_with_timestamp(&format, &[0x12, 0x34]);
        assert_eq!(format.decode_timestamp(&frame), 0.0);
    }

    #[test]
    fn wildcard_slots_are_not_checked() {
        let format = nav_record().build().unwrap();
        let mut frame = vec![0u8; 16];
        frame[0] = 0xAA;
        frame[1] = 0x55;
        frame[14] = 0x0D;
        frame[15] = 0x0A;
        assert!(format.matches_at(&frame));

        let loose = MessageFormatRecord::new("loose", 16)
            .sync(&[0xAA, 0x55, 0, 0])
            .end(&[0x0D, 0])
            .timestamp(4, 4, 1.0)
            .build()
            .unwrap();
        for (b2, b3, last) in [(0x00, 0x00, 0x00), (0x13, 0x37, 0xFF), (0xAA, 0x55, 0x0D)] {
            frame[2] = b2;
            frame[3] = b3;
            frame[15] = last;
            assert!(loose.matches_at(&frame), "bytes {b2:#x} {b3:#x} {last:#x}");
        }

        frame[14] = 0x0E;
        assert!(!loose.matches_at(&frame));
        assert!(!loose.matches_at(&frame[..15]));
    }

    #[test]
    fn checked_slots_must_match() {
        let strict = MessageFormatRecord::new("strict", 16)
            .sync(&[0xAA, 0x55, 0x01, 0x02])
            .end(&[0x0D, 0x0A])
            .timestamp(4, 4, 1.0)
            .build()
            .unwrap();
        let mut frame = vec![0u8; 16];
        frame[..4].copy_from_slice(&[0xAA, 0x55, 0x01, 0x02]);
        frame[14] = 0x0D;
        frame[15] = 0x0A;
        assert!(strict.matches_at(&frame));

        frame[3] = 0x03;
        assert!(!strict.matches_at(&frame));
        frame[3] = 0x02;
        frame[15] = 0x0B;
        assert!(!strict.matches_at(&frame));
    }

    #[test]
    fn mandatory_anchors_are_enforced() {
        let missing_sync = nav_record().sync(&[0xAA]).build();
        assert!(matches!(missing_sync, Err(ReplayError::InvalidFormat { .. })));

        let zero_end = nav_record().end(&[0x00, 0x0A]).build();
        assert!(matches!(zero_end, Err(ReplayError::InvalidFormat { .. })));

        let too_many = nav_record().sync(&[1, 2, 3, 4, 5]).build();
        assert!(matches!(too_many, Err(ReplayError::InvalidFormat { .. })));
    }

    #[test]
    fn timestamp_must_fit_inside_the_frame() {
        assert!(nav_record().timestamp(12, 4, 1.0).build().is_err());
        assert!(nav_record().timestamp(11, 4, 1.0).build().is_ok());
        assert!(nav_record().timestamp(u32::MAX, 8, 1.0).build().is_err());
    }

    #[test]
    fn frame_must_hold_every_anchor_slot() {
        let tiny = MessageFormatRecord::new("tiny", 1).sync(&[1, 2]).end(&[3]).timestamp(0, 0, 1.0).build();
        assert!(matches!(tiny, Err(ReplayError::InvalidFormat { .. })));

        let short = MessageFormatRecord::new("short", 3).sync(&[1, 2, 3, 4]).end(&[5]).timestamp(0, 2, 1.0).build();
        assert!(matches!(short, Err(ReplayError::InvalidFormat { .. })));

        let smallest = MessageFormatRecord::new("smallest", 4).sync(&[1, 2]).end(&[3]).timestamp(0, 0, 1.0).build();
        let format = smallest.unwrap();
        assert!(format.matches_at(&[1, 2, 3, 9]));
        assert!(!format.matches_at(&[1, 2, 9, 9]));
    }

    #[test]
    fn scaling_must_be_usable() {
        assert!(nav_record().timestamp(4, 4, 0.0).build().is_err());
        assert!(nav_record().timestamp(4, 4, f64::NAN).build().is_err());
        assert!(nav_record().timestamp(4, 4, -1.0).build().is_ok());
    }

    #[test]
    fn byte_and_scaling_text_parsing() {
        assert_eq!(parse_byte("0xAA"), Ok(0xAA));
        assert_eq!(parse_byte("0X0d"), Ok(0x0D));
        assert_eq!(parse_byte("85"), Ok(85));
        assert_eq!(parse_byte(""), Ok(0));
        assert!(parse_byte("0x1FF").is_err());
        assert!(parse_byte("nope").is_err());

        assert_eq!(parse_scaling("10^6"), Ok(1_000_000.0));
        assert_eq!(parse_scaling(" 2 ^ 10 "), Ok(1024.0));
        assert_eq!(parse_scaling("1000"), Ok(1000.0));
        assert!(parse_scaling("ten").is_err());
    }

    #[test]
    fn record_deserializes_from_loose_yaml() {
        let yaml = r#"
name: GPS
sync_bytes: ["0xB5", 98]
end_bytes: ["0x0D"]
message_size: 32
timestamp_byte_offset: 8
timestamp_size: 8
timestamp_scaling: "10^3"
byte_order: little
"#;
        let record: MessageFormatRecord = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(record.sync_bytes, vec![0xB5, 98]);
        assert_eq!(record.end_bytes, vec![0x0D]);
        assert_eq!(record.timestamp_scaling, 1000.0);
        assert_eq!(record.byte_order, ByteOrder::Little);

        let format = record.build().unwrap();
        assert_eq!(format.sync_bytes(), [0xB5, 98, 0, 0]);
        assert_eq!(format.end_bytes(), [0x0D, 0]);
        assert_eq!(format.to_record().build().map(|f| f.same_layout(&format)).ok(), Some(true));
    }
}
