//! Object dictionary of the drive.
//!
//! Each entry pairs a (index, sub-index) address with its fixed data type
//! and access rights. Data bytes on the wire are little-endian, per the
//! CANopen convention the drive follows.

use dryve_common::{DriveError, DriveResult};
use std::fmt;

/// Fixed-width data type of an object dictionary entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// Unsigned 8-bit.
    U8,
    /// Signed 8-bit.
    I8,
    /// Unsigned 16-bit.
    U16,
    /// Signed 16-bit.
    I16,
    /// Unsigned 32-bit.
    U32,
    /// Signed 32-bit.
    I32,
}

impl DataType {
    /// Byte width of the type on the wire.
    #[must_use]
    pub fn width(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 => 4,
        }
    }

    /// Inclusive value range the type can represent.
    #[must_use]
    pub fn range(self) -> (i64, i64) {
        match self {
            Self::U8 => (0, i64::from(u8::MAX)),
            Self::I8 => (i64::from(i8::MIN), i64::from(i8::MAX)),
            Self::U16 => (0, i64::from(u16::MAX)),
            Self::I16 => (i64::from(i16::MIN), i64::from(i16::MAX)),
            Self::U32 => (0, i64::from(u32::MAX)),
            Self::I32 => (i64::from(i32::MIN), i64::from(i32::MAX)),
        }
    }
}

/// Access rights of an object dictionary entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Read-only.
    Ro,
    /// Read-write.
    Rw,
    /// Write-only.
    Wo,
}

impl Access {
    /// Whether the entry may be read.
    #[must_use]
    pub fn readable(self) -> bool {
        matches!(self, Self::Ro | Self::Rw)
    }

    /// Whether the entry may be written.
    #[must_use]
    pub fn writable(self) -> bool {
        matches!(self, Self::Rw | Self::Wo)
    }
}

/// A drive parameter addressed by (index, sub-index).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectEntry {
    /// 16-bit object index.
    pub index: u16,
    /// 8-bit sub-index.
    pub subindex: u8,
    /// Fixed data type (byte width and signedness).
    pub dtype: DataType,
    /// Access rights.
    pub access: Access,
    /// Human-readable name, used in error context and logs.
    pub name: &'static str,
}

impl fmt::Display for ObjectEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:04X}:{:02X})", self.name, self.index, self.subindex)
    }
}

const fn entry(
    index: u16,
    subindex: u8,
    dtype: DataType,
    access: Access,
    name: &'static str,
) -> ObjectEntry {
    ObjectEntry {
        index,
        subindex,
        dtype,
        access,
        name,
    }
}

/// Controlword, 0x6040.
pub const CONTROLWORD: ObjectEntry = entry(0x6040, 0, DataType::U16, Access::Rw, "controlword");
/// Statusword, 0x6041.
pub const STATUSWORD: ObjectEntry = entry(0x6041, 0, DataType::U16, Access::Ro, "statusword");
/// Error code of the last fault, 0x603F.
pub const ERROR_CODE: ObjectEntry = entry(0x603F, 0, DataType::U16, Access::Ro, "error code");
/// Error register, 0x1001.
pub const ERROR_REGISTER: ObjectEntry =
    entry(0x1001, 0, DataType::U8, Access::Ro, "error register");
/// Mode of operation, 0x6060.
pub const MODE_OF_OPERATION: ObjectEntry =
    entry(0x6060, 0, DataType::I8, Access::Rw, "mode of operation");
/// Mode of operation display, 0x6061.
pub const MODE_OF_OPERATION_DISPLAY: ObjectEntry = entry(
    0x6061,
    0,
    DataType::I8,
    Access::Ro,
    "mode of operation display",
);
/// Target position, 0x607A.
pub const TARGET_POSITION: ObjectEntry =
    entry(0x607A, 0, DataType::I32, Access::Rw, "target position");
/// Actual position, 0x6064.
pub const ACTUAL_POSITION: ObjectEntry =
    entry(0x6064, 0, DataType::I32, Access::Ro, "actual position");
/// Actual velocity, 0x606C.
pub const ACTUAL_VELOCITY: ObjectEntry =
    entry(0x606C, 0, DataType::I32, Access::Ro, "actual velocity");
/// Profile velocity, 0x6081.
pub const PROFILE_VELOCITY: ObjectEntry =
    entry(0x6081, 0, DataType::U32, Access::Rw, "profile velocity");
/// Profile acceleration, 0x6083.
pub const PROFILE_ACCELERATION: ObjectEntry =
    entry(0x6083, 0, DataType::U32, Access::Rw, "profile acceleration");
/// Profile deceleration, 0x6084.
pub const PROFILE_DECELERATION: ObjectEntry =
    entry(0x6084, 0, DataType::U32, Access::Rw, "profile deceleration");
/// Homing method, 0x6098.
pub const HOMING_METHOD: ObjectEntry = entry(0x6098, 0, DataType::I8, Access::Rw, "homing method");
/// Homing speed during switch search, 0x6099:01.
pub const HOMING_SPEED_SWITCH: ObjectEntry = entry(
    0x6099,
    1,
    DataType::U32,
    Access::Rw,
    "homing speed (switch search)",
);
/// Homing speed during zero search, 0x6099:02.
pub const HOMING_SPEED_ZERO: ObjectEntry = entry(
    0x6099,
    2,
    DataType::U32,
    Access::Rw,
    "homing speed (zero search)",
);
/// Homing acceleration, 0x609A.
pub const HOMING_ACCELERATION: ObjectEntry =
    entry(0x609A, 0, DataType::U32, Access::Rw, "homing acceleration");

/// Encode a value to the entry's little-endian wire representation.
///
/// Fails with a protocol error if the value does not fit the entry's type.
pub fn encode_value(entry: &ObjectEntry, value: i64) -> DriveResult<Vec<u8>> {
    let (min, max) = entry.dtype.range();
    if value < min || value > max {
        return Err(DriveError::Protocol(format!(
            "value {value} out of range [{min}, {max}] for {entry}"
        )));
    }
    let bytes = value.to_le_bytes();
    Ok(bytes[..entry.dtype.width()].to_vec())
}

/// Decode an entry's little-endian wire bytes into a value.
///
/// Fails with a frame error if the byte count does not match the entry's
/// fixed width.
pub fn decode_value(entry: &ObjectEntry, data: &[u8]) -> DriveResult<i64> {
    let width = entry.dtype.width();
    if data.len() != width {
        return Err(DriveError::Frame(format!(
            "{entry} expects {width} data byte(s), got {}",
            data.len()
        )));
    }
    let mut raw = [0u8; 8];
    raw[..width].copy_from_slice(data);
    let unsigned = u64::from_le_bytes(raw);
    let value = match entry.dtype {
        DataType::U8 | DataType::U16 | DataType::U32 => unsigned as i64,
        // Sign-extend from the entry's width.
        DataType::I8 => i64::from(unsigned as u8 as i8),
        DataType::I16 => i64::from(unsigned as u16 as i16),
        DataType::I32 => i64::from(unsigned as u32 as i32),
    };
    Ok(value)
}
