//! Modbus TCP frame codec and the drive's SDO envelope.
//!
//! Pure encode/decode, no I/O, no state. Transaction ids are assigned by
//! the caller (the transport's send path owns the counter), which keeps
//! every function here a plain transform.
//!
//! The SDO envelope rides Modbus function 0x2B (encapsulated interface
//! transport) with MEI type 0x0D. After the MEI byte the layout is:
//! direction flag (0 = read, 1 = write), index low byte, index high byte,
//! sub-index, data length, then little-endian data bytes. Responses echo
//! the envelope; a write acknowledgement carries a zero data length. The
//! drive's abort path is a Modbus exception PDU (function | 0x80 followed
//! by the exception code).

use crate::od::ObjectEntry;
use dryve_common::{DriveError, DriveResult};

/// Modbus TCP protocol identifier, always zero.
pub const PROTOCOL_ID: u16 = 0;

/// Function code carrying the SDO envelope.
pub const FUNCTION_OBJECT_TRANSFER: u8 = 0x2B;

/// MEI type of the object transfer envelope.
pub const MEI_OBJECT_TRANSFER: u8 = 0x0D;

/// Largest frame the stack will accept.
pub const MAX_FRAME_LEN: usize = 260;

/// Byte count of the fixed SDO envelope (function code through length byte).
const SDO_ENVELOPE_LEN: usize = 7;

/// Modbus TCP Application Protocol (MBAP) header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Transaction identifier, echoed by the drive.
    pub transaction_id: u16,
    /// Protocol identifier, zero for Modbus.
    pub protocol_id: u16,
    /// Byte count of unit id + PDU that follows the length field.
    pub length: u16,
    /// Unit identifier (drive address).
    pub unit_id: u8,
}

impl MbapHeader {
    /// MBAP header size in bytes.
    pub const SIZE: usize = 7;

    /// Serialize the header to bytes (big-endian).
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..2].copy_from_slice(&self.transaction_id.to_be_bytes());
        bytes[2..4].copy_from_slice(&self.protocol_id.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.length.to_be_bytes());
        bytes[6] = self.unit_id;
        bytes
    }

    /// Parse a header from bytes.
    pub fn from_bytes(bytes: &[u8]) -> DriveResult<Self> {
        if bytes.len() < Self::SIZE {
            return Err(DriveError::Frame(format!(
                "MBAP header too short: {} byte(s)",
                bytes.len()
            )));
        }
        Ok(Self {
            transaction_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            unit_id: bytes[6],
        })
    }
}

/// A decoded Modbus TCP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Transaction identifier from the MBAP header.
    pub transaction_id: u16,
    /// Unit identifier from the MBAP header.
    pub unit_id: u8,
    /// Protocol data unit: function code followed by its payload.
    pub pdu: Vec<u8>,
}

impl Frame {
    /// Function code of the PDU.
    #[must_use]
    pub fn function(&self) -> u8 {
        self.pdu.first().copied().unwrap_or(0)
    }
}

/// Encode a complete frame: MBAP header with a correct length field,
/// followed by the PDU.
#[must_use]
pub fn encode_frame(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let header = MbapHeader {
        transaction_id,
        protocol_id: PROTOCOL_ID,
        length: (pdu.len() + 1) as u16, // +1 for the unit id
        unit_id,
    };
    let mut frame = Vec::with_capacity(MbapHeader::SIZE + pdu.len());
    frame.extend_from_slice(&header.to_bytes());
    frame.extend_from_slice(pdu);
    frame
}

/// Decode a complete frame, validating the header invariants.
///
/// Fails with a frame error if the buffer is shorter than the minimum
/// frame, the protocol identifier is wrong, or the declared length does
/// not equal the actual trailing byte count.
pub fn decode_frame(bytes: &[u8]) -> DriveResult<Frame> {
    if bytes.len() < MbapHeader::SIZE + 1 {
        return Err(DriveError::Frame(format!(
            "frame too short: {} byte(s)",
            bytes.len()
        )));
    }
    if bytes.len() > MAX_FRAME_LEN {
        return Err(DriveError::Frame(format!(
            "frame too long: {} bytes",
            bytes.len()
        )));
    }

    let header = MbapHeader::from_bytes(bytes)?;
    if header.protocol_id != PROTOCOL_ID {
        return Err(DriveError::Frame(format!(
            "unexpected protocol id {}",
            header.protocol_id
        )));
    }
    let declared = header.length as usize;
    let actual = bytes.len() - MbapHeader::SIZE + 1; // unit id + PDU
    if declared != actual {
        return Err(DriveError::Frame(format!(
            "length field says {declared} byte(s), frame carries {actual}"
        )));
    }

    Ok(Frame {
        transaction_id: header.transaction_id,
        unit_id: header.unit_id,
        pdu: bytes[MbapHeader::SIZE..].to_vec(),
    })
}

/// A decoded SDO request envelope, as seen by the drive side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdoRequest {
    /// Write (true) or read (false).
    pub is_write: bool,
    /// Object index.
    pub index: u16,
    /// Object sub-index.
    pub subindex: u8,
    /// Requested byte width (reads) or written byte count (writes).
    pub length: u8,
    /// Data bytes, empty for reads.
    pub data: Vec<u8>,
}

/// A decoded SDO response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdoResponse {
    /// Echoed direction flag.
    pub is_write: bool,
    /// Echoed object index.
    pub index: u16,
    /// Echoed object sub-index.
    pub subindex: u8,
    /// Read data, empty for a write acknowledgement.
    pub data: Vec<u8>,
}

/// Outcome of decoding an SDO response PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdoPayload {
    /// A normal response envelope.
    Response(SdoResponse),
    /// The drive rejected the access; carries the abort code.
    Abort(u8),
}

fn sdo_envelope(is_write: bool, entry: &ObjectEntry, length: u8) -> Vec<u8> {
    vec![
        FUNCTION_OBJECT_TRANSFER,
        MEI_OBJECT_TRANSFER,
        u8::from(is_write),
        (entry.index & 0xFF) as u8,
        (entry.index >> 8) as u8,
        entry.subindex,
        length,
    ]
}

/// Build the PDU requesting a read of `entry`.
#[must_use]
pub fn sdo_read_request(entry: &ObjectEntry) -> Vec<u8> {
    sdo_envelope(false, entry, entry.dtype.width() as u8)
}

/// Build the PDU writing `data` (already encoded to the entry's width)
/// to `entry`.
#[must_use]
pub fn sdo_write_request(entry: &ObjectEntry, data: &[u8]) -> Vec<u8> {
    let mut pdu = sdo_envelope(true, entry, data.len() as u8);
    pdu.extend_from_slice(data);
    pdu
}

fn check_envelope(pdu: &[u8]) -> DriveResult<()> {
    if pdu.len() < SDO_ENVELOPE_LEN {
        return Err(DriveError::Frame(format!(
            "SDO envelope truncated: {} byte(s)",
            pdu.len()
        )));
    }
    if pdu[0] != FUNCTION_OBJECT_TRANSFER {
        return Err(DriveError::Frame(format!(
            "unexpected function code 0x{:02X}",
            pdu[0]
        )));
    }
    if pdu[1] != MEI_OBJECT_TRANSFER {
        return Err(DriveError::Frame(format!(
            "unexpected MEI type 0x{:02X}",
            pdu[1]
        )));
    }
    if pdu[2] > 1 {
        return Err(DriveError::Frame(format!(
            "bad direction flag 0x{:02X}",
            pdu[2]
        )));
    }
    Ok(())
}

/// Decode an SDO request PDU. The exact inverse of the request builders;
/// used by drive-side implementations answering the wire protocol.
pub fn decode_sdo_request(pdu: &[u8]) -> DriveResult<SdoRequest> {
    check_envelope(pdu)?;
    let is_write = pdu[2] == 1;
    let length = pdu[6];
    let data = &pdu[SDO_ENVELOPE_LEN..];
    if is_write {
        if data.len() != length as usize {
            return Err(DriveError::Frame(format!(
                "write request declares {length} data byte(s), carries {}",
                data.len()
            )));
        }
    } else if !data.is_empty() {
        return Err(DriveError::Frame(format!(
            "read request carries {} unexpected data byte(s)",
            data.len()
        )));
    }
    Ok(SdoRequest {
        is_write,
        index: u16::from(pdu[3]) | (u16::from(pdu[4]) << 8),
        subindex: pdu[5],
        length,
        data: data.to_vec(),
    })
}

/// Decode an SDO response PDU.
///
/// A Modbus exception PDU maps to [`SdoPayload::Abort`]; anything else
/// must be a well-formed envelope whose length byte equals the trailing
/// data byte count, or the decode fails with a frame error.
pub fn decode_sdo_response(pdu: &[u8]) -> DriveResult<SdoPayload> {
    if pdu.len() >= 2 && pdu[0] & 0x80 != 0 {
        return Ok(SdoPayload::Abort(pdu[1]));
    }
    check_envelope(pdu)?;
    let length = pdu[6] as usize;
    let data = &pdu[SDO_ENVELOPE_LEN..];
    if data.len() != length {
        return Err(DriveError::Frame(format!(
            "response declares {length} data byte(s), carries {}",
            data.len()
        )));
    }
    Ok(SdoPayload::Response(SdoResponse {
        is_write: pdu[2] == 1,
        index: u16::from(pdu[3]) | (u16::from(pdu[4]) << 8),
        subindex: pdu[5],
        data: data.to_vec(),
    }))
}
