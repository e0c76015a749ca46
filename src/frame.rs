//! Modbus frame encodings
//!
//! Modbus TCP and RTU share the same application layer (PDU) and differ only
//! in how the PDU is wrapped on the wire:
//! - **TCP**: MBAP Header (transaction id, protocol id, length, unit id) + PDU
//! - **RTU**: Slave ID + PDU + CRC-16 (little-endian)
//!
//! Both encodings implement [`Framer`], so dispatch and response writing never
//! look at checksums or length prefixes. [`Frame`] carries either variant
//! through the request pipeline.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_16_MODBUS};

use crate::constants::{
    EXCEPTION_FLAG, MAX_MBAP_LENGTH, MBAP_HEADER_LEN, RTU_MIN_FRAME_LEN, TCP_MIN_FRAME_LEN,
};
use crate::error::FrameError;
use crate::exception::Exception;

/// CRC-16/MODBUS (reflected polynomial 0xA001, init 0xFFFF)
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Compute the Modbus RTU checksum over `data`
#[inline]
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Format bytes as space-separated hex for packet logging
pub fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Capability contract shared by every frame encoding
pub trait Framer {
    /// Function code of this frame
    fn function_code(&self) -> u8;

    /// Unit identifier (slave id)
    fn unit_id(&self) -> u8;

    /// Bytes following the function code (excluding any trailer)
    fn payload(&self) -> &[u8];

    /// Response-shaped copy carrying `data` as payload; header fields untouched
    fn with_data(&self, data: Vec<u8>) -> Self
    where
        Self: Sized;

    /// Response-shaped copy with the exception flag set and the exception code as payload
    fn with_exception(&self, exception: Exception) -> Self
    where
        Self: Sized;

    /// Wire-exact bytes; trailing checksum or length field recomputed
    fn serialize(&self) -> Bytes;

    /// Whether this frame is an exception response
    fn is_exception(&self) -> bool {
        self.function_code() & EXCEPTION_FLAG != 0
    }
}

// ============================================================================
// RTU
// ============================================================================

/// RTU encoding: `[unit id][function][payload...][crc lo][crc hi]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtuFrame {
    unit_id: u8,
    function: u8,
    data: Vec<u8>,
}

impl RtuFrame {
    /// Build a frame from its parts
    pub fn new(unit_id: u8, function: u8, data: Vec<u8>) -> Self {
        Self {
            unit_id,
            function,
            data,
        }
    }

    /// Parse and validate raw RTU bytes
    pub fn decode(raw: &[u8]) -> Result<Self, FrameError> {
        if raw.len() < RTU_MIN_FRAME_LEN {
            return Err(FrameError::TooShort {
                min: RTU_MIN_FRAME_LEN,
                actual: raw.len(),
            });
        }

        let body_len = raw.len() - 2;
        let expected = crc16(&raw[..body_len]);
        let actual = u16::from_le_bytes([raw[body_len], raw[body_len + 1]]);
        if expected != actual {
            return Err(FrameError::ChecksumMismatch { expected, actual });
        }

        Ok(Self {
            unit_id: raw[0],
            function: raw[1],
            data: raw[2..body_len].to_vec(),
        })
    }
}

impl Framer for RtuFrame {
    #[inline]
    fn function_code(&self) -> u8 {
        self.function
    }

    #[inline]
    fn unit_id(&self) -> u8 {
        self.unit_id
    }

    #[inline]
    fn payload(&self) -> &[u8] {
        &self.data
    }

    fn with_data(&self, data: Vec<u8>) -> Self {
        Self {
            unit_id: self.unit_id,
            function: self.function,
            data,
        }
    }

    fn with_exception(&self, exception: Exception) -> Self {
        Self {
            unit_id: self.unit_id,
            function: self.function | EXCEPTION_FLAG,
            data: vec![exception.code()],
        }
    }

    fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.data.len() + RTU_MIN_FRAME_LEN);
        buf.put_u8(self.unit_id);
        buf.put_u8(self.function);
        buf.put_slice(&self.data);
        let crc = crc16(&buf);
        buf.put_u16_le(crc);
        buf.freeze()
    }
}

// ============================================================================
// TCP (MBAP)
// ============================================================================

/// MBAP encoding: `[txn id:2][protocol id:2][length:2][unit id][function][payload...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpFrame {
    transaction_id: u16,
    unit_id: u8,
    function: u8,
    data: Vec<u8>,
}

impl TcpFrame {
    /// Build a frame from its parts (protocol id is always 0)
    pub fn new(transaction_id: u16, unit_id: u8, function: u8, data: Vec<u8>) -> Self {
        Self {
            transaction_id,
            unit_id,
            function,
            data,
        }
    }

    /// Transaction identifier, echoed unchanged in the response
    #[inline]
    pub fn transaction_id(&self) -> u16 {
        self.transaction_id
    }

    /// Parse and validate raw MBAP bytes
    pub fn decode(raw: &[u8]) -> Result<Self, FrameError> {
        if raw.len() < TCP_MIN_FRAME_LEN {
            return Err(FrameError::TooShort {
                min: TCP_MIN_FRAME_LEN,
                actual: raw.len(),
            });
        }

        let protocol_id = u16::from_be_bytes([raw[2], raw[3]]);
        if protocol_id != 0 {
            return Err(FrameError::InvalidProtocolId(protocol_id));
        }

        let declared = u16::from_be_bytes([raw[4], raw[5]]) as usize;
        let actual = raw.len() - MBAP_HEADER_LEN;
        if declared != actual {
            return Err(FrameError::LengthMismatch { declared, actual });
        }
        if declared > MAX_MBAP_LENGTH {
            return Err(FrameError::Oversized {
                len: raw.len(),
                max: MBAP_HEADER_LEN + MAX_MBAP_LENGTH,
            });
        }

        Ok(Self {
            transaction_id: u16::from_be_bytes([raw[0], raw[1]]),
            unit_id: raw[6],
            function: raw[7],
            data: raw[8..].to_vec(),
        })
    }
}

impl Framer for TcpFrame {
    #[inline]
    fn function_code(&self) -> u8 {
        self.function
    }

    #[inline]
    fn unit_id(&self) -> u8 {
        self.unit_id
    }

    #[inline]
    fn payload(&self) -> &[u8] {
        &self.data
    }

    fn with_data(&self, data: Vec<u8>) -> Self {
        Self {
            transaction_id: self.transaction_id,
            unit_id: self.unit_id,
            function: self.function,
            data,
        }
    }

    fn with_exception(&self, exception: Exception) -> Self {
        Self {
            transaction_id: self.transaction_id,
            unit_id: self.unit_id,
            function: self.function | EXCEPTION_FLAG,
            data: vec![exception.code()],
        }
    }

    fn serialize(&self) -> Bytes {
        // Unit ID + Function Code + payload
        let length = 2 + self.data.len();
        let mut buf = BytesMut::with_capacity(MBAP_HEADER_LEN + length);
        buf.put_u16(self.transaction_id);
        buf.put_u16(0);
        buf.put_u16(length as u16);
        buf.put_u8(self.unit_id);
        buf.put_u8(self.function);
        buf.put_slice(&self.data);
        buf.freeze()
    }
}

// ============================================================================
// Frame
// ============================================================================

/// Wire encoding selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Slave ID + PDU + CRC
    Rtu,
    /// MBAP header + PDU
    Tcp,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKind::Rtu => f.write_str("RTU"),
            FrameKind::Tcp => f.write_str("TCP"),
        }
    }
}

/// A decoded protocol unit of either encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Rtu(RtuFrame),
    Tcp(TcpFrame),
}

impl Frame {
    /// Decode raw bytes with the given encoding
    pub fn decode(kind: FrameKind, raw: &[u8]) -> Result<Self, FrameError> {
        match kind {
            FrameKind::Rtu => RtuFrame::decode(raw).map(Frame::Rtu),
            FrameKind::Tcp => TcpFrame::decode(raw).map(Frame::Tcp),
        }
    }

    /// Encoding of this frame
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Rtu(_) => FrameKind::Rtu,
            Frame::Tcp(_) => FrameKind::Tcp,
        }
    }

    /// Transaction id for TCP frames
    pub fn transaction_id(&self) -> Option<u16> {
        match self {
            Frame::Rtu(_) => None,
            Frame::Tcp(frame) => Some(frame.transaction_id()),
        }
    }
}

impl Framer for Frame {
    fn function_code(&self) -> u8 {
        match self {
            Frame::Rtu(frame) => frame.function_code(),
            Frame::Tcp(frame) => frame.function_code(),
        }
    }

    fn unit_id(&self) -> u8 {
        match self {
            Frame::Rtu(frame) => frame.unit_id(),
            Frame::Tcp(frame) => frame.unit_id(),
        }
    }

    fn payload(&self) -> &[u8] {
        match self {
            Frame::Rtu(frame) => frame.payload(),
            Frame::Tcp(frame) => frame.payload(),
        }
    }

    fn with_data(&self, data: Vec<u8>) -> Self {
        match self {
            Frame::Rtu(frame) => Frame::Rtu(frame.with_data(data)),
            Frame::Tcp(frame) => Frame::Tcp(frame.with_data(data)),
        }
    }

    fn with_exception(&self, exception: Exception) -> Self {
        match self {
            Frame::Rtu(frame) => Frame::Rtu(frame.with_exception(exception)),
            Frame::Tcp(frame) => Frame::Tcp(frame.with_exception(exception)),
        }
    }

    fn serialize(&self) -> Bytes {
        match self {
            Frame::Rtu(frame) => frame.serialize(),
            Frame::Tcp(frame) => frame.serialize(),
        }
    }
}

impl From<RtuFrame> for Frame {
    fn from(frame: RtuFrame) -> Self {
        Frame::Rtu(frame)
    }
}

impl From<TcpFrame> for Frame {
    fn from(frame: TcpFrame) -> Self {
        Frame::Tcp(frame)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} unit={} fc=0x{:02X}",
            self.kind(),
            self.unit_id(),
            self.function_code()
        )?;
        if let Some(txn) = self.transaction_id() {
            write!(f, " txn=0x{:04X}", txn)?;
        }
        write!(f, " [{}]", format_hex_packet(self.payload()))
    }
}
