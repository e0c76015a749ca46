//! # Stream Framing
//!
//! Byte-stream transports (TCP, TLS, serial) do not preserve message
//! boundaries: one read may hold half a frame or several frames. The
//! decoders here cut the stream into frames before they reach
//! [`Frame::decode`](crate::frame::Frame::decode).
//!
//! | Codec | Used by | Boundary |
//! |-------|---------|----------|
//! | [`MbapCodec`] | TCP, TLS | MBAP length field |
//! | [`RtuCodec`] | RTU-over-TCP, serial | length implied by the function code |
//!
//! RTU carries no length prefix. For the standard request functions the
//! length is fixed (8 bytes for 0x01–0x06) or derivable from the byte count
//! (`9 + n` for 0x0F/0x10). For any other function code the codec falls back
//! to treating everything buffered so far as one frame, which is only correct
//! when the client sends one request per write.
//!
//! Malformed input never ends the stream: the decoder yields
//! `Some(Err(FrameError))`, drops what it has buffered and keeps going.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::constants::{
    FC_WRITE_MULTIPLE_COILS, FC_WRITE_MULTIPLE_REGISTERS, MAX_MBAP_LENGTH, MAX_RTU_FRAME_LEN,
    MBAP_HEADER_LEN, RTU_MIN_FRAME_LEN,
};
use crate::error::FrameError;
use crate::frame::{Frame, RtuFrame, TcpFrame};

/// Item produced by the stream decoders: a frame, or the reason some bytes were dropped
pub type DecodedFrame = Result<Frame, FrameError>;

/// Length of an RTU request as far as the buffered bytes tell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtuLength {
    /// More bytes are needed to know the length
    Incomplete,
    /// The request is exactly this many bytes
    Exact(usize),
    /// Unknown function code: take everything buffered
    Remaining,
}

/// Work out the expected RTU request length from the buffered prefix
pub fn rtu_request_len(buf: &[u8]) -> RtuLength {
    if buf.len() < 2 {
        return RtuLength::Incomplete;
    }
    match buf[1] {
        0x01..=0x06 => RtuLength::Exact(8),
        FC_WRITE_MULTIPLE_COILS | FC_WRITE_MULTIPLE_REGISTERS => match buf.get(6) {
            Some(&byte_count) => RtuLength::Exact(9 + byte_count as usize),
            None => RtuLength::Incomplete,
        },
        _ if buf.len() < RTU_MIN_FRAME_LEN => RtuLength::Incomplete,
        _ => RtuLength::Remaining,
    }
}

/// Decoder for MBAP-framed streams (Modbus TCP and TLS)
#[derive(Debug, Clone, Copy, Default)]
pub struct MbapCodec;

impl MbapCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for MbapCodec {
    type Item = DecodedFrame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < MBAP_HEADER_LEN {
            return Ok(None);
        }

        let protocol_id = u16::from_be_bytes([src[2], src[3]]);
        if protocol_id != 0 {
            src.clear();
            return Ok(Some(Err(FrameError::InvalidProtocolId(protocol_id))));
        }

        let length = u16::from_be_bytes([src[4], src[5]]) as usize;
        if length > MAX_MBAP_LENGTH {
            src.clear();
            return Ok(Some(Err(FrameError::Oversized {
                len: MBAP_HEADER_LEN + length,
                max: MBAP_HEADER_LEN + MAX_MBAP_LENGTH,
            })));
        }

        let total = MBAP_HEADER_LEN + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let raw = src.split_to(total);
        Ok(Some(TcpFrame::decode(&raw).map(Frame::Tcp)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None if src.is_empty() => Ok(None),
            None => {
                let actual = src.len();
                src.clear();
                Ok(Some(Err(FrameError::TooShort {
                    min: MBAP_HEADER_LEN + 2,
                    actual,
                })))
            }
        }
    }
}

/// Decoder for RTU-framed streams (RTU-over-TCP and serial lines)
#[derive(Debug, Clone, Copy)]
pub struct RtuCodec {
    max_frame_len: usize,
}

impl RtuCodec {
    /// Codec bounded by the RS485 ADU limit
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_RTU_FRAME_LEN)
    }

    /// Codec with a custom upper bound on a single frame
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            max_frame_len: max_frame_len.max(RTU_MIN_FRAME_LEN),
        }
    }

    fn oversized(&self, src: &mut BytesMut, len: usize) -> Option<DecodedFrame> {
        src.clear();
        Some(Err(FrameError::Oversized {
            len,
            max: self.max_frame_len,
        }))
    }
}

impl Default for RtuCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RtuCodec {
    type Item = DecodedFrame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let len = match rtu_request_len(src) {
            RtuLength::Incomplete => return Ok(None),
            RtuLength::Exact(len) if len > self.max_frame_len => {
                return Ok(self.oversized(src, len));
            }
            RtuLength::Exact(len) => {
                if src.len() < len {
                    src.reserve(len - src.len());
                    return Ok(None);
                }
                len
            }
            RtuLength::Remaining if src.len() > self.max_frame_len => {
                let len = src.len();
                return Ok(self.oversized(src, len));
            }
            RtuLength::Remaining => src.len(),
        };

        let raw = src.split_to(len);
        let decoded = RtuFrame::decode(&raw).map(Frame::Rtu);
        if decoded.is_err() {
            // whatever follows a corrupt frame cannot be trusted to be aligned
            src.clear();
        }
        Ok(Some(decoded))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None if src.is_empty() => Ok(None),
            None => {
                let actual = src.len();
                src.clear();
                Ok(Some(Err(FrameError::TooShort {
                    min: RTU_MIN_FRAME_LEN,
                    actual,
                })))
            }
        }
    }
}
