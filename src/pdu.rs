//! PDU payload helpers
//!
//! Request payloads are parsed with [`PduReader`], a bounds-checked cursor
//! that reports a short payload as [`Exception::IllegalDataValue`].
//! Response payloads are assembled with the fluent [`PduBuilder`].

use tracing::debug;

use crate::constants::MAX_PDU_SIZE;
use crate::exception::Exception;

/// Get human-readable function code description
pub fn function_code_description(fc: u8) -> &'static str {
    match fc & 0x7F {
        0x01 => "Read Coils",
        0x02 => "Read Discrete Inputs",
        0x03 => "Read Holding Registers",
        0x04 => "Read Input Registers",
        0x05 => "Write Single Coil",
        0x06 => "Write Single Register",
        0x0F => "Write Multiple Coils",
        0x10 => "Write Multiple Registers",
        _ => "Unknown Function",
    }
}

/// Bounds-checked cursor over a request payload (the PDU minus its function code)
#[derive(Debug, Clone)]
pub struct PduReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PduReader<'a> {
    /// Create a reader positioned at the first payload byte
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Read a single byte
    #[inline]
    pub fn u8(&mut self) -> Result<u8, Exception> {
        let byte = *self.data.get(self.pos).ok_or(Exception::IllegalDataValue)?;
        self.pos += 1;
        Ok(byte)
    }

    /// Read a big-endian u16
    #[inline]
    pub fn u16(&mut self) -> Result<u16, Exception> {
        let bytes = self.bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Read exactly `len` bytes
    #[inline]
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], Exception> {
        let end = self.pos.checked_add(len).ok_or(Exception::IllegalDataValue)?;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or(Exception::IllegalDataValue)?;
        self.pos = end;
        Ok(slice)
    }

    /// Number of unread bytes
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

/// PDU builder - fluent API for response payloads
#[derive(Debug, Default)]
pub struct PduBuilder {
    data: Vec<u8>,
}

impl PduBuilder {
    /// Create a new builder
    #[inline]
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Create a builder with room for `capacity` bytes
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity.min(MAX_PDU_SIZE)),
        }
    }

    /// Add a byte
    #[inline]
    pub fn byte(mut self, b: u8) -> Self {
        self.data.push(b);
        self
    }

    /// Add a big-endian u16 (address, quantity or register value)
    #[inline]
    pub fn u16(mut self, value: u16) -> Self {
        self.data.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Add data
    #[inline]
    pub fn data(mut self, data: &[u8]) -> Self {
        self.data.extend_from_slice(data);
        self
    }

    /// Add registers as big-endian words in order
    #[inline]
    pub fn registers(mut self, values: &[u16]) -> Self {
        self.data.reserve(values.len() * 2);
        for &value in values {
            self.data.extend_from_slice(&value.to_be_bytes());
        }
        self
    }

    /// Build the payload
    #[inline]
    pub fn build(self) -> Vec<u8> {
        debug!("PDU payload built: len={}", self.data.len());
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_fields() {
        let payload = [0x00, 0x6B, 0x00, 0x03, 0x02, 0xAA, 0xBB];
        let mut reader = PduReader::new(&payload);

        assert_eq!(reader.u16(), Ok(0x006B));
        assert_eq!(reader.u16(), Ok(0x0003));
        assert_eq!(reader.u8(), Ok(0x02));
        assert_eq!(reader.remaining(), 2);
        assert_eq!(reader.bytes(2), Ok(&[0xAA, 0xBB][..]));
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_reader_short_payload() {
        let payload = [0x00];
        let mut reader = PduReader::new(&payload);
        assert_eq!(reader.u16(), Err(Exception::IllegalDataValue));

        let mut reader = PduReader::new(&[]);
        assert_eq!(reader.u8(), Err(Exception::IllegalDataValue));
        assert_eq!(reader.bytes(1), Err(Exception::IllegalDataValue));
        assert_eq!(reader.bytes(0), Ok(&[][..]));
    }

    #[test]
    fn test_builder() {
        let payload = PduBuilder::new().u16(0x0100).u16(0x000A).build();
        assert_eq!(payload, vec![0x01, 0x00, 0x00, 0x0A]);

        let payload = PduBuilder::with_capacity(5)
            .byte(4)
            .registers(&[0x000A, 0x0102])
            .build();
        assert_eq!(payload, vec![0x04, 0x00, 0x0A, 0x01, 0x02]);
    }

    #[test]
    fn test_function_code_description() {
        assert_eq!(function_code_description(0x03), "Read Holding Registers");
        assert_eq!(function_code_description(0x83), "Read Holding Registers");
        assert_eq!(function_code_description(0x99), "Unknown Function");
        assert_eq!(function_code_description(0x17), "Unknown Function");
    }
}
