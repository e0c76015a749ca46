//! Error types for the Modbus slave runtime
//!
//! Two layers of failure exist:
//! - [`FrameError`]: raw bytes that cannot become a frame. The offending bytes
//!   are discarded and the connection stays open.
//! - [`ModbusError`]: failures surfaced to the caller of the administrative
//!   API (binding a listener, addressing an unregistered slave, ...).
//!
//! Modbus exception responses are not errors in this sense; see
//! [`crate::exception::Exception`].

use thiserror::Error;

/// Result type used throughout the crate
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Reasons a byte sequence is rejected while building a frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Fewer bytes than the smallest frame of this encoding
    #[error("frame too short: {actual} bytes (min {min})")]
    TooShort { min: usize, actual: usize },

    /// RTU trailer does not match the CRC of the preceding bytes
    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    /// MBAP protocol identifier other than 0x0000
    #[error("invalid MBAP protocol id 0x{0:04X}")]
    InvalidProtocolId(u16),

    /// MBAP length field disagrees with the bytes that follow it
    #[error("MBAP length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Frame larger than the transport allows
    #[error("frame too large: {len} bytes (max {max})")]
    Oversized { len: usize, max: usize },
}

/// Errors returned by the server runtime
#[derive(Debug, Error)]
pub enum ModbusError {
    /// Socket or serial I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Administrative call on a unit identifier that was never registered
    #[error("slave with ID {unit_id} is not registered on server (registered: {registered:?})")]
    SlaveNotRegistered { unit_id: u8, registered: Vec<u8> },

    /// Invalid argument supplied by the caller
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Serial port could not be opened or configured
    #[error("Serial error: {message}")]
    Serial { message: String },

    /// The request handler is gone (server closed)
    #[error("server is closed")]
    Closed,
}

impl ModbusError {
    /// Create an invalid data error
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        ModbusError::InvalidData {
            message: message.into(),
        }
    }

    /// Create a serial error
    pub fn serial<S: Into<String>>(message: S) -> Self {
        ModbusError::Serial {
            message: message.into(),
        }
    }

    /// Create a slave-not-registered error; the list is sorted for stable messages
    pub fn slave_not_registered(unit_id: u8, mut registered: Vec<u8>) -> Self {
        registered.sort_unstable();
        ModbusError::SlaveNotRegistered {
            unit_id,
            registered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_error_display() {
        let err = FrameError::ChecksumMismatch {
            expected: 0xCAFD,
            actual: 0x0000,
        };
        assert_eq!(
            err.to_string(),
            "CRC mismatch: expected 0xCAFD, got 0x0000"
        );

        let err = FrameError::TooShort { min: 8, actual: 3 };
        assert_eq!(err.to_string(), "frame too short: 3 bytes (min 8)");
    }

    #[test]
    fn test_slave_not_registered_sorted() {
        let err = ModbusError::slave_not_registered(9, vec![3, 1, 2]);
        match &err {
            ModbusError::SlaveNotRegistered {
                unit_id,
                registered,
            } => {
                assert_eq!(*unit_id, 9);
                assert_eq!(registered, &vec![1, 2, 3]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("slave with ID 9"));
    }

    #[test]
    fn test_from_conversions() {
        let err: ModbusError = FrameError::InvalidProtocolId(1).into();
        assert!(matches!(err, ModbusError::Frame(_)));

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err: ModbusError = io.into();
        assert!(matches!(err, ModbusError::Io(_)));
    }
}
