//! Modbus exception codes
//!
//! The closed set of outcomes a slave can report for a request. `Success`
//! (code 0) never travels on the wire; every other variant is encoded as an
//! exception response whose function code has the high bit set.

use std::fmt;

use crate::constants::*;

/// Modbus exception taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Exception {
    /// Operation successful
    Success = 0x00,
    /// Function code not recognized or not allowed by the slave
    IllegalFunction = EXCEPTION_ILLEGAL_FUNCTION,
    /// Some or all requested entities are outside the slave's address range
    IllegalDataAddress = EXCEPTION_ILLEGAL_DATA_ADDRESS,
    /// A value in the request is not acceptable to the slave
    IllegalDataValue = EXCEPTION_ILLEGAL_DATA_VALUE,
    /// Unrecoverable error while performing the requested action
    SlaveDeviceFailure = EXCEPTION_SERVER_DEVICE_FAILURE,
    /// Request accepted, processing takes a long time
    AcknowledgeSlave = EXCEPTION_ACKNOWLEDGE,
    /// Slave busy with a long-duration command; retry later
    SlaveDeviceBusy = EXCEPTION_SERVER_DEVICE_BUSY,
    /// Slave cannot perform the programming function
    NegativeAcknowledge = EXCEPTION_NEGATIVE_ACKNOWLEDGE,
    /// Parity error detected in slave memory
    MemoryParityError = EXCEPTION_MEMORY_PARITY_ERROR,
    /// Gateway misconfigured
    GatewayPathUnavailable = EXCEPTION_GATEWAY_PATH_UNAVAILABLE,
    /// Gateway target did not respond
    GatewayTargetDeviceFailedToRespond = EXCEPTION_GATEWAY_TARGET_FAILED,
}

impl Exception {
    /// All variants in wire-code order
    pub const ALL: [Exception; 11] = [
        Exception::Success,
        Exception::IllegalFunction,
        Exception::IllegalDataAddress,
        Exception::IllegalDataValue,
        Exception::SlaveDeviceFailure,
        Exception::AcknowledgeSlave,
        Exception::SlaveDeviceBusy,
        Exception::NegativeAcknowledge,
        Exception::MemoryParityError,
        Exception::GatewayPathUnavailable,
        Exception::GatewayTargetDeviceFailedToRespond,
    ];

    /// Numeric wire code
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Look up an exception by its wire code
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.code() == code)
    }

    /// Display name
    pub fn name(self) -> &'static str {
        match self {
            Exception::Success => "Success",
            Exception::IllegalFunction => "IllegalFunction",
            Exception::IllegalDataAddress => "IllegalDataAddress",
            Exception::IllegalDataValue => "IllegalDataValue",
            Exception::SlaveDeviceFailure => "SlaveDeviceFailure",
            Exception::AcknowledgeSlave => "AcknowledgeSlave",
            Exception::SlaveDeviceBusy => "SlaveDeviceBusy",
            Exception::NegativeAcknowledge => "NegativeAcknowledge",
            Exception::MemoryParityError => "MemoryParityError",
            Exception::GatewayPathUnavailable => "GatewayPathUnavailable",
            Exception::GatewayTargetDeviceFailedToRespond => "GatewayTargetDeviceFailedToRespond",
        }
    }

    /// True for every variant except `Success`
    #[inline]
    pub fn is_exception(self) -> bool {
        self != Exception::Success
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::error::Error for Exception {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes() {
        assert_eq!(Exception::Success.code(), 0);
        assert_eq!(Exception::IllegalFunction.code(), 1);
        assert_eq!(Exception::IllegalDataValue.code(), 3);
        assert_eq!(Exception::NegativeAcknowledge.code(), 7);
        assert_eq!(Exception::GatewayPathUnavailable.code(), 10);
        assert_eq!(Exception::GatewayTargetDeviceFailedToRespond.code(), 11);
    }

    #[test]
    fn test_from_code_roundtrip() {
        for exception in Exception::ALL {
            assert_eq!(Exception::from_code(exception.code()), Some(exception));
        }
        assert_eq!(Exception::from_code(0x09), None);
        assert_eq!(Exception::from_code(0xFF), None);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Exception::IllegalDataAddress.to_string(), "IllegalDataAddress");
        assert_eq!(Exception::Success.to_string(), "Success");
        assert!(!Exception::Success.is_exception());
        assert!(Exception::SlaveDeviceBusy.is_exception());
    }
}
