//! # Voltage Modbus Server - Async Modbus Slave Runtime
//!
//! A Modbus slave (server) runtime on Tokio. It terminates requests arriving
//! over Modbus TCP, TLS, RTU-over-TCP and serial lines, dispatches them to
//! per-function-code handlers operating on in-memory slave data, and answers
//! on the originating connection.
//!
//! ## Features
//!
//! - **One protocol core, many transports**: RTU and MBAP frames share the
//!   [`Framer`] contract, so handlers never see the wire encoding
//! - **Lock-free by construction**: a single handler task owns all slave
//!   memory; connections feed it through one bounded queue
//! - **Stream framing**: partial and coalesced reads are reassembled by
//!   `tokio-util` codecs
//! - **Pluggable handlers**: override or add any of the 256 function codes
//! - **Injected logging**: lifecycle events go to an [`EventSink`]
//!   (`tracing` by default)
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Server |
//! |------|----------|--------|
//! | 0x01 | Read Coils | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ |
//! | 0x03 | Read Holding Registers | ✅ |
//! | 0x04 | Read Input Registers | ✅ |
//! | 0x05 | Write Single Coil | ✅ |
//! | 0x06 | Write Single Register | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ |
//!
//! Every other code answers IllegalFunction unless a handler is registered
//! for it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voltage_modbus_server::{Exception, Frame, Framer, HandlerResult, ModbusResult, Server, SlaveData};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let server = Server::new();
//!     server.register_slave(1)?;
//!
//!     // Custom function: echo the request payload back
//!     server.register_handler(0x41, |_: &mut SlaveData, request: &Frame| -> HandlerResult {
//!         if request.payload().is_empty() {
//!             return Err(Exception::IllegalDataValue);
//!         }
//!         Ok(request.payload().to_vec())
//!     })?;
//!
//!     server.listen_tcp("0.0.0.0:502").await?;
//!     server.listen_rtu_over_tcp("0.0.0.0:5021").await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.close().await
//! }
//! ```

// ============================================================================
// Protocol core
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants based on official specification
pub mod constants;

/// Modbus exception codes
pub mod exception;

/// Request payload parsing and response payload construction
pub mod pdu;

/// RTU and MBAP frames behind one contract
pub mod frame;

/// Per-slave coils, discrete inputs and registers
pub mod memory;

/// Function-code dispatch table and standard handlers
pub mod function;

// ============================================================================
// Runtime
// ============================================================================

/// Stream framing for byte-stream transports
pub mod codec;

/// Server configuration
pub mod config;

/// Server events and logging sinks
pub mod logging;

/// Slave server, administrative API and request handler
pub mod server;

/// Listeners and connection loops
pub mod transport;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use voltage_modbus_server::tokio) ===
pub use tokio;

// === Server API ===
pub use config::ServerConfig;
pub use server::{Request, Server, SlaveStatus};
pub use transport::{ConnectionHandle, ResponseDropped};

#[cfg(feature = "rtu")]
pub use transport::SerialConfig;

// === Error handling ===
pub use error::{FrameError, ModbusError, ModbusResult};
pub use exception::Exception;

// === Frames ===
pub use frame::{Frame, FrameKind, Framer, RtuFrame, TcpFrame};

// === Handlers and memory ===
pub use function::{FunctionHandler, FunctionTable, HandlerResult};
pub use memory::SlaveData;

// === Stream framing ===
pub use codec::{MbapCodec, RtuCodec};

// === Logging ===
pub use logging::{CallbackSink, EventSink, LogLevel, NullSink, ServerEvent, TracingSink};

// === Protocol limits (commonly needed constants) ===
pub use constants::{
    MAX_PDU_SIZE, MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};

// === PDU (advanced usage) ===
pub use pdu::{PduBuilder, PduReader};

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Voltage Modbus Server v{} - async Modbus slave runtime", VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info() {
        assert!(info().contains(VERSION));
    }
}
