//! Function-code dispatch
//!
//! A [`FunctionTable`] maps each of the 256 function codes to an optional
//! [`FunctionHandler`]. The eight standard Modbus data-access functions are
//! installed by default; any code (including vendor-specific ones) can be
//! overridden or added through [`FunctionTable::set`].
//!
//! | Code | Function | Response payload |
//! |------|----------|------------------|
//! | 0x01 | Read Coils | byte count + packed bits |
//! | 0x02 | Read Discrete Inputs | byte count + packed bits |
//! | 0x03 | Read Holding Registers | byte count + big-endian words |
//! | 0x04 | Read Input Registers | byte count + big-endian words |
//! | 0x05 | Write Single Coil | request echo |
//! | 0x06 | Write Single Register | request echo |
//! | 0x0F | Write Multiple Coils | address + quantity |
//! | 0x10 | Write Multiple Registers | address + quantity |

use std::sync::Arc;

use tracing::{debug, warn};

use crate::constants::*;
use crate::exception::Exception;
use crate::frame::{Frame, Framer};
use crate::memory::{check_range, SlaveData};
use crate::pdu::{function_code_description, PduBuilder, PduReader};

/// Outcome of a handler: the response payload, or the exception to report
pub type HandlerResult = Result<Vec<u8>, Exception>;

/// Behavior bound to one function code.
///
/// Handlers run on the server's single request-handler task and get exclusive
/// access to the addressed slave's memory for the duration of the call.
/// Any `Fn(&mut SlaveData, &Frame) -> HandlerResult` closure is a handler.
pub trait FunctionHandler: Send + Sync {
    /// Execute the request against `slave`
    fn call(&self, slave: &mut SlaveData, request: &Frame) -> HandlerResult;
}

impl<F> FunctionHandler for F
where
    F: Fn(&mut SlaveData, &Frame) -> HandlerResult + Send + Sync,
{
    fn call(&self, slave: &mut SlaveData, request: &Frame) -> HandlerResult {
        self(slave, request)
    }
}

/// 256-slot function code → handler table
#[derive(Clone)]
pub struct FunctionTable {
    handlers: Vec<Option<Arc<dyn FunctionHandler>>>,
}

impl FunctionTable {
    /// Table with no handlers; every request yields IllegalFunction
    pub fn empty() -> Self {
        Self {
            handlers: vec![None; 256],
        }
    }

    /// Table with the standard data-access handlers installed
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.set(FC_READ_COILS, Arc::new(read_coils));
        table.set(FC_READ_DISCRETE_INPUTS, Arc::new(read_discrete_inputs));
        table.set(FC_READ_HOLDING_REGISTERS, Arc::new(read_holding_registers));
        table.set(FC_READ_INPUT_REGISTERS, Arc::new(read_input_registers));
        table.set(FC_WRITE_SINGLE_COIL, Arc::new(write_single_coil));
        table.set(FC_WRITE_SINGLE_REGISTER, Arc::new(write_holding_register));
        table.set(FC_WRITE_MULTIPLE_COILS, Arc::new(write_multiple_coils));
        table.set(FC_WRITE_MULTIPLE_REGISTERS, Arc::new(write_holding_registers));
        table
    }

    /// Install or replace the handler for `code`
    pub fn set(&mut self, code: u8, handler: Arc<dyn FunctionHandler>) {
        self.handlers[code as usize] = Some(handler);
    }

    /// Remove the handler for `code`
    pub fn remove(&mut self, code: u8) {
        self.handlers[code as usize] = None;
    }

    /// Handler for `code`, if any
    #[inline]
    pub fn get(&self, code: u8) -> Option<&Arc<dyn FunctionHandler>> {
        self.handlers[code as usize].as_ref()
    }

    /// Whether a handler is installed for `code`
    #[inline]
    pub fn contains(&self, code: u8) -> bool {
        self.handlers[code as usize].is_some()
    }

    /// Run the handler for the request's function code and build the response frame.
    ///
    /// Returns the response together with the exception it carries
    /// (`Exception::Success` for data responses). A payload that would not
    /// fit in one PDU is answered with `SlaveDeviceFailure`.
    pub fn dispatch(&self, slave: &mut SlaveData, request: &Frame) -> (Frame, Exception) {
        let function = request.function_code();
        let outcome = match self.get(function) {
            Some(handler) => handler.call(slave, request),
            None => Err(Exception::IllegalFunction),
        };

        match outcome {
            Ok(data) if 1 + data.len() > MAX_PDU_SIZE => {
                warn!(
                    "FC={:02X} handler returned {} payload bytes (max {})",
                    function,
                    data.len(),
                    MAX_PDU_SIZE - 1
                );
                let exception = Exception::SlaveDeviceFailure;
                (request.with_exception(exception), exception)
            }
            Ok(data) => (request.with_data(data), Exception::Success),
            Err(Exception::Success) => (request.with_data(Vec::new()), Exception::Success),
            Err(exception) => {
                debug!(
                    "FC={:02X} ({}) -> exception {}",
                    function,
                    function_code_description(function),
                    exception
                );
                (request.with_exception(exception), exception)
            }
        }
    }
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let codes: Vec<String> = (0..=255u8)
            .filter(|code| self.contains(*code))
            .map(|code| format!("0x{:02X}", code))
            .collect();
        f.debug_struct("FunctionTable").field("codes", &codes).finish()
    }
}

// ============================================================================
// Standard handlers
// ============================================================================

/// Parse `address + quantity`, checking quantity against `max` first
fn read_range(reader: &mut PduReader<'_>, max: usize) -> Result<(u16, u16), Exception> {
    let address = reader.u16()?;
    let quantity = reader.u16()?;
    if quantity == 0 || quantity as usize > max {
        return Err(Exception::IllegalDataValue);
    }
    check_range(address, quantity)?;
    Ok((address, quantity))
}

/// Read Coils (FC01)
pub fn read_coils(slave: &mut SlaveData, request: &Frame) -> HandlerResult {
    let mut reader = PduReader::new(request.payload());
    let (address, quantity) = read_range(&mut reader, MAX_READ_COILS)?;
    let packed = slave.coils.read_packed(address, quantity)?;
    Ok(PduBuilder::with_capacity(packed.len() + 1)
        .byte(packed.len() as u8)
        .data(&packed)
        .build())
}

/// Read Discrete Inputs (FC02)
pub fn read_discrete_inputs(slave: &mut SlaveData, request: &Frame) -> HandlerResult {
    let mut reader = PduReader::new(request.payload());
    let (address, quantity) = read_range(&mut reader, MAX_READ_COILS)?;
    let packed = slave.discrete_inputs.read_packed(address, quantity)?;
    Ok(PduBuilder::with_capacity(packed.len() + 1)
        .byte(packed.len() as u8)
        .data(&packed)
        .build())
}

/// Read Holding Registers (FC03)
pub fn read_holding_registers(slave: &mut SlaveData, request: &Frame) -> HandlerResult {
    let mut reader = PduReader::new(request.payload());
    let (address, quantity) = read_range(&mut reader, MAX_READ_REGISTERS)?;
    let values = slave.holding_registers.read(address, quantity)?;
    Ok(PduBuilder::with_capacity(values.len() * 2 + 1)
        .byte((values.len() * 2) as u8)
        .registers(values)
        .build())
}

/// Read Input Registers (FC04)
pub fn read_input_registers(slave: &mut SlaveData, request: &Frame) -> HandlerResult {
    let mut reader = PduReader::new(request.payload());
    let (address, quantity) = read_range(&mut reader, MAX_READ_REGISTERS)?;
    let values = slave.input_registers.read(address, quantity)?;
    Ok(PduBuilder::with_capacity(values.len() * 2 + 1)
        .byte((values.len() * 2) as u8)
        .registers(values)
        .build())
}

/// Write Single Coil (FC05): value must be exactly 0xFF00 or 0x0000
pub fn write_single_coil(slave: &mut SlaveData, request: &Frame) -> HandlerResult {
    let mut reader = PduReader::new(request.payload());
    let address = reader.u16()?;
    let value = match reader.u16()? {
        COIL_ON => true,
        COIL_OFF => false,
        _ => return Err(Exception::IllegalDataValue),
    };
    slave.coils.set(address, value);
    Ok(request.payload().to_vec())
}

/// Write Single Register (FC06)
pub fn write_holding_register(slave: &mut SlaveData, request: &Frame) -> HandlerResult {
    let mut reader = PduReader::new(request.payload());
    let address = reader.u16()?;
    let value = reader.u16()?;
    slave.holding_registers.set(address, value);
    Ok(request.payload().to_vec())
}

/// Write Multiple Coils (FC15)
pub fn write_multiple_coils(slave: &mut SlaveData, request: &Frame) -> HandlerResult {
    let mut reader = PduReader::new(request.payload());
    let (address, quantity) = read_range(&mut reader, MAX_WRITE_COILS)?;
    let byte_count = reader.u8()? as usize;
    if byte_count != (quantity as usize).div_ceil(8) {
        return Err(Exception::IllegalDataValue);
    }
    let packed = reader.bytes(byte_count)?;
    slave.coils.write_packed(address, quantity, packed)?;
    Ok(PduBuilder::with_capacity(4).u16(address).u16(quantity).build())
}

/// Write Multiple Registers (FC16)
pub fn write_holding_registers(slave: &mut SlaveData, request: &Frame) -> HandlerResult {
    let mut reader = PduReader::new(request.payload());
    let (address, quantity) = read_range(&mut reader, MAX_WRITE_REGISTERS)?;
    let byte_count = reader.u8()? as usize;
    if byte_count != quantity as usize * 2 {
        return Err(Exception::IllegalDataValue);
    }
    let values: Vec<u16> = reader
        .bytes(byte_count)?
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    slave.holding_registers.write(address, &values)?;
    Ok(PduBuilder::with_capacity(4).u16(address).u16(quantity).build())
}
