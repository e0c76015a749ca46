#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use voltage_modbus_server::{Frame, Framer, FunctionTable, SlaveData, TcpFrame};

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    function: u8,
    payload: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    let table = FunctionTable::standard();
    let mut slave = SlaveData::allocate();
    let request = Frame::Tcp(TcpFrame::new(1, 1, input.function, input.payload));

    let (response, exception) = table.dispatch(&mut slave, &request);
    assert_eq!(response.is_exception(), exception.is_exception());
    let _ = response.serialize();
});
