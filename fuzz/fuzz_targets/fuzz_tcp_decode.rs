#![no_main]

use libfuzzer_sys::fuzz_target;
use voltage_modbus_server::{Framer, TcpFrame};

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = TcpFrame::decode(data) {
        assert_eq!(&frame.serialize()[..], data);
    }
});
