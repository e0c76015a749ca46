#![no_main]

use libfuzzer_sys::fuzz_target;
use voltage_modbus_server::{Framer, RtuFrame};

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = RtuFrame::decode(data) {
        // a frame that decodes must re-encode to the exact input
        assert_eq!(&frame.serialize()[..], data);
    }
});
