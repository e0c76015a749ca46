#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;
use voltage_modbus_server::{MbapCodec, RtuCodec};

#[derive(Debug, Arbitrary)]
struct FuzzInput<'a> {
    rtu: bool,
    chunk: u8,
    stream: &'a [u8],
}

fn drain<D>(codec: &mut D, stream: &[u8], chunk: usize)
where
    D: Decoder<Error = std::io::Error>,
{
    let mut buf = BytesMut::new();
    for piece in stream.chunks(chunk) {
        buf.extend_from_slice(piece);
        while let Ok(Some(_)) = codec.decode(&mut buf) {}
    }
    while let Ok(Some(_)) = codec.decode_eof(&mut buf) {}
    assert!(buf.is_empty());
}

fuzz_target!(|input: FuzzInput| {
    let chunk = input.chunk.max(1) as usize;
    if input.rtu {
        drain(&mut RtuCodec::new(), input.stream, chunk);
    } else {
        drain(&mut MbapCodec::new(), input.stream, chunk);
    }
});
