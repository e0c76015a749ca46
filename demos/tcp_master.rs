//! Raw Modbus TCP Master Example
//!
//! Talks to the `demo` server with hand-built MBAP frames, showing exactly
//! what travels on the wire.
//!
//! # Running this example
//!
//! ```bash
//! cargo run --bin demo            # in one terminal
//! cargo run --example tcp_master  # in another
//! ```

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use voltage_modbus_server::frame::format_hex_packet;
use voltage_modbus_server::{Exception, Framer, ModbusError, ModbusResult, TcpFrame};

/// Send one request and wait for its response
async fn transact(stream: &mut TcpStream, request: &TcpFrame) -> ModbusResult<TcpFrame> {
    let bytes = request.serialize();
    println!("-> {}", format_hex_packet(&bytes));
    stream.write_all(&bytes).await?;

    let mut header = [0u8; 6];
    tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut header))
        .await
        .map_err(|_| ModbusError::invalid_data("no response (unit disabled or unknown?)"))??;

    let length = u16::from_be_bytes([header[4], header[5]]) as usize;
    let mut raw = header.to_vec();
    raw.resize(6 + length, 0);
    stream.read_exact(&mut raw[6..]).await?;
    println!("<- {}", format_hex_packet(&raw));

    Ok(TcpFrame::decode(&raw)?)
}

fn registers(payload: &[u8]) -> Vec<u16> {
    payload
        .get(1..)
        .unwrap_or_default()
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

#[tokio::main]
async fn main() -> ModbusResult<()> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:5020".to_string());
    let mut stream = TcpStream::connect(&addr).await?;
    println!("Connected to {}", addr);

    // =========================================================================
    // Read holding registers 0-9 of unit 1 (FC03)
    // =========================================================================
    let request = TcpFrame::new(1, 1, 0x03, vec![0x00, 0x00, 0x00, 0x0A]);
    let response = transact(&mut stream, &request).await?;
    println!("Holding registers 0-9: {:?}\n", registers(response.payload()));

    // =========================================================================
    // Write register 0 (FC06), then read it back through the custom FC 0x41
    // =========================================================================
    let request = TcpFrame::new(2, 1, 0x06, vec![0x00, 0x00, 0x12, 0x34]);
    transact(&mut stream, &request).await?;

    let request = TcpFrame::new(3, 1, 0x41, vec![]);
    let response = transact(&mut stream, &request).await?;
    println!("FC 0x41 payload: {:02X?}\n", response.payload());

    // =========================================================================
    // Exception: read past the end of the address space
    // =========================================================================
    let request = TcpFrame::new(4, 1, 0x03, vec![0xFF, 0xFF, 0x00, 0x02]);
    let response = transact(&mut stream, &request).await?;
    if response.is_exception() {
        let code = response.payload().first().copied().unwrap_or_default();
        let name = Exception::from_code(code).map_or("unknown", |e| e.name());
        println!("Exception 0x{:02X}: {}", code, name);
    }

    Ok(())
}
