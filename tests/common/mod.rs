#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use voltage_modbus_server::{NullSink, Server, ServerConfig};

pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);
pub const SILENCE_WINDOW: Duration = Duration::from_millis(300);

pub fn quiet_config() -> ServerConfig {
    ServerConfig::new().with_event_sink(Arc::new(NullSink))
}

/// Server with the given units registered and a TCP listener on a free port
pub async fn tcp_server(units: &[u8]) -> (Server, SocketAddr) {
    let server = Server::with_config(quiet_config());
    for &unit in units {
        server.register_slave(unit).unwrap();
    }
    let addr = server.listen_tcp("127.0.0.1:0").await.unwrap();
    (server, addr)
}

pub fn mbap(txn: u16, unit: u8, function: u8, data: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(8 + data.len());
    raw.extend_from_slice(&txn.to_be_bytes());
    raw.extend_from_slice(&[0x00, 0x00]);
    raw.extend_from_slice(&(2 + data.len() as u16).to_be_bytes());
    raw.push(unit);
    raw.push(function);
    raw.extend_from_slice(data);
    raw
}

/// Read one MBAP frame, failing the test after `RESPONSE_TIMEOUT`
pub async fn read_mbap<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<u8> {
    tokio::time::timeout(RESPONSE_TIMEOUT, async {
        let mut header = [0u8; 6];
        stream.read_exact(&mut header).await.unwrap();
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut raw = header.to_vec();
        raw.resize(6 + length, 0);
        stream.read_exact(&mut raw[6..]).await.unwrap();
        raw
    })
    .await
    .expect("no MBAP response")
}

pub async fn transact<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S, request: &[u8]) -> Vec<u8> {
    stream.write_all(request).await.unwrap();
    read_mbap(stream).await
}

/// True when nothing arrives on `stream` within `SILENCE_WINDOW`
pub async fn stays_silent<S: AsyncRead + Unpin>(stream: &mut S) -> bool {
    let mut byte = [0u8; 1];
    tokio::time::timeout(SILENCE_WINDOW, stream.read(&mut byte))
        .await
        .is_err()
}
