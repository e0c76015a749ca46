//! End-to-end tests over Modbus TCP on loopback sockets

mod common;

use std::time::Duration;

use common::{mbap, read_mbap, stays_silent, tcp_server, transact, RESPONSE_TIMEOUT};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use voltage_modbus_server::{
    Frame, HandlerResult, ModbusError, Server, ServerConfig, SlaveData,
};

#[tokio::test]
async fn test_read_holding_registers_fresh_memory() {
    let (server, addr) = tcp_server(&[1]).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let request = [
        0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02,
    ];
    let response = transact(&mut stream, &request).await;
    assert_eq!(
        response,
        vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x00, 0x00, 0x00, 0x00]
    );

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_disabled_slave_is_silent() {
    let (server, addr) = tcp_server(&[1]).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    server.disable_slave(1).unwrap();

    stream
        .write_all(&mbap(1, 1, 0x03, &[0x00, 0x00, 0x00, 0x02]))
        .await
        .unwrap();
    assert!(stays_silent(&mut stream).await);

    // the connection survives and answers again once re-enabled
    server.enable_slave(1).unwrap();
    let response = transact(&mut stream, &mbap(2, 1, 0x03, &[0x00, 0x00, 0x00, 0x01])).await;
    assert_eq!(response, mbap(2, 1, 0x03, &[0x02, 0x00, 0x00]));

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_unregistered_unit_is_silent() {
    let (server, addr) = tcp_server(&[1]).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(&mbap(1, 9, 0x03, &[0x00, 0x00, 0x00, 0x01]))
        .await
        .unwrap();
    assert!(stays_silent(&mut stream).await);

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_unknown_function_code() {
    let (server, addr) = tcp_server(&[1]).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let response = transact(&mut stream, &mbap(7, 1, 0x99, &[0x00, 0x01])).await;
    assert_eq!(response, mbap(7, 1, 0x99 | 0x80, &[0x01]));

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_exception_responses() {
    let (server, addr) = tcp_server(&[1]).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // quantity 0
    let response = transact(&mut stream, &mbap(1, 1, 0x03, &[0x00, 0x00, 0x00, 0x00])).await;
    assert_eq!(response, mbap(1, 1, 0x83, &[0x03]));

    // past the end of the address space
    let response = transact(&mut stream, &mbap(2, 1, 0x04, &[0xFF, 0xFF, 0x00, 0x02])).await;
    assert_eq!(response, mbap(2, 1, 0x84, &[0x02]));

    // too many coils
    let response = transact(&mut stream, &mbap(3, 1, 0x01, &[0x00, 0x00, 0x07, 0xD1])).await;
    assert_eq!(response, mbap(3, 1, 0x81, &[0x03]));

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_write_then_read() {
    let (server, addr) = tcp_server(&[1]).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let write = mbap(
        1,
        1,
        0x10,
        &[0x00, 0x10, 0x00, 0x02, 0x04, 0x12, 0x34, 0xAB, 0xCD],
    );
    let response = transact(&mut stream, &write).await;
    assert_eq!(response, mbap(1, 1, 0x10, &[0x00, 0x10, 0x00, 0x02]));

    let response = transact(&mut stream, &mbap(2, 1, 0x03, &[0x00, 0x10, 0x00, 0x02])).await;
    assert_eq!(response, mbap(2, 1, 0x03, &[0x04, 0x12, 0x34, 0xAB, 0xCD]));

    let coil = transact(&mut stream, &mbap(3, 1, 0x05, &[0x00, 0x03, 0xFF, 0x00])).await;
    assert_eq!(coil, mbap(3, 1, 0x05, &[0x00, 0x03, 0xFF, 0x00]));

    let registers = server
        .with_slave(1, |data| data.holding_registers.read(0x10, 2).map(|r| r.to_vec()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(registers, vec![0x1234, 0xABCD]);
    assert!(server.with_slave(1, |data| data.coils.get(3)).await.unwrap());

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_coalesced_and_fragmented_requests() {
    let (server, addr) = tcp_server(&[1]).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut both = mbap(1, 1, 0x03, &[0x00, 0x00, 0x00, 0x01]);
    both.extend(mbap(2, 1, 0x04, &[0x00, 0x00, 0x00, 0x01]));
    stream.write_all(&both).await.unwrap();
    assert_eq!(read_mbap(&mut stream).await, mbap(1, 1, 0x03, &[0x02, 0x00, 0x00]));
    assert_eq!(read_mbap(&mut stream).await, mbap(2, 1, 0x04, &[0x02, 0x00, 0x00]));

    let request = mbap(3, 1, 0x03, &[0x00, 0x00, 0x00, 0x01]);
    stream.write_all(&request[..4]).await.unwrap();
    stream.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    stream.write_all(&request[4..]).await.unwrap();
    assert_eq!(read_mbap(&mut stream).await, mbap(3, 1, 0x03, &[0x02, 0x00, 0x00]));

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection() {
    let (server, addr) = tcp_server(&[1]).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut bad = mbap(1, 1, 0x03, &[0x00, 0x00, 0x00, 0x01]);
    bad[3] = 0x01; // protocol id 1
    stream.write_all(&bad).await.unwrap();
    assert!(stays_silent(&mut stream).await);

    let response = transact(&mut stream, &mbap(2, 1, 0x03, &[0x00, 0x00, 0x00, 0x01])).await;
    assert_eq!(response, mbap(2, 1, 0x03, &[0x02, 0x00, 0x00]));

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_handler_override_over_tcp() {
    let (server, addr) = tcp_server(&[1]).await;
    server
        .register_handler(0x03, |_: &mut SlaveData, request: &Frame| -> HandlerResult {
            use voltage_modbus_server::Framer;
            Ok(request.payload().iter().rev().copied().collect())
        })
        .unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let response = transact(&mut stream, &mbap(1, 1, 0x03, &[0x01, 0x02, 0x03])).await;
    assert_eq!(response, mbap(1, 1, 0x03, &[0x03, 0x02, 0x01]));

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_clients_disjoint_units() {
    const CLIENTS: u8 = 8;
    const REQUESTS: u16 = 25;

    let units: Vec<u8> = (1..=CLIENTS).collect();
    let (server, addr) = tcp_server(&units).await;

    let mut clients = Vec::new();
    for unit in units.clone() {
        clients.push(tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            for i in 0..REQUESTS {
                let value = (unit as u16) << 8 | i;
                let txn = i * 2;
                let mut data = i.to_be_bytes().to_vec();
                data.extend_from_slice(&value.to_be_bytes());
                let response = transact(&mut stream, &mbap(txn, unit, 0x06, &data)).await;
                assert_eq!(response, mbap(txn, unit, 0x06, &data));

                let response =
                    transact(&mut stream, &mbap(txn + 1, unit, 0x03, &[0x00, i as u8, 0x00, 0x01]))
                        .await;
                let mut expected = vec![0x02];
                expected.extend_from_slice(&value.to_be_bytes());
                assert_eq!(response, mbap(txn + 1, unit, 0x03, &expected));
            }
        }));
    }
    for client in clients {
        client.await.unwrap();
    }

    for unit in units {
        let last = server
            .with_slave(unit, |data| data.holding_registers.get(REQUESTS - 1))
            .await
            .unwrap();
        assert_eq!(last, (unit as u16) << 8 | (REQUESTS - 1));
    }
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_first_connection_signal_per_listener() {
    let server = Server::with_config(common::quiet_config());
    server.register_slave(1).unwrap();
    let mut signal = server.connection_signal().unwrap();
    let first = server.listen_tcp("127.0.0.1:0").await.unwrap();
    let second = server.listen_rtu_over_tcp("127.0.0.1:0").await.unwrap();
    assert_eq!(server.local_addrs(), vec![first, second]);

    let _a = TcpStream::connect(first).await.unwrap();
    let fired = tokio::time::timeout(RESPONSE_TIMEOUT, signal.recv())
        .await
        .unwrap();
    assert_eq!(fired, Some(first));

    let _b = TcpStream::connect(second).await.unwrap();
    let fired = tokio::time::timeout(RESPONSE_TIMEOUT, signal.recv())
        .await
        .unwrap();
    assert_eq!(fired, Some(second));

    // later clients of either listener stay quiet
    let _c = TcpStream::connect(first).await.unwrap();
    let _d = TcpStream::connect(second).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(signal.try_recv().is_err());

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_unconsumed_signal_does_not_block_accept() {
    let config = common::quiet_config().with_first_connection_timeout(Duration::from_millis(5));
    let server = Server::with_config(config);
    server.register_slave(1).unwrap();
    let addr = server.listen_tcp("127.0.0.1:0").await.unwrap();

    // nobody takes the receiver; clients are still served
    for txn in 0..3 {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let response = transact(&mut stream, &mbap(txn, 1, 0x01, &[0x00, 0x00, 0x00, 0x01])).await;
        assert_eq!(response, mbap(txn, 1, 0x01, &[0x01, 0x00]));
    }

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_close_stops_listeners_and_connections() {
    let (server, addr) = tcp_server(&[1]).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    transact(&mut stream, &mbap(1, 1, 0x03, &[0x00, 0x00, 0x00, 0x01])).await;

    tokio::time::timeout(RESPONSE_TIMEOUT, server.close())
        .await
        .unwrap()
        .unwrap();

    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(RESPONSE_TIMEOUT, stream.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_admin_errors() {
    let server = Server::with_config(ServerConfig::new());
    server.register_slave(5).unwrap();
    server.register_slave(5).unwrap();

    match server.disable_slave(6) {
        Err(ModbusError::SlaveNotRegistered { unit_id, registered }) => {
            assert_eq!(unit_id, 6);
            assert_eq!(registered, vec![5]);
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(matches!(
        server.with_slave(6, |_| ()).await,
        Err(ModbusError::SlaveNotRegistered { .. })
    ));
    assert_eq!(server.registered_slaves(), vec![5]);

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_client_that_never_reads_does_not_stall_others() {
    let (server, addr) = tcp_server(&[1, 2]).await;

    // client A floods large reads and never reads a byte back
    let (_a_read, mut a_write) = TcpStream::connect(addr).await.unwrap().into_split();
    let flood = tokio::spawn(async move {
        let mut batch = Vec::new();
        for txn in 0..1000u16 {
            batch.extend(mbap(txn, 1, 0x03, &[0x00, 0x00, 0x00, 0x7D]));
        }
        for _ in 0..40 {
            if a_write.write_all(&batch).await.is_err() {
                break;
            }
        }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut b = TcpStream::connect(addr).await.unwrap();
    let response = transact(&mut b, &mbap(7, 2, 0x03, &[0x00, 0x00, 0x00, 0x01])).await;
    assert_eq!(response, mbap(7, 2, 0x03, &[0x02, 0x00, 0x00]));

    tokio::time::timeout(RESPONSE_TIMEOUT, server.close())
        .await
        .expect("close hung on an unread connection")
        .unwrap();
    flood.abort();
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_second_server_binds_same_port() {
    let (first, addr) = tcp_server(&[1]).await;

    let second = Server::with_config(common::quiet_config());
    second.register_slave(1).unwrap();
    let bound = second.listen_tcp(addr).await.unwrap();
    assert_eq!(bound, addr);

    // whichever instance takes the connection answers the same way
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let response = transact(&mut stream, &mbap(1, 1, 0x01, &[0x00, 0x00, 0x00, 0x01])).await;
    assert_eq!(response, mbap(1, 1, 0x01, &[0x01, 0x00]));

    drop(stream);
    first.close().await.unwrap();
    second.close().await.unwrap();
}
