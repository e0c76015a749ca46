//! Modbus TCP over TLS with a throwaway self-signed certificate

#![cfg(feature = "tls")]

mod common;

use std::sync::Arc;

use common::{mbap, quiet_config, transact};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName,
};
use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use voltage_modbus_server::Server;

fn tls_pair() -> (TlsAcceptor, TlsConnector) {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert: CertificateDer<'static> = certified.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));

    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert.clone()], key)
        .unwrap();

    let mut roots = RootCertStore::empty();
    roots.add(cert).unwrap();
    let client_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    (
        TlsAcceptor::from(Arc::new(server_config)),
        TlsConnector::from(Arc::new(client_config)),
    )
}

#[tokio::test]
async fn test_tls_read_holding_registers() {
    let (acceptor, connector) = tls_pair();
    let server = Server::with_config(quiet_config());
    server.register_slave(1).unwrap();
    server
        .with_slave(1, |data| data.holding_registers.set(2, 0x0BB8))
        .await
        .unwrap();
    let addr = server.listen_tls("127.0.0.1:0", acceptor).await.unwrap();

    let tcp = TcpStream::connect(addr).await.unwrap();
    let domain = ServerName::try_from("localhost").unwrap();
    let mut stream = connector.connect(domain, tcp).await.unwrap();

    let response = transact(&mut stream, &mbap(0x0102, 1, 0x03, &[0x00, 0x02, 0x00, 0x01])).await;
    assert_eq!(response, mbap(0x0102, 1, 0x03, &[0x02, 0x0B, 0xB8]));

    let response = transact(&mut stream, &mbap(0x0103, 1, 0x42, &[])).await;
    assert_eq!(response, mbap(0x0103, 1, 0xC2, &[0x01]));

    drop(stream);
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_tls_plaintext_client_is_dropped() {
    let (acceptor, _) = tls_pair();
    let server = Server::with_config(quiet_config());
    server.register_slave(1).unwrap();
    let addr = server.listen_tls("127.0.0.1:0", acceptor).await.unwrap();

    // a plain MBAP request is not a ClientHello; the server hangs up
    let mut stream = TcpStream::connect(addr).await.unwrap();
    tokio::io::AsyncWriteExt::write_all(
        &mut stream,
        &mbap(1, 1, 0x03, &[0x00, 0x00, 0x00, 0x01]),
    )
    .await
    .unwrap();

    let mut buf = Vec::new();
    let read = tokio::time::timeout(
        common::RESPONSE_TIMEOUT,
        tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut buf),
    )
    .await
    .unwrap();
    // either a clean close (possibly after a TLS alert) or a reset
    if let Ok(n) = read {
        assert!(buf.len() == n && !buf.starts_with(&[0x00, 0x01]));
    }

    server.close().await.unwrap();
}
