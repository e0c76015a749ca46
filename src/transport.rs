//! # Transports
//!
//! Accept loops and per-connection read loops for every transport the
//! server speaks:
//!
//! | Listener | Framing | Codec |
//! |----------|---------|-------|
//! | TCP | MBAP | [`MbapCodec`] |
//! | TLS (feature `tls`) | MBAP | [`MbapCodec`] |
//! | RTU-over-TCP | RTU | [`RtuCodec`] |
//! | Serial (any byte stream; `tokio-serial` with feature `rtu`) | RTU | [`RtuCodec`] |
//!
//! Every connection gets its own task. A read loop turns bytes into frames,
//! drops frames for units that are unregistered or disabled, and queues the
//! rest for the request handler together with a [`ConnectionHandle`].
//! The handler never touches a socket: responses go into a bounded
//! per-connection queue drained by that connection's writer, so a client
//! that stops reading only loses its own responses. Read loops end on EOF,
//! on a read error or when the server shuts down.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::debug;

use crate::codec::{DecodedFrame, MbapCodec, RtuCodec};
use crate::frame::Framer;
use crate::logging::{ListenerKind, ServerEvent};
use crate::server::{Request, Shared};

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

const LISTEN_BACKLOG: u32 = 1024;

/// Why a response never reached the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseDropped {
    /// The connection already holds as many unsent responses as it may
    Backlogged,
    /// The connection's writer is gone
    Closed,
}

impl fmt::Display for ResponseDropped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseDropped::Backlogged => write!(f, "response backlog full"),
            ResponseDropped::Closed => write!(f, "connection closed"),
        }
    }
}

/// Outbound side of a client connection
///
/// Cloned into every request read from the connection. The request
/// handler hands serialized responses to it without waiting; a
/// per-connection writer drains them onto the socket.
#[derive(Clone)]
pub struct ConnectionHandle {
    peer: Arc<str>,
    responses: mpsc::Sender<Bytes>,
}

impl ConnectionHandle {
    pub fn new(peer: impl Into<Arc<str>>, responses: mpsc::Sender<Bytes>) -> Self {
        Self {
            peer: peer.into(),
            responses,
        }
    }

    /// Remote address (or serial port name)
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Queue one serialized frame for the writer; never waits
    pub fn try_send_frame(&self, frame: Bytes) -> Result<(), ResponseDropped> {
        self.responses.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => ResponseDropped::Backlogged,
            TrySendError::Closed(_) => ResponseDropped::Closed,
        })
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// What a TCP listener speaks on accepted sockets
#[derive(Clone)]
pub(crate) enum Protocol {
    Tcp,
    RtuOverTcp,
    #[cfg(feature = "tls")]
    Tls(tokio_rustls::TlsAcceptor),
}

impl Protocol {
    fn kind(&self) -> ListenerKind {
        match self {
            Protocol::Tcp => ListenerKind::Tcp,
            Protocol::RtuOverTcp => ListenerKind::RtuOverTcp,
            #[cfg(feature = "tls")]
            Protocol::Tls(_) => ListenerKind::Tls,
        }
    }
}

/// Resolve once the server has been asked to shut down (or is gone)
pub(crate) async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stopping = *shutdown.borrow_and_update();
        if stopping {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

// ============================================================================
// Listeners
// ============================================================================

/// Bind a listening socket that a second process (or a restarted one) may
/// bind again right away
pub(crate) fn bind_reusable(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

/// Accept loop of one TCP-based listener
///
/// The listener fires the first-connection signal for its own first
/// accepted client. On shutdown the listener socket is closed first, then
/// every connection task it spawned is awaited.
pub(crate) async fn run_listener(
    shared: Arc<Shared>,
    listener: TcpListener,
    local: SocketAddr,
    protocol: Protocol,
) {
    let kind = protocol.kind();
    shared.emit(ServerEvent::ListenerStarted { kind, addr: local });

    let mut shutdown = shared.shutdown.clone();
    let mut connections = JoinSet::new();
    let mut first_client = true;

    loop {
        tokio::select! {
            _ = wait_shutdown(&mut shutdown) => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if std::mem::take(&mut first_client) {
                        shared.signal_first_connection(local);
                    }
                    let peer: Arc<str> = Arc::from(peer.to_string());
                    shared.emit(ServerEvent::ConnectionAccepted { kind, peer: &peer });
                    connections.spawn(serve_socket(
                        Arc::clone(&shared),
                        stream,
                        peer,
                        protocol.clone(),
                    ));
                }
                Err(error) => {
                    shared.emit(ServerEvent::AcceptFailed { kind, addr: local, error: &error });
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            },
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
    shared.emit(ServerEvent::ListenerStopped { kind, addr: local });
}

async fn serve_socket(shared: Arc<Shared>, stream: TcpStream, peer: Arc<str>, protocol: Protocol) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, "failed to set TCP_NODELAY: {}", e);
    }

    match protocol {
        Protocol::Tcp => serve_connection(shared, stream, peer, MbapCodec::new()).await,
        Protocol::RtuOverTcp => {
            let codec = RtuCodec::with_max_frame_len(shared.config.max_rtu_frame_len);
            serve_connection(shared, stream, peer, codec).await
        }
        #[cfg(feature = "tls")]
        Protocol::Tls(acceptor) => {
            let mut shutdown = shared.shutdown.clone();
            let handshake = tokio::select! {
                _ = wait_shutdown(&mut shutdown) => return,
                handshake = acceptor.accept(stream) => handshake,
            };
            match handshake {
                Ok(tls) => serve_connection(shared, tls, peer, MbapCodec::new()).await,
                Err(error) => shared.emit(ServerEvent::HandshakeFailed {
                    peer: &peer,
                    error: &error,
                }),
            }
        }
    }
}

// ============================================================================
// Serial
// ============================================================================

/// Serve RTU requests on a serial byte stream until EOF or shutdown
pub(crate) async fn run_serial_worker<P>(shared: Arc<Shared>, name: Arc<str>, port: P)
where
    P: AsyncRead + AsyncWrite + Send + 'static,
{
    shared.emit(ServerEvent::SerialWorkerStarted { name: &name });
    let codec = RtuCodec::with_max_frame_len(shared.config.max_rtu_frame_len);
    serve_connection(Arc::clone(&shared), port, Arc::clone(&name), codec).await;
    shared.emit(ServerEvent::SerialWorkerStopped { name: &name });
}

/// Line settings for a serial port opened by the server
#[cfg(feature = "rtu")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: tokio_serial::DataBits,
    pub stop_bits: tokio_serial::StopBits,
    pub parity: tokio_serial::Parity,
}

#[cfg(feature = "rtu")]
impl SerialConfig {
    /// 8N1 at `baud_rate`
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: tokio_serial::DataBits::Eight,
            stop_bits: tokio_serial::StopBits::One,
            parity: tokio_serial::Parity::None,
        }
    }

    pub fn with_data_bits(mut self, data_bits: tokio_serial::DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: tokio_serial::StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn with_parity(mut self, parity: tokio_serial::Parity) -> Self {
        self.parity = parity;
        self
    }

    pub(crate) fn open(&self, path: &str) -> crate::error::ModbusResult<tokio_serial::SerialStream> {
        let builder = tokio_serial::new(path, self.baud_rate)
            .data_bits(self.data_bits)
            .stop_bits(self.stop_bits)
            .parity(self.parity)
            .flow_control(tokio_serial::FlowControl::None);

        tokio_serial::SerialStream::open(&builder).map_err(|e| {
            crate::error::ModbusError::serial(format!(
                "Failed to open serial port {}: {}",
                path, e
            ))
        })
    }
}

#[cfg(feature = "rtu")]
impl Default for SerialConfig {
    fn default() -> Self {
        Self::new(9600)
    }
}

// ============================================================================
// Connection loop
// ============================================================================

/// Read frames from `stream` and queue them for the request handler
///
/// Runs the connection's writer alongside the read loop; returns once both
/// are done.
pub(crate) async fn serve_connection<S, D>(shared: Arc<Shared>, stream: S, peer: Arc<str>, codec: D)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    D: Decoder<Item = DecodedFrame, Error = std::io::Error> + Send + Unpin + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let (tx, rx) = mpsc::channel(shared.config.response_queue_capacity.max(1));
    let conn = ConnectionHandle::new(Arc::clone(&peer), tx);

    tokio::join!(
        read_requests(&shared, reader, conn, codec),
        write_responses(&shared, &peer, writer, rx),
    );

    shared.emit(ServerEvent::ConnectionClosed { peer: &peer });
}

async fn read_requests<R, D>(shared: &Shared, reader: R, conn: ConnectionHandle, codec: D)
where
    R: AsyncRead + Unpin,
    D: Decoder<Item = DecodedFrame, Error = std::io::Error> + Unpin,
{
    let mut frames = FramedRead::new(reader, codec);
    let mut shutdown = shared.shutdown.clone();

    loop {
        let next = tokio::select! {
            _ = wait_shutdown(&mut shutdown) => break,
            next = frames.next() => next,
        };

        let frame = match next {
            None => break,
            Some(Err(e)) => {
                debug!(peer = %conn.peer(), "read failed: {}", e);
                break;
            }
            Some(Ok(Err(error))) => {
                shared.emit(ServerEvent::DecodeFailed {
                    peer: conn.peer(),
                    error: &error,
                });
                continue;
            }
            Some(Ok(Ok(frame))) => frame,
        };

        let unit_id = frame.unit_id();
        if !shared.is_enabled(unit_id) {
            shared.emit(ServerEvent::UnitIgnored {
                peer: conn.peer(),
                unit_id,
            });
            continue;
        }

        let request = Request {
            conn: conn.clone(),
            frame,
        };
        let queued = tokio::select! {
            _ = wait_shutdown(&mut shutdown) => break,
            queued = shared.requests.send(request) => queued,
        };
        if queued.is_err() {
            break;
        }
    }
}

/// Drain queued responses onto the socket
///
/// Ends when every [`ConnectionHandle`] of the connection is gone, on a
/// write error or on shutdown. Responses still queued at that point are
/// discarded.
async fn write_responses<W>(
    shared: &Shared,
    peer: &str,
    mut writer: W,
    mut responses: mpsc::Receiver<Bytes>,
) where
    W: AsyncWrite + Unpin,
{
    let mut shutdown = shared.shutdown.clone();
    let drain = async {
        while let Some(frame) = responses.recv().await {
            let written = async {
                writer.write_all(&frame).await?;
                writer.flush().await
            };
            if let Err(error) = written.await {
                shared.emit(ServerEvent::WriteFailed { peer, error: &error });
                break;
            }
        }
    };

    tokio::select! {
        _ = wait_shutdown(&mut shutdown) => {}
        _ = drain => {}
    }
}
