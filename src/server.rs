//! # Modbus Slave Server
//!
//! [`Server`] ties the pieces together:
//!
//! ```text
//!  listener ──► connection loop ──► registry check ──► request queue ──► handler task
//!  (accept)     (codec → Frame)     (enabled units)    (bounded mpsc)    (owns all SlaveData)
//!                                                                            │
//!                              originating connection ◄── response frame ◄──┘
//! ```
//!
//! Exactly one task, the request handler, owns every slave's memory and the
//! function table. Requests from all connections funnel through one queue,
//! so no two handlers ever run at the same time and memory needs no locks.
//! Administrative changes that touch handler state (attaching a new slave's
//! memory, overriding a handler, [`Server::with_slave`]) travel to the same
//! task over a separate channel that it polls first.
//!
//! The registry of unit identifiers and their enabled flag is shared with
//! the connection loops behind a `parking_lot::RwLock`; it never holds
//! memory.
//!
//! ## Example
//!
//! ```rust,no_run
//! use voltage_modbus_server::{ModbusResult, Server};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let server = Server::new();
//!     server.register_slave(1)?;
//!     server
//!         .with_slave(1, |data| data.holding_registers.set(0, 0x1234))
//!         .await?;
//!
//!     let addr = server.listen_tcp("127.0.0.1:5020").await?;
//!     println!("listening on {}", addr);
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.close().await
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{ModbusError, ModbusResult};
use crate::exception::Exception;
use crate::frame::{Frame, Framer};
use crate::function::{FunctionHandler, FunctionTable};
use crate::logging::{EventSink, ServerEvent};
use crate::memory::SlaveData;
use crate::transport::{self, ConnectionHandle, Protocol};

// ============================================================================
// Requests and admin commands
// ============================================================================

/// A decoded frame paired with the connection it arrived on
#[derive(Debug)]
pub struct Request {
    pub conn: ConnectionHandle,
    pub frame: Frame,
}

/// Whether a registered slave answers requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlaveStatus {
    Enabled,
    Disabled,
}

type SlaveAccess = Box<dyn FnOnce(Option<&mut SlaveData>) + Send>;

/// Changes applied by the handler task between requests
enum AdminCommand {
    Attach { unit_id: u8, data: SlaveData },
    SetHandler { code: u8, handler: Arc<dyn FunctionHandler> },
    Access { unit_id: u8, apply: SlaveAccess },
    Stop,
}

// ============================================================================
// Shared state
// ============================================================================

/// State reachable from listeners and connection loops
pub(crate) struct Shared {
    pub(crate) config: ServerConfig,
    slaves: RwLock<HashMap<u8, SlaveStatus>>,
    pub(crate) requests: mpsc::Sender<Request>,
    admin: mpsc::UnboundedSender<AdminCommand>,
    pub(crate) shutdown: watch::Receiver<bool>,
    signal: mpsc::Sender<SocketAddr>,
}

impl Shared {
    /// Whether requests for `unit_id` should reach the handler
    pub(crate) fn is_enabled(&self, unit_id: u8) -> bool {
        matches!(self.slaves.read().get(&unit_id), Some(SlaveStatus::Enabled))
    }

    pub(crate) fn emit(&self, event: ServerEvent<'_>) {
        self.config.event_sink.on_event(&event);
    }

    /// Send a listener's address on the first-connection signal without
    /// blocking the caller; dropped if nobody takes it in time
    pub(crate) fn signal_first_connection(&self, addr: SocketAddr) {
        let signal = self.signal.clone();
        let wait = self.config.first_connection_timeout;
        tokio::spawn(async move {
            if tokio::time::timeout(wait, signal.send(addr)).await.is_err() {
                debug!(%addr, "first-connection signal not consumed");
            }
        });
    }

    fn registered(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.slaves.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn set_status(&self, unit_id: u8, status: SlaveStatus) -> ModbusResult<()> {
        let mut slaves = self.slaves.write();
        match slaves.get_mut(&unit_id) {
            Some(current) => {
                *current = status;
                Ok(())
            }
            None => {
                let registered = slaves.keys().copied().collect();
                Err(ModbusError::slave_not_registered(unit_id, registered))
            }
        }
    }

    fn send_admin(&self, command: AdminCommand) -> ModbusResult<()> {
        self.admin.send(command).map_err(|_| ModbusError::Closed)
    }
}

// ============================================================================
// Request handler
// ============================================================================

/// The single consumer of the request queue
struct RequestHandler {
    slaves: HashMap<u8, SlaveData>,
    table: FunctionTable,
    sink: Arc<dyn EventSink>,
}

impl RequestHandler {
    fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            slaves: HashMap::new(),
            table: FunctionTable::standard(),
            sink,
        }
    }

    async fn run(
        mut self,
        mut admin: mpsc::UnboundedReceiver<AdminCommand>,
        mut requests: mpsc::Receiver<Request>,
    ) {
        debug!("request handler started");
        loop {
            tokio::select! {
                biased;
                Some(command) = admin.recv() => {
                    if !self.apply(command) {
                        break;
                    }
                }
                request = requests.recv() => match request {
                    Some(request) => self.handle(request),
                    None => break,
                },
            }
        }

        requests.close();
        while let Ok(request) = requests.try_recv() {
            self.handle(request);
        }
        admin.close();
        while let Ok(command) = admin.try_recv() {
            self.apply(command);
        }
        debug!("request handler stopped");
    }

    /// Returns false once asked to stop
    fn apply(&mut self, command: AdminCommand) -> bool {
        match command {
            AdminCommand::Attach { unit_id, data } => {
                self.slaves.entry(unit_id).or_insert(data);
            }
            AdminCommand::SetHandler { code, handler } => self.table.set(code, handler),
            AdminCommand::Access { unit_id, apply } => apply(self.slaves.get_mut(&unit_id)),
            AdminCommand::Stop => return false,
        }
        true
    }

    fn handle(&mut self, request: Request) {
        let Request { conn, frame } = request;
        let unit_id = frame.unit_id();

        let (response, exception) = match self.slaves.get_mut(&unit_id) {
            Some(slave) => self.table.dispatch(slave, &frame),
            None => (
                frame.with_exception(Exception::SlaveDeviceFailure),
                Exception::SlaveDeviceFailure,
            ),
        };

        self.sink.on_event(&ServerEvent::RequestDispatched {
            peer: conn.peer(),
            unit_id,
            function: frame.function_code(),
            exception,
        });

        if let Err(reason) = conn.try_send_frame(response.serialize()) {
            self.sink.on_event(&ServerEvent::ResponseDropped {
                peer: conn.peer(),
                unit_id,
                function: frame.function_code(),
                reason,
            });
        }
    }
}

// ============================================================================
// Server
// ============================================================================

struct Listener {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

/// Modbus slave server
///
/// Must be created inside a Tokio runtime: construction spawns the request
/// handler task. Dropping the server without [`Server::close`] still stops
/// the listeners, but does not wait for them.
pub struct Server {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    listeners: Mutex<Vec<Listener>>,
    serial_workers: Mutex<Vec<JoinHandle<()>>>,
    signal: Mutex<Option<mpsc::Receiver<SocketAddr>>>,
    handler: Option<JoinHandle<()>>,
}

impl Server {
    /// Create a server with default configuration
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a server with custom configuration
    pub fn with_config(config: ServerConfig) -> Self {
        let (request_tx, request_rx) = mpsc::channel(config.request_queue_capacity.max(1));
        let (admin_tx, admin_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (signal_tx, signal_rx) = mpsc::channel(1);

        let handler = RequestHandler::new(Arc::clone(&config.event_sink));
        let handler = tokio::spawn(handler.run(admin_rx, request_rx));

        let shared = Arc::new(Shared {
            config,
            slaves: RwLock::new(HashMap::new()),
            requests: request_tx,
            admin: admin_tx,
            shutdown: shutdown_rx,
            signal: signal_tx,
        });

        Self {
            shared,
            shutdown: shutdown_tx,
            listeners: Mutex::new(Vec::new()),
            serial_workers: Mutex::new(Vec::new()),
            signal: Mutex::new(Some(signal_rx)),
            handler: Some(handler),
        }
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    // === Slave administration ===

    /// Register a unit identifier with zeroed memory, enabled.
    ///
    /// Registering an identifier twice is a no-op: its memory and status are kept.
    pub fn register_slave(&self, unit_id: u8) -> ModbusResult<()> {
        if self.shared.slaves.read().contains_key(&unit_id) {
            return Ok(());
        }
        let data = SlaveData::allocate();

        let mut slaves = self.shared.slaves.write();
        if slaves.contains_key(&unit_id) {
            return Ok(());
        }
        // memory must be queued for the handler before the unit becomes visible
        self.shared
            .send_admin(AdminCommand::Attach { unit_id, data })?;
        slaves.insert(unit_id, SlaveStatus::Enabled);
        info!(unit_id, "slave registered");
        Ok(())
    }

    /// Resume answering requests for `unit_id`
    pub fn enable_slave(&self, unit_id: u8) -> ModbusResult<()> {
        self.shared.set_status(unit_id, SlaveStatus::Enabled)?;
        info!(unit_id, "slave enabled");
        Ok(())
    }

    /// Stop answering requests for `unit_id`; clients will time out
    pub fn disable_slave(&self, unit_id: u8) -> ModbusResult<()> {
        self.shared.set_status(unit_id, SlaveStatus::Disabled)?;
        info!(unit_id, "slave disabled");
        Ok(())
    }

    /// Registered unit identifiers, ascending
    pub fn registered_slaves(&self) -> Vec<u8> {
        self.shared.registered()
    }

    /// Status of `unit_id`, `None` if unregistered
    pub fn slave_status(&self, unit_id: u8) -> Option<SlaveStatus> {
        self.shared.slaves.read().get(&unit_id).copied()
    }

    /// Whether `unit_id` is registered and enabled
    pub fn is_enabled(&self, unit_id: u8) -> bool {
        self.shared.is_enabled(unit_id)
    }

    /// Run `f` against a slave's memory on the handler task.
    ///
    /// Runs between two requests, ahead of any request still waiting in
    /// the queue: `f` sees every request handled so far, not necessarily
    /// ones a client sent just before this call.
    pub async fn with_slave<F, R>(&self, unit_id: u8, f: F) -> ModbusResult<R>
    where
        F: FnOnce(&mut SlaveData) -> R + Send + 'static,
        R: Send + 'static,
    {
        if !self.shared.slaves.read().contains_key(&unit_id) {
            return Err(ModbusError::slave_not_registered(
                unit_id,
                self.shared.registered(),
            ));
        }

        let (tx, rx) = oneshot::channel();
        let apply: SlaveAccess = Box::new(move |data: Option<&mut SlaveData>| {
            let _ = tx.send(data.map(f));
        });
        self.shared
            .send_admin(AdminCommand::Access { unit_id, apply })?;

        match rx.await {
            Ok(Some(result)) => Ok(result),
            Ok(None) => Err(ModbusError::slave_not_registered(
                unit_id,
                self.shared.registered(),
            )),
            Err(_) => Err(ModbusError::Closed),
        }
    }

    // === Function handlers ===

    /// Install or replace the handler for `code`.
    ///
    /// Takes effect for every request dequeued after this call.
    pub fn register_handler<H>(&self, code: u8, handler: H) -> ModbusResult<()>
    where
        H: FunctionHandler + 'static,
    {
        self.shared.send_admin(AdminCommand::SetHandler {
            code,
            handler: Arc::new(handler),
        })?;
        debug!("handler registered for function code 0x{:02X}", code);
        Ok(())
    }

    // === Listeners ===

    /// Accept Modbus TCP (MBAP) connections on `addr`
    pub async fn listen_tcp<A: ToSocketAddrs>(&self, addr: A) -> ModbusResult<SocketAddr> {
        self.listen(addr, Protocol::Tcp).await
    }

    /// Accept RTU frames carried over plain TCP on `addr`
    pub async fn listen_rtu_over_tcp<A: ToSocketAddrs>(&self, addr: A) -> ModbusResult<SocketAddr> {
        self.listen(addr, Protocol::RtuOverTcp).await
    }

    /// Accept Modbus TCP over TLS on `addr`
    #[cfg(feature = "tls")]
    pub async fn listen_tls<A: ToSocketAddrs>(
        &self,
        addr: A,
        acceptor: tokio_rustls::TlsAcceptor,
    ) -> ModbusResult<SocketAddr> {
        self.listen(addr, Protocol::Tls(acceptor)).await
    }

    async fn listen<A: ToSocketAddrs>(&self, addr: A, protocol: Protocol) -> ModbusResult<SocketAddr> {
        let listener = bind_first(addr).await?;
        let local = listener.local_addr()?;
        let task = tokio::spawn(transport::run_listener(
            Arc::clone(&self.shared),
            listener,
            local,
            protocol,
        ));
        self.listeners.lock().push(Listener { addr: local, task });
        Ok(local)
    }

    /// Serve RTU requests on an already opened serial byte stream
    pub fn serve_serial<P>(&self, name: &str, port: P)
    where
        P: AsyncRead + AsyncWrite + Send + 'static,
    {
        let task = tokio::spawn(transport::run_serial_worker(
            Arc::clone(&self.shared),
            Arc::from(name),
            port,
        ));
        self.serial_workers.lock().push(task);
    }

    /// Open the serial device at `path` and serve RTU requests on it
    #[cfg(feature = "rtu")]
    pub fn listen_serial(&self, path: &str, config: transport::SerialConfig) -> ModbusResult<()> {
        let port = config.open(path)?;
        self.serve_serial(path, port);
        Ok(())
    }

    /// Local addresses of all listeners started so far
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.lock().iter().map(|l| l.addr).collect()
    }

    /// Receiver for the first-connection signal.
    ///
    /// Every listener sends its local address when it accepts its first
    /// connection. A signal nobody receives within
    /// `first_connection_timeout` is dropped. Returns `None` when already
    /// taken.
    pub fn connection_signal(&self) -> Option<mpsc::Receiver<SocketAddr>> {
        self.signal.lock().take()
    }

    // === Shutdown ===

    /// Stop all listeners and serial workers, then the request handler.
    ///
    /// Listeners stop accepting and their connections end; serial workers
    /// are awaited before their ports are released. Requests already queued
    /// are still applied to slave memory, but their responses are dropped
    /// along with the connections.
    pub async fn close(mut self) -> ModbusResult<()> {
        info!("closing server");
        let _ = self.shutdown.send(true);

        let listeners = std::mem::take(&mut *self.listeners.lock());
        for listener in listeners {
            if let Err(e) = listener.task.await {
                warn!(addr = %listener.addr, "listener task failed: {}", e);
            }
        }

        let workers = std::mem::take(&mut *self.serial_workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("serial worker failed: {}", e);
            }
        }

        if let Some(handler) = self.handler.take() {
            // the handler may already be gone if a custom handler panicked
            let _ = self.shared.send_admin(AdminCommand::Stop);
            handler.await.map_err(std::io::Error::from)?;
        }
        info!("server closed");
        Ok(())
    }
}

/// Bind to the first resolved address that accepts a reusable socket
async fn bind_first<A: ToSocketAddrs>(addr: A) -> std::io::Result<TcpListener> {
    let mut last_error = None;
    for candidate in tokio::net::lookup_host(addr).await? {
        match transport::bind_reusable(candidate) {
            Ok(listener) => return Ok(listener),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "could not resolve to any address",
        )
    }))
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.shared.config)
            .field("slaves", &self.registered_slaves())
            .field("listeners", &self.local_addrs())
            .finish_non_exhaustive()
    }
}
