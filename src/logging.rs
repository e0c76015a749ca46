//! # Server Events and Logging Sinks
//!
//! The runtime never logs directly from its control flow. Listeners,
//! connection loops and the request handler describe what happened as a
//! [`ServerEvent`] and hand it to the configured [`EventSink`].
//!
//! ## Sinks
//!
//! - [`TracingSink`] (default): forwards events to `tracing` at the level
//!   returned by [`ServerEvent::level`]
//! - [`CallbackSink`]: calls a user closure for every event
//! - [`NullSink`]: discards everything
//!
//! ```rust
//! use std::sync::Arc;
//! use voltage_modbus_server::{CallbackSink, LogLevel, ServerConfig};
//!
//! let sink = CallbackSink::new(|event| {
//!     if event.level() <= LogLevel::Warn {
//!         eprintln!("{}", event);
//!     }
//! });
//! let config = ServerConfig::new().with_event_sink(Arc::new(sink));
//! # let _ = config;
//! ```

use std::fmt;
use std::net::SocketAddr;

use tracing::{debug, error, info, trace, warn};

use crate::error::FrameError;
use crate::exception::Exception;
use crate::pdu::function_code_description;
use crate::transport::ResponseDropped;

/// Severity attached to every event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        };
        f.write_str(name)
    }
}

/// Kind of listener an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    Tcp,
    Tls,
    RtuOverTcp,
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerKind::Tcp => write!(f, "TCP"),
            ListenerKind::Tls => write!(f, "TLS"),
            ListenerKind::RtuOverTcp => write!(f, "RTU-over-TCP"),
        }
    }
}

/// Something worth reporting happened inside the server
#[derive(Debug, Clone, Copy)]
pub enum ServerEvent<'a> {
    ListenerStarted {
        kind: ListenerKind,
        addr: SocketAddr,
    },
    ListenerStopped {
        kind: ListenerKind,
        addr: SocketAddr,
    },
    /// Accepting a socket failed; the listener keeps going
    AcceptFailed {
        kind: ListenerKind,
        addr: SocketAddr,
        error: &'a std::io::Error,
    },
    ConnectionAccepted {
        kind: ListenerKind,
        peer: &'a str,
    },
    ConnectionClosed {
        peer: &'a str,
    },
    /// TLS handshake failed; the connection is dropped
    HandshakeFailed {
        peer: &'a str,
        error: &'a std::io::Error,
    },
    /// Bytes were dropped because they did not form a frame
    DecodeFailed {
        peer: &'a str,
        error: &'a FrameError,
    },
    /// Request for a unit that is unregistered or disabled; no response is sent
    UnitIgnored {
        peer: &'a str,
        unit_id: u8,
    },
    RequestDispatched {
        peer: &'a str,
        unit_id: u8,
        function: u8,
        exception: Exception,
    },
    /// A response was discarded before reaching the connection's writer
    ResponseDropped {
        peer: &'a str,
        unit_id: u8,
        function: u8,
        reason: ResponseDropped,
    },
    WriteFailed {
        peer: &'a str,
        error: &'a std::io::Error,
    },
    SerialWorkerStarted {
        name: &'a str,
    },
    SerialWorkerStopped {
        name: &'a str,
    },
}

impl ServerEvent<'_> {
    /// Severity of this event
    pub fn level(&self) -> LogLevel {
        match self {
            ServerEvent::ListenerStarted { .. }
            | ServerEvent::ListenerStopped { .. }
            | ServerEvent::SerialWorkerStarted { .. }
            | ServerEvent::SerialWorkerStopped { .. } => LogLevel::Info,
            ServerEvent::ConnectionAccepted { .. } | ServerEvent::ConnectionClosed { .. } => {
                LogLevel::Debug
            }
            ServerEvent::RequestDispatched { exception, .. } if exception.is_exception() => {
                LogLevel::Debug
            }
            ServerEvent::RequestDispatched { .. } => LogLevel::Trace,
            ServerEvent::DecodeFailed { .. }
            | ServerEvent::UnitIgnored { .. }
            | ServerEvent::HandshakeFailed { .. }
            | ServerEvent::ResponseDropped { .. } => LogLevel::Warn,
            ServerEvent::AcceptFailed { .. } | ServerEvent::WriteFailed { .. } => LogLevel::Error,
        }
    }
}

impl fmt::Display for ServerEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEvent::ListenerStarted { kind, addr } => {
                write!(f, "{} listener started on {}", kind, addr)
            }
            ServerEvent::ListenerStopped { kind, addr } => {
                write!(f, "{} listener on {} stopped", kind, addr)
            }
            ServerEvent::AcceptFailed { kind, addr, error } => {
                write!(f, "{} listener on {} failed to accept: {}", kind, addr, error)
            }
            ServerEvent::ConnectionAccepted { kind, peer } => {
                write!(f, "{} connection from {}", kind, peer)
            }
            ServerEvent::ConnectionClosed { peer } => write!(f, "connection {} closed", peer),
            ServerEvent::HandshakeFailed { peer, error } => {
                write!(f, "TLS handshake with {} failed: {}", peer, error)
            }
            ServerEvent::DecodeFailed { peer, error } => {
                write!(f, "dropped bytes from {}: {}", peer, error)
            }
            ServerEvent::UnitIgnored { peer, unit_id } => write!(
                f,
                "slave with {} ID is not registered or disabled, request from {} ignored",
                unit_id, peer
            ),
            ServerEvent::RequestDispatched {
                peer,
                unit_id,
                function,
                exception,
            } => write!(
                f,
                "{} -> unit {} fc=0x{:02X} ({}): {}",
                peer,
                unit_id,
                function,
                function_code_description(*function),
                exception
            ),
            ServerEvent::ResponseDropped {
                peer,
                unit_id,
                function,
                reason,
            } => write!(
                f,
                "response to {} (unit {} fc=0x{:02X}) dropped: {}",
                peer, unit_id, function, reason
            ),
            ServerEvent::WriteFailed { peer, error } => {
                write!(f, "failed to write response to {}: {}", peer, error)
            }
            ServerEvent::SerialWorkerStarted { name } => {
                write!(f, "serial worker on {} started", name)
            }
            ServerEvent::SerialWorkerStopped { name } => {
                write!(f, "serial worker on {} stopped", name)
            }
        }
    }
}

/// Receiver of server events
///
/// Sinks observe; they cannot alter what the server does next.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &ServerEvent<'_>);
}

/// Forwards events to the `tracing` subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&self, event: &ServerEvent<'_>) {
        match event.level() {
            LogLevel::Error => error!("{}", event),
            LogLevel::Warn => warn!("{}", event),
            LogLevel::Info => info!("{}", event),
            LogLevel::Debug => debug!("{}", event),
            LogLevel::Trace => trace!("{}", event),
        }
    }
}

/// Event callback function type
pub type EventCallback = Box<dyn Fn(&ServerEvent<'_>) + Send + Sync>;

/// Sink that hands every event to a closure
pub struct CallbackSink {
    callback: EventCallback,
    min_level: LogLevel,
}

impl CallbackSink {
    /// Deliver all events to `callback`
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&ServerEvent<'_>) + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
            min_level: LogLevel::Trace,
        }
    }

    /// Only deliver events at `level` or more severe
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Sink printing to stdout in a `[LEVEL] message` format
    pub fn console() -> Self {
        Self::new(|event| println!("[{}] {}", event.level(), event))
    }
}

impl EventSink for CallbackSink {
    fn on_event(&self, event: &ServerEvent<'_>) {
        if event.level() <= self.min_level {
            (self.callback)(event);
        }
    }
}

impl fmt::Debug for CallbackSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSink")
            .field("min_level", &self.min_level)
            .finish_non_exhaustive()
    }
}

/// Sink that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn on_event(&self, _event: &ServerEvent<'_>) {}
}
