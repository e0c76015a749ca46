//! # Server Configuration
//!
//! Runtime knobs of a [`Server`](crate::server::Server). Protocol limits
//! (125 registers per read, 2000 coils per read, ...) are fixed by the
//! Modbus application protocol and live in [`crate::constants`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::constants::MAX_RTU_FRAME_LEN;
use crate::logging::{EventSink, TracingSink};

/// Default capacity of the request queue between connections and the handler.
pub const DEFAULT_REQUEST_QUEUE_CAPACITY: usize = 1;

/// Default number of responses a connection may hold unsent before new
/// ones are dropped.
pub const DEFAULT_RESPONSE_QUEUE_CAPACITY: usize = 16;

/// Default bound on delivering a first-connection signal.
pub const DEFAULT_FIRST_CONNECTION_TIMEOUT: Duration = Duration::from_millis(50);

/// Server configuration.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use voltage_modbus_server::ServerConfig;
///
/// let config = ServerConfig::new()
///     .with_request_queue_capacity(16)
///     .with_first_connection_timeout(Duration::from_millis(10));
///
/// assert_eq!(config.request_queue_capacity, 16);
/// ```
#[derive(Clone)]
pub struct ServerConfig {
    /// Requests that may wait for the handler before connections block.
    pub request_queue_capacity: usize,
    /// Unsent responses one connection may hold; beyond it responses are dropped.
    pub response_queue_capacity: usize,
    /// How long a listener waits to deliver its first-connection signal.
    pub first_connection_timeout: Duration,
    /// Largest frame the RTU stream framer buffers.
    pub max_rtu_frame_len: usize,
    /// Where server events go.
    pub event_sink: Arc<dyn EventSink>,
}

impl ServerConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set request queue capacity (at least 1).
    pub fn with_request_queue_capacity(mut self, capacity: usize) -> Self {
        self.request_queue_capacity = capacity.max(1);
        self
    }

    /// Set per-connection response queue capacity (at least 1).
    pub fn with_response_queue_capacity(mut self, capacity: usize) -> Self {
        self.response_queue_capacity = capacity.max(1);
        self
    }

    /// Set first-connection signal timeout.
    pub fn with_first_connection_timeout(mut self, timeout: Duration) -> Self {
        self.first_connection_timeout = timeout;
        self
    }

    /// Set maximum RTU frame length.
    pub fn with_max_rtu_frame_len(mut self, len: usize) -> Self {
        self.max_rtu_frame_len = len;
        self
    }

    /// Set event sink.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_queue_capacity: DEFAULT_REQUEST_QUEUE_CAPACITY,
            response_queue_capacity: DEFAULT_RESPONSE_QUEUE_CAPACITY,
            first_connection_timeout: DEFAULT_FIRST_CONNECTION_TIMEOUT,
            max_rtu_frame_len: MAX_RTU_FRAME_LEN,
            event_sink: Arc::new(TracingSink),
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("request_queue_capacity", &self.request_queue_capacity)
            .field("response_queue_capacity", &self.response_queue_capacity)
            .field("first_connection_timeout", &self.first_connection_timeout)
            .field("max_rtu_frame_len", &self.max_rtu_frame_len)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NullSink;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.request_queue_capacity, 1);
        assert_eq!(config.response_queue_capacity, 16);
        assert_eq!(config.first_connection_timeout, Duration::from_millis(50));
        assert_eq!(config.max_rtu_frame_len, 256);
    }

    #[test]
    fn test_builder_pattern() {
        let config = ServerConfig::new()
            .with_request_queue_capacity(0)
            .with_response_queue_capacity(0)
            .with_first_connection_timeout(Duration::from_millis(5))
            .with_max_rtu_frame_len(64)
            .with_event_sink(Arc::new(NullSink));

        assert_eq!(config.request_queue_capacity, 1);
        assert_eq!(config.response_queue_capacity, 1);
        assert_eq!(config.first_connection_timeout, Duration::from_millis(5));
        assert_eq!(config.max_rtu_frame_len, 64);
        assert!(format!("{:?}", config).contains("max_rtu_frame_len: 64"));
    }
}
