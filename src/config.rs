//! Echo configuration parameters
//!
//! Capacities are compile-time constants because every table in the engine
//! is a fixed-size `heapless` collection. Behavioural knobs live in
//! [`EchoConfig`], which applications may load from storage like any other
//! settings blob.

use serde::{Deserialize, Serialize};

/// Longest protobuf varint (a full 64-bit value).
pub const MAX_VAR_INT_SIZE: usize = 10;

/// Upper bound of a message header: service id, field tag and length.
pub const MAX_HEADER_SIZE: usize = 3 * MAX_VAR_INT_SIZE;

/// Number of services one bus can have attached at the same time.
pub const MAX_SERVICES: usize = 16;

/// Number of proxies one bus can have attached (and therefore queued).
pub const MAX_PROXIES: usize = 16;

/// Which of the two standard error policies a bus runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorHandling {
    /// Every protocol error is fatal.
    #[default]
    Abort,
    /// Only malformed messages are fatal; unknown services and methods are
    /// skipped.
    AbortOnMessageFormatError,
}

/// Runtime configuration of an [`EchoOnStreams`](crate::echo::EchoOnStreams) bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoConfig {
    /// Bytes added to each send-buffer request on top of the proxy's
    /// requested payload size.
    pub header_overhead: usize,
    /// Error policy used by [`EchoOnStreams::new`](crate::echo::EchoOnStreams::new).
    pub error_handling: ErrorHandling,
    /// Log every dispatched message at debug level.
    pub trace_dispatch: bool,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            header_overhead: 2 * MAX_VAR_INT_SIZE,
            error_handling: ErrorHandling::Abort,
            trace_dispatch: false,
        }
    }
}
