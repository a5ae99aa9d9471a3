//! Error types for the Echo engine.
//!
//! Protocol errors seen on the wire are never returned to callers; they are
//! routed to the bus's [`EchoErrorPolicy`](crate::echo::EchoErrorPolicy).
//! The types here cover wire decoding (used by the codec helpers) and the
//! fallible registration and arbitration calls. All variants are `Copy` so
//! they can be passed around without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Wire decoding errors
// ---------------------------------------------------------------------------

/// Outcome of a failed soft-fail decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// The bytes seen so far are a valid prefix; more are needed.
    Incomplete,
    /// The bytes can never form a valid encoding.
    Malformed,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incomplete => write!(f, "incomplete encoding"),
            Self::Malformed => write!(f, "malformed encoding"),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Decoding failed.
    Wire(WireError),
    /// No room left in the service or proxy table.
    RegistryFull,
    /// The send queue cannot take another request.
    QueueFull,
    /// The service handle is not attached to this bus.
    UnknownService,
    /// The proxy handle is not attached to this bus.
    UnknownProxy,
    /// The proxy already has a send request queued or granted.
    AlreadyRequested,
    /// A send request exceeds the proxy's maximum message size.
    MessageTooLarge { requested: usize, max: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wire(e) => write!(f, "wire: {e}"),
            Self::RegistryFull => write!(f, "registry full"),
            Self::QueueFull => write!(f, "send queue full"),
            Self::UnknownService => write!(f, "unknown service handle"),
            Self::UnknownProxy => write!(f, "unknown proxy handle"),
            Self::AlreadyRequested => write!(f, "send already requested"),
            Self::MessageTooLarge { requested, max } => {
                write!(f, "message of {requested} bytes exceeds maximum of {max}")
            }
        }
    }
}

impl core::error::Error for WireError {}

impl core::error::Error for Error {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Wire(e) => Some(e),
            _ => None,
        }
    }
}

impl From<WireError> for Error {
    fn from(e: WireError) -> Self {
        Self::Wire(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
