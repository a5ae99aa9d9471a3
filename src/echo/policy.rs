//! Pluggable arbitration and error policies.
//!
//! [`EchoPolicy`] decides which proxy sends next and whether an inbound
//! call may be dispatched now; [`FifoPolicy`] is the stock first-come,
//! first-served strategy. [`EchoErrorPolicy`] receives protocol errors,
//! which never propagate to callers of the engine.

use heapless::Deque;
use log::warn;

use crate::config::{ErrorHandling, MAX_PROXIES};
use crate::error::{Error, Result};

use super::header::{MethodId, ServiceId};
use super::service::{ProxyHandle, ServiceHandle};

// ── Send queue ───────────────────────────────────────────────

/// Proxies waiting for a send grant, front first.
#[derive(Debug, Default)]
pub struct SendQueue {
    pending: Deque<ProxyHandle, MAX_PROXIES>,
}

impl SendQueue {
    pub fn new() -> Self {
        Self {
            pending: Deque::new(),
        }
    }

    pub fn push_back(&mut self, proxy: ProxyHandle) -> Result<()> {
        self.pending.push_back(proxy).map_err(|_| Error::QueueFull)
    }

    pub fn push_front(&mut self, proxy: ProxyHandle) -> Result<()> {
        self.pending.push_front(proxy).map_err(|_| Error::QueueFull)
    }

    pub fn pop_front(&mut self) -> Option<ProxyHandle> {
        self.pending.pop_front()
    }

    pub fn front(&self) -> Option<ProxyHandle> {
        self.pending.front().copied()
    }

    pub fn contains(&self, proxy: ProxyHandle) -> bool {
        self.pending.iter().any(|p| *p == proxy)
    }

    /// Remove `proxy` if queued, keeping the order of the others.
    pub fn remove(&mut self, proxy: ProxyHandle) -> bool {
        let Some(position) = self.pending.iter().position(|p| *p == proxy) else {
            return false;
        };
        let mut rest: Deque<ProxyHandle, MAX_PROXIES> = Deque::new();
        for (i, p) in self.pending.iter().enumerate() {
            if i != position {
                // Never more entries than the queue held.
                let _ = rest.push_back(*p);
            }
        }
        self.pending = rest;
        true
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ProxyHandle> + '_ {
        self.pending.iter().copied()
    }
}

// ── Arbitration ──────────────────────────────────────────────

/// Arbitration hooks consulted by the engine.
pub trait EchoPolicy {
    /// A proxy asked to send. The default appends it to the queue.
    fn request_send(&mut self, proxy: ProxyHandle, queue: &mut SendQueue) -> Result<()> {
        queue.push_back(proxy)
    }

    /// `proxy` is about to receive its grant.
    fn granting_send(&mut self, _proxy: ProxyHandle) {}

    /// Whether a call for `service` may be dispatched now. Returning
    /// `false` parks the call until `continue_receive`.
    fn dispatch_allowed(&mut self, _service: ServiceHandle, _method_id: MethodId) -> bool {
        true
    }

    /// The inbound call for `service` has finished. `None` means the
    /// payload was discarded.
    fn service_done(&mut self, _service: Option<ServiceHandle>) {}
}

/// Grant sends strictly in request order.
#[derive(Debug, Default, Clone, Copy)]
pub struct FifoPolicy;

impl EchoPolicy for FifoPolicy {}

// ── Errors ───────────────────────────────────────────────────

/// Receiver of protocol errors detected on the wire.
pub trait EchoErrorPolicy {
    /// Malformed header, or a payload the deserializer rejected.
    fn message_format_error(&mut self);
    fn service_not_found(&mut self, service_id: ServiceId);
    fn method_not_found(&mut self, service_id: ServiceId, method_id: MethodId);
}

impl EchoErrorPolicy for ErrorHandling {
    fn message_format_error(&mut self) {
        panic!("echo: message format error");
    }

    fn service_not_found(&mut self, service_id: ServiceId) {
        match self {
            Self::Abort => panic!("echo: service {service_id} not found"),
            Self::AbortOnMessageFormatError => warn!("echo: service {} not found", service_id),
        }
    }

    fn method_not_found(&mut self, service_id: ServiceId, method_id: MethodId) {
        match self {
            Self::Abort => panic!("echo: method {method_id} not found in service {service_id}"),
            Self::AbortOnMessageFormatError => {
                warn!("echo: method {} not found in service {}", method_id, service_id);
            }
        }
    }
}

/// Tolerates every error, logging and counting it.
///
/// Meant for links to untrusted peers and for fuzzing; a format error
/// leaves the stream resynchronising on whatever follows.
#[derive(Debug, Default, Clone, Copy)]
pub struct CountingErrorPolicy {
    pub format_errors: u32,
    pub services_not_found: u32,
    pub methods_not_found: u32,
}

impl EchoErrorPolicy for CountingErrorPolicy {
    fn message_format_error(&mut self) {
        warn!("echo: message format error");
        self.format_errors = self.format_errors.saturating_add(1);
    }

    fn service_not_found(&mut self, service_id: ServiceId) {
        warn!("echo: service {} not found", service_id);
        self.services_not_found = self.services_not_found.saturating_add(1);
    }

    fn method_not_found(&mut self, service_id: ServiceId, method_id: MethodId) {
        warn!("echo: method {} not found in service {}", method_id, service_id);
        self.methods_not_found = self.methods_not_found.saturating_add(1);
    }
}
