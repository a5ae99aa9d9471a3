//! Client stub backed by an async call queue.
//!
//! Application tasks enqueue calls on a [`MessageProxy`] through a bounded
//! `embassy-sync` channel; the bus drains the channel one message per send
//! grant. No heap allocation is involved.
//!
//! ```text
//! ┌──────────────┐  (MethodId, M)  ┌──────────────┐  granted_send  ┌──────┐
//! │  app task    │───────────────▶│ MessageProxy │──────────────▶│ bus  │
//! │  call().await│   channel      │   pump()     │  serializer    │      │
//! └──────────────┘                └──────────────┘               └──────┘
//! ```

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::{NoopRawMutex, RawMutex};
use embassy_sync::channel::Channel;
use log::trace;

use crate::error::{Error, Result};

use super::header::{MethodId, ServiceId};
use super::serializer::MessageSerializer;
use super::service::{Echo, ProxyHandle, SerializerOf, ServiceProxy};
use super::wire::ProtoMessage;

/// A proxy for a service whose methods take message type `M`, with room
/// for `DEPTH` pending calls.
pub struct MessageProxy<M, const DEPTH: usize, R: RawMutex = NoopRawMutex> {
    service_id: ServiceId,
    max_message_size: usize,
    calls: Channel<R, (MethodId, M), DEPTH>,
    handle: Cell<Option<ProxyHandle>>,
}

impl<M, const DEPTH: usize, R: RawMutex> MessageProxy<M, DEPTH, R> {
    pub const fn new(service_id: ServiceId, max_message_size: usize) -> Self {
        Self {
            service_id,
            max_message_size,
            calls: Channel::new(),
            handle: Cell::new(None),
        }
    }

    pub fn service_id(&self) -> ServiceId {
        self.service_id
    }

    pub fn handle(&self) -> Option<ProxyHandle> {
        self.handle.get()
    }

    /// Calls waiting to be sent.
    pub fn pending(&self) -> usize {
        self.calls.len()
    }

    /// Queue a call, waiting while the queue is full.
    pub async fn call(&self, method_id: MethodId, message: M) {
        self.calls.send((method_id, message)).await;
    }

    /// Queue a call if there is room.
    pub fn try_call(&self, method_id: MethodId, message: M) -> Result<()> {
        self.calls
            .try_send((method_id, message))
            .map_err(|_| Error::QueueFull)
    }

    pub fn attach<'a, B>(&'a self, bus: &mut B) -> Result<ProxyHandle>
    where
        B: Echo<'a> + 'a,
        M: ProtoMessage + 'a,
        R: 'a,
        MessageSerializer<M>: Into<SerializerOf<B::Factory>>,
    {
        let handle = bus.attach_proxy(self)?;
        self.handle.set(Some(handle));
        Ok(handle)
    }

    /// Ask `bus` for a send grant if calls are waiting and the bus holds
    /// no request for this proxy.
    ///
    /// The bus is the only record of an outstanding request, so a request
    /// it dropped (detach, reset) is made again on the next pump.
    pub fn pump<'a, B: Echo<'a>>(&self, bus: &mut B) -> Result<()> {
        if self.calls.is_empty() {
            return Ok(());
        }
        let handle = self.handle.get().ok_or(Error::UnknownProxy)?;
        if bus.current_requested_size(handle).is_some() {
            return Ok(());
        }
        bus.request_send(handle)?;
        trace!("proxy[{}]: send requested", self.service_id);
        Ok(())
    }

    /// Withdraw an outstanding send request. Queued calls stay queued.
    pub fn cancel<'a, B: Echo<'a>>(&self, bus: &mut B) {
        if let Some(handle) = self.handle.get() {
            bus.cancel_request_send(handle);
        }
    }
}

impl<'a, M, const DEPTH: usize, R, S> ServiceProxy<'a, S> for MessageProxy<M, DEPTH, R>
where
    M: ProtoMessage,
    R: RawMutex,
    MessageSerializer<M>: Into<S>,
{
    fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    fn granted_send(&'a self) -> S {
        match self.calls.try_receive() {
            Ok((method_id, message)) => {
                MessageSerializer::new(self.service_id, method_id, message).into()
            }
            Err(_) => panic!("proxy[{}]: send granted without a pending call", self.service_id),
        }
    }
}
