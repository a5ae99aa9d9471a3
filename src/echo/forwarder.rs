//! Transparent bridge from one bus to another.
//!
//! A [`ServiceForwarder`] is a service on bus A and a proxy on bus B. Each
//! message it accepts on A is re-emitted on B with a freshly encoded header
//! and the payload copied through a staging buffer of `N` bytes, so the
//! message is never held in full.
//!
//! ```text
//!   bus A                   ServiceForwarder                    bus B
//!  ┌──────┐  ForwardInbound  ┌──────────────────┐  ForwardOutbound  ┌──────┐
//!  │ data │────────────────▶│ header │ staging │─────────────────▶│ send │
//!  └──────┘ method_contents  └──────────────────┘    serialize      └──────┘
//!      ▲                            │ poll()                           ▲
//!      └── continue_receive ────────┴──────────── request / resume ────┘
//! ```
//!
//! Neither codec may call into a bus, so the bus actions they need
//! (request a send on B, resume a stalled send, resume a blocked receive,
//! signal `service_done` on A) are recorded as flags and performed by
//! [`ServiceForwarder::poll`].

use core::cell::{Cell, RefCell};

use heapless::{Deque, Vec};
use log::{debug, trace, warn};

use crate::config::MAX_HEADER_SIZE;
use crate::error::{Error, Result};

use super::header::{MessageHeader, MethodId, ServiceId};
use super::policy::EchoErrorPolicy;
use super::serializer::{MethodCompletion, MethodDeserializer, MethodSerializer, SendProgress};
use super::service::{
    DeserializerOf, Echo, ProxyHandle, RESERVED_SERVICE_ID, SerializerOf, Service, ServiceHandle,
    ServiceProxy,
};
use super::stream::{LimitedReader, StreamWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForwardScope {
    Service(ServiceId),
    All,
}

#[derive(Default)]
struct ForwardState<const N: usize> {
    header: Vec<u8, MAX_HEADER_SIZE>,
    header_sent: usize,
    forwarding_size: usize,
    processed: usize,
    staging: Deque<u8, N>,

    active: bool,
    request_pending: bool,
    requested: bool,
    serializing: bool,
    output_waiting: bool,
    input_waiting: bool,
    sent: bool,
    executed: bool,
    done_pending: bool,
    cancel_pending: bool,

    /// Bus B dropped the send; the rest of the input is skipped.
    discarding: bool,
    /// Bus A dropped the input mid-payload; the rest goes out zero-filled.
    truncated: bool,
    /// Bus A dropped its dispatch after the payload was complete.
    orphaned: bool,
    /// A message that started on bus A while the previous one was still
    /// being wound up on bus B, with its execute flag.
    next: Option<(MessageHeader, bool)>,
}

impl<const N: usize> ForwardState<N> {
    fn start(&mut self, header: MessageHeader) {
        *self = Self {
            header: header.encode(),
            forwarding_size: header.size as usize,
            active: true,
            request_pending: true,
            cancel_pending: self.cancel_pending,
            ..Self::default()
        };
    }

    /// A new message arrived on bus A.
    fn begin(&mut self, header: MessageHeader) {
        self.next = None;
        if self.active {
            // bus A only starts another message after a reset
            self.input_dropped();
        }
        if self.active {
            self.next = Some((header, false));
        } else {
            self.start(header);
        }
    }

    /// The current message is over on both sides. Starts the queued one.
    fn finish(&mut self) {
        let next = self.next.take();
        *self = Self {
            cancel_pending: self.cancel_pending,
            ..Self::default()
        };
        if let Some((header, executed)) = next {
            self.start(header);
            self.executed = executed;
            // its first bytes were refused while it waited
            self.input_waiting = true;
        }
    }

    /// Bus A no longer holds the message being relayed.
    fn input_dropped(&mut self) {
        self.input_waiting = false;
        if self.sent || self.discarding {
            self.finish();
        } else if self.executed {
            self.orphaned = true;
            self.done_pending = false;
        } else if self.serializing {
            self.truncated = true;
        } else {
            // nothing reached bus B yet
            let cancel = self.requested;
            self.finish();
            self.cancel_pending |= cancel;
        }
    }

    /// Bus B no longer holds the send for the message being relayed.
    fn output_dropped(&mut self) {
        if self.truncated || self.orphaned {
            self.finish();
            return;
        }
        self.discarding = true;
        self.requested = false;
        self.output_waiting = false;
        self.staging.clear();
        if self.executed {
            self.done_pending = true;
        }
    }

    /// Compare against what the buses still hold.
    fn reconcile(&mut self, input_live: bool, output_live: bool) {
        if !self.active {
            return;
        }
        if self.next.is_some() {
            if !input_live {
                self.next = None;
            }
        } else if !input_live && !self.truncated && !self.orphaned {
            debug!("forwarder: input dropped by bus A");
            self.input_dropped();
        }
        if self.active && self.requested && !self.sent && !output_live {
            debug!("forwarder: send dropped by bus B");
            self.output_dropped();
        }
    }

    fn ingest(&mut self, reader: &mut LimitedReader<'_>) {
        if self.next.is_some() {
            self.input_waiting = true;
            return;
        }
        if self.discarding {
            reader.skip(reader.available());
            return;
        }
        while !self.staging.is_full() && !reader.is_empty() {
            for &byte in reader.extract(N - self.staging.len()) {
                // Bounded by the free space computed above.
                let _ = self.staging.push_back(byte);
            }
        }
        if !reader.is_empty() {
            self.input_waiting = true;
        }
    }

    fn drain(&mut self, writer: &mut StreamWriter<'_>) {
        let header_rest = &self.header[self.header_sent..];
        self.header_sent += writer.insert(header_rest);
        if self.header_sent < self.header.len() {
            return;
        }
        while !writer.is_full() && !self.staging.is_empty() {
            let (front, _) = self.staging.as_slices();
            let n = writer.insert(front);
            for _ in 0..n {
                self.staging.pop_front();
            }
            self.processed += n;
        }
        if self.truncated && self.staging.is_empty() {
            const FILL: [u8; 16] = [0; 16];
            while !writer.is_full() && self.processed < self.forwarding_size {
                let want = (self.forwarding_size - self.processed).min(FILL.len());
                self.processed += writer.insert(&FILL[..want]);
            }
        }
    }
}

/// Relays messages for one service id (or all of them) from bus A to bus B.
///
/// A reset on either bus is noticed on the next [`poll`](Self::poll). When
/// bus B drops the send, the rest of the message is skipped on bus A. When
/// bus A drops the input, a message B has not started is withdrawn and
/// one it has started is completed with zero bytes, so B's framing stays
/// intact.
pub struct ServiceForwarder<const N: usize> {
    scope: ForwardScope,
    max_message_size: usize,
    state: RefCell<ForwardState<N>>,
    service: Cell<Option<ServiceHandle>>,
    proxy: Cell<Option<ProxyHandle>>,
}

impl<const N: usize> ServiceForwarder<N> {
    /// Forward messages addressed to `service_id`.
    pub fn new(service_id: ServiceId, max_message_size: usize) -> Self {
        Self::with_scope(ForwardScope::Service(service_id), max_message_size)
    }

    /// Forward every message, typically attached last as a catch-all.
    pub fn all(max_message_size: usize) -> Self {
        Self::with_scope(ForwardScope::All, max_message_size)
    }

    fn with_scope(scope: ForwardScope, max_message_size: usize) -> Self {
        Self {
            scope,
            max_message_size,
            state: RefCell::new(ForwardState::default()),
            service: Cell::new(None),
            proxy: Cell::new(None),
        }
    }

    /// Attach as a service on `from` and a proxy on `to`.
    pub fn attach<'a, A, B>(&'a self, from: &mut A, to: &mut B) -> Result<(ServiceHandle, ProxyHandle)>
    where
        A: Echo<'a> + 'a,
        B: Echo<'a> + 'a,
        ForwardInbound<'a, N>: Into<DeserializerOf<A::Factory>>,
        ForwardOutbound<'a, N>: Into<SerializerOf<B::Factory>>,
    {
        let service = from.attach_service(self)?;
        let proxy = to.attach_proxy(self)?;
        self.service.set(Some(service));
        self.proxy.set(Some(proxy));
        Ok((service, proxy))
    }

    /// Whether a message is being relayed.
    pub fn is_active(&self) -> bool {
        self.state.borrow().active
    }

    /// Perform the bus actions the codecs recorded since the last poll.
    ///
    /// Call it after every delivery to `from` and every send buffer
    /// handed to `to`, and after either bus was re-initialized.
    pub fn poll<'a, A, B>(&self, from: &mut A, to: &mut B)
    where
        A: Echo<'a>,
        B: Echo<'a>,
    {
        let service = self.service.get();
        let proxy = self.proxy.get();
        let input_live = service.is_some_and(|h| from.is_in_progress(h));
        let output_live = proxy.is_some_and(|p| to.current_requested_size(p).is_some());

        let (cancel, request) = {
            let mut st = self.state.borrow_mut();
            st.reconcile(input_live, output_live);
            let cancel = core::mem::take(&mut st.cancel_pending);
            let request = core::mem::take(&mut st.request_pending).then_some(st.forwarding_size);
            (cancel, request)
        };

        if let (true, Some(proxy)) = (cancel, proxy) {
            trace!("forwarder[{}]: withdrawing send", self.scope_id());
            to.cancel_request_send(proxy);
        }
        if let Some(size) = request {
            let requested = match proxy {
                Some(proxy) => match to.request_send_with_size(proxy, size) {
                    // a stray request from a withdrawn message carries this one
                    Ok(()) | Err(Error::AlreadyRequested) => true,
                    Err(e) => {
                        warn!("forwarder[{}]: send request failed: {}", self.scope_id(), e);
                        false
                    }
                },
                None => {
                    warn!("forwarder[{}]: not attached", self.scope_id());
                    false
                }
            };
            let mut st = self.state.borrow_mut();
            if requested {
                st.requested = true;
            } else {
                st.output_dropped();
            }
        }

        let (resume, cont, done) = {
            let mut st = self.state.borrow_mut();
            let resume =
                st.output_waiting && (!st.staging.is_empty() || st.truncated);
            if resume {
                st.output_waiting = false;
            }
            let cont = st.input_waiting && !st.staging.is_full();
            if cont {
                st.input_waiting = false;
            }
            let done = core::mem::take(&mut st.done_pending);
            if done {
                st.finish();
            }
            (resume, cont, done)
        };

        if resume {
            to.resume_send();
        }
        if cont {
            from.continue_receive();
        }
        if done {
            trace!("forwarder[{}]: message relayed", self.scope_id());
            from.service_done();
        }
    }

    fn scope_id(&self) -> ServiceId {
        match self.scope {
            ForwardScope::Service(id) => id,
            ForwardScope::All => RESERVED_SERVICE_ID,
        }
    }
}

impl<'a, const N: usize, D> Service<'a, D> for ServiceForwarder<N>
where
    ForwardInbound<'a, N>: Into<D>,
{
    fn service_id(&self) -> ServiceId {
        self.scope_id()
    }

    fn accepts_service(&self, service_id: ServiceId) -> bool {
        match self.scope {
            ForwardScope::Service(id) => id == service_id,
            ForwardScope::All => true,
        }
    }

    fn start_method(
        &'a self,
        service_id: ServiceId,
        method_id: MethodId,
        size: u32,
        _errors: &mut dyn EchoErrorPolicy,
    ) -> Option<D> {
        debug!(
            "forwarder[{}]: relaying service {} method {} ({} bytes)",
            self.scope_id(),
            service_id,
            method_id,
            size
        );
        self.state
            .borrow_mut()
            .begin(MessageHeader::new(service_id, method_id, size));
        Some(ForwardInbound { forwarder: self }.into())
    }
}

impl<'a, const N: usize, S> ServiceProxy<'a, S> for ServiceForwarder<N>
where
    ForwardOutbound<'a, N>: Into<S>,
{
    fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    fn granted_send(&'a self) -> S {
        ForwardOutbound { forwarder: self }.into()
    }
}

/// Deserializer half: takes payload bytes from bus A into staging.
pub struct ForwardInbound<'a, const N: usize> {
    forwarder: &'a ServiceForwarder<N>,
}

impl<const N: usize> MethodDeserializer for ForwardInbound<'_, N> {
    fn method_contents(&mut self, reader: &mut LimitedReader<'_>) {
        self.forwarder.state.borrow_mut().ingest(reader);
    }

    fn failed(&self) -> bool {
        false
    }

    fn execute_method(&mut self) -> MethodCompletion {
        let mut st = self.forwarder.state.borrow_mut();
        if let Some((_, executed)) = st.next.as_mut() {
            *executed = true;
            MethodCompletion::Pending
        } else if st.sent || st.discarding {
            st.finish();
            MethodCompletion::Done
        } else {
            st.executed = true;
            MethodCompletion::Pending
        }
    }
}

/// Serializer half: writes the header and staged payload to bus B.
pub struct ForwardOutbound<'a, const N: usize> {
    forwarder: &'a ServiceForwarder<N>,
}

impl<const N: usize> MethodSerializer for ForwardOutbound<'_, N> {
    fn serialize(&mut self, writer: &mut StreamWriter<'_>) -> SendProgress {
        let mut st = self.forwarder.state.borrow_mut();
        if !st.active || st.sent || st.discarding {
            warn!("forwarder: send granted with nothing to relay");
            return SendProgress::Complete;
        }

        st.serializing = true;
        st.drain(writer);

        if st.header_sent == st.header.len() && st.processed == st.forwarding_size {
            if st.truncated || st.orphaned {
                debug!("forwarder: cut-off message completed on bus B");
                st.finish();
            } else {
                st.sent = true;
                if st.executed {
                    st.done_pending = true;
                }
            }
            return SendProgress::Complete;
        }
        if writer.is_full() {
            SendProgress::Pending
        } else {
            st.output_waiting = true;
            SendProgress::Stalled
        }
    }
}

#[cfg(feature = "alloc")]
mod boxed {
    use alloc::boxed::Box;

    use super::*;

    impl<'a, const N: usize> From<ForwardInbound<'a, N>> for Box<dyn MethodDeserializer + 'a> {
        fn from(codec: ForwardInbound<'a, N>) -> Self {
            Box::new(codec)
        }
    }

    impl<'a, const N: usize> From<ForwardOutbound<'a, N>> for Box<dyn MethodSerializer + 'a> {
        fn from(codec: ForwardOutbound<'a, N>) -> Self {
            Box::new(codec)
        }
    }
}
