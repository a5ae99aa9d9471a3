//! Echo protocol engine over an ordered byte stream.
//!
//! **Transport-decoupled**: the engine performs no I/O. The transport feeds
//! inbound bytes through [`EchoOnStreams::data_received`], lends send
//! buffers through [`EchoOnStreams::send_stream_available`] and reports
//! reconnects through [`EchoOnStreams::initialized`]. The engine in turn
//! only asks for buffers ([`EchoTransport::request_send_stream`]) and says
//! when it can take input again ([`EchoTransport::receive_ready`]).
//!
//! Send path:
//!
//! ```text
//!  request_send ──▶ queue ──▶ Granted ──▶ Streaming ──▶ Idle
//!                     ▲        (buffer      │  ▲
//!                     │      requested)     ▼  │ resume_send
//!                     │                   Stalled
//!                     └──────── re-arbitrate ◀──── Complete
//! ```
//!
//! Receive path:
//!
//! ```text
//!  Header ──▶ Body{remaining} ──▶ execute ──▶ Done ──▶ Header
//!    │                               │
//!    ▼ dispatch_allowed = false      ▼ Pending
//!  Blocked ── continue_receive ──▶  Dispatching ── service_done ──▶ Header
//! ```
//!
//! Exactly one serializer and one deserializer are live at any time; that is
//! what lets the codec arenas be single-slot.

use heapless::Vec;
use log::{debug, info, trace, warn};

use crate::config::{EchoConfig, ErrorHandling, MAX_PROXIES, MAX_SERVICES};
use crate::error::{Error, Result};

use super::factory::MethodSerializerFactory;
use super::header::{HeaderDecoder, HeaderFeed, MessageHeader};
use super::policy::{EchoErrorPolicy, EchoPolicy, FifoPolicy, SendQueue};
use super::serializer::{MethodCompletion, MethodDeserializer, MethodSerializer, SendProgress};
use super::service::{
    DeserializerOf, Echo, ProxyHandle, SerializerOf, Service, ServiceHandle, ServiceProxy,
};
use super::stream::{LimitedReader, StreamWriter};
use super::transport::EchoTransport;

/// Traffic counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EchoStats {
    /// Messages fully written to the transport.
    pub sent: u32,
    /// Messages executed by a service.
    pub dispatched: u32,
    /// Messages skipped because no service or method accepted them.
    pub discarded: u32,
    /// Malformed headers and payloads rejected by a deserializer.
    pub format_errors: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    Idle,
    /// Buffer requested, serializer not made yet.
    Granted { proxy: ProxyHandle, size: usize },
    /// Serializer live, next buffer requested.
    Streaming { proxy: ProxyHandle, size: usize },
    /// Serializer live, waiting for `resume_send`.
    Stalled { proxy: ProxyHandle, size: usize },
}

impl SendState {
    fn proxy(&self) -> Option<ProxyHandle> {
        match *self {
            Self::Idle => None,
            Self::Granted { proxy, .. }
            | Self::Streaming { proxy, .. }
            | Self::Stalled { proxy, .. } => Some(proxy),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiveState {
    Header,
    Body { remaining: usize },
    /// Executed, waiting for `service_done`.
    Dispatching,
    /// Header parsed, the policy held off the dispatch.
    Blocked(MessageHeader),
}

struct ServiceEntry<'a, D> {
    handle: ServiceHandle,
    service: &'a dyn Service<'a, D>,
}

struct ProxyEntry<'a, S> {
    handle: ProxyHandle,
    proxy: &'a dyn ServiceProxy<'a, S>,
    requested_size: usize,
}

/// The Echo bus over one transport.
pub struct EchoOnStreams<'a, T, F, P = FifoPolicy, E = ErrorHandling>
where
    F: MethodSerializerFactory,
{
    transport: T,
    factory: F,
    policy: P,
    errors: E,
    config: EchoConfig,

    services: Vec<ServiceEntry<'a, DeserializerOf<F>>, MAX_SERVICES>,
    proxies: Vec<ProxyEntry<'a, SerializerOf<F>>, MAX_PROXIES>,
    next_service: u16,
    next_proxy: u16,

    queue: SendQueue,
    send: SendState,
    skip_next_stream: bool,

    header: HeaderDecoder,
    receive: ReceiveState,
    dispatch_target: Option<ServiceHandle>,

    stats: EchoStats,
}

impl<'a, T, F> EchoOnStreams<'a, T, F>
where
    T: EchoTransport,
    F: MethodSerializerFactory,
{
    /// Bus with FIFO arbitration and the error handling named in `config`.
    pub fn new(transport: T, factory: F, config: EchoConfig) -> Self {
        let errors = config.error_handling;
        Self::with_policies(transport, factory, config, FifoPolicy, errors)
    }
}

impl<'a, T, F, P, E> EchoOnStreams<'a, T, F, P, E>
where
    T: EchoTransport,
    F: MethodSerializerFactory,
    P: EchoPolicy,
    E: EchoErrorPolicy,
{
    /// Bus with explicit arbitration and error policies. `config.error_handling`
    /// is ignored in favour of `errors`.
    pub fn with_policies(transport: T, factory: F, config: EchoConfig, policy: P, errors: E) -> Self {
        Self {
            transport,
            factory,
            policy,
            errors,
            config,
            services: Vec::new(),
            proxies: Vec::new(),
            next_service: 0,
            next_proxy: 0,
            queue: SendQueue::new(),
            send: SendState::Idle,
            skip_next_stream: false,
            header: HeaderDecoder::new(),
            receive: ReceiveState::Header,
            dispatch_target: None,
            stats: EchoStats::default(),
        }
    }

    // ── Accessors ─────────────────────────────────────────────

    /// The transport this bus drives.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the transport, for drivers that own its buffers.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The arbitration policy.
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Mutable access to the arbitration policy.
    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    /// The error policy, e.g. to read its counters.
    pub fn errors(&self) -> &E {
        &self.errors
    }

    /// Settings the bus was built with.
    pub fn config(&self) -> &EchoConfig {
        &self.config
    }

    /// Snapshot of the traffic counters.
    pub fn stats(&self) -> EchoStats {
        self.stats
    }

    /// Whether a send is granted or in progress.
    pub fn is_sending(&self) -> bool {
        self.send != SendState::Idle
    }

    /// Number of proxies waiting for a grant.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    // ── Transport entry points ────────────────────────────────

    /// Feed inbound bytes. Returns how many were consumed.
    ///
    /// Bytes not consumed must be offered again once the transport gets
    /// `receive_ready`. A partial header is retained internally and counts
    /// as consumed.
    pub fn data_received(&mut self, data: &[u8]) -> usize {
        let mut consumed = 0;
        loop {
            let rest = &data[consumed..];
            match self.receive {
                ReceiveState::Header => {
                    if rest.is_empty() {
                        break;
                    }
                    match self.header.feed(rest) {
                        HeaderFeed::NeedMore(n) => {
                            consumed += n;
                            break;
                        }
                        HeaderFeed::Complete(header, n) => {
                            consumed += n;
                            self.start_dispatch(header);
                        }
                        HeaderFeed::Malformed(n) => {
                            consumed += n;
                            self.stats.format_errors = self.stats.format_errors.saturating_add(1);
                            warn!("echo: malformed message header");
                            self.errors.message_format_error();
                        }
                    }
                }
                ReceiveState::Body { remaining } => {
                    if rest.is_empty() {
                        break;
                    }
                    let limit = remaining.min(rest.len());
                    let mut reader = LimitedReader::new(&rest[..limit]);
                    match self.factory.deserializer() {
                        Some(deserializer) => deserializer.method_contents(&mut reader),
                        None => {
                            warn!("echo: message body without deserializer");
                            reader.skip(limit);
                        }
                    }
                    let used = reader.consumed();
                    consumed += used;
                    let remaining = remaining - used;
                    self.receive = ReceiveState::Body { remaining };

                    if remaining == 0 {
                        self.finish_body();
                    } else if used < limit {
                        trace!("echo: deserializer took {} of {} bytes", used, limit);
                        break;
                    }
                }
                ReceiveState::Dispatching | ReceiveState::Blocked(_) => break,
            }
        }
        consumed
    }

    /// The transport lends a send buffer, answering `request_send_stream`.
    pub fn send_stream_available(&mut self, writer: &mut StreamWriter<'_>) {
        if self.skip_next_stream {
            self.skip_next_stream = false;
            trace!("echo: discarding stray send stream");
            self.try_grant_send();
            return;
        }

        match self.send {
            SendState::Idle | SendState::Stalled { .. } => {
                warn!("echo: unexpected send stream");
            }
            SendState::Granted { proxy, size } => {
                let Some(entry) = self.proxy_entry(proxy) else {
                    self.send = SendState::Idle;
                    self.try_grant_send();
                    return;
                };
                let target = entry.proxy;
                trace!("echo: granting send to proxy {:?}", proxy);
                self.policy.granting_send(proxy);
                self.factory.make_serializer(target.granted_send());
                self.send = SendState::Streaming { proxy, size };
                self.stream(writer);
            }
            SendState::Streaming { .. } => self.stream(writer),
        }
    }

    /// The transport was (re)initialized.
    ///
    /// Partially streamed sends and partially received messages are
    /// dropped; a grant that has not produced any byte yet survives.
    pub fn initialized(&mut self) {
        info!("echo: transport initialized");

        if !matches!(self.send, SendState::Granted { .. }) {
            self.abandon_send();
        }

        self.header.reset();
        if self.factory.release_deserializer() {
            debug!("echo: dropped inbound message on reset");
        }
        if !matches!(self.receive, ReceiveState::Header) {
            self.policy.service_done(self.dispatch_target);
        }
        self.receive = ReceiveState::Header;
        self.dispatch_target = None;

        self.try_grant_send();
    }

    // ── Receive internals ─────────────────────────────────────

    fn start_dispatch(&mut self, header: MessageHeader) {
        let MessageHeader {
            service_id,
            method_id,
            size,
        } = header;

        if self.config.trace_dispatch {
            debug!(
                "echo: message service {} method {} ({} bytes)",
                service_id, method_id, size
            );
        }

        let target = self
            .services
            .iter()
            .find(|e| e.service.accepts_service(service_id))
            .map(|e| (e.handle, e.service));

        match target {
            None => {
                warn!("echo: no service for id {}", service_id);
                self.errors.service_not_found(service_id);
                self.factory.make_dummy_deserializer();
                self.dispatch_target = None;
            }
            Some((handle, service)) => {
                if !self.policy.dispatch_allowed(handle, method_id) {
                    trace!("echo: dispatch to service {} held off", service_id);
                    self.receive = ReceiveState::Blocked(header);
                    return;
                }
                match service.start_method(service_id, method_id, size, &mut self.errors) {
                    Some(deserializer) => {
                        self.factory.make_deserializer(deserializer);
                        self.dispatch_target = Some(handle);
                    }
                    None => {
                        self.factory.make_dummy_deserializer();
                        self.dispatch_target = None;
                    }
                }
            }
        }

        self.receive = ReceiveState::Body {
            remaining: size as usize,
        };
        if size == 0 {
            self.finish_body();
        }
    }

    fn finish_body(&mut self) {
        let Some(deserializer) = self.factory.deserializer() else {
            self.receive = ReceiveState::Header;
            return;
        };

        if deserializer.failed() {
            self.factory.release_deserializer();
            self.stats.format_errors = self.stats.format_errors.saturating_add(1);
            warn!("echo: message payload rejected");
            self.policy.service_done(self.dispatch_target.take());
            self.receive = ReceiveState::Header;
            self.errors.message_format_error();
            return;
        }

        if deserializer.is_discard() {
            self.stats.discarded = self.stats.discarded.saturating_add(1);
        } else {
            self.stats.dispatched = self.stats.dispatched.saturating_add(1);
        }

        match deserializer.execute_method() {
            MethodCompletion::Done => self.complete_dispatch(),
            MethodCompletion::Pending => self.receive = ReceiveState::Dispatching,
        }
    }

    fn complete_dispatch(&mut self) {
        self.factory.release_deserializer();
        self.policy.service_done(self.dispatch_target.take());
        self.receive = ReceiveState::Header;
    }

    // ── Send internals ────────────────────────────────────────

    fn try_grant_send(&mut self) {
        if self.send != SendState::Idle || self.skip_next_stream {
            return;
        }
        while let Some(proxy) = self.queue.pop_front() {
            let Some(entry) = self.proxy_entry(proxy) else {
                continue;
            };
            let size = entry.requested_size + self.config.header_overhead;
            trace!("echo: requesting {} byte send stream for {:?}", size, proxy);
            self.send = SendState::Granted { proxy, size };
            self.transport.request_send_stream(size);
            return;
        }
    }

    fn stream(&mut self, writer: &mut StreamWriter<'_>) {
        let SendState::Streaming { proxy, size } = self.send else {
            return;
        };
        let Some(serializer) = self.factory.serializer() else {
            self.send = SendState::Idle;
            self.try_grant_send();
            return;
        };

        match serializer.serialize(writer) {
            SendProgress::Complete => {
                self.factory.release_serializer();
                self.stats.sent = self.stats.sent.saturating_add(1);
                debug!("echo: send complete for {:?}", proxy);
                self.send = SendState::Idle;
                self.try_grant_send();
            }
            SendProgress::Pending => self.transport.request_send_stream(size),
            SendProgress::Stalled => {
                trace!("echo: send stalled for {:?}", proxy);
                self.send = SendState::Stalled { proxy, size };
            }
        }
    }

    /// Drop the current send. A buffer already requested from the
    /// transport is skipped when it arrives.
    fn abandon_send(&mut self) {
        match self.send {
            SendState::Idle => return,
            SendState::Granted { .. } => self.skip_next_stream = true,
            SendState::Streaming { .. } => {
                self.factory.release_serializer();
                self.skip_next_stream = true;
            }
            SendState::Stalled { .. } => {
                self.factory.release_serializer();
            }
        }
        debug!("echo: send abandoned");
        self.send = SendState::Idle;
    }

    // ── Lookup ────────────────────────────────────────────────

    fn proxy_entry(&self, proxy: ProxyHandle) -> Option<&ProxyEntry<'a, SerializerOf<F>>> {
        self.proxies.iter().find(|e| e.handle == proxy)
    }
}

fn allocate_handle(next: &mut u16, in_use: impl Fn(u16) -> bool) -> u16 {
    loop {
        let id = *next;
        *next = next.wrapping_add(1);
        if !in_use(id) {
            return id;
        }
    }
}

impl<'a, T, F, P, E> Echo<'a> for EchoOnStreams<'a, T, F, P, E>
where
    T: EchoTransport,
    F: MethodSerializerFactory,
    P: EchoPolicy,
    E: EchoErrorPolicy,
{
    type Factory = F;

    fn attach_service(
        &mut self,
        service: &'a dyn Service<'a, DeserializerOf<F>>,
    ) -> Result<ServiceHandle> {
        if self.services.is_full() {
            return Err(Error::RegistryFull);
        }
        let services = &self.services;
        let id = allocate_handle(&mut self.next_service, |id| {
            services.iter().any(|e| e.handle.0 == id)
        });
        let handle = ServiceHandle(id);
        self.services
            .push(ServiceEntry { handle, service })
            .map_err(|_| Error::RegistryFull)?;
        debug!("echo: service {} attached", service.service_id());
        Ok(handle)
    }

    fn detach_service(&mut self, handle: ServiceHandle) -> Result<()> {
        if !self.services.iter().any(|e| e.handle == handle) {
            return Err(Error::UnknownService);
        }
        self.services.retain(|e| e.handle != handle);
        Ok(())
    }

    fn attach_proxy(
        &mut self,
        proxy: &'a dyn ServiceProxy<'a, SerializerOf<F>>,
    ) -> Result<ProxyHandle> {
        if self.proxies.is_full() {
            return Err(Error::RegistryFull);
        }
        let proxies = &self.proxies;
        let id = allocate_handle(&mut self.next_proxy, |id| {
            proxies.iter().any(|e| e.handle.0 == id)
        });
        let handle = ProxyHandle(id);
        self.proxies
            .push(ProxyEntry {
                handle,
                proxy,
                requested_size: 0,
            })
            .map_err(|_| Error::RegistryFull)?;
        Ok(handle)
    }

    fn detach_proxy(&mut self, handle: ProxyHandle) -> Result<()> {
        if self.proxy_entry(handle).is_none() {
            return Err(Error::UnknownProxy);
        }
        self.queue.remove(handle);
        if self.send.proxy() == Some(handle) {
            self.abandon_send();
        }
        self.proxies.retain(|e| e.handle != handle);
        self.try_grant_send();
        Ok(())
    }

    fn request_send(&mut self, proxy: ProxyHandle) -> Result<()> {
        let max = self
            .proxy_entry(proxy)
            .ok_or(Error::UnknownProxy)?
            .proxy
            .max_message_size();
        self.request_send_with_size(proxy, max)
    }

    fn request_send_with_size(&mut self, proxy: ProxyHandle, size: usize) -> Result<()> {
        let entry = self
            .proxies
            .iter_mut()
            .find(|e| e.handle == proxy)
            .ok_or(Error::UnknownProxy)?;
        let max = entry.proxy.max_message_size();
        if size > max {
            return Err(Error::MessageTooLarge {
                requested: size,
                max,
            });
        }
        let granted = matches!(self.send, SendState::Granted { proxy: p, .. } if p == proxy);
        if granted || self.queue.contains(proxy) {
            return Err(Error::AlreadyRequested);
        }

        self.policy.request_send(proxy, &mut self.queue)?;
        entry.requested_size = size;
        trace!("echo: {:?} queued for {} bytes", proxy, size);
        self.try_grant_send();
        Ok(())
    }

    fn cancel_request_send(&mut self, proxy: ProxyHandle) {
        if self.queue.remove(proxy) {
            trace!("echo: {:?} dequeued", proxy);
            return;
        }
        match self.send {
            SendState::Granted { proxy: p, .. } if p == proxy => {
                trace!("echo: granted send of {:?} cancelled", proxy);
                self.abandon_send();
            }
            _ => {}
        }
    }

    fn is_in_progress(&self, service: ServiceHandle) -> bool {
        self.dispatch_target == Some(service)
            && matches!(
                self.receive,
                ReceiveState::Body { .. } | ReceiveState::Dispatching
            )
    }

    fn current_requested_size(&self, proxy: ProxyHandle) -> Option<usize> {
        if !self.queue.contains(proxy) && self.send.proxy() != Some(proxy) {
            return None;
        }
        self.proxy_entry(proxy).map(|e| e.requested_size)
    }

    fn service_done(&mut self) {
        if self.receive != ReceiveState::Dispatching {
            warn!("echo: service_done without a dispatch in progress");
            return;
        }
        self.complete_dispatch();
        self.transport.receive_ready();
    }

    fn serializer_factory(&mut self) -> &mut F {
        &mut self.factory
    }

    fn continue_receive(&mut self) {
        if let ReceiveState::Blocked(header) = self.receive {
            self.receive = ReceiveState::Header;
            self.start_dispatch(header);
        }
        self.transport.receive_ready();
    }

    fn resume_send(&mut self) {
        if let SendState::Stalled { proxy, size } = self.send {
            trace!("echo: send resumed for {:?}", proxy);
            self.send = SendState::Streaming { proxy, size };
            self.transport.request_send_stream(size);
        }
    }
}
