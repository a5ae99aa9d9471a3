//! Bus, service and proxy interfaces.
//!
//! Services and proxies are registered with a bus by reference and
//! identified afterwards by a small handle. The bus never calls back into
//! application code outside of the codec traits: proxies hand over their
//! serializer as the return value of [`ServiceProxy::granted_send`], and
//! services report completion through [`MethodCompletion`] or a later
//! [`Echo::service_done`].

use log::debug;

use crate::error::Result;

use super::factory::MethodSerializerFactory;
use super::header::{MethodId, ServiceId};
use super::policy::EchoErrorPolicy;
use super::serializer::{MessageDeserializer, MethodHandler};
use super::wire::ProtoMessage;

/// Service id used by catch-all services that accept every id.
pub const RESERVED_SERVICE_ID: ServiceId = 0;

/// Registration handle of an attached service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceHandle(pub(crate) u16);

/// Registration handle of an attached proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProxyHandle(pub(crate) u16);

pub type SerializerOf<F> = <F as MethodSerializerFactory>::Serializer;
pub type DeserializerOf<F> = <F as MethodSerializerFactory>::Deserializer;

/// Server endpoint on a bus.
///
/// `D` is the bus's deserializer type; implementations are usually generic
/// over any `D` their codec converts into.
pub trait Service<'a, D> {
    fn service_id(&self) -> ServiceId;

    /// Whether inbound messages for `service_id` belong to this service.
    fn accepts_service(&self, service_id: ServiceId) -> bool {
        service_id == self.service_id()
    }

    /// Start an inbound call of `size` payload bytes.
    ///
    /// Returning `None` means the method is unknown. The service reports
    /// that through `errors`; the bus then skips the payload.
    fn start_method(
        &'a self,
        service_id: ServiceId,
        method_id: MethodId,
        size: u32,
        errors: &mut dyn EchoErrorPolicy,
    ) -> Option<D>;
}

/// Client stub on a bus.
pub trait ServiceProxy<'a, S> {
    /// Upper bound for the payload of any message this proxy sends.
    fn max_message_size(&self) -> usize;

    /// The bus granted a send. Called exactly once per granted request,
    /// right before the first byte is written; returns the serializer for
    /// the message to send.
    fn granted_send(&'a self) -> S;
}

/// A message bus carrying many services over one transport.
pub trait Echo<'a> {
    type Factory: MethodSerializerFactory;

    fn attach_service(
        &mut self,
        service: &'a dyn Service<'a, DeserializerOf<Self::Factory>>,
    ) -> Result<ServiceHandle>;

    fn detach_service(&mut self, handle: ServiceHandle) -> Result<()>;

    fn attach_proxy(
        &mut self,
        proxy: &'a dyn ServiceProxy<'a, SerializerOf<Self::Factory>>,
    ) -> Result<ProxyHandle>;

    /// Detach a proxy. A queued or granted request is cancelled; a send
    /// already streaming is abandoned.
    fn detach_proxy(&mut self, handle: ProxyHandle) -> Result<()>;

    /// Queue a send of up to the proxy's maximum message size.
    fn request_send(&mut self, proxy: ProxyHandle) -> Result<()>;

    /// Queue a send of a `size`-byte payload.
    fn request_send_with_size(&mut self, proxy: ProxyHandle, size: usize) -> Result<()>;

    /// Withdraw a queued request, or a granted one that has not started
    /// streaming yet. Anything else is left alone.
    fn cancel_request_send(&mut self, proxy: ProxyHandle);

    /// Whether `service` is handling an inbound call right now.
    fn is_in_progress(&self, service: ServiceHandle) -> bool;

    /// Payload size of the proxy's queued or active request, `None` when
    /// the bus holds no request for it.
    fn current_requested_size(&self, proxy: ProxyHandle) -> Option<usize>;

    /// The service handling the current inbound call has finished.
    fn service_done(&mut self);

    fn serializer_factory(&mut self) -> &mut Self::Factory;

    /// Retry a receive that stopped because a service or policy could not
    /// take more input.
    fn continue_receive(&mut self);

    /// Resume a send whose serializer reported
    /// [`SendProgress::Stalled`](super::SendProgress::Stalled).
    fn resume_send(&mut self);
}

// ── Ready-made service ───────────────────────────────────────

/// A service whose methods all take one message type `M`, decoded from at
/// most `N` payload bytes and handed to a [`MethodHandler`].
pub struct MessageService<'a, M, const N: usize> {
    service_id: ServiceId,
    handler: &'a dyn MethodHandler<M>,
    methods: &'static [MethodId],
}

impl<'a, M, const N: usize> MessageService<'a, M, N> {
    pub fn new(
        service_id: ServiceId,
        handler: &'a dyn MethodHandler<M>,
        methods: &'static [MethodId],
    ) -> Self {
        Self {
            service_id,
            handler,
            methods,
        }
    }

    pub fn attach<B>(&'a self, bus: &mut B) -> Result<ServiceHandle>
    where
        B: Echo<'a> + 'a,
        M: ProtoMessage + 'a,
        MessageDeserializer<'a, M, N>: Into<DeserializerOf<B::Factory>>,
    {
        bus.attach_service(self)
    }
}

impl<'a, M, const N: usize, D> Service<'a, D> for MessageService<'a, M, N>
where
    M: ProtoMessage + 'a,
    MessageDeserializer<'a, M, N>: Into<D>,
{
    fn service_id(&self) -> ServiceId {
        self.service_id
    }

    fn start_method(
        &'a self,
        service_id: ServiceId,
        method_id: MethodId,
        size: u32,
        errors: &mut dyn EchoErrorPolicy,
    ) -> Option<D> {
        if !self.methods.contains(&method_id) {
            debug!("echo: service {} has no method {}", service_id, method_id);
            errors.method_not_found(service_id, method_id);
            return None;
        }
        Some(MessageDeserializer::new(self.handler, method_id, size as usize).into())
    }
}
