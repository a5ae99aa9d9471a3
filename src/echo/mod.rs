//! Echo: message-oriented RPC over a single ordered byte stream.
//!
//! Many independent services share one transport. Each message is a
//! protobuf-style frame addressed to a service and method; the engine
//! multiplexes outbound calls from proxies and dispatches inbound calls to
//! services, without dynamic allocation.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Echo bus                               │
//! │                                                                 │
//! │  ┌─────────────┐  request_send  ┌─────────────────────────────┐ │
//! │  │ServiceProxy │───────────────▶│  EchoOnStreams (engine)     │ │
//! │  └─────────────┘◀──────────────│  ┌────────┐   ┌──────────┐  │ │
//! │     granted_send  serializer    │  │ policy │   │ factory  │  │ │
//! │                                 │  └────────┘   │ (arenas) │  │ │
//! │  ┌─────────────┐  start_method  │               └──────────┘  │ │
//! │  │  Service    │◀──────────────│                              │ │
//! │  └─────────────┘  deserializer  └─────────────────────────────┘ │
//! │                                    ▲                    │       │
//! └────────────────────────────────────┼────────────────────┼───────┘
//!                       data_received /│                    │ request_send_stream
//!                send_stream_available │                    ▼
//!                               ┌──────────────────────────────┐
//!                               │     EchoTransport (trait)    │
//!                               └──────────────────────────────┘
//! ```

mod macros;

pub mod engine;
pub mod factory;
pub mod forwarder;
pub mod header;
pub mod policy;
pub mod proxy;
pub mod serializer;
pub mod service;
pub mod stream;
pub mod transport;
pub mod wire;

pub use engine::{EchoOnStreams, EchoStats};
#[cfg(feature = "alloc")]
pub use factory::HeapSerializerFactory;
pub use factory::{ActiveDeserializer, MethodSerializerFactory, StaticSerializerFactory};
pub use forwarder::{ForwardInbound, ForwardOutbound, ServiceForwarder};
pub use header::{HeaderDecoder, HeaderFeed, MessageHeader, MethodId, ServiceId};
pub use policy::{CountingErrorPolicy, EchoErrorPolicy, EchoPolicy, FifoPolicy, SendQueue};
pub use proxy::MessageProxy;
pub use serializer::{
    DiscardingDeserializer, MessageDeserializer, MessageSerializer, MethodCompletion,
    MethodDeserializer, MethodHandler, MethodSerializer, SendProgress,
};
pub use service::{
    DeserializerOf, Echo, MessageService, ProxyHandle, RESERVED_SERVICE_ID, SerializerOf,
    Service, ServiceHandle, ServiceProxy,
};
pub use stream::{LimitedReader, Marker, StreamWriter};
pub use transport::{EchoTransport, NullTransport};
