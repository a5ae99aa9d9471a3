//! Per-call codec state machines.
//!
//! A [`MethodSerializer`] owns one outbound message and a cursor into its
//! encoding; a [`MethodDeserializer`] owns one inbound message while it is
//! being received. Both live in the bus's single-slot arenas (see
//! [`factory`](super::factory)) and are dropped the moment the call ends.

use heapless::Vec;
use log::warn;

use crate::config::MAX_HEADER_SIZE;

use super::header::{MessageHeader, MethodId, ServiceId};
use super::stream::{LimitedReader, StreamWriter};
use super::wire::{ByteSink, ProtoFormatter, ProtoMessage, ProtoParser, SkippingSink, encoded_len};

/// Outcome of one [`MethodSerializer::serialize`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendProgress {
    /// The whole message has been written.
    Complete,
    /// The buffer is full; more data follows in the next buffer.
    Pending,
    /// Nothing more can be written until the serializer's source has data.
    /// The engine waits for `resume_send` before asking for another buffer.
    Stalled,
}

/// Outcome of [`MethodDeserializer::execute_method`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodCompletion {
    /// The call is finished; the bus may start the next one.
    Done,
    /// The service still works on the call and reports completion through
    /// `Echo::service_done`.
    Pending,
}

pub trait MethodSerializer {
    /// Write as much of the message as fits into `writer`.
    fn serialize(&mut self, writer: &mut StreamWriter<'_>) -> SendProgress;
}

pub trait MethodDeserializer {
    /// Consume payload bytes. `reader` never extends past the message.
    ///
    /// Consuming less than offered makes the engine stop and wait for
    /// `continue_receive`.
    fn method_contents(&mut self, reader: &mut LimitedReader<'_>);

    /// Whether the payload turned out to be invalid. Checked once the
    /// declared length has been consumed.
    fn failed(&self) -> bool;

    /// Run the method on the fully received message.
    fn execute_method(&mut self) -> MethodCompletion;
}

/// Receives decoded messages for a service.
pub trait MethodHandler<M> {
    fn handle(&self, method_id: MethodId, message: M) -> MethodCompletion;
}

impl<M, F> MethodHandler<M> for F
where
    F: Fn(MethodId, M) -> MethodCompletion,
{
    fn handle(&self, method_id: MethodId, message: M) -> MethodCompletion {
        self(method_id, message)
    }
}

// ── Outbound ─────────────────────────────────────────────────

/// Streams the header and a [`ProtoMessage`] across any number of buffers.
///
/// Nothing is pre-encoded except the header: on every buffer the message is
/// re-encoded from the start and only the bytes past the cursor are emitted.
pub struct MessageSerializer<M> {
    header: Vec<u8, MAX_HEADER_SIZE>,
    message: M,
    payload_size: usize,
    written: usize,
}

impl<M: ProtoMessage> MessageSerializer<M> {
    pub fn new(service_id: ServiceId, method_id: MethodId, message: M) -> Self {
        let payload_size = encoded_len(&message);
        let header = MessageHeader::new(service_id, method_id, payload_size as u32).encode();
        Self {
            header,
            message,
            payload_size,
            written: 0,
        }
    }

    /// Header plus payload.
    pub fn encoded_size(&self) -> usize {
        self.header.len() + self.payload_size
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl<M: ProtoMessage> MethodSerializer for MessageSerializer<M> {
    fn serialize(&mut self, writer: &mut StreamWriter<'_>) -> SendProgress {
        let before = writer.len();
        {
            let mut sink = SkippingSink::new(writer, self.written);
            sink.put(&self.header);
            self.message.serialize(&mut ProtoFormatter::new(&mut sink));
        }
        self.written += writer.len() - before;

        if self.written >= self.encoded_size() {
            SendProgress::Complete
        } else {
            SendProgress::Pending
        }
    }
}

// ── Inbound ──────────────────────────────────────────────────

enum DecodeState<M> {
    Collecting,
    Decoded(M),
    Failed,
    Executed,
}

/// Collects up to `N` payload bytes, decodes them into `M` and hands the
/// result to a [`MethodHandler`].
///
/// A payload larger than `N` marks the call failed but is still consumed in
/// full so that framing stays intact.
pub struct MessageDeserializer<'a, M, const N: usize> {
    handler: &'a dyn MethodHandler<M>,
    method_id: MethodId,
    size: usize,
    received: usize,
    payload: Vec<u8, N>,
    state: DecodeState<M>,
}

impl<'a, M: ProtoMessage, const N: usize> MessageDeserializer<'a, M, N> {
    pub fn new(handler: &'a dyn MethodHandler<M>, method_id: MethodId, size: usize) -> Self {
        let mut this = Self {
            handler,
            method_id,
            size,
            received: 0,
            payload: Vec::new(),
            state: DecodeState::Collecting,
        };
        if size > N {
            this.state = DecodeState::Failed;
        } else if size == 0 {
            this.decode();
        }
        this
    }

    fn decode(&mut self) {
        let mut parser = ProtoParser::new(&self.payload);
        self.state = match M::deserialize(&mut parser) {
            Ok(message) => DecodeState::Decoded(message),
            Err(_) => DecodeState::Failed,
        };
    }
}

impl<M: ProtoMessage, const N: usize> MethodDeserializer for MessageDeserializer<'_, M, N> {
    fn method_contents(&mut self, reader: &mut LimitedReader<'_>) {
        let chunk = reader.extract(self.size - self.received);
        self.received += chunk.len();

        if matches!(self.state, DecodeState::Collecting) {
            if self.payload.extend_from_slice(chunk).is_err() {
                self.state = DecodeState::Failed;
            } else if self.received == self.size {
                self.decode();
            }
        }
    }

    fn failed(&self) -> bool {
        matches!(self.state, DecodeState::Failed)
    }

    fn execute_method(&mut self) -> MethodCompletion {
        match core::mem::replace(&mut self.state, DecodeState::Executed) {
            DecodeState::Decoded(message) => self.handler.handle(self.method_id, message),
            _ => {
                warn!("echo: execute on undecoded method {}", self.method_id);
                MethodCompletion::Done
            }
        }
    }
}

/// Skips the payload of a message nobody accepted.
#[derive(Debug, Default)]
pub struct DiscardingDeserializer;

impl MethodDeserializer for DiscardingDeserializer {
    fn method_contents(&mut self, reader: &mut LimitedReader<'_>) {
        reader.skip(reader.available());
    }

    fn failed(&self) -> bool {
        false
    }

    fn execute_method(&mut self) -> MethodCompletion {
        MethodCompletion::Done
    }
}

// ── Boxed codecs (heap factory) ──────────────────────────────

#[cfg(feature = "alloc")]
mod boxed {
    use alloc::boxed::Box;

    use super::*;

    impl<T: MethodSerializer + ?Sized> MethodSerializer for Box<T> {
        fn serialize(&mut self, writer: &mut StreamWriter<'_>) -> SendProgress {
            (**self).serialize(writer)
        }
    }

    impl<T: MethodDeserializer + ?Sized> MethodDeserializer for Box<T> {
        fn method_contents(&mut self, reader: &mut LimitedReader<'_>) {
            (**self).method_contents(reader);
        }

        fn failed(&self) -> bool {
            (**self).failed()
        }

        fn execute_method(&mut self) -> MethodCompletion {
            (**self).execute_method()
        }
    }

    impl<'a, M: ProtoMessage + 'a> From<MessageSerializer<M>> for Box<dyn MethodSerializer + 'a> {
        fn from(codec: MessageSerializer<M>) -> Self {
            Box::new(codec)
        }
    }

    impl<'a, M: ProtoMessage + 'a, const N: usize> From<MessageDeserializer<'a, M, N>>
        for Box<dyn MethodDeserializer + 'a>
    {
        fn from(codec: MessageDeserializer<'a, M, N>) -> Self {
            Box::new(codec)
        }
    }
}
