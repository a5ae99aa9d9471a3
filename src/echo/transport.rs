//! Transport abstraction: the byte stream underneath a bus.
//!
//! Concrete implementations live with the application:
//! - UART serial with COBS framing
//! - windowed flow-controlled links
//! - TCP / TLS connections
//!
//! The engine is generic over `EchoTransport` and never performs I/O on its
//! own. It only asks for buffers and signals readiness; the transport calls
//! back into [`EchoOnStreams`](super::EchoOnStreams) with
//! `send_stream_available`, `data_received` and `initialized`.

/// Outbound half of the transport contract.
pub trait EchoTransport {
    /// Ask for a writable buffer of up to `size` bytes.
    ///
    /// The transport answers later with exactly one
    /// `send_stream_available` call per request. It may hand out a smaller
    /// buffer than asked for.
    fn request_send_stream(&mut self, size: usize);

    /// The engine can accept inbound bytes again after having consumed
    /// less than it was offered. Bytes not consumed must be redelivered.
    fn receive_ready(&mut self) {}
}

impl<T: EchoTransport + ?Sized> EchoTransport for &mut T {
    fn request_send_stream(&mut self, size: usize) {
        (**self).request_send_stream(size);
    }

    fn receive_ready(&mut self) {
        (**self).receive_ready();
    }
}

/// A null transport that drops every send request.
/// Useful for receive-only setups and for fuzzing the receive path.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl EchoTransport for NullTransport {
    fn request_send_stream(&mut self, _size: usize) {}
}
