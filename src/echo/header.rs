//! Echo message header codec.
//!
//! Wire format:
//! ```text
//! ┌──────────────────┬──────────────────────────────┬────────────────┬─────────────┐
//! │ varint serviceId │ tag(methodId, LengthDelim.)  │ varint length  │ payload (N) │
//! └──────────────────┴──────────────────────────────┴────────────────┴─────────────┘
//! ```
//!
//! The decoder retains header bytes across deliveries. A single
//! `data_received` call may carry part of a header, a header and part of the
//! payload, or several messages back to back.

use heapless::Vec;

use crate::config::MAX_HEADER_SIZE;
use crate::error::WireError;

use super::wire::{
    WireType, decode_field_tag, decode_var_int_u32, encode_var_int, field_tag, var_int_size,
};

/// Identifies a service on a bus.
pub type ServiceId = u32;

/// Identifies a method within a service (the protobuf field number).
pub type MethodId = u32;

/// Decoded header of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub service_id: ServiceId,
    pub method_id: MethodId,
    /// Declared payload length.
    pub size: u32,
}

impl MessageHeader {
    pub fn new(service_id: ServiceId, method_id: MethodId, size: u32) -> Self {
        Self {
            service_id,
            method_id,
            size,
        }
    }

    /// Number of bytes [`encode`](Self::encode) produces.
    pub fn encoded_len(&self) -> usize {
        var_int_size(u64::from(self.service_id))
            + var_int_size(field_tag(self.method_id, WireType::LengthDelimited))
            + var_int_size(u64::from(self.size))
    }

    pub fn encode(&self) -> Vec<u8, MAX_HEADER_SIZE> {
        let mut out = Vec::new();
        for part in [
            u64::from(self.service_id),
            field_tag(self.method_id, WireType::LengthDelimited),
            u64::from(self.size),
        ] {
            // Three varints of at most MAX_VAR_INT_SIZE each always fit.
            let _ = out.extend_from_slice(&encode_var_int(part));
        }
        out
    }

    /// Decode a header from the front of `data`.
    ///
    /// Returns the header and its encoded length. A tag whose wire type is
    /// not length-delimited is malformed; a header cut short is incomplete.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), WireError> {
        let (service_id, mut used) = decode_var_int_u32(data)?;
        let (method_id, wire_type, n) = decode_field_tag(&data[used..])?;
        used += n;
        if wire_type != WireType::LengthDelimited {
            return Err(WireError::Malformed);
        }
        let (size, n) = decode_var_int_u32(&data[used..])?;
        used += n;
        Ok((Self::new(service_id, method_id, size), used))
    }
}

/// Result of feeding bytes to a [`HeaderDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderFeed {
    /// All `n` offered bytes were retained; the header is still incomplete.
    NeedMore(usize),
    /// A header completed after taking `n` of the offered bytes.
    Complete(MessageHeader, usize),
    /// The header is malformed; `n` offered bytes were dropped.
    Malformed(usize),
}

/// Streaming header decoder.
pub struct HeaderDecoder {
    retained: Vec<u8, MAX_HEADER_SIZE>,
}

impl HeaderDecoder {
    pub fn new() -> Self {
        Self {
            retained: Vec::new(),
        }
    }

    /// Bytes of a partial header held from earlier deliveries.
    pub fn retained(&self) -> usize {
        self.retained.len()
    }

    /// Feed bytes into the decoder.
    ///
    /// Never takes more than the header itself, so the bytes following a
    /// completed header stay with the caller.
    pub fn feed(&mut self, data: &[u8]) -> HeaderFeed {
        let held = self.retained.len();
        let take = data.len().min(MAX_HEADER_SIZE - held);

        let mut scratch = self.retained.clone();
        // `take` is bounded by the remaining capacity.
        let _ = scratch.extend_from_slice(&data[..take]);

        match MessageHeader::decode(&scratch) {
            Ok((header, len)) => {
                self.retained.clear();
                HeaderFeed::Complete(header, len - held)
            }
            Err(WireError::Incomplete) if scratch.len() < MAX_HEADER_SIZE => {
                self.retained = scratch;
                HeaderFeed::NeedMore(take)
            }
            Err(_) => {
                self.retained.clear();
                HeaderFeed::Malformed(take)
            }
        }
    }

    /// Drop any retained bytes (e.g. after a transport reset).
    pub fn reset(&mut self) {
        self.retained.clear();
    }
}

impl Default for HeaderDecoder {
    fn default() -> Self {
        Self::new()
    }
}
