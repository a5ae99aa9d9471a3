//! Protobuf wire-format primitives.
//!
//! Just enough of the protobuf encoding to frame Echo messages and to let
//! message types encode their fields:
//!
//! ```text
//! varint      7 data bits per byte, MSB = continuation, little-endian groups
//! field tag   varint((field_number << 3) | wire_type)
//! LD field    tag || varint(length) || bytes[length]
//! ```
//!
//! Decoding is soft-fail: a truncated encoding reports
//! [`WireError::Incomplete`], an impossible one [`WireError::Malformed`].
//! The engine relies on that split to wait for more bytes instead of
//! declaring a format error.

use heapless::Vec;

use crate::config::MAX_VAR_INT_SIZE;
use crate::error::WireError;

use super::stream::StreamWriter;

/// Protobuf wire types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    VarInt = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    StartGroup = 3,
    EndGroup = 4,
    Fixed32 = 5,
}

impl TryFrom<u8> for WireType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(Self::VarInt),
            1 => Ok(Self::Fixed64),
            2 => Ok(Self::LengthDelimited),
            3 => Ok(Self::StartGroup),
            4 => Ok(Self::EndGroup),
            5 => Ok(Self::Fixed32),
            _ => Err(WireError::Malformed),
        }
    }
}

// ── Varints ──────────────────────────────────────────────────

/// Encoded size of `value` as a varint.
pub const fn var_int_size(mut value: u64) -> usize {
    let mut size = 1;
    while value >= 0x80 {
        value >>= 7;
        size += 1;
    }
    size
}

/// Encode `value` as a varint.
pub fn encode_var_int(mut value: u64) -> Vec<u8, MAX_VAR_INT_SIZE> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            // Cannot overflow: a u64 needs at most MAX_VAR_INT_SIZE groups.
            let _ = out.push(byte);
            return out;
        }
        let _ = out.push(byte | 0x80);
    }
}

/// Decode a varint from the front of `data`.
///
/// Returns the value and the number of bytes it occupied.
pub fn decode_var_int(data: &[u8]) -> Result<(u64, usize), WireError> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().enumerate() {
        if i == MAX_VAR_INT_SIZE {
            return Err(WireError::Malformed);
        }
        let bits = u64::from(byte & 0x7f);
        // The tenth group only has room for the top bit of a u64.
        if i == MAX_VAR_INT_SIZE - 1 && bits > 1 {
            return Err(WireError::Malformed);
        }
        value |= bits << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    if data.len() >= MAX_VAR_INT_SIZE {
        Err(WireError::Malformed)
    } else {
        Err(WireError::Incomplete)
    }
}

/// Decode a varint that must fit in 32 bits.
pub fn decode_var_int_u32(data: &[u8]) -> Result<(u32, usize), WireError> {
    let (value, used) = decode_var_int(data)?;
    let value = u32::try_from(value).map_err(|_| WireError::Malformed)?;
    Ok((value, used))
}

// ── Field headers ────────────────────────────────────────────

/// Tag value for `field_number` with `wire_type`.
pub const fn field_tag(field_number: u32, wire_type: WireType) -> u64 {
    ((field_number as u64) << 3) | wire_type as u64
}

/// Decode a field tag from the front of `data`.
///
/// Field number 0 and field numbers beyond 32 bits are malformed.
pub fn decode_field_tag(data: &[u8]) -> Result<(u32, WireType, usize), WireError> {
    let (tag, used) = decode_var_int(data)?;
    let wire_type = WireType::try_from((tag & 0x7) as u8)?;
    let field_number = u32::try_from(tag >> 3).map_err(|_| WireError::Malformed)?;
    if field_number == 0 {
        return Err(WireError::Malformed);
    }
    Ok((field_number, wire_type, used))
}

// ── Output sinks ─────────────────────────────────────────────

/// Destination of formatter output.
pub trait ByteSink {
    fn put(&mut self, bytes: &[u8]);
}

/// Counts bytes without storing them (encoded-size computation).
#[derive(Debug, Default)]
pub struct CountingSink {
    count: usize,
}

impl CountingSink {
    pub fn count(&self) -> usize {
        self.count
    }
}

impl ByteSink for CountingSink {
    fn put(&mut self, bytes: &[u8]) {
        self.count += bytes.len();
    }
}

/// Writes into a transport buffer, dropping the first `skip` bytes.
///
/// Lets a serializer restart encoding from the top of a message on every
/// buffer grant and still only emit the part not yet sent.
pub struct SkippingSink<'w, 'b> {
    writer: &'w mut StreamWriter<'b>,
    skip: usize,
    truncated: bool,
}

impl<'w, 'b> SkippingSink<'w, 'b> {
    pub fn new(writer: &'w mut StreamWriter<'b>, skip: usize) -> Self {
        Self {
            writer,
            skip,
            truncated: false,
        }
    }

    /// Whether output was cut off because the writer filled up.
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

impl ByteSink for SkippingSink<'_, '_> {
    fn put(&mut self, bytes: &[u8]) {
        if self.skip >= bytes.len() {
            self.skip -= bytes.len();
            return;
        }
        let rest = &bytes[self.skip..];
        self.skip = 0;
        if self.writer.insert(rest) < rest.len() {
            self.truncated = true;
        }
    }
}

impl ByteSink for StreamWriter<'_> {
    fn put(&mut self, bytes: &[u8]) {
        self.insert(bytes);
    }
}

impl<const N: usize> ByteSink for Vec<u8, N> {
    fn put(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(self.capacity() - self.len());
        let _ = self.extend_from_slice(&bytes[..n]);
    }
}

#[cfg(feature = "alloc")]
impl ByteSink for alloc::vec::Vec<u8> {
    fn put(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

// ── Formatter ────────────────────────────────────────────────

/// Protobuf field writer over any [`ByteSink`].
pub struct ProtoFormatter<'s> {
    sink: &'s mut dyn ByteSink,
}

impl<'s> ProtoFormatter<'s> {
    pub fn new(sink: &'s mut dyn ByteSink) -> Self {
        Self { sink }
    }

    pub fn put_var_int(&mut self, value: u64) {
        self.sink.put(&encode_var_int(value));
    }

    pub fn put_field_tag(&mut self, field_number: u32, wire_type: WireType) {
        self.put_var_int(field_tag(field_number, wire_type));
    }

    pub fn put_var_int_field(&mut self, value: u64, field_number: u32) {
        self.put_field_tag(field_number, WireType::VarInt);
        self.put_var_int(value);
    }

    pub fn put_bool_field(&mut self, value: bool, field_number: u32) {
        self.put_var_int_field(u64::from(value), field_number);
    }

    pub fn put_fixed32_field(&mut self, value: u32, field_number: u32) {
        self.put_field_tag(field_number, WireType::Fixed32);
        self.sink.put(&value.to_le_bytes());
    }

    pub fn put_fixed64_field(&mut self, value: u64, field_number: u32) {
        self.put_field_tag(field_number, WireType::Fixed64);
        self.sink.put(&value.to_le_bytes());
    }

    pub fn put_length_delimited_header(&mut self, length: usize, field_number: u32) {
        self.put_field_tag(field_number, WireType::LengthDelimited);
        self.put_var_int(length as u64);
    }

    pub fn put_bytes_field(&mut self, bytes: &[u8], field_number: u32) {
        self.put_length_delimited_header(bytes.len(), field_number);
        self.sink.put(bytes);
    }

    pub fn put_string_field(&mut self, value: &str, field_number: u32) {
        self.put_bytes_field(value.as_bytes(), field_number);
    }

    pub fn put_message_field<M: ProtoMessage>(&mut self, message: &M, field_number: u32) {
        self.put_length_delimited_header(encoded_len(message), field_number);
        message.serialize(self);
    }
}

// ── Parser ───────────────────────────────────────────────────

/// Value of one decoded field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    VarInt(u64),
    Fixed64(u64),
    Fixed32(u32),
    Bytes(&'a [u8]),
}

impl<'a> FieldValue<'a> {
    pub fn as_u64(&self) -> Result<u64, WireError> {
        match *self {
            Self::VarInt(v) | Self::Fixed64(v) => Ok(v),
            Self::Fixed32(v) => Ok(u64::from(v)),
            Self::Bytes(_) => Err(WireError::Malformed),
        }
    }

    pub fn as_u32(&self) -> Result<u32, WireError> {
        u32::try_from(self.as_u64()?).map_err(|_| WireError::Malformed)
    }

    pub fn as_bool(&self) -> Result<bool, WireError> {
        Ok(self.as_u64()? != 0)
    }

    pub fn as_bytes(&self) -> Result<&'a [u8], WireError> {
        match *self {
            Self::Bytes(b) => Ok(b),
            _ => Err(WireError::Malformed),
        }
    }

    pub fn as_str(&self) -> Result<&'a str, WireError> {
        core::str::from_utf8(self.as_bytes()?).map_err(|_| WireError::Malformed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtoField<'a> {
    pub number: u32,
    pub value: FieldValue<'a>,
}

/// Iterator over the fields of a complete, in-memory message payload.
///
/// Since the payload is complete, a truncated field is reported as
/// [`WireError::Malformed`]. Iteration stops after the first error.
pub struct ProtoParser<'a> {
    data: &'a [u8],
    position: usize,
    failed: bool,
}

impl<'a> ProtoParser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            failed: false,
        }
    }

    fn parse_field(&mut self) -> Result<ProtoField<'a>, WireError> {
        let rest = &self.data[self.position..];
        let (number, wire_type, mut used) = decode_field_tag(rest)?;
        let value = match wire_type {
            WireType::VarInt => {
                let (v, n) = decode_var_int(&rest[used..])?;
                used += n;
                FieldValue::VarInt(v)
            }
            WireType::Fixed64 => {
                let bytes: [u8; 8] = rest
                    .get(used..used + 8)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(WireError::Malformed)?;
                used += 8;
                FieldValue::Fixed64(u64::from_le_bytes(bytes))
            }
            WireType::Fixed32 => {
                let bytes: [u8; 4] = rest
                    .get(used..used + 4)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(WireError::Malformed)?;
                used += 4;
                FieldValue::Fixed32(u32::from_le_bytes(bytes))
            }
            WireType::LengthDelimited => {
                let (len, n) = decode_var_int(&rest[used..])?;
                used += n;
                let len = usize::try_from(len).map_err(|_| WireError::Malformed)?;
                let bytes = rest.get(used..used + len).ok_or(WireError::Malformed)?;
                used += len;
                FieldValue::Bytes(bytes)
            }
            WireType::StartGroup | WireType::EndGroup => return Err(WireError::Malformed),
        };
        self.position += used;
        Ok(ProtoField { number, value })
    }
}

impl<'a> Iterator for ProtoParser<'a> {
    type Item = Result<ProtoField<'a>, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.position >= self.data.len() {
            return None;
        }
        match self.parse_field() {
            Ok(field) => Some(Ok(field)),
            Err(_) => {
                self.failed = true;
                Some(Err(WireError::Malformed))
            }
        }
    }
}

// ── Message codec ────────────────────────────────────────────

/// A protobuf message type, as produced by the per-application code generator.
pub trait ProtoMessage: Sized {
    /// Emit every field of the message.
    fn serialize(&self, formatter: &mut ProtoFormatter<'_>);

    /// Build the message from a parser over its complete payload.
    /// Unknown fields are expected to be skipped.
    fn deserialize(parser: &mut ProtoParser<'_>) -> Result<Self, WireError>;
}

/// Encoded payload size of `message`.
pub fn encoded_len<M: ProtoMessage>(message: &M) -> usize {
    let mut counter = CountingSink::default();
    message.serialize(&mut ProtoFormatter::new(&mut counter));
    counter.count()
}
