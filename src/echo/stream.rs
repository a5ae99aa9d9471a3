//! Byte-stream views lent to codecs for the duration of one call.
//!
//! The transport owns the memory. During `send_stream_available` the engine
//! wraps the transport's send buffer in a [`StreamWriter`]; during
//! `data_received` it wraps the declared-length slice of inbound bytes in a
//! [`LimitedReader`]. Neither view outlives the call, so application code
//! can never keep a reference into a message while the engine moves on.

/// Cursor over a writable transport buffer.
pub struct StreamWriter<'a> {
    buffer: &'a mut [u8],
    position: usize,
}

impl<'a> StreamWriter<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Write as much of `data` as fits. Returns the number of bytes taken.
    pub fn insert(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.available());
        self.buffer[self.position..self.position + n].copy_from_slice(&data[..n]);
        self.position += n;
        n
    }

    /// Space left in the buffer.
    pub fn available(&self) -> usize {
        self.buffer.len() - self.position
    }

    pub fn is_full(&self) -> bool {
        self.available() == 0
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.position
    }

    pub fn is_empty(&self) -> bool {
        self.position == 0
    }

    /// The bytes written so far.
    pub fn processed(&self) -> &[u8] {
        &self.buffer[..self.position]
    }
}

/// Position inside a [`LimitedReader`], for [`LimitedReader::rewind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker(usize);

/// Length-bounded, rewindable reader over inbound bytes.
///
/// The engine constructs it over at most the remaining declared length of
/// the current message, so a deserializer can never read into the next one.
pub struct LimitedReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> LimitedReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Bytes left to read.
    pub fn available(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Take up to `max` contiguous bytes.
    pub fn extract(&mut self, max: usize) -> &'a [u8] {
        let n = max.min(self.available());
        let range = &self.data[self.position..self.position + n];
        self.position += n;
        range
    }

    /// Copy up to `buf.len()` bytes into `buf`.
    pub fn extract_into(&mut self, buf: &mut [u8]) -> usize {
        let range = self.extract(buf.len());
        buf[..range.len()].copy_from_slice(range);
        range.len()
    }

    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.position).copied()
    }

    /// Drop up to `n` bytes.
    pub fn skip(&mut self, n: usize) -> usize {
        self.extract(n).len()
    }

    pub fn marker(&self) -> Marker {
        Marker(self.position)
    }

    /// Return to a position saved with [`marker`](Self::marker).
    pub fn rewind(&mut self, marker: Marker) {
        self.position = marker.0.min(self.data.len());
    }

    /// Bytes read since construction (net of rewinds).
    pub fn consumed(&self) -> usize {
        self.position
    }
}
