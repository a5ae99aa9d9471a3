//! Single-slot codec arenas.
//!
//! A bus has at most one outbound and one inbound call in flight, so each
//! arena holds exactly one codec. Occupancy is the slot's `Option` state:
//! emplacing constructs the codec in place, releasing drops it and marks
//! the slot free again. Nothing is ever handed to a general allocator by
//! the static variant.
//!
//! Two interchangeable strategies implement the same contract:
//!
//! - [`StaticSerializerFactory`] stores the codecs inline. `S` and `D` are
//!   closed sets (see [`method_serializer_set!`](crate::method_serializer_set)),
//!   so the slot is exactly as large as the largest codec in the set.
//! - [`HeapSerializerFactory`] (`alloc` feature) stores boxed trait objects,
//!   for host builds and tests.

use core::mem::size_of;

use log::trace;

use super::serializer::{
    DiscardingDeserializer, MethodCompletion, MethodDeserializer, MethodSerializer,
};
use super::stream::LimitedReader;

/// Content of the deserializer slot: a method codec or the payload skipper
/// installed for unknown services and methods.
pub enum ActiveDeserializer<D> {
    Method(D),
    Discard(DiscardingDeserializer),
}

impl<D> ActiveDeserializer<D> {
    pub fn is_discard(&self) -> bool {
        matches!(self, Self::Discard(_))
    }
}

impl<D: MethodDeserializer> MethodDeserializer for ActiveDeserializer<D> {
    fn method_contents(&mut self, reader: &mut LimitedReader<'_>) {
        match self {
            Self::Method(d) => d.method_contents(reader),
            Self::Discard(d) => d.method_contents(reader),
        }
    }

    fn failed(&self) -> bool {
        match self {
            Self::Method(d) => d.failed(),
            Self::Discard(d) => d.failed(),
        }
    }

    fn execute_method(&mut self) -> MethodCompletion {
        match self {
            Self::Method(d) => d.execute_method(),
            Self::Discard(d) => d.execute_method(),
        }
    }
}

/// Arena allocator contract shared by the static and heap strategies.
pub trait MethodSerializerFactory {
    type Serializer: MethodSerializer;
    type Deserializer: MethodDeserializer;

    /// Largest serializer the arena can hold, in bytes.
    fn max_serializer_size(&self) -> usize;
    /// Largest deserializer the arena can hold, in bytes.
    fn max_deserializer_size(&self) -> usize;

    fn has_serializer(&self) -> bool;
    fn has_deserializer(&self) -> bool;

    /// Store `codec` in the serializer slot. Panics if it is occupied.
    fn emplace_serializer(&mut self, codec: Self::Serializer);
    fn serializer(&mut self) -> Option<&mut Self::Serializer>;
    /// Drop the live serializer. Returns whether there was one.
    fn release_serializer(&mut self) -> bool;

    /// Store `codec` in the deserializer slot. Panics if it is occupied.
    fn emplace_deserializer(&mut self, codec: ActiveDeserializer<Self::Deserializer>);
    fn deserializer(&mut self) -> Option<&mut ActiveDeserializer<Self::Deserializer>>;
    /// Drop the live deserializer. Returns whether there was one.
    fn release_deserializer(&mut self) -> bool;

    /// Reserve the serializer slot for a codec of `size` bytes.
    ///
    /// Panics if `size` exceeds the arena or the slot is in use. Both are
    /// sizing or sequencing bugs, not runtime conditions.
    fn serializer_memory(&self, size: usize) {
        assert!(
            size <= self.max_serializer_size(),
            "echo: serializer of {} bytes exceeds arena of {}",
            size,
            self.max_serializer_size()
        );
        assert!(!self.has_serializer(), "echo: serializer arena already in use");
    }

    /// Reserve the deserializer slot for a codec of `size` bytes.
    fn deserializer_memory(&self, size: usize) {
        assert!(
            size <= self.max_deserializer_size(),
            "echo: deserializer of {} bytes exceeds arena of {}",
            size,
            self.max_deserializer_size()
        );
        assert!(!self.has_deserializer(), "echo: deserializer arena already in use");
    }

    fn make_serializer<T: Into<Self::Serializer>>(&mut self, codec: T)
    where
        Self: Sized,
    {
        self.serializer_memory(size_of::<T>());
        self.emplace_serializer(codec.into());
        trace!("echo: serializer allocated ({} bytes)", size_of::<T>());
    }

    fn make_deserializer<T: Into<Self::Deserializer>>(&mut self, codec: T)
    where
        Self: Sized,
    {
        self.deserializer_memory(size_of::<T>());
        self.emplace_deserializer(ActiveDeserializer::Method(codec.into()));
        trace!("echo: deserializer allocated ({} bytes)", size_of::<T>());
    }

    /// Install the payload skipper used when nobody accepts a message.
    fn make_dummy_deserializer(&mut self)
    where
        Self: Sized,
    {
        self.deserializer_memory(size_of::<DiscardingDeserializer>());
        self.emplace_deserializer(ActiveDeserializer::Discard(DiscardingDeserializer));
    }
}

// ── Fixed storage ────────────────────────────────────────────

/// Arena with inline storage sized by the codec sets `S` and `D`.
pub struct StaticSerializerFactory<S, D> {
    serializer: Option<S>,
    deserializer: Option<ActiveDeserializer<D>>,
}

impl<S, D> StaticSerializerFactory<S, D> {
    pub const fn new() -> Self {
        Self {
            serializer: None,
            deserializer: None,
        }
    }
}

impl<S, D> Default for StaticSerializerFactory<S, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MethodSerializer, D: MethodDeserializer> MethodSerializerFactory
    for StaticSerializerFactory<S, D>
{
    type Serializer = S;
    type Deserializer = D;

    fn max_serializer_size(&self) -> usize {
        size_of::<S>()
    }

    fn max_deserializer_size(&self) -> usize {
        size_of::<ActiveDeserializer<D>>()
    }

    fn has_serializer(&self) -> bool {
        self.serializer.is_some()
    }

    fn has_deserializer(&self) -> bool {
        self.deserializer.is_some()
    }

    fn emplace_serializer(&mut self, codec: S) {
        assert!(self.serializer.is_none(), "echo: serializer arena already in use");
        self.serializer = Some(codec);
    }

    fn serializer(&mut self) -> Option<&mut S> {
        self.serializer.as_mut()
    }

    fn release_serializer(&mut self) -> bool {
        self.serializer.take().is_some()
    }

    fn emplace_deserializer(&mut self, codec: ActiveDeserializer<D>) {
        assert!(self.deserializer.is_none(), "echo: deserializer arena already in use");
        self.deserializer = Some(codec);
    }

    fn deserializer(&mut self) -> Option<&mut ActiveDeserializer<D>> {
        self.deserializer.as_mut()
    }

    fn release_deserializer(&mut self) -> bool {
        self.deserializer.take().is_some()
    }
}

// ── Heap storage ─────────────────────────────────────────────

#[cfg(feature = "alloc")]
pub use heap::HeapSerializerFactory;

#[cfg(feature = "alloc")]
mod heap {
    use alloc::boxed::Box;

    use super::*;

    type BoxedSerializer<'a> = Box<dyn MethodSerializer + 'a>;
    type BoxedDeserializer<'a> = Box<dyn MethodDeserializer + 'a>;

    /// Arena backed by the global allocator. Codecs of any type are
    /// accepted as long as they fit the configured limits.
    pub struct HeapSerializerFactory<'a> {
        serializer: Option<BoxedSerializer<'a>>,
        deserializer: Option<ActiveDeserializer<BoxedDeserializer<'a>>>,
        max_serializer_size: usize,
        max_deserializer_size: usize,
    }

    impl HeapSerializerFactory<'_> {
        pub fn new() -> Self {
            Self::with_limits(usize::MAX, usize::MAX)
        }

        pub fn with_limits(max_serializer_size: usize, max_deserializer_size: usize) -> Self {
            Self {
                serializer: None,
                deserializer: None,
                max_serializer_size,
                max_deserializer_size,
            }
        }
    }

    impl Default for HeapSerializerFactory<'_> {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<'a> MethodSerializerFactory for HeapSerializerFactory<'a> {
        type Serializer = BoxedSerializer<'a>;
        type Deserializer = BoxedDeserializer<'a>;

        fn max_serializer_size(&self) -> usize {
            self.max_serializer_size
        }

        fn max_deserializer_size(&self) -> usize {
            self.max_deserializer_size
        }

        fn has_serializer(&self) -> bool {
            self.serializer.is_some()
        }

        fn has_deserializer(&self) -> bool {
            self.deserializer.is_some()
        }

        fn emplace_serializer(&mut self, codec: BoxedSerializer<'a>) {
            assert!(self.serializer.is_none(), "echo: serializer arena already in use");
            self.serializer = Some(codec);
        }

        fn serializer(&mut self) -> Option<&mut BoxedSerializer<'a>> {
            self.serializer.as_mut()
        }

        fn release_serializer(&mut self) -> bool {
            self.serializer.take().is_some()
        }

        fn emplace_deserializer(&mut self, codec: ActiveDeserializer<BoxedDeserializer<'a>>) {
            assert!(self.deserializer.is_none(), "echo: deserializer arena already in use");
            self.deserializer = Some(codec);
        }

        fn deserializer(&mut self) -> Option<&mut ActiveDeserializer<BoxedDeserializer<'a>>> {
            self.deserializer.as_mut()
        }

        fn release_deserializer(&mut self) -> bool {
            self.deserializer.take().is_some()
        }
    }
}
