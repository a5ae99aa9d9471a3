//! Macros generating closed codec sets.
//!
//! A bus with a [`StaticSerializerFactory`](crate::echo::StaticSerializerFactory)
//! needs one concrete serializer type and one concrete deserializer type.
//! These macros build them as enums over an explicitly listed set of codecs,
//! so the arena slot is exactly as large as the largest member.

/// Define a serializer enum over a fixed list of codec types.
///
/// Each variant gets a `From` impl, and the enum implements
/// `MethodSerializer` by dispatching to the active variant.
///
/// # Example
/// ```ignore
/// method_serializer_set! {
///     pub enum Outbound {
///         Status(MessageSerializer<Status>),
///         Log(MessageSerializer<LogLine>),
///     }
/// }
///
/// method_serializer_set! {
///     pub enum Bridged<'a> {
///         Status(MessageSerializer<Status>),
///         Forward(ForwardOutbound<'a, 64>),
///     }
/// }
/// ```
#[macro_export]
macro_rules! method_serializer_set {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident { $($variant:ident($ty:ty)),+ $(,)? }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $($variant($ty)),+
        }

        $(
            impl ::core::convert::From<$ty> for $name {
                fn from(codec: $ty) -> Self {
                    Self::$variant(codec)
                }
            }
        )+

        impl $crate::echo::MethodSerializer for $name {
            fn serialize(
                &mut self,
                writer: &mut $crate::echo::StreamWriter<'_>,
            ) -> $crate::echo::SendProgress {
                match self {
                    $(Self::$variant(codec) => $crate::echo::MethodSerializer::serialize(codec, writer)),+
                }
            }
        }
    };
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident<$lt:lifetime> { $($variant:ident($ty:ty)),+ $(,)? }
    ) => {
        $(#[$meta])*
        $vis enum $name<$lt> {
            $($variant($ty)),+
        }

        $(
            impl<$lt> ::core::convert::From<$ty> for $name<$lt> {
                fn from(codec: $ty) -> Self {
                    Self::$variant(codec)
                }
            }
        )+

        impl<$lt> $crate::echo::MethodSerializer for $name<$lt> {
            fn serialize(
                &mut self,
                writer: &mut $crate::echo::StreamWriter<'_>,
            ) -> $crate::echo::SendProgress {
                match self {
                    $(Self::$variant(codec) => $crate::echo::MethodSerializer::serialize(codec, writer)),+
                }
            }
        }
    };
}

/// Define a deserializer enum over a fixed list of codec types.
///
/// Same shape as [`method_serializer_set!`]; the enum implements
/// `MethodDeserializer`.
///
/// # Example
/// ```ignore
/// method_deserializer_set! {
///     pub enum Inbound<'a> {
///         Status(MessageDeserializer<'a, Status, 32>),
///         Forward(ForwardInbound<'a, 64>),
///     }
/// }
/// ```
#[macro_export]
macro_rules! method_deserializer_set {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident { $($variant:ident($ty:ty)),+ $(,)? }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $($variant($ty)),+
        }

        $(
            impl ::core::convert::From<$ty> for $name {
                fn from(codec: $ty) -> Self {
                    Self::$variant(codec)
                }
            }
        )+

        impl $crate::echo::MethodDeserializer for $name {
            fn method_contents(&mut self, reader: &mut $crate::echo::LimitedReader<'_>) {
                match self {
                    $(Self::$variant(codec) => $crate::echo::MethodDeserializer::method_contents(codec, reader)),+
                }
            }

            fn failed(&self) -> bool {
                match self {
                    $(Self::$variant(codec) => $crate::echo::MethodDeserializer::failed(codec)),+
                }
            }

            fn execute_method(&mut self) -> $crate::echo::MethodCompletion {
                match self {
                    $(Self::$variant(codec) => $crate::echo::MethodDeserializer::execute_method(codec)),+
                }
            }
        }
    };
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident<$lt:lifetime> { $($variant:ident($ty:ty)),+ $(,)? }
    ) => {
        $(#[$meta])*
        $vis enum $name<$lt> {
            $($variant($ty)),+
        }

        $(
            impl<$lt> ::core::convert::From<$ty> for $name<$lt> {
                fn from(codec: $ty) -> Self {
                    Self::$variant(codec)
                }
            }
        )+

        impl<$lt> $crate::echo::MethodDeserializer for $name<$lt> {
            fn method_contents(&mut self, reader: &mut $crate::echo::LimitedReader<'_>) {
                match self {
                    $(Self::$variant(codec) => $crate::echo::MethodDeserializer::method_contents(codec, reader)),+
                }
            }

            fn failed(&self) -> bool {
                match self {
                    $(Self::$variant(codec) => $crate::echo::MethodDeserializer::failed(codec)),+
                }
            }

            fn execute_method(&mut self) -> $crate::echo::MethodCompletion {
                match self {
                    $(Self::$variant(codec) => $crate::echo::MethodDeserializer::execute_method(codec)),+
                }
            }
        }
    };
}
