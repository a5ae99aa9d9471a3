//! Echo firmware library.
//!
//! Allocation-free, transport-agnostic RPC engine ("Echo") for embedded
//! firmware: a bus that multiplexes many statically typed services over a
//! single ordered byte stream, plus a forwarder that bridges two buses.
//!
//! The crate is `no_std` unless the `std` feature is enabled; the heap-backed
//! codec factory requires `alloc`.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unused_must_use)]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod config;
pub mod echo;
pub mod error;

pub use error::{Error, Result, WireError};
