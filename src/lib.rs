#![doc(html_root_url = "https://docs.rs/protowire/0.1.0")]

//! Wire-format runtime for `protowire` generated bindings.
//!
//! `protowire-build` turns `.proto` schemas into Rust sources; the code it
//! emits leans on this crate for the Protocol Buffers wire format: varints,
//! zig-zag and fixed-width scalars, field keys, length-delimited framing, and
//! unknown-field skipping. Generated writers encode with a single allocation
//! sized by `calc_size`, and generated readers borrow the input buffer
//! without allocating at all.

// Re-export the bytes crate for use within generated code.
pub use bytes;

mod error;
mod message;

pub mod encoding;

pub use crate::error::{DecodeError, EncodeError};
pub use crate::message::{WireMessage, WireReader};
