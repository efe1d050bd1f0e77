//! Byte-cursor primitives shared by every treesync codec.
//!
//! All reads are bounds-checked and return `Result` — replication frames
//! arrive from the network and a truncated frame must surface as an error,
//! never a panic.

mod reader;
mod writer;

pub use reader::Reader;
pub use writer::Writer;

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    #[error("unexpected end of buffer")]
    EndOfBuffer,
    #[error("invalid utf-8 in buffer")]
    InvalidUtf8,
    #[error("varint exceeds 57 bits")]
    VarintOverflow,
}
