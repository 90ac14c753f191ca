//! Completion API client and stream decoding

mod client;
mod stream;

pub use client::{CompletionBackend, CompletionClient};
pub use stream::{ByteStream, StreamDecoder};
