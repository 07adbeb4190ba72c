// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Byte stream type exchanged between the sandbox, the chunk buffer and the decoder.

use std::pin::Pin;

use futures::stream::{self, Stream, StreamExt};

use crate::error::StreamError;

/// An owned, sendable stream of protocol bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, StreamError>> + Send>>;

/// A stream that fails immediately without producing any bytes.
pub fn failed(err: StreamError) -> ByteStream {
    stream::once(async move { Err(err) }).boxed()
}

/// A stream that yields the given chunks and then closes.
pub fn from_chunks<I>(chunks: I) -> ByteStream
where
    I: IntoIterator<Item = Vec<u8>>,
    I::IntoIter: Send + 'static,
{
    stream::iter(chunks.into_iter().map(Ok)).boxed()
}

/// A stream that closes without producing any bytes.
pub fn empty() -> ByteStream {
    stream::empty().boxed()
}
