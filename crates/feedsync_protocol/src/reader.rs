//! Pull-based message readers over chunk sources.

use crate::decoder::{DecodeStats, Decoder};
use crate::message::StreamMessage;
use futures::{Stream, StreamExt};

/// Reads messages from any iterator of byte chunks.
///
/// Used for buffered responses and for tests with synthetic chunk
/// sequences.
///
/// ```rust
/// use feedsync_protocol::{MessageReader, StreamMessage};
///
/// let chunks = ["{\"type\":\"done\",\"next", "_cursor\":\"c1\"}"];
/// let messages: Vec<_> = MessageReader::new(chunks).collect();
/// assert_eq!(messages, vec![StreamMessage::done("c1")]);
/// ```
#[derive(Debug)]
pub struct MessageReader<I> {
    chunks: I,
    decoder: Decoder,
}

impl<I, B> MessageReader<I>
where
    I: Iterator<Item = B>,
    B: AsRef<[u8]>,
{
    /// Creates a reader over `chunks`.
    pub fn new(chunks: impl IntoIterator<IntoIter = I>) -> Self {
        Self::with_decoder(chunks, Decoder::new())
    }

    /// Creates a reader with a configured decoder.
    pub fn with_decoder(chunks: impl IntoIterator<IntoIter = I>, decoder: Decoder) -> Self {
        Self {
            chunks: chunks.into_iter(),
            decoder,
        }
    }

    /// Returns the decode counters so far.
    pub fn stats(&self) -> DecodeStats {
        self.decoder.stats()
    }
}

impl<'a> MessageReader<std::iter::Once<&'a [u8]>> {
    /// Creates a reader over a complete, already buffered body.
    pub fn from_bytes(body: &'a [u8]) -> Self {
        Self::new(std::iter::once(body))
    }
}

impl<I, B> Iterator for MessageReader<I>
where
    I: Iterator<Item = B>,
    B: AsRef<[u8]>,
{
    type Item = StreamMessage;

    fn next(&mut self) -> Option<StreamMessage> {
        loop {
            if let Some(message) = self.decoder.next_message() {
                return Some(message);
            }
            if self.decoder.is_finished() {
                return None;
            }
            match self.chunks.next() {
                Some(chunk) => self.decoder.feed(chunk.as_ref()),
                None => self.decoder.finish(),
            }
        }
    }
}

/// Reads messages from an async stream of byte chunks.
///
/// Chunk errors are passed through unchanged; the caller decides whether
/// they end the stream. Dropping the reader drops the source, which for a
/// network body aborts the transfer.
#[derive(Debug)]
pub struct MessageStream<S> {
    source: S,
    decoder: Decoder,
}

impl<S, B, E> MessageStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    /// Creates a reader over `source`.
    pub fn new(source: S) -> Self {
        Self::with_decoder(source, Decoder::new())
    }

    /// Creates a reader with a configured decoder.
    pub fn with_decoder(source: S, decoder: Decoder) -> Self {
        Self { source, decoder }
    }

    /// Returns the next message, reading more chunks as needed.
    ///
    /// Returns `None` once the source is exhausted and every buffered line
    /// has been decoded, including an unterminated final line.
    pub async fn next_message(&mut self) -> Option<Result<StreamMessage, E>> {
        loop {
            if let Some(message) = self.decoder.next_message() {
                return Some(Ok(message));
            }
            if self.decoder.is_finished() {
                return None;
            }
            match self.source.next().await {
                Some(Ok(chunk)) => self.decoder.feed(chunk.as_ref()),
                Some(Err(e)) => return Some(Err(e)),
                None => self.decoder.finish(),
            }
        }
    }

    /// Returns the decode counters so far.
    pub fn stats(&self) -> DecodeStats {
        self.decoder.stats()
    }

    /// Returns the underlying source.
    pub fn into_inner(self) -> S {
        self.source
    }
}
