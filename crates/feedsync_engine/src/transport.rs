//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use bytes::Bytes;
use feedsync_protocol::StreamMessage;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A stream of body chunks as they arrive from the server.
pub type ChunkStream = BoxStream<'static, SyncResult<Bytes>>;

/// The server's answer to a change-feed request.
pub enum FeedResponse {
    /// The body, delivered chunk by chunk.
    Streaming(ChunkStream),
    /// The whole body, read before decoding.
    Buffered(Bytes),
    /// The server rejected the cursor that was sent.
    InvalidCursor,
}

impl std::fmt::Debug for FeedResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedResponse::Streaming(_) => f.write_str("Streaming(..)"),
            FeedResponse::Buffered(body) => write!(f, "Buffered({} bytes)", body.len()),
            FeedResponse::InvalidCursor => f.write_str("InvalidCursor"),
        }
    }
}

/// A sync transport handles network communication with the server.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, scripted mock for testing).
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Warms up the tenant session. Failures are tolerated by the engine.
    async fn bootstrap(&self) -> SyncResult<()>;

    /// Opens the change feed, resuming after `cursor` when given.
    ///
    /// A rejected cursor is reported as [`FeedResponse::InvalidCursor`],
    /// not as an error.
    async fn open_feed(&self, cursor: Option<&str>) -> SyncResult<FeedResponse>;
}

/// A scripted change-feed response for [`MockTransport`].
#[derive(Debug)]
pub enum MockFeed {
    /// Stream these chunks, then end.
    Chunks(Vec<Bytes>),
    /// Stream these chunks, then fail.
    ChunksThenError(Vec<Bytes>, SyncError),
    /// Stream these chunks, then stall without ending.
    ChunksThenStall(Vec<Bytes>),
    /// Return the body in one piece.
    Buffered(Bytes),
    /// Reject the cursor.
    InvalidCursor,
    /// Fail the request before any body is read.
    Error(SyncError),
}

impl MockFeed {
    /// Streams `messages` as NDJSON, one chunk per line.
    pub fn messages(messages: &[StreamMessage]) -> Self {
        MockFeed::Chunks(
            messages
                .iter()
                .map(|m| Bytes::from(m.to_line()))
                .collect(),
        )
    }

    /// Streams raw NDJSON text as a single chunk.
    pub fn text(body: impl Into<String>) -> Self {
        MockFeed::Chunks(vec![Bytes::from(body.into())])
    }
}

/// A mock transport for testing.
///
/// Feed responses are served in the order they were queued. Every feed
/// request is recorded with the cursor it carried.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    bootstrap_fails: AtomicBool,
    bootstrap_calls: AtomicUsize,
    feeds: Mutex<VecDeque<MockFeed>>,
    requests: Mutex<Vec<Option<String>>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a new mock transport with no queued feeds.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            bootstrap_fails: AtomicBool::new(false),
            bootstrap_calls: AtomicUsize::new(0),
            feeds: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queues the response for the next feed request.
    pub fn push_feed(&self, feed: MockFeed) {
        self.feeds.lock().push_back(feed);
    }

    /// Sets whether the transport is connected.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Makes bootstrap calls fail.
    pub fn set_bootstrap_fails(&self, fails: bool) {
        self.bootstrap_fails.store(fails, Ordering::SeqCst);
    }

    /// Returns the number of bootstrap calls.
    pub fn bootstrap_calls(&self) -> usize {
        self.bootstrap_calls.load(Ordering::SeqCst)
    }

    /// Returns the cursor sent with each feed request, in order.
    pub fn feed_requests(&self) -> Vec<Option<String>> {
        self.requests.lock().clone()
    }

    /// Returns the number of feed responses not yet served.
    pub fn pending_feeds(&self) -> usize {
        self.feeds.lock().len()
    }

    fn check_connected(&self) -> SyncResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::transport_retryable("not connected"))
        }
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn bootstrap(&self) -> SyncResult<()> {
        self.bootstrap_calls.fetch_add(1, Ordering::SeqCst);
        self.check_connected()?;
        if self.bootstrap_fails.load(Ordering::SeqCst) {
            return Err(SyncError::Http { status: 500 });
        }
        Ok(())
    }

    async fn open_feed(&self, cursor: Option<&str>) -> SyncResult<FeedResponse> {
        self.requests.lock().push(cursor.map(str::to_owned));
        self.check_connected()?;

        let feed = self
            .feeds
            .lock()
            .pop_front()
            .ok_or_else(|| SyncError::transport_fatal("no feed response queued"))?;

        let response = match feed {
            MockFeed::Chunks(chunks) => {
                FeedResponse::Streaming(stream::iter(chunks.into_iter().map(Ok)).boxed())
            }
            MockFeed::ChunksThenError(chunks, error) => FeedResponse::Streaming(
                stream::iter(chunks.into_iter().map(Ok))
                    .chain(stream::once(async move { Err(error) }))
                    .boxed(),
            ),
            MockFeed::ChunksThenStall(chunks) => FeedResponse::Streaming(
                stream::iter(chunks.into_iter().map(Ok))
                    .chain(stream::pending())
                    .boxed(),
            ),
            MockFeed::Buffered(body) => FeedResponse::Buffered(body),
            MockFeed::InvalidCursor => FeedResponse::InvalidCursor,
            MockFeed::Error(error) => return Err(error),
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::TryStreamExt;

    #[test]
    fn mock_transport_records_cursors() {
        let transport = MockTransport::new();
        transport.push_feed(MockFeed::InvalidCursor);
        transport.push_feed(MockFeed::Buffered(Bytes::from_static(b"{}\n")));

        block_on(async {
            assert!(matches!(
                transport.open_feed(Some("c1")).await.unwrap(),
                FeedResponse::InvalidCursor
            ));
            assert!(matches!(
                transport.open_feed(None).await.unwrap(),
                FeedResponse::Buffered(_)
            ));
            assert!(transport.open_feed(None).await.is_err());
        });

        assert_eq!(
            transport.feed_requests(),
            vec![Some("c1".to_string()), None, None]
        );
        assert_eq!(transport.pending_feeds(), 0);
    }

    #[test]
    fn mock_transport_not_connected_error() {
        let transport = MockTransport::new();
        transport.set_connected(false);

        let result = block_on(transport.bootstrap());
        assert!(matches!(
            result,
            Err(SyncError::Transport {
                retryable: true,
                ..
            })
        ));
        assert_eq!(transport.bootstrap_calls(), 1);
    }

    #[test]
    fn mock_stream_ends_with_error() {
        let transport = MockTransport::new();
        transport.push_feed(MockFeed::ChunksThenError(
            vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")],
            SyncError::transport_retryable("reset"),
        ));

        block_on(async {
            let FeedResponse::Streaming(mut chunks) = transport.open_feed(None).await.unwrap()
            else {
                panic!("expected a streaming response");
            };
            assert_eq!(chunks.try_next().await.unwrap(), Some(Bytes::from_static(b"a")));
            assert_eq!(chunks.try_next().await.unwrap(), Some(Bytes::from_static(b"b")));
            assert!(chunks.try_next().await.is_err());
        });
    }

    #[test]
    fn messages_become_one_chunk_per_line() {
        let feed = MockFeed::messages(&[StreamMessage::done("c1"), StreamMessage::done("c2")]);
        match feed {
            MockFeed::Chunks(chunks) => {
                assert_eq!(chunks.len(), 2);
                assert!(chunks.iter().all(|c| c.ends_with(b"\n")));
            }
            other => panic!("unexpected feed {other:?}"),
        }
    }
}
