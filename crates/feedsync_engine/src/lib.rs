//! # feedsync Engine
//!
//! Keeps a tenant's local store in sync with the server's NDJSON change
//! feed.
//!
//! This crate provides:
//! - The sync orchestrator ([`SyncEngine::bootstrap_and_sync`])
//! - Cursor persistence, skip logic and full-reset recovery
//! - Batched application of the high-volume entity
//! - Snapshot windows that prune rows the server no longer has
//! - A `reqwest` transport and a scripted mock transport
//!
//! ## Key Invariants
//!
//! - The persisted cursor never runs ahead of committed data
//! - Applying the same feed twice yields the same store
//! - At most one attempt per engine runs at a time
//! - A full reset always wipes rows and cursor together
//! - Listeners are notified exactly once per attempt

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applier;
mod config;
mod engine;
mod error;
mod http;
mod listeners;
mod state;
mod transport;

pub use config::{tenant_base_url, SyncConfig};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use http::HttpTransport;
pub use listeners::Subscription;
pub use state::{SyncReport, SyncState, SyncStats};
pub use transport::{ChunkStream, FeedResponse, MockFeed, MockTransport, SyncTransport};

pub use tokio_util::sync::CancellationToken;
