//! # feedsync Store
//!
//! Durable local storage for synced rows and sync metadata.
//!
//! The store keeps two logical tables:
//! - `rows`: `(table_name, row_id) -> serialized_record`
//! - `meta`: `key -> value` (cursors, last-sync timestamps)
//!
//! It has no knowledge of any entity schema. Records are opaque JSON values
//! that are serialized on write and parsed on read.
//!
//! ## On-disk Format
//!
//! A store is a directory holding a `LOCK` file and an append-only
//! `store.log`:
//!
//! ```text
//! | magic "FSDB" (4) | schema version (2) | reserved (2) |
//! | record | record | ...
//! ```
//!
//! Every record is one committed transaction:
//!
//! ```text
//! | magic "FSLG" (4) | type (1) | length (4) | CBOR payload (N) | crc32 (4) |
//! ```
//!
//! ## Invariants
//!
//! - A batch is written as a single record, so no partial batch is ever
//!   observable, before or after a crash
//! - In-memory state changes only after the record is appended
//! - A torn trailing record is discarded on open; a checksum mismatch on a
//!   complete record is fatal
//! - The schema version is never downgraded
//! - `clear_all` is the only full reset and wipes rows and metadata together

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod config;
mod error;
mod log;
mod migration;
mod stats;
mod store;
mod types;

pub use backend::{FileBackend, InMemoryBackend, StorageBackend};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use log::{compute_crc32, verify_log, LogSummary};
pub use migration::{SchemaVersion, CURRENT_SCHEMA_VERSION};
pub use stats::{StoreStats, StoreStatsSnapshot};
pub use store::LocalStore;
pub use types::RowMutation;
