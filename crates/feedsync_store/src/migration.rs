//! Schema versioning for the store log.
//!
//! The log starts with a fixed header:
//!
//! ```text
//! | magic "FSDB" (4) | schema version u16 LE (2) | reserved (2) |
//! ```
//!
//! Migrations are forward-only. Each step rewrites the whole log and is
//! committed with [`StorageBackend::replace_all`], so a crash mid-migration
//! leaves the previous version intact. A log written by a newer build is
//! refused rather than downgraded.

use crate::backend::StorageBackend;
use crate::error::{StoreError, StoreResult};
use std::fmt;
use tracing::{info, warn};

/// Magic bytes opening a store log.
pub(crate) const STORE_MAGIC: [u8; 4] = *b"FSDB";

/// Size of the log header.
pub(crate) const HEADER_SIZE: usize = 8;

/// A store schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion(pub u16);

impl SchemaVersion {
    /// Version of a log that has never been initialized.
    pub const EMPTY: Self = Self(0);

    /// Returns the raw version number.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: SchemaVersion = SchemaVersion(1);

/// A single forward migration step.
struct Step {
    from: SchemaVersion,
    to: SchemaVersion,
    name: &'static str,
    apply: fn(&[u8]) -> StoreResult<Vec<u8>>,
}

const STEPS: &[Step] = &[Step {
    from: SchemaVersion(0),
    to: SchemaVersion(1),
    name: "create_log",
    apply: create_log,
}];

fn create_log(existing: &[u8]) -> StoreResult<Vec<u8>> {
    if !existing.is_empty() {
        warn!(bytes = existing.len(), "discarding torn store header");
    }
    Ok(encode_header(SchemaVersion(1)).to_vec())
}

/// Outcome of running migrations on open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MigrationOutcome {
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    pub applied: Vec<&'static str>,
}

/// Encodes a log header for `version`.
pub(crate) fn encode_header(version: SchemaVersion) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&STORE_MAGIC);
    header[4..6].copy_from_slice(&version.0.to_le_bytes());
    header
}

/// Reads the header from the start of a log.
///
/// Returns `Ok(None)` when the log is shorter than a header (never
/// initialized, or torn while being created).
pub(crate) fn read_header(bytes: &[u8]) -> StoreResult<Option<SchemaVersion>> {
    if bytes.len() < HEADER_SIZE {
        return Ok(None);
    }
    if bytes[0..4] != STORE_MAGIC {
        return Err(StoreError::corrupted(0, "not a feedsync store log"));
    }

    let version = SchemaVersion(u16::from_le_bytes([bytes[4], bytes[5]]));
    if version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchema {
            found: version.0,
            supported: CURRENT_SCHEMA_VERSION.0,
        });
    }
    Ok(Some(version))
}

/// Brings the log in `backend` up to [`CURRENT_SCHEMA_VERSION`].
pub(crate) fn migrate(backend: &mut dyn StorageBackend) -> StoreResult<MigrationOutcome> {
    let mut image = backend.read_all()?;
    let from = read_header(&image)?.unwrap_or(SchemaVersion::EMPTY);
    let mut current = from;
    let mut applied = Vec::new();

    while current < CURRENT_SCHEMA_VERSION {
        let step = STEPS.iter().find(|s| s.from == current).ok_or_else(|| {
            StoreError::corrupted(0, format!("no migration path from schema {current}"))
        })?;
        image = (step.apply)(&image)?;
        info!(from = %step.from, to = %step.to, step = step.name, "applied store migration");
        applied.push(step.name);
        current = step.to;
    }

    if !applied.is_empty() {
        backend.replace_all(&image)?;
    }

    Ok(MigrationOutcome {
        from,
        to: current,
        applied,
    })
}
