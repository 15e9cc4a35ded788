//! Change-feed message types.

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One message of the change feed.
///
/// The wire form is internally tagged by `type`:
///
/// ```rust
/// use feedsync_protocol::StreamMessage;
///
/// let msg: StreamMessage =
///     serde_json::from_str(r#"{"type":"delete","entity":"wh_tasks","id":42}"#).unwrap();
/// assert_eq!(
///     msg,
///     StreamMessage::Delete { entity: "wh_tasks".into(), id: "42".into() }
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Advisory: the listed datasets are stale and need a full rebuild.
    Meta {
        /// Names of the stale datasets.
        #[serde(default)]
        requires_resync: Vec<String>,
    },

    /// Progress marker. The cursor should be persisted immediately.
    Checkpoint {
        /// Opaque resume position.
        cursor: String,
    },

    /// End of the feed.
    Done {
        /// Cursor to resume from next time, if the server issued one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_cursor: Option<String>,
    },

    /// Opens a full-replace window for an entity.
    SnapshotStart {
        /// Entity (table) name.
        entity: String,
    },

    /// Closes the window; rows not seen inside it are stale.
    SnapshotEnd {
        /// Entity (table) name.
        entity: String,
    },

    /// Insert or replace a whole record.
    Upsert {
        /// Entity (table) name.
        entity: String,
        /// Row id. Integer ids are normalized to their decimal string.
        #[serde(deserialize_with = "row_id")]
        id: String,
        /// The full record.
        record: Value,
    },

    /// Remove a record.
    Delete {
        /// Entity (table) name.
        entity: String,
        /// Row id. Integer ids are normalized to their decimal string.
        #[serde(deserialize_with = "row_id")]
        id: String,
    },
}

impl StreamMessage {
    /// Every `type` value this decoder understands.
    pub const KINDS: [&'static str; 7] = [
        "meta",
        "checkpoint",
        "done",
        "snapshot_start",
        "snapshot_end",
        "upsert",
        "delete",
    ];

    /// Returns the wire name of this message's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Meta { .. } => "meta",
            Self::Checkpoint { .. } => "checkpoint",
            Self::Done { .. } => "done",
            Self::SnapshotStart { .. } => "snapshot_start",
            Self::SnapshotEnd { .. } => "snapshot_end",
            Self::Upsert { .. } => "upsert",
            Self::Delete { .. } => "delete",
        }
    }

    /// Returns the entity this message targets, if any.
    pub fn entity(&self) -> Option<&str> {
        match self {
            Self::SnapshotStart { entity }
            | Self::SnapshotEnd { entity }
            | Self::Upsert { entity, .. }
            | Self::Delete { entity, .. } => Some(entity),
            Self::Meta { .. } | Self::Checkpoint { .. } | Self::Done { .. } => None,
        }
    }

    /// Serializes the message as one feed line, including the newline.
    pub fn to_line(&self) -> String {
        // Serializing a `Value`-bearing enum into a string cannot fail.
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }

    /// Convenience constructor for an upsert.
    pub fn upsert(entity: impl Into<String>, id: impl Into<String>, record: Value) -> Self {
        Self::Upsert {
            entity: entity.into(),
            id: id.into(),
            record,
        }
    }

    /// Convenience constructor for a delete.
    pub fn delete(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Delete {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Convenience constructor for a terminal `done`.
    pub fn done(next_cursor: impl Into<String>) -> Self {
        Self::Done {
            next_cursor: Some(next_cursor.into()),
        }
    }
}

/// Accepts a string or an integral number as an id.
///
/// JSON encoders may emit `7.0` for an integer key, so floats without a
/// fractional part normalize to the same id as `7`. Fractional, null and
/// structured ids are rejected, which makes the whole line malformed.
fn row_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    // Largest magnitude at which every integer is exactly representable.
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Signed(i64),
        Unsigned(u64),
        Float(f64),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Text(s) => Ok(s),
        RawId::Signed(n) => Ok(n.to_string()),
        RawId::Unsigned(n) => Ok(n.to_string()),
        #[allow(clippy::cast_possible_truncation)]
        RawId::Float(n) if n.fract() == 0.0 && n.abs() <= MAX_EXACT => Ok((n as i64).to_string()),
        RawId::Float(n) => Err(de::Error::custom(format!(
            "id must be an integer or a string, got {n}"
        ))),
    }
}
