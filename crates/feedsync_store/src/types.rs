//! Row and mutation types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single row change within an ordered batch.
#[derive(Debug, Clone, PartialEq)]
pub enum RowMutation {
    /// Insert or replace the whole record.
    Upsert {
        /// Row id.
        id: String,
        /// New record.
        record: Value,
    },
    /// Remove the row. Absent ids are ignored.
    Delete {
        /// Row id.
        id: String,
    },
}

impl RowMutation {
    /// Creates an upsert.
    pub fn upsert(id: impl Into<String>, record: Value) -> Self {
        Self::Upsert {
            id: id.into(),
            record,
        }
    }

    /// Creates a delete.
    pub fn delete(id: impl Into<String>) -> Self {
        Self::Delete { id: id.into() }
    }

    /// Returns the row id this mutation targets.
    pub fn id(&self) -> &str {
        match self {
            Self::Upsert { id, .. } | Self::Delete { id } => id,
        }
    }
}

/// A logged mutation. One log record holds one or more of these and is
/// applied all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Mutation {
    Upsert {
        table: String,
        id: String,
        data: String,
    },
    Delete {
        table: String,
        id: String,
    },
    ClearTable {
        table: String,
    },
    ClearAll,
    SetMeta {
        key: String,
        value: String,
    },
    DeleteMeta {
        key: String,
    },
}

/// Materialized store content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StoreState {
    pub tables: BTreeMap<String, BTreeMap<String, String>>,
    pub meta: BTreeMap<String, String>,
}

impl StoreState {
    /// Applies a mutation. Re-applying the same mutation is a no-op.
    pub fn apply(&mut self, mutation: &Mutation) {
        match mutation {
            Mutation::Upsert { table, id, data } => {
                self.tables
                    .entry(table.clone())
                    .or_default()
                    .insert(id.clone(), data.clone());
            }
            Mutation::Delete { table, id } => {
                if let Some(rows) = self.tables.get_mut(table) {
                    rows.remove(id);
                    if rows.is_empty() {
                        self.tables.remove(table);
                    }
                }
            }
            Mutation::ClearTable { table } => {
                self.tables.remove(table);
            }
            Mutation::ClearAll => {
                self.tables.clear();
                self.meta.clear();
            }
            Mutation::SetMeta { key, value } => {
                self.meta.insert(key.clone(), value.clone());
            }
            Mutation::DeleteMeta { key } => {
                self.meta.remove(key);
            }
        }
    }

    pub fn contains(&self, table: &str, id: &str) -> bool {
        self.tables
            .get(table)
            .is_some_and(|rows| rows.contains_key(id))
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, BTreeMap::len)
    }
}
