//! Conflict-aware batch upsert with per-column merge policies.
//!
//! The same semantics are available in two forms: [`pg::upsert`] writes to
//! Postgres in one transaction, [`merge::MemoryTable`] applies them in memory.

pub mod merge;
pub mod pg;
pub mod sql;

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use uuid::Uuid;

pub use merge::MemoryTable;

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Text(String),
    Bool(bool),
    Int(i64),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Json(Value),
    /// Database clock at write time. Never reported as a change.
    Now,
}

impl ColumnValue {
    pub fn text(s: impl Into<String>) -> Self {
        ColumnValue::Text(s.into())
    }

    pub fn json(v: Option<Value>) -> Self {
        v.map(ColumnValue::Json).unwrap_or(ColumnValue::Null)
    }

    pub fn to_json(&self) -> Value {
        match self {
            ColumnValue::Null | ColumnValue::Now => Value::Null,
            ColumnValue::Text(s) => Value::String(s.clone()),
            ColumnValue::Bool(b) => Value::Bool(*b),
            ColumnValue::Int(i) => Value::from(*i),
            ColumnValue::Uuid(u) => Value::String(u.to_string()),
            ColumnValue::Timestamp(ts) => {
                Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            ColumnValue::Json(v) => v.clone(),
        }
    }

    /// Render as a key component. Only scalar values can be part of a key.
    pub(crate) fn key_part(&self) -> Option<String> {
        match self {
            ColumnValue::Text(s) => Some(s.clone()),
            ColumnValue::Int(i) => Some(i.to_string()),
            ColumnValue::Uuid(u) => Some(u.to_string()),
            ColumnValue::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// One row to write, keyed by column name.
pub type Row = BTreeMap<String, ColumnValue>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
    pub primary_key: Vec<String>,
}

impl TableRef {
    pub fn new(name: impl Into<String>, primary_key: &[&str]) -> Self {
        Self {
            schema: None,
            name: name.into(),
            primary_key: primary_key.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn in_schema(mut self, schema: Option<String>) -> Self {
        self.schema = schema;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertPolicy {
    /// Keep their first-insert value forever.
    pub insert_only_columns: Vec<String>,
    /// Still written, but ignored when deciding whether a row changed.
    pub no_diff_columns: Vec<String>,
    /// JSON objects merged one level deep instead of overwritten.
    pub shallow_merge_json_columns: Vec<String>,
}

impl UpsertPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_only(mut self, columns: &[&str]) -> Self {
        self.insert_only_columns
            .extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn no_diff(mut self, columns: &[&str]) -> Self {
        self.no_diff_columns.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn shallow_merge_json(mut self, columns: &[&str]) -> Self {
        self.shallow_merge_json_columns
            .extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn is_insert_only(&self, column: &str) -> bool {
        self.insert_only_columns.iter().any(|c| c == column)
    }

    pub fn is_no_diff(&self, column: &str) -> bool {
        self.no_diff_columns.iter().any(|c| c == column)
    }

    pub fn is_shallow_merge(&self, column: &str) -> bool {
        self.shallow_merge_json_columns.iter().any(|c| c == column)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl UpsertOutcome {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.unchanged
    }
}
