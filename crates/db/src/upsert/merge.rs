use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use unisync_common::error::{UnisyncError, UnisyncResult};

use super::sql::validate_ident;
use super::{ColumnValue, Row, TableRef, UpsertOutcome, UpsertPolicy};

/// One-level key-wise merge. Keys present only in `old` survive, keys in
/// `new` win. A non-object `new` replaces `old`; a null `new` keeps it.
pub fn shallow_merge(old: Option<&Value>, new: &Value) -> Value {
    match (old, new) {
        (Some(Value::Object(old)), Value::Object(new)) => {
            let mut merged = old.clone();
            for (k, v) in new {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        (Some(old), Value::Null) => old.clone(),
        (_, new) => new.clone(),
    }
}

/// The row stored after writing `incoming` over `existing`.
pub fn apply(
    existing: Option<&Row>,
    incoming: &Row,
    policy: &UpsertPolicy,
    now: DateTime<Utc>,
) -> Row {
    let resolve = |v: &ColumnValue| match v {
        ColumnValue::Now => ColumnValue::Timestamp(now),
        other => other.clone(),
    };

    let existing = match existing {
        Some(row) => row,
        None => return incoming.iter().map(|(k, v)| (k.clone(), resolve(v))).collect(),
    };

    let mut out = existing.clone();
    for (column, value) in incoming {
        if policy.is_insert_only(column) && existing.contains_key(column) {
            continue;
        }
        let next = if policy.is_shallow_merge(column) {
            let old = existing.get(column).map(ColumnValue::to_json);
            ColumnValue::Json(shallow_merge(old.as_ref(), &value.to_json()))
        } else {
            resolve(value)
        };
        out.insert(column.clone(), next);
    }
    out
}

/// Columns whose stored value would change, ignoring key, insert-only and
/// no-diff columns. `existing` is the stored row as a JSON object.
pub fn changed_columns(
    existing: &Map<String, Value>,
    incoming: &Row,
    table: &TableRef,
    policy: &UpsertPolicy,
) -> Vec<String> {
    incoming
        .iter()
        .filter(|(column, _)| {
            !table.primary_key.contains(*column)
                && !policy.is_insert_only(column)
                && !policy.is_no_diff(column)
        })
        .filter(|(column, value)| {
            let old = existing.get(column.as_str()).unwrap_or(&Value::Null);
            if policy.is_shallow_merge(column) {
                &shallow_merge(Some(old), &value.to_json()) != old
            } else {
                !values_equal(old, value)
            }
        })
        .map(|(column, _)| column.clone())
        .collect()
}

fn values_equal(old: &Value, new: &ColumnValue) -> bool {
    match new {
        ColumnValue::Now => true,
        ColumnValue::Null => old.is_null(),
        ColumnValue::Timestamp(ts) => old
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|parsed| parsed.with_timezone(&Utc) == *ts)
            .unwrap_or(false),
        other => *old == other.to_json(),
    }
}

pub(crate) fn row_to_json(row: &Row) -> Map<String, Value> {
    row.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()
}

pub(crate) fn key_of(table: &TableRef, row: &Row) -> Option<Vec<String>> {
    table
        .primary_key
        .iter()
        .map(|c| row.get(c).and_then(ColumnValue::key_part))
        .collect()
}

/// Every row must carry the same columns, including a scalar value for each
/// key column.
pub(crate) fn validate_batch(table: &TableRef, rows: &[Row]) -> UnisyncResult<()> {
    validate_ident(&table.name)?;
    if let Some(schema) = &table.schema {
        validate_ident(schema)?;
    }
    if table.primary_key.is_empty() {
        return Err(UnisyncError::Validation(format!(
            "table {} has no primary key",
            table.name
        )));
    }

    let first = match rows.first() {
        Some(r) => r,
        None => return Ok(()),
    };
    for column in first.keys() {
        validate_ident(column)?;
    }
    for (i, row) in rows.iter().enumerate() {
        if !row.keys().eq(first.keys()) {
            return Err(UnisyncError::Validation(format!(
                "row {i} of batch for {} has a different column set",
                table.name
            )));
        }
        if key_of(table, row).is_none() {
            return Err(UnisyncError::Validation(format!(
                "row {i} of batch for {} is missing a primary key value",
                table.name
            )));
        }
    }
    Ok(())
}

/// Collapse rows sharing a key; the last occurrence wins. One statement may
/// not touch the same row twice.
pub(crate) fn dedupe_by_key<'a>(table: &TableRef, rows: &'a [Row]) -> Vec<&'a Row> {
    let mut position: HashMap<Vec<String>, usize> = HashMap::new();
    let mut out: Vec<&Row> = Vec::with_capacity(rows.len());
    for row in rows {
        let key = key_of(table, row).unwrap_or_default();
        match position.get(&key) {
            Some(&i) => out[i] = row,
            None => {
                position.insert(key, out.len());
                out.push(row);
            }
        }
    }
    out
}

/// In-memory table with the same write semantics as the Postgres engine.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    table: TableRef,
    rows: BTreeMap<Vec<String>, Row>,
}

impl MemoryTable {
    pub fn new(table: TableRef) -> Self {
        Self {
            table,
            rows: BTreeMap::new(),
        }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn upsert(&mut self, rows: &[Row], policy: &UpsertPolicy) -> UnisyncResult<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();
        if rows.is_empty() {
            return Ok(outcome);
        }
        validate_batch(&self.table, rows)?;

        let now = Utc::now();
        for row in dedupe_by_key(&self.table, rows) {
            let key = key_of(&self.table, row).unwrap_or_default();
            let existing = self.rows.get(&key);
            match existing {
                None => outcome.inserted += 1,
                Some(old) => {
                    let changed =
                        changed_columns(&row_to_json(old), row, &self.table, policy);
                    if changed.is_empty() {
                        outcome.unchanged += 1;
                    } else {
                        outcome.updated += 1;
                    }
                }
            }
            let next = apply(existing, row, policy, now);
            self.rows.insert(key, next);
        }
        Ok(outcome)
    }

    pub fn get(&self, key: &[&str]) -> Option<&Row> {
        let key: Vec<String> = key.iter().map(|k| k.to_string()).collect();
        self.rows.get(&key)
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
