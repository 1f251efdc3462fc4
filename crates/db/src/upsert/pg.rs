use std::collections::HashMap;

use serde_json::{Map, Value};
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row as _, Transaction};
use unisync_common::error::{UnisyncError, UnisyncResult};

use super::merge::{changed_columns, dedupe_by_key, key_of, validate_batch};
use super::sql::{build_select_existing, build_upsert};
use super::{ColumnValue, Row, TableRef, UpsertOutcome, UpsertPolicy};

/// Stay under the protocol limit of 65535 bind parameters per statement.
const MAX_BIND_PARAMS: usize = 60_000;

fn db_err(e: sqlx::Error) -> UnisyncError {
    UnisyncError::Database(e.to_string())
}

/// Write `rows` into `table` in one transaction.
///
/// Existing rows are locked and read first so the outcome can report which
/// rows actually changed; the write itself always happens.
pub async fn upsert(
    pool: &PgPool,
    table: &TableRef,
    rows: &[Row],
    policy: &UpsertPolicy,
) -> UnisyncResult<UpsertOutcome> {
    let mut outcome = UpsertOutcome::default();
    if rows.is_empty() {
        return Ok(outcome);
    }
    validate_batch(table, rows)?;

    let rows = dedupe_by_key(table, rows);
    let columns = rows.first().map(|r| r.len()).unwrap_or(1).max(1);
    let chunk_size = (MAX_BIND_PARAMS / columns).max(1);

    let mut tx = pool.begin().await.map_err(db_err)?;
    for chunk in rows.chunks(chunk_size) {
        let existing = fetch_existing(&mut tx, table, chunk).await?;
        for row in chunk {
            let key = key_of(table, row).unwrap_or_default();
            match existing.get(&key) {
                None => outcome.inserted += 1,
                Some(old) if changed_columns(old, row, table, policy).is_empty() => {
                    outcome.unchanged += 1
                }
                Some(_) => outcome.updated += 1,
            }
        }

        let (sql, binds) = build_upsert(table, chunk, policy);
        bind_all(sqlx::query(&sql), &binds)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
    }
    tx.commit().await.map_err(db_err)?;

    tracing::debug!(
        table = %table.name,
        inserted = outcome.inserted,
        updated = outcome.updated,
        unchanged = outcome.unchanged,
        "upserted batch"
    );
    Ok(outcome)
}

async fn fetch_existing(
    tx: &mut Transaction<'_, Postgres>,
    table: &TableRef,
    rows: &[&Row],
) -> UnisyncResult<HashMap<Vec<String>, Map<String, Value>>> {
    let (sql, binds) = build_select_existing(table, rows);
    let fetched = bind_all(sqlx::query(&sql), &binds)
        .fetch_all(&mut **tx)
        .await
        .map_err(db_err)?;

    let mut existing = HashMap::with_capacity(fetched.len());
    for r in fetched {
        let value: Value = r.try_get("row").map_err(db_err)?;
        if let Value::Object(map) = value {
            let key: Option<Vec<String>> = table
                .primary_key
                .iter()
                .map(|c| map.get(c).and_then(json_key_part))
                .collect();
            if let Some(key) = key {
                existing.insert(key, map);
            }
        }
    }
    Ok(existing)
}

fn json_key_part(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    values: &[&'q ColumnValue],
) -> Query<'q, Postgres, PgArguments> {
    for value in values {
        query = bind_value(query, value);
    }
    query
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q ColumnValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        ColumnValue::Text(s) => query.bind(s.as_str()),
        ColumnValue::Bool(b) => query.bind(*b),
        ColumnValue::Int(i) => query.bind(*i),
        ColumnValue::Uuid(u) => query.bind(*u),
        ColumnValue::Timestamp(ts) => query.bind(*ts),
        ColumnValue::Json(v) => query.bind(sqlx::types::Json(v)),
        // Inlined by the SQL builder; never bound.
        ColumnValue::Null | ColumnValue::Now => query.bind(Option::<String>::None),
    }
}
