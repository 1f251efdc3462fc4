use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use unisync_common::types::Vertical;

use crate::upsert::sql::{qualified_name, quote_ident};
use crate::upsert::{ColumnValue, Row, TableRef, UpsertPolicy};

pub const APPLICATION_ID_COLUMN: &str = "_unified_application_id";
pub const CUSTOMER_ID_COLUMN: &str = "_unified_customer_id";
pub const PROVIDER_NAME_COLUMN: &str = "_unified_provider_name";
pub const EMITTED_AT_COLUMN: &str = "_unified_emitted_at";
pub const UNIFIED_DATA_COLUMN: &str = "_unified_data";

const PRIMARY_KEY: [&str; 4] = [
    APPLICATION_ID_COLUMN,
    CUSTOMER_ID_COLUMN,
    PROVIDER_NAME_COLUMN,
    "id",
];

/// A provider object in the common schema, ready to be written to its
/// destination table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedRecord {
    pub application_id: String,
    pub customer_id: String,
    pub provider_name: String,
    pub id: String,
    pub is_deleted: bool,
    /// Provider-reported modification time, if any.
    pub last_modified_at: Option<DateTime<Utc>>,
    pub raw_data: Option<Value>,
    pub unified_data: Value,
}

impl UnifiedRecord {
    /// Sync-side timestamps use the database clock; `created_at` survives
    /// later writes through [`record_upsert_policy`].
    pub fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert(APPLICATION_ID_COLUMN.into(), ColumnValue::text(&self.application_id));
        row.insert(CUSTOMER_ID_COLUMN.into(), ColumnValue::text(&self.customer_id));
        row.insert(PROVIDER_NAME_COLUMN.into(), ColumnValue::text(&self.provider_name));
        row.insert("id".into(), ColumnValue::text(&self.id));
        row.insert("created_at".into(), ColumnValue::Now);
        row.insert("updated_at".into(), ColumnValue::Now);
        row.insert(EMITTED_AT_COLUMN.into(), ColumnValue::Now);
        row.insert(
            "last_modified_at".into(),
            self.last_modified_at
                .map(ColumnValue::Timestamp)
                .unwrap_or(ColumnValue::Now),
        );
        row.insert("is_deleted".into(), ColumnValue::Bool(self.is_deleted));
        row.insert("raw_data".into(), ColumnValue::json(self.raw_data.clone()));
        row.insert(
            UNIFIED_DATA_COLUMN.into(),
            ColumnValue::Json(self.unified_data.clone()),
        );
        row
    }
}

pub fn record_upsert_policy() -> UpsertPolicy {
    UpsertPolicy::new()
        .insert_only(&["created_at"])
        .no_diff(&[EMITTED_AT_COLUMN, "last_modified_at", "updated_at"])
}

/// Destination of one stream of one vertical, e.g. `tenant_a.crm_contact`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationTable {
    pub vertical: Vertical,
    pub stream: String,
    pub schema: Option<String>,
}

impl DestinationTable {
    pub fn new(vertical: Vertical, stream: impl Into<String>, schema: Option<String>) -> Self {
        Self {
            vertical,
            stream: stream.into(),
            schema,
        }
    }

    pub fn name(&self) -> String {
        format!("{}_{}", self.vertical.as_str(), self.stream)
    }

    pub fn table_ref(&self) -> TableRef {
        TableRef::new(self.name(), &PRIMARY_KEY).in_schema(self.schema.clone())
    }

    pub fn create_if_not_exists_sql(&self) -> String {
        let pk = PRIMARY_KEY
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "create table if not exists {table} (
               {app} text not null,
               {customer} text not null,
               {provider} text not null,
               \"id\" text not null,
               \"created_at\" timestamptz not null default now(),
               \"updated_at\" timestamptz not null default now(),
               \"is_deleted\" boolean not null default false,
               \"last_modified_at\" timestamptz not null default now(),
               \"raw_data\" jsonb,
               {data} jsonb not null,
               {emitted} timestamptz not null default now(),
               primary key ({pk})
             )",
            table = qualified_name(&self.table_ref()),
            app = quote_ident(APPLICATION_ID_COLUMN),
            customer = quote_ident(CUSTOMER_ID_COLUMN),
            provider = quote_ident(PROVIDER_NAME_COLUMN),
            data = quote_ident(UNIFIED_DATA_COLUMN),
            emitted = quote_ident(EMITTED_AT_COLUMN),
        )
    }
}
