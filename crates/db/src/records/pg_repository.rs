use async_trait::async_trait;
use sqlx::PgPool;

use crate::records::models::{record_upsert_policy, DestinationTable, UnifiedRecord};
use crate::records::repositories::DestinationRepository;
use crate::upsert::sql::{quote_ident, validate_ident};
use crate::upsert::{self, UpsertOutcome};
use unisync_common::error::{UnisyncError, UnisyncResult};

#[derive(Clone)]
pub struct PgDestinationRepository {
    pool: PgPool,
}

impl PgDestinationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DestinationRepository for PgDestinationRepository {
    async fn ensure_schema(&self, schema: &str) -> UnisyncResult<()> {
        validate_ident(schema)?;
        sqlx::query(&format!("create schema if not exists {}", quote_ident(schema)))
            .execute(&self.pool)
            .await
            .map_err(|e| UnisyncError::Database(e.to_string()))?;
        tracing::debug!(schema, "ensured schema");
        Ok(())
    }

    async fn ensure_table(&self, table: &DestinationTable) -> UnisyncResult<()> {
        validate_ident(&table.name())?;
        sqlx::query(&table.create_if_not_exists_sql())
            .execute(&self.pool)
            .await
            .map_err(|e| UnisyncError::Database(e.to_string()))?;
        Ok(())
    }

    async fn upsert_records(
        &self,
        table: &DestinationTable,
        records: &[UnifiedRecord],
    ) -> UnisyncResult<UpsertOutcome> {
        let rows: Vec<upsert::Row> = records.iter().map(UnifiedRecord::to_row).collect();
        upsert::pg::upsert(&self.pool, &table.table_ref(), &rows, &record_upsert_policy()).await
    }
}
