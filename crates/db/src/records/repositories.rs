use async_trait::async_trait;

use crate::records::models::{DestinationTable, UnifiedRecord};
use crate::upsert::UpsertOutcome;
use unisync_common::error::UnisyncResult;

#[async_trait]
pub trait DestinationRepository: Send + Sync {
    /// Create the namespace if it does not exist.
    async fn ensure_schema(&self, schema: &str) -> UnisyncResult<()>;

    /// Create the stream's table if it does not exist.
    async fn ensure_table(&self, table: &DestinationTable) -> UnisyncResult<()>;

    async fn upsert_records(
        &self,
        table: &DestinationTable,
        records: &[UnifiedRecord],
    ) -> UnisyncResult<UpsertOutcome>;
}
