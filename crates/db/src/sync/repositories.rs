use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::sync::models::{RunCompletion, SyncRun, SyncState};
use unisync_common::error::UnisyncResult;

#[async_trait]
pub trait SyncStateRepository: Send + Sync {
    /// Load the state row for a connection, creating an empty one if absent.
    async fn get_or_create(&self, customer_id: &str, provider_name: &str)
        -> UnisyncResult<SyncState>;

    /// Shallow-merge `delta` into the stored state. Top-level keys not in
    /// `delta` are left as other writers put them.
    async fn merge_state(
        &self,
        customer_id: &str,
        provider_name: &str,
        delta: &Map<String, Value>,
    ) -> UnisyncResult<()>;
}

#[async_trait]
pub trait SyncRunRepository: Send + Sync {
    /// Open a run capturing the trigger and the state it started from.
    async fn start(&self, input_event: &Value, initial_state: &Value) -> UnisyncResult<SyncRun>;

    /// Merge one stream's state and metrics into the running record.
    async fn record_progress(
        &self,
        id: Uuid,
        state_delta: &Value,
        metrics_delta: &Value,
    ) -> UnisyncResult<()>;

    /// Write the terminal record.
    async fn complete(&self, id: Uuid, completion: &RunCompletion) -> UnisyncResult<SyncRun>;
}
