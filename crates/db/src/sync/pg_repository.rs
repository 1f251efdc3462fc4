use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::sync::models::{RunCompletion, SyncRun, SyncState};
use crate::sync::repositories::{SyncRunRepository, SyncStateRepository};
use crate::upsert::{self, ColumnValue, TableRef, UpsertPolicy};
use unisync_common::error::{UnisyncError, UnisyncResult};

const SYNC_RUN_COLUMNS: &str = "id, input_event, initial_state, final_state, metrics, started_at, completed_at, error_type, error_detail";

#[derive(Clone)]
pub struct PgSyncRepository {
    pool: PgPool,
}

impl PgSyncRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn state_table() -> TableRef {
        TableRef::new("sync_state", &["customer_id", "provider_name"])
    }

    /// Sibling streams write disjoint keys of `state` concurrently.
    fn state_policy() -> UpsertPolicy {
        UpsertPolicy::new()
            .insert_only(&["id", "created_at"])
            .no_diff(&["created_at", "updated_at"])
            .shallow_merge_json(&["state"])
    }

    fn map_state_row(row: sqlx::postgres::PgRow) -> UnisyncResult<SyncState> {
        Ok(SyncState {
            id: row.get("id"),
            customer_id: row.get("customer_id"),
            provider_name: row.get("provider_name"),
            state: row.get("state"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn map_run_row(row: sqlx::postgres::PgRow) -> UnisyncResult<SyncRun> {
        Ok(SyncRun {
            id: row.get("id"),
            input_event: row.get("input_event"),
            initial_state: row.get("initial_state"),
            final_state: row.get("final_state"),
            metrics: row.get("metrics"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            error_type: row.get("error_type"),
            error_detail: row.get("error_detail"),
        })
    }
}

#[async_trait]
impl SyncStateRepository for PgSyncRepository {
    async fn get_or_create(
        &self,
        customer_id: &str,
        provider_name: &str,
    ) -> UnisyncResult<SyncState> {
        let row = sqlx::query(
            "insert into sync_state (id, customer_id, provider_name, state)
             values ($1, $2, $3, '{}'::jsonb)
             on conflict (customer_id, provider_name) do update set updated_at = now()
             returning id, customer_id, provider_name, state, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(customer_id)
        .bind(provider_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| UnisyncError::Database(e.to_string()))?;

        Self::map_state_row(row)
    }

    async fn merge_state(
        &self,
        customer_id: &str,
        provider_name: &str,
        delta: &Map<String, Value>,
    ) -> UnisyncResult<()> {
        let mut row = upsert::Row::new();
        row.insert("id".into(), ColumnValue::Uuid(Uuid::new_v4()));
        row.insert("customer_id".into(), ColumnValue::text(customer_id));
        row.insert("provider_name".into(), ColumnValue::text(provider_name));
        row.insert("state".into(), ColumnValue::Json(Value::Object(delta.clone())));
        row.insert("created_at".into(), ColumnValue::Now);
        row.insert("updated_at".into(), ColumnValue::Now);

        upsert::pg::upsert(
            &self.pool,
            &Self::state_table(),
            &[row],
            &Self::state_policy(),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SyncRunRepository for PgSyncRepository {
    async fn start(&self, input_event: &Value, initial_state: &Value) -> UnisyncResult<SyncRun> {
        let row = sqlx::query(&format!(
            "insert into sync_run (id, input_event, initial_state, final_state, started_at)
             values ($1, $2, $3, $3, now())
             returning {SYNC_RUN_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(Json(input_event))
        .bind(Json(initial_state))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| UnisyncError::Database(e.to_string()))?;

        Self::map_run_row(row)
    }

    async fn record_progress(
        &self,
        id: Uuid,
        state_delta: &Value,
        metrics_delta: &Value,
    ) -> UnisyncResult<()> {
        sqlx::query(
            "update sync_run
             set final_state = coalesce(final_state, '{}'::jsonb) || $1,
                 metrics = coalesce(metrics, '{}'::jsonb) || $2,
                 updated_at = now()
             where id = $3",
        )
        .bind(Json(state_delta))
        .bind(Json(metrics_delta))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| UnisyncError::Database(e.to_string()))?;
        Ok(())
    }

    async fn complete(&self, id: Uuid, completion: &RunCompletion) -> UnisyncResult<SyncRun> {
        let (error_type, error_detail) = match &completion.error {
            Some(info) => (
                Some(info.error_type.as_str()),
                Some(info.error_detail.as_str()),
            ),
            None => (None, None),
        };

        let row = sqlx::query(&format!(
            "update sync_run
             set completed_at = now(), final_state = $1, metrics = $2,
                 error_type = $3, error_detail = $4, updated_at = now()
             where id = $5
             returning {SYNC_RUN_COLUMNS}"
        ))
        .bind(Json(&completion.final_state))
        .bind(Json(&completion.metrics))
        .bind(error_type)
        .bind(error_detail)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| UnisyncError::Database(e.to_string()))?;

        match row {
            Some(r) => Self::map_run_row(r),
            None => Err(UnisyncError::NotFound(format!("sync run {id}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;
    use serde_json::json;
    use unisync_common::error::{ErrorInfo, ErrorType};

    async fn test_repo() -> Option<PgSyncRepository> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = create_pool(&url).await.expect("db should connect");
        crate::run_migrations(&pool).await.ok()?;
        Some(PgSyncRepository::new(pool))
    }

    fn delta(stream: &str, cursor: Value) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert(stream.to_string(), json!({ "cursor": cursor }));
        m
    }

    #[tokio::test]
    async fn get_or_create_inserts_empty_state() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let customer = Uuid::new_v4().to_string();
        let state = repo.get_or_create(&customer, "hubspot").await.expect("create");
        assert_eq!(state.customer_id, customer);
        assert_eq!(state.state, json!({}));
    }

    #[tokio::test]
    async fn get_or_create_returns_existing() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let customer = Uuid::new_v4().to_string();
        let a = repo.get_or_create(&customer, "hubspot").await.expect("first");
        let b = repo.get_or_create(&customer, "hubspot").await.expect("second");
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn merge_state_preserves_sibling_streams() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let customer = Uuid::new_v4().to_string();
        let created = repo.get_or_create(&customer, "hubspot").await.expect("create");

        repo.merge_state(&customer, "hubspot", &delta("contact", json!("c1")))
            .await
            .expect("contact");
        repo.merge_state(&customer, "hubspot", &delta("account", json!("a1")))
            .await
            .expect("account");
        repo.merge_state(&customer, "hubspot", &delta("contact", Value::Null))
            .await
            .expect("contact reset");

        let state = repo.get_or_create(&customer, "hubspot").await.expect("reload");
        assert_eq!(state.id, created.id);
        assert_eq!(
            state.state,
            json!({"contact": {"cursor": null}, "account": {"cursor": "a1"}})
        );
    }

    #[tokio::test]
    async fn run_lifecycle_records_progress_and_completion() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let run = repo
            .start(&json!({"customer_id": "c"}), &json!({}))
            .await
            .expect("start");
        assert!(run.completed_at.is_none());

        repo.record_progress(run.id, &json!({"contact": {"cursor": "x"}}), &json!({"contact_count": 2}))
            .await
            .expect("progress contact");
        repo.record_progress(run.id, &json!({"account": {"cursor": "y"}}), &json!({"account_count": 1}))
            .await
            .expect("progress account");

        let done = repo
            .complete(
                run.id,
                &RunCompletion {
                    final_state: json!({"contact": {"cursor": "x"}, "account": {"cursor": "y"}}),
                    metrics: json!({"contact_count": 2, "account_count": 1}),
                    error: Some(ErrorInfo::new(ErrorType::RemoteError, "502")),
                },
            )
            .await
            .expect("complete");
        assert!(done.completed_at.is_some());
        assert_eq!(done.error_type.as_deref(), Some("REMOTE_ERROR"));
        assert_eq!(done.metrics.unwrap()["account_count"], 1);
    }

    #[tokio::test]
    async fn complete_unknown_run_is_not_found() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let err = repo
            .complete(
                Uuid::new_v4(),
                &RunCompletion {
                    final_state: json!({}),
                    metrics: json!({}),
                    error: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UnisyncError::NotFound(_)));
    }
}
