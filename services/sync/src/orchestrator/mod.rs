//! Drives one connection's sync run.
//!
//! A run loads the connection's state, opens a `sync_run` record, pages every
//! configured stream to exhaustion and always finalizes the record. Within a
//! stream, page N+1 is only fetched once page N's cursor is persisted.

pub mod errors;
pub mod metrics;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde_json::{json, Map, Value};
use unisync_common::error::{ErrorInfo, ErrorType, UnisyncError, UnisyncResult};
use unisync_common::types::{SyncMode, SyncTrigger};
use unisync_config::{AppConfig, ErrorRetention};
use unisync_db::records::models::{DestinationTable, UnifiedRecord};
use unisync_db::records::repositories::DestinationRepository;
use unisync_db::sync::models::RunCompletion;
use unisync_db::sync::repositories::{SyncRunRepository, SyncStateRepository};
use unisync_vdk::{ConnectionRef, PageRequest, ProviderRegistry, StreamHandler, UnifiedItem};
use uuid::Uuid;

use errors::{classify, log_classified, ErrorLog, StreamError};
use metrics::{RunMetrics, StreamMetrics};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Written to every destination row.
    pub application_id: String,
    /// Streams of one run processed at once; 1 is sequential.
    pub stream_concurrency: usize,
    pub error_retention: ErrorRetention,
    /// `None` lets each provider choose.
    pub page_size: Option<u32>,
}

impl OrchestratorSettings {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            application_id: config.application_id.clone(),
            stream_concurrency: config.stream_concurrency.max(1),
            error_retention: config.error_retention,
            page_size: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed(ErrorType),
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => f.write_str("SUCCESS"),
            RunStatus::Failed(error_type) => write!(f, "{error_type}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub final_state: Value,
    pub metrics: Value,
    pub error: Option<ErrorInfo>,
}

/// Shared by every stream of one run.
struct RunContext<'a> {
    run_id: Uuid,
    trigger: &'a SyncTrigger,
    connection: ConnectionRef,
    /// Set once a stream hits a user error; remaining work is skipped.
    aborted: AtomicBool,
}

#[derive(Debug)]
struct StreamOutcome {
    stream: String,
    /// `None` when the stream was skipped before it started.
    metrics: Option<StreamMetrics>,
    /// Cursor of the last persisted page, if any page was persisted.
    committed: Option<Option<String>>,
    error: Option<ErrorInfo>,
}

impl StreamOutcome {
    fn skipped(stream: &str) -> Self {
        Self {
            stream: stream.to_string(),
            metrics: None,
            committed: None,
            error: None,
        }
    }
}

pub struct SyncOrchestrator<S, R, D> {
    registry: Arc<ProviderRegistry>,
    state_repo: S,
    run_repo: R,
    destination: D,
    settings: OrchestratorSettings,
}

impl<S, R, D> SyncOrchestrator<S, R, D>
where
    S: SyncStateRepository,
    R: SyncRunRepository,
    D: DestinationRepository,
{
    pub fn new(
        registry: Arc<ProviderRegistry>,
        state_repo: S,
        run_repo: R,
        destination: D,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            state_repo,
            run_repo,
            destination,
            settings,
        }
    }

    /// Execute one trigger. Errors are only returned when the run record
    /// could not be opened or finalized; stream failures end up in the
    /// report and in `sync_run`.
    pub async fn run(&self, trigger: &SyncTrigger) -> UnisyncResult<RunReport> {
        tracing::info!(
            customer_id = %trigger.customer_id,
            provider_name = %trigger.provider_name,
            vertical = %trigger.vertical,
            streams = ?trigger.common_objects,
            sync_mode = ?trigger.sync_mode,
            "sync run starting"
        );

        let state = self
            .state_repo
            .get_or_create(&trigger.customer_id, &trigger.provider_name)
            .await?;
        let input_event = serde_json::to_value(trigger)
            .map_err(|e| UnisyncError::Internal(format!("encode trigger: {e}")))?;
        let run = self.run_repo.start(&input_event, &state.state).await?;

        let ctx = RunContext {
            run_id: run.id,
            trigger,
            connection: ConnectionRef::new(&trigger.customer_id, &trigger.provider_name),
            aborted: AtomicBool::new(false),
        };

        let mut overall_state = match &state.state {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        let mut run_metrics = RunMetrics::new();
        let mut errors = ErrorLog::new(self.settings.error_retention);

        let schema_ready = match &trigger.destination_schema {
            Some(schema) => match self.destination.ensure_schema(schema).await {
                Ok(()) => {
                    tracing::info!(schema = %schema, "ensured destination schema");
                    true
                }
                Err(e) => {
                    let info = classify(&StreamError::from(e));
                    log_classified(
                        &trigger.customer_id,
                        &trigger.provider_name,
                        "destination_schema",
                        &info,
                    );
                    errors.record("destination_schema", info);
                    false
                }
            },
            None => true,
        };

        if schema_ready {
            let stored = state.stream_states();
            let pending: Vec<_> = unique_streams(&trigger.common_objects)
                .into_iter()
                .map(|name| {
                    let cursor = match trigger.sync_mode {
                        SyncMode::Full => None,
                        SyncMode::Incremental => stored.get(&name).and_then(|s| s.cursor.clone()),
                    };
                    self.sync_stream(&ctx, name, cursor)
                })
                .collect();
            let outcomes: Vec<StreamOutcome> = stream::iter(pending)
                .buffered(self.settings.stream_concurrency.max(1))
                .collect()
                .await;

            for outcome in outcomes {
                if let Some(m) = &outcome.metrics {
                    run_metrics.absorb(m);
                }
                if let Some(cursor) = outcome.committed {
                    overall_state.insert(outcome.stream.clone(), json!({ "cursor": cursor }));
                }
                if let Some(info) = outcome.error {
                    errors.record(&outcome.stream, info);
                }
            }
        }

        let completion = RunCompletion {
            final_state: Value::Object(overall_state),
            metrics: run_metrics.to_value(),
            error: errors.terminal(),
        };
        self.run_repo.complete(run.id, &completion).await?;

        let status = match &completion.error {
            Some(info) => RunStatus::Failed(info.error_type),
            None => RunStatus::Success,
        };
        tracing::info!(
            customer_id = %trigger.customer_id,
            provider_name = %trigger.provider_name,
            run_id = %run.id,
            status = %status,
            metrics = %completion.metrics,
            "sync run complete"
        );

        Ok(RunReport {
            run_id: run.id,
            status,
            final_state: completion.final_state,
            metrics: completion.metrics,
            error: completion.error,
        })
    }

    async fn sync_stream(
        &self,
        ctx: &RunContext<'_>,
        stream: String,
        cursor: Option<String>,
    ) -> StreamOutcome {
        if ctx.aborted.load(Ordering::SeqCst) {
            tracing::info!(stream = %stream, "skipping stream after user error");
            return StreamOutcome::skipped(&stream);
        }

        let mut metrics = StreamMetrics::new(&stream, cursor.as_deref());
        let mut committed = None;
        let result = self
            .page_stream(ctx, &stream, cursor, &mut metrics, &mut committed)
            .await;

        let error = match result {
            Ok(()) => None,
            Err(e) => {
                let info = classify(&e);
                log_classified(
                    &ctx.trigger.customer_id,
                    &ctx.trigger.provider_name,
                    &stream,
                    &info,
                );
                if info.error_type.is_fatal() {
                    ctx.aborted.store(true, Ordering::SeqCst);
                }
                Some(info)
            }
        };

        StreamOutcome {
            stream,
            metrics: Some(metrics),
            committed,
            error,
        }
    }

    async fn page_stream(
        &self,
        ctx: &RunContext<'_>,
        stream: &str,
        mut cursor: Option<String>,
        metrics: &mut StreamMetrics,
        committed: &mut Option<Option<String>>,
    ) -> Result<(), StreamError> {
        let trigger = ctx.trigger;
        let provider = match self
            .registry
            .resolve(&trigger.provider_name, trigger.vertical, stream)?
        {
            StreamHandler::Supported(provider) => provider,
            StreamHandler::Unsupported => {
                tracing::warn!(
                    provider_name = %trigger.provider_name,
                    stream,
                    "stream not supported by provider, recording zero pages"
                );
                self.flush_metrics(ctx, metrics).await?;
                return Ok(());
            }
        };

        let table = DestinationTable::new(
            trigger.vertical,
            stream,
            trigger.destination_schema.clone(),
        );
        self.destination.ensure_table(&table).await?;

        loop {
            if ctx.aborted.load(Ordering::SeqCst) {
                tracing::info!(stream, "stopping stream after user error");
                return Ok(());
            }

            let request = PageRequest {
                vertical: trigger.vertical,
                stream: stream.to_string(),
                cursor: cursor.clone(),
                page_size: self.settings.page_size,
            };
            let page = match provider.list_page(&ctx.connection, &request).await {
                Ok(page) => page,
                Err(e) if e.is_not_implemented() => {
                    tracing::warn!(
                        provider_name = %trigger.provider_name,
                        stream,
                        "provider does not implement stream"
                    );
                    self.flush_metrics(ctx, metrics).await?;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            if page.has_next_page && (page.next_cursor.is_none() || page.next_cursor == cursor) {
                return Err(StreamError::StalledCursor { cursor });
            }

            if !page.items.is_empty() {
                let records: Vec<UnifiedRecord> = page
                    .items
                    .iter()
                    .map(|item| self.to_record(trigger, item))
                    .collect();
                self.destination.upsert_records(&table, &records).await?;
            }
            metrics.record_page(page.items.len());

            tracing::info!(
                stream,
                completed_cursor = ?cursor,
                next_cursor = ?page.next_cursor,
                has_next_page = page.has_next_page,
                count = metrics.item_count,
                "sync progress"
            );

            let stream_state = json!({ "cursor": page.next_cursor });
            let mut state_delta = Map::new();
            state_delta.insert(stream.to_string(), stream_state);
            let progress_state = Value::Object(state_delta.clone());
            let metrics_delta = Value::Object(metrics.to_map());
            tokio::try_join!(
                self.state_repo.merge_state(
                    &trigger.customer_id,
                    &trigger.provider_name,
                    &state_delta
                ),
                self.run_repo
                    .record_progress(ctx.run_id, &progress_state, &metrics_delta),
            )?;

            cursor = page.next_cursor;
            *committed = Some(cursor.clone());

            if !page.has_next_page {
                return Ok(());
            }
        }
    }

    async fn flush_metrics(
        &self,
        ctx: &RunContext<'_>,
        metrics: &StreamMetrics,
    ) -> Result<(), StreamError> {
        self.run_repo
            .record_progress(
                ctx.run_id,
                &Value::Object(Map::new()),
                &Value::Object(metrics.to_map()),
            )
            .await?;
        Ok(())
    }

    fn to_record(&self, trigger: &SyncTrigger, item: &UnifiedItem) -> UnifiedRecord {
        UnifiedRecord {
            application_id: self.settings.application_id.clone(),
            customer_id: trigger.customer_id.clone(),
            provider_name: trigger.provider_name.clone(),
            id: item.id.clone(),
            is_deleted: item.is_deleted(),
            last_modified_at: item
                .updated_at()
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|ts| ts.with_timezone(&Utc)),
            raw_data: item.raw_data.clone(),
            unified_data: item.unified_data(),
        }
    }
}

/// Configured order, duplicates dropped.
fn unique_streams(streams: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    streams
        .iter()
        .filter(|s| seen.insert(s.as_str()))
        .cloned()
        .collect()
}
