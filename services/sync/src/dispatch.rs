use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use unisync_common::types::SyncTrigger;
use unisync_config::AppConfig;
use unisync_db::records::repositories::DestinationRepository;
use unisync_db::sync::repositories::{SyncRunRepository, SyncStateRepository};

use crate::discovery::discover_triggers;
use crate::mgmt::ManagementApi;
use crate::orchestrator::SyncOrchestrator;

const CHANNEL_CAPACITY: usize = 256;

/// Consumes triggers. Failures are the handler's to log.
#[async_trait]
pub trait TriggerHandler: Send + Sync + 'static {
    async fn handle(&self, trigger: SyncTrigger);
}

#[async_trait]
impl<S, R, D> TriggerHandler for SyncOrchestrator<S, R, D>
where
    S: SyncStateRepository + 'static,
    R: SyncRunRepository + 'static,
    D: DestinationRepository + 'static,
{
    async fn handle(&self, trigger: SyncTrigger) {
        match self.run(&trigger).await {
            Ok(report) => tracing::debug!(
                run_id = %report.run_id,
                status = %report.status,
                final_state = %report.final_state,
                metrics = %report.metrics,
                error = ?report.error,
                "sync run report"
            ),
            Err(e) => tracing::error!(
                customer_id = %trigger.customer_id,
                provider_name = %trigger.provider_name,
                error = %e,
                alert = true,
                "sync run could not be recorded"
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub interval: Duration,
    pub max_concurrent: usize,
    /// One discovery cycle, then drain and return.
    pub run_once: bool,
}

impl DispatchSettings {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.sync_interval_secs.max(1)),
            max_concurrent: config.max_concurrent_syncs.max(1),
            run_once: config.run_once,
        }
    }
}

/// Run discovery on a timer and hand every trigger to `handler` until
/// `shutdown` resolves, or after one drained cycle with `run_once`.
pub async fn run(
    api: Arc<dyn ManagementApi>,
    handler: Arc<dyn TriggerHandler>,
    settings: DispatchSettings,
    shutdown: impl Future<Output = ()>,
) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let scheduler = tokio::spawn(schedule(api, tx, settings.interval, settings.run_once));

    tokio::select! {
        _ = dispatch(rx, handler, settings.max_concurrent) => {
            tracing::info!("dispatcher drained");
        }
        _ = shutdown => {
            tracing::info!("shutdown requested, abandoning in-flight runs");
        }
    }
    scheduler.abort();
}

async fn schedule(
    api: Arc<dyn ManagementApi>,
    tx: mpsc::Sender<SyncTrigger>,
    interval: Duration,
    run_once: bool,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        match discover_triggers(api.as_ref()).await {
            Ok(triggers) => {
                for trigger in triggers {
                    if tx.send(trigger).await.is_err() {
                        tracing::debug!("dispatcher gone, stopping scheduler");
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "schedule discovery failed");
            }
        }
        if run_once {
            return;
        }
    }
}

async fn dispatch(
    mut rx: mpsc::Receiver<SyncTrigger>,
    handler: Arc<dyn TriggerHandler>,
    max_concurrent: usize,
) {
    let permits = Arc::new(Semaphore::new(max_concurrent));
    let mut running = JoinSet::new();

    while let Some(trigger) = rx.recv().await {
        let permit = match Arc::clone(&permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let handler = Arc::clone(&handler);
        running.spawn(async move {
            handler.handle(trigger).await;
            drop(permit);
        });
        while let Some(done) = running.try_join_next() {
            log_join(done);
        }
    }

    while let Some(done) = running.join_next().await {
        log_join(done);
    }
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, alert = true, "sync task panicked");
    }
}
