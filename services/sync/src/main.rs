mod discovery;
mod dispatch;
mod mgmt;
mod orchestrator;
mod unified_api;

use std::sync::Arc;

use anyhow::Context;
use unisync_config::{init_tracing, AppConfig};
use unisync_db::records::pg_repository::PgDestinationRepository;
use unisync_db::sync::pg_repository::PgSyncRepository;
use unisync_vdk::ProviderRegistry;

use crate::dispatch::DispatchSettings;
use crate::mgmt::{MgmtClient, MgmtClientConfig};
use crate::orchestrator::{OrchestratorSettings, SyncOrchestrator};
use crate::unified_api::{UnifiedApiConfig, UnifiedApiProvider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load config")?;
    init_tracing(&config.log_level, config.log_format);

    tracing::info!(
        service = "unisync-sync",
        interval_secs = config.sync_interval_secs,
        max_concurrent_syncs = config.max_concurrent_syncs,
        stream_concurrency = config.stream_concurrency,
        run_once = config.run_once,
        "starting"
    );

    let pool = unisync_db::create_pool(&config.database_url)
        .await
        .context("failed to connect to database")?;
    unisync_db::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    let unified = UnifiedApiProvider::new(UnifiedApiConfig::from_app_config(&config))
        .context("failed to create unified api client")?;
    let registry = ProviderRegistry::new()
        .with_fallback(Arc::new(unified))
        .context("failed to build provider registry")?;

    let sync_repo = PgSyncRepository::new(pool.clone());
    let orchestrator = SyncOrchestrator::new(
        Arc::new(registry),
        sync_repo.clone(),
        sync_repo,
        PgDestinationRepository::new(pool),
        OrchestratorSettings::from_app_config(&config),
    );

    let mgmt = MgmtClient::new(MgmtClientConfig::from_app_config(&config))
        .context("failed to create management api client")?;

    dispatch::run(
        Arc::new(mgmt),
        Arc::new(orchestrator),
        DispatchSettings::from_app_config(&config),
        async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        },
    )
    .await;

    tracing::info!("sync service finished");
    Ok(())
}
