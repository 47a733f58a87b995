//! Wiring of stores, cleanup services and the job scheduler.

use crate::background_jobs::jobs::{HousekeepingJob, PendingCleanupRunJob, StaleStockCleanupJob};
use crate::background_jobs::{create_scheduler, JobContext, JobScheduler, SchedulerHandle};
use crate::catalog_store::SqliteCatalogStore;
use crate::cleanup::{CleanupCoordinator, DeletionProcessor, RunLog, StatusService};
use crate::config::AppConfig;
use crate::server::{ActionTokens, ServerConfig, ServerState};
use crate::status_store::SqliteStatusStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct CleanupApp {
    pub catalog_store: Arc<SqliteCatalogStore>,
    pub status_store: Arc<SqliteStatusStore>,
    pub run_log: Arc<RunLog>,
    pub coordinator: Arc<CleanupCoordinator>,
    pub status_service: Arc<StatusService>,
    pub scheduler: JobScheduler,
    pub scheduler_handle: SchedulerHandle,
    pub action_tokens: ActionTokens,
}

impl CleanupApp {
    /// Open the stores, register the jobs and apply the persisted schedule.
    /// The scheduler is returned unstarted.
    pub async fn build(config: &AppConfig, shutdown_token: CancellationToken) -> Result<Self> {
        std::fs::create_dir_all(&config.media_path)
            .with_context(|| format!("Failed to create media directory {:?}", config.media_path))?;

        info!("Opening catalog database at {:?}...", config.catalog_db_path());
        let catalog_store = Arc::new(SqliteCatalogStore::new(
            config.catalog_db_path(),
            &config.media_path,
        )?);

        info!("Opening status database at {:?}...", config.status_db_path());
        let status_store = Arc::new(SqliteStatusStore::new(config.status_db_path())?);

        let run_log = Arc::new(RunLog::new(status_store.clone()));
        let processor = DeletionProcessor::new(
            catalog_store.clone(),
            catalog_store.clone(),
            status_store.clone(),
            run_log.clone(),
        );

        let job_context = JobContext::new(shutdown_token.child_token(), status_store.clone());
        let (mut scheduler, scheduler_handle) =
            create_scheduler(status_store.clone(), shutdown_token, job_context);

        let limits = config.cleanup.limits.clone();
        let coordinator = Arc::new(CleanupCoordinator::new(
            status_store.clone(),
            processor,
            run_log.clone(),
            Arc::new(scheduler_handle.clone()),
            config.cleanup.defaults.clone(),
            limits.clone(),
        ));
        let status_service = Arc::new(StatusService::new(
            status_store.clone(),
            run_log.clone(),
            Arc::new(scheduler_handle.clone()),
            limits.clone(),
        ));

        scheduler
            .register_job(Arc::new(StaleStockCleanupJob::new(coordinator.clone())))
            .await;
        scheduler
            .register_job(Arc::new(PendingCleanupRunJob::new(coordinator.clone())))
            .await;
        scheduler
            .register_job(Arc::new(HousekeepingJob::new(
                run_log.clone(),
                limits.gone_retention_days,
                limits.log_retention_days,
            )))
            .await;

        coordinator
            .apply_schedule()
            .context("Failed to apply cleanup schedule")?;

        let action_tokens =
            ActionTokens::from_config(config.cleanup.action_token_secret.as_deref());

        Ok(Self {
            catalog_store,
            status_store,
            run_log,
            coordinator,
            status_service,
            scheduler,
            scheduler_handle,
            action_tokens,
        })
    }

    pub fn server_state(&self, config: ServerConfig) -> ServerState {
        ServerState::new(
            config,
            self.coordinator.clone(),
            self.status_service.clone(),
            self.status_store.clone(),
            self.action_tokens.clone(),
            Some(self.scheduler_handle.clone()),
        )
    }
}
