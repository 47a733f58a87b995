use axum::extract::FromRef;

use crate::background_jobs::SchedulerHandle;
use crate::cleanup::{CleanupCoordinator, StatusService};
use crate::status_store::StatusStore;
use std::sync::Arc;
use std::time::Instant;

use super::{ActionTokens, ServerConfig};

pub type GuardedCoordinator = Arc<CleanupCoordinator>;
pub type GuardedStatusService = Arc<StatusService>;
pub type GuardedStatusStore = Arc<dyn StatusStore>;
pub type GuardedActionTokens = Arc<ActionTokens>;
pub type OptionalSchedulerHandle = Option<SchedulerHandle>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub coordinator: GuardedCoordinator,
    pub status_service: GuardedStatusService,
    pub status_store: GuardedStatusStore,
    pub action_tokens: GuardedActionTokens,
    pub scheduler_handle: OptionalSchedulerHandle,
    pub version: String,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        coordinator: GuardedCoordinator,
        status_service: GuardedStatusService,
        status_store: GuardedStatusStore,
        action_tokens: ActionTokens,
        scheduler_handle: OptionalSchedulerHandle,
    ) -> Self {
        ServerState {
            config,
            start_time: Instant::now(),
            coordinator,
            status_service,
            status_store,
            action_tokens: Arc::new(action_tokens),
            scheduler_handle,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedCoordinator {
    fn from_ref(input: &ServerState) -> Self {
        input.coordinator.clone()
    }
}

impl FromRef<ServerState> for GuardedStatusService {
    fn from_ref(input: &ServerState) -> Self {
        input.status_service.clone()
    }
}

impl FromRef<ServerState> for GuardedStatusStore {
    fn from_ref(input: &ServerState) -> Self {
        input.status_store.clone()
    }
}

impl FromRef<ServerState> for GuardedActionTokens {
    fn from_ref(input: &ServerState) -> Self {
        input.action_tokens.clone()
    }
}

impl FromRef<ServerState> for OptionalSchedulerHandle {
    fn from_ref(input: &ServerState) -> Self {
        input.scheduler_handle.clone()
    }
}
