//! Application state.

use std::sync::Arc;

use vidup_media::Toolchain;
use vidup_storage::ObjectStore;
use vidup_worker::{Orchestrator, WorkerConfig};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub orchestrator: Orchestrator,
}

impl AppState {
    /// Create new application state around an orchestrator built from its collaborators.
    pub fn new(
        config: ApiConfig,
        worker: WorkerConfig,
        toolchain: Arc<dyn Toolchain>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            config,
            orchestrator: Orchestrator::new(worker, toolchain, store),
        }
    }
}
