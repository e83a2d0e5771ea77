use std::sync::Arc;

use crate::services::{orchestrator::BatchOrchestrator, sweeper::RetentionSweeper};
use crate::store::JobStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JobStore>,
    pub orchestrator: Arc<BatchOrchestrator>,
    pub sweeper: Arc<RetentionSweeper>,
}

impl AppState {
    pub fn new(
        store: Arc<JobStore>,
        orchestrator: BatchOrchestrator,
        sweeper: RetentionSweeper,
    ) -> Self {
        Self {
            store,
            orchestrator: Arc::new(orchestrator),
            sweeper: Arc::new(sweeper),
        }
    }
}
