use axum::extract::State;
use axum::Json;
use chrono::Utc;

use crate::app_state::AppState;
use crate::services::sweeper::SweepReport;

/// POST /api/v1/cleanup: Run a retention sweep immediately.
pub async fn run_cleanup(State(state): State<AppState>) -> Json<SweepReport> {
    Json(state.sweeper.sweep(Utc::now()).await)
}
