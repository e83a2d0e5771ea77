use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub storage: ComponentHealth,
    pub converter: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ComponentHealth {
    fn ok(start: std::time::Instant, detail: Option<String>) -> Self {
        Self {
            status: "ok".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            detail,
        }
    }

    fn error(detail: String) -> Self {
        Self {
            status: "error".to_string(),
            latency_ms: None,
            detail: Some(detail),
        }
    }
}

/// GET /health: job storage and rasterizer availability.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    // Storage root must exist and be a directory
    let start = std::time::Instant::now();
    let storage = match tokio::fs::metadata(state.store.root()).await {
        Ok(meta) if meta.is_dir() => ComponentHealth::ok(start, None),
        Ok(_) => ComponentHealth::error("data directory is not a directory".to_string()),
        Err(e) => ComponentHealth::error(e.to_string()),
    };

    let start = std::time::Instant::now();
    let converter = match state.orchestrator.converter().check_available().await {
        Ok(version) => ComponentHealth::ok(start, Some(version)),
        Err(e) => ComponentHealth::error(e.to_string()),
    };

    let all_healthy = storage.status == "ok" && converter.status == "ok";
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks { storage, converter },
    };

    (status_code, Json(response))
}
