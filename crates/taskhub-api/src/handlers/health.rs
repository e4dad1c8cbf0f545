//! Health check handler.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use taskhub_core::lifecycle::Stage;

use crate::dto::response::{ApiResponse, HealthResponse};
use crate::state::AppState;

/// GET /health
///
/// 200 while serving with a reachable database, 503 otherwise.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let stage = state.current_stage();

    let (database, db_ok, pool, latency_ms) = match &state.db {
        None => ("not_configured", true, None, None),
        Some(db) => match db.ping().await {
            Ok(latency) => (
                "connected",
                true,
                Some(db.status()),
                Some(latency.as_millis() as u64),
            ),
            Err(e) => {
                tracing::warn!(error = %e, "Readiness check could not reach the job store");
                ("unreachable", false, Some(db.status()), None)
            }
        },
    };

    let serving = stage == Stage::Serving;
    let status = if serving && db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = HealthResponse {
        status: if status == StatusCode::OK {
            "ok".to_string()
        } else {
            stage.to_string()
        },
        stage: stage.to_string(),
        database: database.to_string(),
        database_latency_ms: latency_ms,
        pool,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status, Json(ApiResponse::ok(body)))
}
