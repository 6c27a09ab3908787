//! Health check handler

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use log::warn;
use std::sync::Arc;

use crate::core::shared::state::AppState;
use crate::schema_sync::catalog;

pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let backend_ok = match state.store.probe_table(catalog::USERS).await {
        Ok(_) => true,
        Err(e) => {
            warn!("Health check could not reach the backend: {}", e);
            false
        }
    };

    let status = if backend_ok { "healthy" } else { "degraded" };
    let code = if backend_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(serde_json::json!({
            "status": status,
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "backend": backend_ok
        })),
    )
}
