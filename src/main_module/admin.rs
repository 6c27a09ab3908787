//! Operator endpoint that reconciles every catalog table on demand.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use log::{info, warn};
use serde_json::{json, Value};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::core::shared::state::AppState;
use crate::schema_sync::{catalog, manual_script};

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, &'static str)> {
    let Some(expected) = state
        .config
        .server
        .admin_token
        .as_deref()
        .filter(|t| !t.is_empty())
    else {
        return Err((StatusCode::FORBIDDEN, "admin API is disabled"));
    };

    let supplied = headers
        .get(ADMIN_TOKEN_HEADER)
        .map(|v| v.as_bytes())
        .unwrap_or_default();
    if token_matches(supplied, expected) {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token"))
    }
}

fn token_matches(supplied: &[u8], expected: &str) -> bool {
    bool::from(supplied.ct_eq(expected.as_bytes()))
}

pub async fn admin_reconcile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if let Err((code, message)) = authorize(&state, &headers) {
        warn!("Rejected admin reconcile request: {}", message);
        return (code, Json(json!({ "error": message })));
    }

    info!("Admin requested schema reconciliation");
    let reports = state.reconciler.reconcile_all(&catalog::all()).await;
    let success = reports.iter().all(|r| r.is_success());

    (
        StatusCode::OK,
        Json(json!({
            "success": success,
            "reports": reports,
            "manual_sql": manual_script(&reports),
        })),
    )
}
