//! HTTP server initialization and routing

use axum::{
    routing::{get, post},
    Router,
};
use log::{info, warn};
use std::sync::Arc;

use crate::core::shared::state::AppState;
use crate::core::urls::ApiUrls;
use crate::security::create_cors_layer;
use crate::{bookings, profiles, reviews, users};

use super::{admin_reconcile, health_check};

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = create_cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route(ApiUrls::HEALTH, get(health_check))
        .route(ApiUrls::ADMIN_RECONCILE, post(admin_reconcile))
        .with_state(state.clone())
        .merge(profiles::router(state.clone()))
        .merge(bookings::router(state.clone()))
        .merge(reviews::router(state.clone()))
        .merge(users::router(state))
        .layer(cors)
}

pub async fn run_axum_server(app_state: Arc<AppState>) -> std::io::Result<()> {
    let addr = app_state.config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("HTTP API listening on {}", addr);

    axum::serve(listener, build_router(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, stopping HTTP API"),
        Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
    }
}
