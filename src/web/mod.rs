// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! HTTP dashboard: one static page plus a JSON API

mod handlers;

use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::core::App;

pub use handlers::ApiError;

/// Shared handler state
#[derive(Clone)]
pub struct WebState {
    pub app: Arc<App>,
    /// Port the page should open its WebSocket on
    pub push_port: u16,
}

/// Build the dashboard router
pub fn router(app: Arc<App>, push_port: u16) -> Router {
    let api = Router::new()
        .route("/status", get(handlers::status))
        .route("/current-data", get(handlers::current_data))
        .route("/recent-data", get(handlers::recent_data))
        .route("/maintenance-alerts", get(handlers::maintenance_alerts))
        .route("/database-stats", get(handlers::database_stats))
        .route("/export-data", get(handlers::export_data))
        .route("/test-notifications", get(handlers::test_notifications))
        .route("/clear-old-data", get(handlers::clear_old_data));

    Router::new()
        .route("/", get(handlers::index))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(WebState { app, push_port })
}
