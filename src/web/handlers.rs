// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::error;

use super::WebState;
use crate::core::AppStatus;
use crate::db::{DatabaseStats, MaintenanceAlert, Reading};

const DASHBOARD_HTML: &str = include_str!("dashboard.html");

/// JSON error body with an HTTP status
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        error!("API request failed: {:#}", e);
        Self::Internal(format!("{:#}", e))
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ResolvedParams {
    pub resolved: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DaysParams {
    pub days: Option<u32>,
}

/// GET /
pub async fn index(State(state): State<WebState>) -> Html<String> {
    Html(DASHBOARD_HTML.replace("{{PUSH_PORT}}", &state.push_port.to_string()))
}

/// GET /api/status
pub async fn status(State(state): State<WebState>) -> Json<AppStatus> {
    Json(state.app.status().await)
}

/// GET /api/current-data
pub async fn current_data(State(state): State<WebState>) -> Json<Option<Value>> {
    Json(state.app.current_data_json().await)
}

/// GET /api/recent-data?limit=100
pub async fn recent_data(State(state): State<WebState>, Query(params): Query<LimitParams>) -> ApiResult<Vec<Reading>> {
    Ok(Json(state.app.recent_readings(params.limit.unwrap_or(100)).await?))
}

/// GET /api/maintenance-alerts?resolved=false
pub async fn maintenance_alerts(
    State(state): State<WebState>,
    Query(params): Query<ResolvedParams>,
) -> ApiResult<Vec<MaintenanceAlert>> {
    let resolved = params
        .resolved
        .map(|r| r.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    Ok(Json(state.app.alerts(resolved).await?))
}

/// GET /api/database-stats
pub async fn database_stats(State(state): State<WebState>) -> ApiResult<DatabaseStats> {
    Ok(Json(state.app.database_stats().await?))
}

/// GET /api/export-data?start_date&end_date&format=csv
pub async fn export_data(State(state): State<WebState>, Query(params): Query<ExportParams>) -> ApiResult<Value> {
    let (Some(start), Some(end)) = (params.start_date, params.end_date) else {
        return Err(ApiError::BadRequest("start_date and end_date required".to_string()));
    };
    let format = params.format.unwrap_or_else(|| "csv".to_string());

    match state.app.export_data(&start, &end, &format).await? {
        Some(path) => Ok(Json(json!({ "filepath": path.display().to_string() }))),
        None => Err(ApiError::Internal("Export failed: no data in range".to_string())),
    }
}

/// GET /api/test-notifications
pub async fn test_notifications(State(state): State<WebState>) -> Json<Value> {
    let results: BTreeMap<String, bool> = state.app.test_notifications().await;
    let message = if results.is_empty() {
        "No notification channels enabled".to_string()
    } else {
        let passed = results.values().filter(|ok| **ok).count();
        format!("{}/{} notification channels succeeded", passed, results.len())
    };
    Json(json!({ "message": message, "results": results }))
}

/// GET /api/clear-old-data?days=365
pub async fn clear_old_data(State(state): State<WebState>, Query(params): Query<DaysParams>) -> ApiResult<Value> {
    let deleted = state.app.clear_old_data(params.days.unwrap_or(365)).await?;
    Ok(Json(json!({ "deleted_count": deleted })))
}
