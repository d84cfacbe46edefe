//! Health and metrics endpoints

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::sessions::HistoryStats;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub models: ModelStatus,
    pub history: HistoryStats,
}

/// Backend of each collaborator model
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub face_detector: &'static str,
    pub landmark_predictor: &'static str,
    pub emotion_classifier: &'static str,
}

/// `GET /api/v1/health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        models: state.model_status.clone(),
        history: state.histories.stats().await,
    })
}

/// `GET /metrics`, Prometheus text format
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
