//! Stress scoring of an uploaded image

use std::sync::Arc;

use affect::{AffectError, StressReport};
use axum::body::Bytes;
use axum::extract::{Multipart, State};
use axum::http::HeaderMap;
use axum::Json;
use tracing::debug;

use crate::error::ApiError;
use crate::AppState;

/// Multipart field carrying the encoded image
pub const IMAGE_FIELD: &str = "image";

/// `POST /process_image`
///
/// Models run on the blocking pool under the configured timeout. A task that
/// outlives its timeout keeps its inference permit until it returns, so
/// abandoned work still counts against the concurrency bound. The history is
/// locked only for the append and score.
pub async fn process_image(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<StressReport>, ApiError> {
    metrics::counter!("affect_requests_total").increment(1);
    let image = read_image_field(&mut multipart).await?;
    debug!("Received {} byte upload", image.len());

    let analyzer = state.analyzer.clone();
    let permits = state.inference_permits.clone();
    let inference = async move {
        let permit = permits
            .acquire_owned()
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            analyzer.observe(&image)
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))
    };
    let observed = match tokio::time::timeout(state.inference_timeout, inference).await {
        Ok(result) => result?,
        Err(_) => return Err(ApiError::Timeout(state.inference_timeout.as_millis() as u64)),
    };

    let report = match observed {
        Ok(observations) => {
            let history = state.histories.history_for(&headers).await;
            let mut history = history.lock().await;
            state.analyzer.score(&observations, &mut history)
        }
        Err(AffectError::NoFaceDetected) => StressReport::no_face(),
        Err(e) => return Err(e.into()),
    };

    Ok(Json(report))
}

async fn read_image_field(multipart: &mut Multipart) -> Result<Bytes, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let bytes = field.bytes().await?;
        if bytes.is_empty() {
            return Err(ApiError::BadRequest(format!("Field '{}' is empty", IMAGE_FIELD)));
        }
        return Ok(bytes);
    }
    Err(ApiError::BadRequest(format!("Missing multipart field '{}'", IMAGE_FIELD)))
}
