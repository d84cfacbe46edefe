//! Affect Pipeline API Server
//!
//! HTTP front end for request-mode stress scoring, plus logging and
//! server bootstrap shared with the command line.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tower_governor::GovernorLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use affect::{AffectError, ModelConfig, Models, StressAnalyzer};

pub mod error;
pub mod rate_limit;
pub mod routes;
pub mod sessions;
pub mod settings;

use routes::health::ModelStatus;
use sessions::{HistoryRegistry, SessionLimits};
use settings::{LoggingSettings, Settings};

/// Startup and serving failures
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Affect(#[from] AffectError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Rate limit configuration error: {0}")]
    RateLimit(String),

    #[error("Metrics exporter error: {0}")]
    Metrics(String),
}

/// Application state shared across handlers
pub struct AppState {
    pub analyzer: Arc<StressAnalyzer>,
    pub histories: HistoryRegistry,
    pub inference_timeout: Duration,
    /// Held by a blocking inference task until it finishes, even past its timeout
    pub inference_permits: Arc<Semaphore>,
    pub body_limit_bytes: usize,
    pub model_status: ModelStatus,
    /// None when no global recorder was installed (tests)
    pub prometheus: Option<PrometheusHandle>,
    pub version: String,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(settings: &Settings, models: Models, prometheus: Option<PrometheusHandle>) -> Self {
        Self {
            analyzer: Arc::new(StressAnalyzer::new(settings.pipeline.clone(), models)),
            histories: HistoryRegistry::new(
                settings.server.history_scope,
                settings.pipeline.stress.clone(),
                SessionLimits {
                    max_sessions: settings.server.max_sessions,
                    idle_ttl: settings.session_ttl(),
                },
            ),
            inference_timeout: settings.inference_timeout(),
            inference_permits: Arc::new(Semaphore::new(settings.server.max_concurrent_inference)),
            body_limit_bytes: settings.server.body_limit_bytes,
            model_status: model_status(&settings.pipeline.models),
            prometheus,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
        }
    }
}

fn model_status(config: &ModelConfig) -> ModelStatus {
    let backend = |path: &Option<String>| if path.is_some() { "onnx" } else { "mock" };
    ModelStatus {
        face_detector: backend(&config.face_model_path),
        landmark_predictor: backend(&config.landmark_model_path),
        emotion_classifier: backend(&config.emotion_model_path),
    }
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/process_image", post(routes::process_image::process_image))
        .route("/api/v1/health", get(routes::health::health))
        .route("/metrics", get(routes::health::metrics))
        .layer(DefaultBodyLimit::max(state.body_limit_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Initialize logging.
///
/// `RUST_LOG` takes precedence over the configured level. Output goes to
/// stderr so `watch` can stream JSON lines on stdout.
pub fn init_logging(settings: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let result = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(e) = result {
        eprintln!("Logging already initialised: {}", e);
    }
}

/// Install the global Prometheus recorder
pub fn install_metrics() -> Result<PrometheusHandle, ServerError> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))
}

/// Load models once, failing fast when they are unavailable
pub fn load_models(settings: &Settings) -> Result<Models, ServerError> {
    settings.pipeline.validate()?;
    let models = Models::load(&settings.pipeline.models)?;
    info!("Models loaded");
    Ok(models)
}

/// Run the server until ctrl-c
pub async fn run_server(settings: Settings, models: Models) -> Result<(), ServerError> {
    let prometheus = install_metrics()?;
    let state = Arc::new(AppState::new(&settings, models, Some(prometheus)));

    let mut app = create_router(state);
    if settings.rate_limit.enabled {
        let governor = rate_limit::create_governor_config(&settings.rate_limit)?;
        info!(
            "Rate limiting: burst {}, one request per {}s",
            settings.rate_limit.burst_size, settings.rate_limit.per_second
        );
        app = app.layer(GovernorLayer { config: governor });
    }

    info!("Starting API server on {}", settings.server.addr);

    let listener = tokio::net::TcpListener::bind(&settings.server.addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on ctrl-c
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::{HistoryScope, SESSION_HEADER};
    use affect::{FaceBbox, MockEmotionClassifier, MockFaceDetector, MockLandmarkPredictor};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use image::RgbImage;
    use serde_json::Value;
    use tower::ServiceExt;

    const BOUNDARY: &str = "affect-test-boundary";

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([100, 100, 100]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    fn multipart_body(field: &str, bytes: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"face.png\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload(field: &str, bytes: &[u8], session: Option<&str>) -> Request<Body> {
        let mut request = Request::builder()
            .method("POST")
            .uri("/process_image")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            );
        if let Some(session) = session {
            request = request.header(SESSION_HEADER, session);
        }
        request.body(Body::from(multipart_body(field, bytes))).unwrap()
    }

    fn face(width: f32) -> FaceBbox {
        FaceBbox {
            x: 10.0,
            y: 10.0,
            width,
            height: width,
            confidence: 0.9,
        }
    }

    fn test_app(faces: Vec<FaceBbox>, scope: HistoryScope) -> (Router, Arc<AppState>) {
        let mut settings = Settings::default();
        settings.server.history_scope = scope;
        app_with(faces, settings)
    }

    fn app_with(faces: Vec<FaceBbox>, settings: Settings) -> (Router, Arc<AppState>) {
        let models = Models {
            face_detector: Arc::new(MockFaceDetector::fixed(faces)),
            landmark_predictor: Arc::new(MockLandmarkPredictor::default()),
            emotion_classifier: Arc::new(MockEmotionClassifier::default()),
        };
        let state = Arc::new(AppState::new(&settings, models, None));
        (create_router(state.clone()), state)
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = test_app(vec![face(100.0)], HistoryScope::Global);
        let response = app
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["models"]["face_detector"], "mock");
        assert_eq!(body["history"]["scope"], "global");
    }

    #[tokio::test]
    async fn test_missing_image_field() {
        let (app, _) = test_app(vec![face(100.0)], HistoryScope::Global);
        let response = app.oneshot(upload("photo", &png(64, 64), None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("image"));
    }

    #[tokio::test]
    async fn test_malformed_image() {
        let (app, _) = test_app(vec![face(100.0)], HistoryScope::Global);
        let response = app.oneshot(upload("image", b"not a png", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_tall_narrow_upload_is_a_client_error() {
        let (app, state) = test_app(vec![face(100.0)], HistoryScope::Global);
        let response = app.oneshot(upload("image", &png(2, 2000), None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("too large"));
        assert_eq!(state.histories.stats().await.observations, 0);
    }

    #[tokio::test]
    async fn test_saturated_inference_pool_times_out() {
        let mut settings = Settings::default();
        settings.server.inference_timeout_ms = 50;
        let (app, state) = app_with(vec![face(100.0)], settings);
        let held = state.inference_permits.clone().acquire_many_owned(4).await.unwrap();

        let response = app.clone().oneshot(upload("image", &png(64, 64), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

        drop(held);
        let response = app.oneshot(upload("image", &png(64, 64), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_no_face_sentinel() {
        let (app, state) = test_app(Vec::new(), HistoryScope::Global);
        let response = app.oneshot(upload("image", &png(64, 64), None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["stress_level"], "0");
        assert_eq!(body["stress_label"], "Cannot identify face");
        assert_eq!(state.histories.stats().await.observations, 0);
    }

    #[tokio::test]
    async fn test_scores_accumulate_in_global_history() {
        let (app, state) = test_app(vec![face(100.0)], HistoryScope::Global);

        let response = app.clone().oneshot(upload("image", &png(500, 400), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let first = json_body(response).await;
        // Single observation has no range
        assert_eq!(first["stress_label"], "Undetermined");
        assert_eq!(first["emotion_label"], "not stressed");
        assert_eq!(first["faces"].as_array().unwrap().len(), 1);

        app.oneshot(upload("image", &png(500, 400), None)).await.unwrap();
        assert_eq!(state.histories.stats().await.observations, 2);
    }

    #[tokio::test]
    async fn test_per_session_histories_are_isolated() {
        let (app, state) = test_app(vec![face(100.0)], HistoryScope::PerSession);

        for session in ["a", "a", "b"] {
            let response = app
                .clone()
                .oneshot(upload("image", &png(500, 400), Some(session)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let stats = state.histories.stats().await;
        assert_eq!(stats.sessions, 2);
        assert_eq!(stats.observations, 3);

        let mut headers = axum::http::HeaderMap::new();
        headers.insert(SESSION_HEADER, "a".parse().unwrap());
        assert_eq!(state.histories.history_for(&headers).await.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let (app, _) = test_app(Vec::new(), HistoryScope::Global);
        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_load_models_requires_mock_opt_in() {
        let settings = Settings::default();
        assert!(matches!(
            load_models(&settings),
            Err(ServerError::Affect(AffectError::ModelUnavailable(_)))
        ));

        let mut settings = Settings::default();
        settings.pipeline.models.allow_mock = true;
        assert!(load_models(&settings).is_ok());
    }
}
