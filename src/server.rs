//! HTTP surface: state wiring, router and server lifecycle.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::Semaphore;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::commands::{chat, sessions};
use crate::config::{load_persona, AppConfig, ConfigError, PipelineConfig};
use crate::doc_processor::{DocumentExtractor, TextExtractor};
use crate::llm::http_client;
use crate::pipeline::{AnswerPipeline, StageModels};
use crate::session::{SessionError, SessionStore};
use crate::storage::{self, BlobStore};

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Cannot open transcript store: {0}")]
    Sessions(#[from] SessionError),
    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a request handler needs. Cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BlobStore>,
    pub extractor: Arc<dyn TextExtractor>,
    pub sessions: Arc<SessionStore>,
    pub pipeline: Arc<AnswerPipeline>,
    /// Caps exchanges in flight; excess requests queue on a permit.
    pub limiter: Arc<Semaphore>,
    pub settings: Arc<PipelineConfig>,
    pub exchange_timeout: Duration,
}

impl AppState {
    pub fn new(
        store: Arc<dyn BlobStore>,
        extractor: Arc<dyn TextExtractor>,
        sessions: SessionStore,
        pipeline: AnswerPipeline,
        settings: PipelineConfig,
    ) -> Self {
        Self {
            store,
            extractor,
            sessions: Arc::new(sessions),
            pipeline: Arc::new(pipeline),
            limiter: Arc::new(Semaphore::new(settings.max_concurrent_exchanges.max(1))),
            exchange_timeout: Duration::from_secs(settings.exchange_timeout_secs),
            settings: Arc::new(settings),
        }
    }
}

/// Wire the production state from configuration.
pub async fn build_state(config: &AppConfig) -> Result<AppState, ServeError> {
    let http = http_client(&config.llm)?;
    let store = storage::from_config(&config.storage, http.clone())?;
    let sessions = SessionStore::open(&config.memory_dir).await?;
    let persona = load_persona(config.persona_path.as_deref())?;
    if persona.is_some() {
        tracing::info!("persona loaded");
    }
    let models = StageModels::from_config(&config.models, &config.llm, &http)?;
    let pipeline = AnswerPipeline::new(models, &config.pipeline, persona);
    tracing::info!(gates = ?pipeline.gate_names(), "pipeline ready");

    Ok(AppState::new(
        store,
        Arc::new(DocumentExtractor),
        sessions,
        pipeline,
        config.pipeline.clone(),
    ))
}

pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(sessions::root))
        .route("/health", get(sessions::health))
        .route("/chat2", post(chat::send))
        .route("/chat", post(chat::send))
        .route("/sessions", get(sessions::list))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// `*` opens the API to any origin without credentials; an explicit list
/// allows credentials and mirrors the requested methods and headers.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
}

pub async fn serve(config: AppConfig) -> Result<(), ServeError> {
    let state = build_state(&config).await?;
    let app = router(state, cors_layer(&config.server.cors_origins));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "Docent API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Docent API stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use tower::ServiceExt;

    fn cors_app(cors: CorsLayer) -> Router {
        Router::new()
            .route("/health", get(sessions::health))
            .layer(cors)
    }

    fn preflight(origin: &str) -> Request<Body> {
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/health")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_wildcard_origin_has_no_credentials() {
        let app = cors_app(cors_layer(&["*".to_string()]));
        let response = app.oneshot(preflight("https://any.example")).await.unwrap();
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(headers
            .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
            .is_none());
    }

    #[tokio::test]
    async fn test_listed_origin_gets_credentials_and_mirrored_headers() {
        let app = cors_app(cors_layer(&["https://app.example".to_string()]));
        let response = app.oneshot(preflight("https://app.example")).await.unwrap();
        let headers = response.headers();
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://app.example"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "content-type");
    }

    #[tokio::test]
    async fn test_unlisted_origin_is_not_echoed() {
        let app = cors_app(cors_layer(&["https://app.example".to_string()]));
        let response = app.oneshot(preflight("https://evil.example")).await.unwrap();
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }
}
