//! HTTP surface: router, shared state and the serve loop.
//!
//! | Route                                | Handler                          |
//! |--------------------------------------|----------------------------------|
//! | `GET /`                              | embedded landing page            |
//! | `POST /process/`, `/api/process/`    | [`handlers::process_receipt`]    |
//! | `POST /download/`, `/api/download/`  | [`handlers::download_json`]      |
//! | `GET <media_url>/*`                  | `ServeDir` over the media root   |
//!
//! Any other method on the POST routes answers 405 with the usual
//! `{"error": ...}` body.

pub mod handlers;

use crate::config::ServiceConfig;
use crate::error::ReceiptError;
use crate::process::ReceiptProcessor;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Headroom above `max_upload_size` for multipart boundaries and headers.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// State shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub processor: ReceiptProcessor,
}

impl AppState {
    pub fn new(processor: ReceiptProcessor) -> Self {
        Self { processor }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let config = state.processor.config();
    let body_limit = config.max_upload_size.saturating_add(MULTIPART_OVERHEAD);
    let media = ServeDir::new(state.processor.layout().root());
    let media_url = state.processor.layout().url_prefix().to_string();

    let process = post(handlers::process_receipt).fallback(handlers::method_not_allowed);
    let download = post(handlers::download_json).fallback(handlers::method_not_allowed);

    Router::new()
        .route("/", get(handlers::index))
        .route("/process/", process.clone())
        .route("/api/process/", process)
        .route("/download/", download.clone())
        .route("/api/download/", download)
        .nest_service(&media_url, media)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolve the model from `config` and serve until Ctrl-C.
pub async fn serve(config: ServiceConfig) -> Result<(), ReceiptError> {
    let processor = ReceiptProcessor::from_config(config)?;
    serve_with(processor).await
}

/// Serve an already-built processor until Ctrl-C.
pub async fn serve_with(processor: ReceiptProcessor) -> Result<(), ReceiptError> {
    processor.layout().ensure_dirs()?;
    let addr = processor.config().bind;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ReceiptError::Internal(format!("could not bind {addr}: {e}")))?;
    let local = listener
        .local_addr()
        .map_err(|e| ReceiptError::Internal(e.to_string()))?;

    info!(
        "Serving on http://{} (media root: {})",
        local,
        processor.layout().root().display()
    );

    let app = router(AppState::new(processor));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ReceiptError::Internal(format!("server error: {e}")))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}
