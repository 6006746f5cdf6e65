mod models;
mod utils;
mod config;
mod state;
mod storage;
mod processing;
mod handlers;
mod error;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, routing::{get, post}, Router};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::{
    handlers::{health_check, upload_image, PUBLIC_UPLOADS_PATH},
    state::AppState,
    config::Config,
    processing::ImageTransformer,
    storage::init_storage,
};

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("imageuploadservice=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    let storage = init_storage(&config).await?;

    let app_state = AppState {
        storage: Arc::new(storage),
        transformer: ImageTransformer::from_config(&config),
        config: config.clone(),
    };

    let app = app(app_state);

    info!("Server listening on {}", config.server_addr);

    let listener = tokio::net::TcpListener::bind(config.server_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the HTTP surface: the upload endpoint plus static serving of results.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = usize::try_from(state.config.max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    let upload_routes = Router::new()
        .route("/upload", post(upload_image))
        .layer(DefaultBodyLimit::max(body_limit));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", upload_routes)
        .nest_service(PUBLIC_UPLOADS_PATH, ServeDir::new(&state.config.upload_dir))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
