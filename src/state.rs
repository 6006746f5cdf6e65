use std::sync::Arc;

use crate::config::Config;
use crate::processing::ImageTransformer;
use crate::storage::Storage;

/// Central application state shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Where raw uploads are written.
    pub storage: Arc<dyn Storage>,

    /// Produces the `processed_` copy of each stored upload.
    pub transformer: ImageTransformer,

    /// Application configuration loaded from environment variables or `.env`.
    pub config: Config,
}
