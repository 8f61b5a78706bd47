//! Route modules for upserver

pub mod files;
pub mod health;
pub mod upload;

use axum::{http::HeaderValue, routing::get, Router};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::CorsConfig;
use crate::state::AppState;

/// Build the full application router
pub fn router(state: AppState) -> Router {
    let config = state.config();
    let max_chunk_size = usize::try_from(config.upload.max_chunk_size).unwrap_or(usize::MAX);

    let mut app = Router::new()
        .route("/health", get(health::health_check))
        .nest("/upload", upload::router(max_chunk_size))
        .merge(files::router(config.upload.max_file_size))
        .layer(TraceLayer::new_for_http());

    if let Some(cors) = cors_layer(&config.cors) {
        app = app.layer(cors);
    }

    app.with_state(state)
}

/// Build the CORS layer, or `None` when CORS is disabled
fn cors_layer(config: &CorsConfig) -> Option<CorsLayer> {
    if !config.enabled {
        return None;
    }

    let origin = if config.allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    Some(
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(Any),
    )
}
