use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod hub;
pub mod models;
pub mod services;
pub mod storage;
pub mod timer;

use services::ChatEngine;
use storage::AttachmentGateway;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ChatEngine>,
    /// `None` when uploads are disabled.
    pub attachments: Option<Arc<dyn AttachmentGateway>>,
}

/// Full HTTP application: health check plus the versioned API.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api::router::create_router(state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
