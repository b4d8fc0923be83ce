use crate::{
    config::Config,
    docs::ApiDoc,
    handlers::{diagnostics, doc_presence, health_check, ready_check},
    websocket::websocket_handler,
    AppState,
};
use axum::{http::{HeaderValue, Method}, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Create API routes
pub fn create_api_routes(state: Arc<AppState>) -> Router {
    Router::<Arc<AppState>>::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/v1/diagnostics", get(diagnostics))
        .route("/v1/documents/:doc_id/presence", get(doc_presence))
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    match &config.cors_origins {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .filter_map(|o| match o.parse() {
                    Ok(origin) => Some(origin),
                    Err(_) => {
                        warn!("Ignoring invalid CORS origin {}", o);
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods([Method::GET])
                .allow_headers(Any)
        }
        None if config.is_development() => CorsLayer::permissive(),
        None => CorsLayer::new(),
    }
}

/// The whole relay: API, awareness websocket and Swagger UI
pub fn create_app(state: Arc<AppState>, config: &Config) -> Router {
    let ws_routes = Router::<Arc<AppState>>::new()
        .route("/ws/:doc_id", get(websocket_handler))
        .with_state(state.clone());

    Router::new()
        .nest("/api", create_api_routes(state))
        .merge(ws_routes)
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors_layer(config))
        .layer(TraceLayer::new_for_http())
}
