use axum::Router;
use axum::extract::State;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use tower::ServiceBuilder;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::api;
use crate::state::SharedState;

/// Build the application router with all routes and layers.
pub fn build_router(state: SharedState) -> Router {
    let cors = cors_layer(&state.config.gateway.cors_origins);

    Router::new()
        .route("/health", get(health))
        .route("/test", get(smoke_test))
        .route("/api/status", get(status))
        .route("/chat", post(api::chat))
        .route("/chat/history", get(api::history))
        .route("/openai-test", post(api::openai_test))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

/// Credentials are allowed, so methods and headers are mirrored instead of
/// using the `*` wildcard.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid CORS origin: {origin}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

async fn health() -> &'static str {
    "ok"
}

async fn smoke_test() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "message": "API is running" }))
}

async fn status(State(state): State<SharedState>) -> axum::Json<serde_json::Value> {
    let orchestrator = &state.orchestrator;
    axum::Json(serde_json::json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "assistant_id": orchestrator.default_assistant(),
        "threads": orchestrator.thread_count(),
        "tools": orchestrator.tools().definitions(),
    }))
}
