//! HTTP and WebSocket surface.
//!
//! `GET /ws` carries live connections; the `/api` routes are the write
//! boundary; `/healthz` reports the change notifier state.

mod api;
mod ws;

use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::warn;

use telewatch_core::Pipeline;

pub use api::ApiError;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }
}

/// Create the Axum router with all routes.
///
/// `cors_origin` restricts browser origins; `None` allows any.
pub fn create_router(state: AppState, cors_origin: Option<&str>) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/healthz", get(api::healthz_handler))
        .route("/api/readings", post(api::create_reading))
        .route("/api/alarm-records", post(api::create_alarm_record))
        .route(
            "/api/alarm-settings",
            get(api::list_alarm_settings).put(api::replace_alarm_settings),
        )
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .layer(cors_layer(cors_origin))
        .with_state(state)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match origin.map(HeaderValue::from_str) {
        None => layer.allow_origin(Any),
        Some(Ok(value)) => layer.allow_origin(value),
        Some(Err(e)) => {
            warn!(error = %e, "invalid server.cors_origin, allowing any origin");
            layer.allow_origin(Any)
        }
    }
}
