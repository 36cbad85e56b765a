//! HTTP surface.
//!
//! Every request to the telemetry path runs one collect cycle and renders the
//! result. The other routes never touch the admin interface.

use std::sync::Arc;

use axum::{Json, Router};
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use tower_http::compression::CompressionLayer;
use tracing::error;

use crate::exporter::Exporter;
use crate::exposition::{self, CONTENT_TYPE};
use crate::registry::MetricDescriptor;

#[derive(Clone)]
struct WebState {
    exporter: Arc<Exporter>,
    telemetry_path: Arc<str>,
}

/// Routes served besides the telemetry path.
pub const HEALTH_PATH: &str = "/api/v1/health";
pub const DESCRIPTORS_PATH: &str = "/api/v1/descriptors";

/// Error type for router construction.
#[derive(Debug, Clone, PartialEq)]
pub enum WebError {
    /// Telemetry path does not start with `/`.
    InvalidTelemetryPath(String),
    /// Telemetry path collides with a built-in route.
    ReservedTelemetryPath(String),
}

impl std::fmt::Display for WebError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebError::InvalidTelemetryPath(path) => {
                write!(f, "telemetry path must start with '/': {}", path)
            }
            WebError::ReservedTelemetryPath(path) => {
                write!(f, "telemetry path {} is already used by a built-in route", path)
            }
        }
    }
}

impl std::error::Error for WebError {}

/// Builds the router, serving metrics under `telemetry_path`.
pub fn router(exporter: Arc<Exporter>, telemetry_path: &str) -> Result<Router, WebError> {
    if !telemetry_path.starts_with('/') {
        return Err(WebError::InvalidTelemetryPath(telemetry_path.to_string()));
    }
    if telemetry_path == HEALTH_PATH || telemetry_path == DESCRIPTORS_PATH {
        return Err(WebError::ReservedTelemetryPath(telemetry_path.to_string()));
    }

    let state = WebState {
        exporter,
        telemetry_path: Arc::from(telemetry_path),
    };

    let mut app = Router::new()
        .route(telemetry_path, get(handle_metrics))
        .route(HEALTH_PATH, get(handle_health))
        .route(DESCRIPTORS_PATH, get(handle_descriptors));
    if telemetry_path != "/" {
        app = app.route("/", get(handle_landing));
    }

    Ok(app.with_state(state).layer(CompressionLayer::new()))
}

async fn handle_metrics(State(state): State<WebState>) -> Result<Response, StatusCode> {
    let collection = state.exporter.collect().await;
    let mut samples = collection.samples;
    samples.extend(collection.self_samples);

    let body = exposition::render(&samples).map_err(|e| {
        error!(error = %e, "failed to render metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response())
}

async fn handle_descriptors(State(state): State<WebState>) -> Json<Vec<MetricDescriptor>> {
    Json(
        state
            .exporter
            .describe()
            .iter()
            .map(|d| d.as_ref().clone())
            .collect(),
    )
}

async fn handle_health() -> &'static str {
    "ok"
}

async fn handle_landing(State(state): State<WebState>) -> Html<String> {
    Html(format!(
        "<html>\n<head><title>ProxySQL Exporter</title></head>\n<body>\n\
         <h1>ProxySQL Exporter</h1>\n<p><a href=\"{}\">Metrics</a></p>\n</body>\n</html>\n",
        state.telemetry_path
    ))
}
