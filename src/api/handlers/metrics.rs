use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
};

use crate::metrics::MetricsRegistry;

/// Prometheus text exposition format, version 0.0.4
pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Handler for the scrape endpoint
///
/// Renders every collector in the registry, including ones recorded by the
/// application through the global recorder.
pub async fn scrape(State(registry): State<MetricsRegistry>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        registry.render(),
    )
}
