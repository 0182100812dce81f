use crate::{handlers, metrics::HttpMetrics};
use axum::{Router, routing::get};

/// Internal Router Module
///
/// Served on the metrics port only, so scrapes and health checks never go through the API
/// middleware or show up in the request metrics.
pub fn internal_routes(metrics: HttpMetrics) -> Router {
    Router::new()
        .route("/metrics", get(handlers::metrics))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .with_state(metrics)
}
