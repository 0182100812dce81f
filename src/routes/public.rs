use crate::{AppState, handlers, proxy};
use axum::{Router, routing::get};

/// Public Router Module
///
/// Unauthenticated endpoints.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /
        // Configured greeting plus the host name, handy for checking which replica answered.
        .route("/", get(handlers::greeting))
        // GET /proxy
        // Forwards to the configured upstream inside the caller's trace.
        .route("/proxy", get(proxy::proxy))
}
