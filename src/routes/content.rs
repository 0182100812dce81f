use crate::{
    AppState,
    auth::{AuthenticatorState, require_auth},
    handlers,
};
use axum::{Router, middleware, routing::get};

/// Content Router Module
///
/// The five CRUD endpoints, independent of any auth scheme. The caller decides which
/// `Authenticator` guards them; `route_layer` means unmatched paths still fall through
/// to the 404 fallback instead of being challenged.
pub fn content_routes(authenticator: AuthenticatorState) -> Router<AppState> {
    Router::new()
        // GET/POST /content
        .route(
            "/content",
            get(handlers::list_content).post(handlers::create_content),
        )
        // GET/PUT/DELETE /content/{id}
        .route(
            "/content/{id}",
            get(handlers::get_content)
                .put(handlers::update_content)
                .delete(handlers::delete_content),
        )
        .route_layer(middleware::from_fn_with_state(authenticator, require_auth))
}
