use crate::{
    AppState,
    auth::{AuthenticatorState, require_auth},
    handlers,
};
use axum::{Router, middleware, routing::post};

/// Session Router Module
///
/// `/login` and `/logout` are open; `/refresh` requires a valid session cookie, which
/// is how the handler receives the `Principal` it renews.
pub fn session_routes(sessions: AuthenticatorState) -> Router<AppState> {
    let renew = Router::new()
        .route("/refresh", post(handlers::refresh))
        .route_layer(middleware::from_fn_with_state(sessions, require_auth));

    Router::new()
        .route("/login", post(handlers::login))
        .route("/logout", post(handlers::logout))
        .merge(renew)
}
