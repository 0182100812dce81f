use std::sync::Arc;

use axum::{
    Router,
    extract::FromRef,
    http::HeaderName,
    middleware,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod propagation;
pub mod proxy;
pub mod publisher;
pub mod repository;

// Module for routing segregation (public, content per version, session, internal).
pub mod routes;
use routes::{content, internal, public, session};

// --- Public Re-exports ---

pub use auth::{AuthenticatorState, BasicAuthenticator, CredentialStore, SessionTokens};
pub use config::AppConfig;
pub use metrics::HttpMetrics;
pub use propagation::Propagator;
pub use publisher::{EventDispatcher, PublisherState};
pub use repository::{DynamoContentRepository, InMemoryRepository, RepositoryState};

/// ApiDoc
///
/// Auto-generated OpenAPI document for the public surface, served at
/// `/api-docs/openapi.json`. Content paths are documented once with a `{version}`
/// segment: `v1` is guarded by Basic credentials, `v2` by the session cookie.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_content, handlers::get_content, handlers::create_content,
        handlers::update_content, handlers::delete_content, handlers::login,
        handlers::refresh, handlers::logout, handlers::greeting, proxy::proxy
    ),
    components(
        schemas(
            models::Content, models::CreateContentRequest, models::UpdateContentRequest,
            models::Credentials, models::ErrorBody,
        )
    ),
    tags(
        (name = "content-api", description = "Content CRUD API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single, cheaply cloneable container for every collaborator a request may need.
/// Tests build their own instance instead of mutating shared handles.
#[derive(Clone)]
pub struct AppState {
    /// Persistence layer (in-memory or DynamoDB).
    pub repo: RepositoryState,
    /// Post-commit event dispatch.
    pub events: EventDispatcher,
    /// Scheme B token issuer and verifier.
    pub sessions: Arc<SessionTokens>,
    /// Configured users, shared by both schemes and by `/login`.
    pub credentials: CredentialStore,
    pub config: AppConfig,
    pub metrics: HttpMetrics,
    /// W3C trace-context codec for inbound, response and outbound headers.
    pub propagator: Propagator,
    /// Outbound client for the proxy route.
    pub http: reqwest::Client,
}

impl AppState {
    /// new
    ///
    /// Derives the auth collaborators and the propagator from `config`.
    pub fn new(
        config: AppConfig,
        repo: RepositoryState,
        events: EventDispatcher,
        metrics: HttpMetrics,
    ) -> Self {
        Self {
            sessions: Arc::new(SessionTokens::new(&config.jwt_secret, config.session_ttl)),
            credentials: CredentialStore::new(config.users.clone()),
            propagator: Propagator::new(&config.service_name),
            http: reqwest::Client::new(),
            repo,
            events,
            config,
            metrics,
        }
    }

    /// The Scheme A authenticator guarding `/api/v1`.
    pub fn basic_authenticator(&self) -> AuthenticatorState {
        Arc::new(BasicAuthenticator::new(
            self.credentials.clone(),
            self.config.auth_realm.clone(),
        ))
    }

    /// The Scheme B authenticator guarding `/api/v2`.
    pub fn session_authenticator(&self) -> AuthenticatorState {
        self.sessions.clone()
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

impl FromRef<AppState> for HttpMetrics {
    fn from_ref(app_state: &AppState) -> HttpMetrics {
        app_state.metrics.clone()
    }
}

impl FromRef<AppState> for Propagator {
    fn from_ref(app_state: &AppState) -> Propagator {
        app_state.propagator.clone()
    }
}

/// create_router
///
/// Assembles the API router. Middleware order, outermost first:
/// metrics, CORS, request id + access log, trace propagation, then the per-version
/// authenticator (route layer) and the handler.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    // Header name constant for Request Correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    let basic = state.basic_authenticator();
    let sessions = state.session_authenticator();

    // 2. Base Router Assembly
    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        // Scheme A: every request carries Basic credentials.
        .nest("/api/v1", content::content_routes(basic))
        // Scheme B: cookie-borne session token plus its lifecycle endpoints.
        .nest(
            "/api/v2",
            content::content_routes(sessions.clone()).merge(session::session_routes(sessions)),
        )
        // Read-only files; unknown paths under the prefix answer 404.
        .nest_service("/static", ServeDir::new(&state.config.static_dir))
        .fallback(handlers::not_found)
        .layer(middleware::from_fn_with_state(
            state.propagator.clone(),
            propagation::trace_requests,
        ))
        .with_state(state.clone());

    // 3. Observability and Correlation Layers
    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
        // 4. Metrics wrap everything so rejected and failed requests are counted too.
        .layer(middleware::from_fn_with_state(
            state.metrics,
            metrics::track_metrics,
        ))
}

/// internal_router
///
/// Router for the metrics port: `/metrics`, `/healthz`, `/readyz`.
pub fn internal_router(metrics: HttpMetrics) -> Router {
    internal::internal_routes(metrics)
}

/// trace_span_logger
///
/// Access-log span carrying the generated `x-request-id`, so every log line of one
/// request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        target: propagation::ACCESS_LOG_TARGET,
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
