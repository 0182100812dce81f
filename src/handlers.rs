use crate::{
    AppState,
    auth::{AuthError, Principal, clear_token_cookie, client_address},
    error::AppError,
    metrics::HttpMetrics,
    models::{Content, CreateContentRequest, Credentials, ErrorBody, UpdateContentRequest},
};
use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{Instrument, Span};

/// Confirmation body returned by `DELETE /content/{id}`.
pub const DELETED_MESSAGE: &str = "The content has been deleted successfully";

// --- Helpers ---

/// store_span
///
/// Child of the request span for a single repository call. It is entered only for
/// the duration of the instrumented future, so it ends on every return path.
fn store_span(operation: &'static str, id: &str) -> Span {
    tracing::info_span!(
        "store",
        otel.name = operation,
        otel.kind = "client",
        content_id = %id,
    )
}

fn json_payload<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::InvalidInput(rejection.body_text()))
}

// --- Content Handlers ---

/// list_content
///
/// [Protected Route] Returns every content record, ascending by id.
#[utoipa::path(
    get,
    path = "/api/{version}/content",
    params(("version" = String, Path, description = "`v1` (basic credentials) or `v2` (session cookie)")),
    responses(
        (status = 200, description = "All content", body = [Content]),
        (status = 500, description = "Store failure", body = ErrorBody)
    )
)]
pub async fn list_content(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Content>>, AppError> {
    let span = store_span("content.list", "*");
    match state.repo.list_content().instrument(span).await {
        Ok(items) => Ok(Json(items)),
        Err(e) => {
            tracing::error!(error = %e, client = %client_address(&headers), "failed to list content");
            Err(e.into())
        }
    }
}

/// get_content
///
/// [Protected Route] Retrieves one record. Unknown ids answer 404 `{"error":"Invalid ID"}`.
#[utoipa::path(
    get,
    path = "/api/{version}/content/{id}",
    params(
        ("version" = String, Path, description = "API version"),
        ("id" = String, Path, description = "Content ID")
    ),
    responses(
        (status = 200, description = "Found", body = Content),
        (status = 404, description = "Unknown id", body = ErrorBody)
    )
)]
pub async fn get_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Content>, AppError> {
    let span = store_span("content.get", &id);
    state
        .repo
        .get_content(&id)
        .instrument(span)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::warn!(content_id = %id, error = %e, client = %client_address(&headers), "content lookup failed");
            e.into()
        })
}

/// create_content
///
/// [Protected Route] Inserts a record if its id is free.
///
/// The event for the new record is handed to the dispatcher only after the store has
/// committed it, and the response never waits for (or reports on) its publication.
#[utoipa::path(
    post,
    path = "/api/{version}/content",
    params(("version" = String, Path, description = "API version")),
    request_body = CreateContentRequest,
    responses(
        (status = 201, description = "Created", body = Content),
        (status = 400, description = "Malformed body", body = ErrorBody),
        (status = 409, description = "Duplicate id", body = ErrorBody)
    )
)]
pub async fn create_content(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateContentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Content>), AppError> {
    let client = client_address(&headers);
    let item = json_payload(payload)
        .inspect_err(|e| tracing::warn!(error = %e, client = %client, "rejected create payload"))?
        .into_content();

    let span = store_span("content.insert", &item.id);
    let created = state
        .repo
        .create_content(item)
        .instrument(span)
        .await
        .inspect_err(|e| tracing::warn!(error = %e, client = %client, "content insert failed"))?;

    state.events.dispatch(created.clone());
    tracing::info!(content_id = %created.id, client = %client, "content created");
    Ok((StatusCode::CREATED, Json(created)))
}

/// update_content
///
/// [Protected Route] Renames an existing record; the path id wins over any id in the body.
#[utoipa::path(
    put,
    path = "/api/{version}/content/{id}",
    params(
        ("version" = String, Path, description = "API version"),
        ("id" = String, Path, description = "Content ID")
    ),
    request_body = UpdateContentRequest,
    responses(
        (status = 200, description = "Updated", body = Content),
        (status = 400, description = "Malformed body", body = ErrorBody),
        (status = 404, description = "Unknown id", body = ErrorBody)
    )
)]
pub async fn update_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<UpdateContentRequest>, JsonRejection>,
) -> Result<Json<Content>, AppError> {
    let client = client_address(&headers);
    let update = json_payload(payload)?;

    let span = store_span("content.update", &id);
    let updated = state
        .repo
        .update_content(&id, &update.name)
        .instrument(span)
        .await
        .inspect_err(|e| tracing::warn!(content_id = %id, error = %e, client = %client, "content update failed"))?;
    Ok(Json(updated))
}

/// delete_content
#[utoipa::path(
    delete,
    path = "/api/{version}/content/{id}",
    params(
        ("version" = String, Path, description = "API version"),
        ("id" = String, Path, description = "Content ID")
    ),
    responses(
        (status = 200, description = "Deleted", body = String),
        (status = 404, description = "Unknown id", body = ErrorBody)
    )
)]
pub async fn delete_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<&'static str>, AppError> {
    let span = store_span("content.delete", &id);
    state
        .repo
        .delete_content(&id)
        .instrument(span)
        .await
        .inspect_err(|e| {
            tracing::warn!(content_id = %id, error = %e, client = %client_address(&headers), "content delete failed")
        })?;
    Ok(Json(DELETED_MESSAGE))
}

// --- Session Handlers ---

/// login
///
/// [Public Route] Exchanges valid credentials for a session cookie.
///
/// A body that is not a credentials object answers 400; wrong credentials answer 401
/// without saying which field was wrong.
#[utoipa::path(
    post,
    path = "/api/v2/login",
    request_body = Credentials,
    responses(
        (status = 200, description = "Token issued, cookie set", body = String),
        (status = 400, description = "Malformed body", body = ErrorBody),
        (status = 401, description = "Bad credentials", body = ErrorBody)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Response, AppError> {
    let client = client_address(&headers);
    let credentials = json_payload(payload)?;

    if !state
        .credentials
        .verify(&credentials.username, &credentials.password)
    {
        tracing::warn!(client = %client, "login rejected");
        return Err(AppError::Unauthorized("Unauthorized".to_string()));
    }

    let issued = state.sessions.issue(&credentials.username).map_err(|_| {
        AppError::Internal("Token signing failed".to_string())
    })?;
    tracing::info!(user = %credentials.username, client = %client, "session token issued");

    Ok(([(header::SET_COOKIE, issued.cookie())], "Token issued.").into_response())
}

/// refresh
///
/// [Session Route] Re-issues the caller's token with a fresh expiry. Only reachable
/// behind the session authenticator, which supplies the `Principal`.
#[utoipa::path(
    post,
    path = "/api/v2/refresh",
    responses(
        (status = 200, description = "Token renewed, cookie replaced", body = String),
        (status = 401, description = "Missing or expired token", body = ErrorBody),
        (status = 500, description = "Signing failure", body = ErrorBody)
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Response, AuthError> {
    let issued = state.sessions.issue(&principal.username)?;
    tracing::info!(user = %principal.username, "session token renewed");
    Ok(([(header::SET_COOKIE, issued.cookie())], "Token renewed.").into_response())
}

/// logout
///
/// [Public Route] Clears the cookie client-side. There is no server-side revocation.
#[utoipa::path(
    post,
    path = "/api/v2/logout",
    responses((status = 200, description = "Cookie cleared", body = String))
)]
pub async fn logout() -> Response {
    ([(header::SET_COOKIE, clear_token_cookie())], "Logged out!").into_response()
}

// --- Service Handlers ---

/// greeting
///
/// [Public Route] The configured greeting followed by the host name.
#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Greeting", body = String))
)]
pub async fn greeting(State(state): State<AppState>) -> String {
    format!("{}\n{}", state.config.greeting, state.config.hostname)
}

pub async fn not_found() -> AppError {
    AppError::NotFound("Not Found".to_string())
}

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn readyz() -> &'static str {
    "ok"
}

/// metrics
///
/// Prometheus text exposition of the HTTP metrics registry.
pub async fn metrics(State(metrics): State<HttpMetrics>) -> Response {
    match metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
