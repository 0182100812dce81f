use axum::{
    Json,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::Instrument;

use crate::{
    AppState,
    auth::client_address,
    models::ErrorBody,
};

/// proxy
///
/// [Public Route] Forwards `GET /proxy` to the configured upstream inside the caller's
/// trace. The outbound request carries the context of a client span opened under
/// the request span, so the upstream sees this service as its parent hop.
///
/// Without a configured upstream the route answers 404. Any transport failure or
/// unreadable upstream body answers 502; the upstream's own status is relayed as is.
#[utoipa::path(
    get,
    path = "/proxy",
    responses(
        (status = 200, description = "Upstream response relayed"),
        (status = 502, description = "Upstream unreachable", body = ErrorBody)
    )
)]
pub async fn proxy(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let Some(upstream) = state.config.proxy.clone() else {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: "Not Found".to_string(),
            }),
        )
            .into_response();
    };

    let span = tracing::info_span!(
        "proxy.forward",
        otel.kind = "client",
        upstream = %upstream.upstream,
    );
    let mut outbound = HeaderMap::new();
    state.propagator.inject(&span, &mut outbound);
    if let Some(host) = headers.get(header::HOST) {
        outbound.insert("x-forwarded-host", host.clone());
    }

    let mut request = state.http.get(&upstream.upstream).headers(outbound);
    if let Some(username) = &upstream.username {
        request = request.basic_auth(username, upstream.password.as_ref());
    }

    let client = client_address(&headers);

    let result = async {
        let response = request.send().await?;
        let status = response.status();
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let body = response.bytes().await?;
        Ok::<_, reqwest::Error>((status, content_type, body))
    }
    .instrument(span)
    .await;

    match result {
        Ok((status, content_type, body)) => {
            tracing::info!(status = status.as_u16(), client = %client, "proxied request");
            let mut response = (status, body).into_response();
            let content_type =
                content_type.unwrap_or_else(|| HeaderValue::from_static("text/plain"));
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
            response
        }
        Err(e) => {
            tracing::error!(error = %e, client = %client, "upstream request failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorBody {
                    error: "Upstream unavailable".to_string(),
                }),
            )
                .into_response()
        }
    }
}
