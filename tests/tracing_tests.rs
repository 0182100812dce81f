mod common;

use std::time::Duration;

use axum::{
    Router,
    http::{HeaderMap, HeaderValue},
    routing::get,
};
use common::{basic, span_exporter, spawn_app, spawn_app_with};
use content_api::{AppConfig, config::ProxyConfig, propagation::Propagator};
use opentelemetry::trace::{SpanId, SpanKind, TraceContextExt};
use opentelemetry_sdk::export::trace::SpanData;
use tokio::net::TcpListener;

const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
const PARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
const CALLER_SPAN: &str = "00f067aa0ba902b7";

fn trace_id_of(traceparent: &str) -> &str {
    traceparent.split('-').nth(1).unwrap()
}

fn span_id_of(traceparent: &str) -> &str {
    traceparent.split('-').nth(2).unwrap()
}

fn response_traceparent(response: &reqwest::Response) -> String {
    response
        .headers()
        .get("traceparent")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string()
}

/// Waits until every span in `names` has been exported for `trace_id`.
async fn exported(trace_id: &str, names: &[&str]) -> Vec<SpanData> {
    for _ in 0..100 {
        let spans: Vec<SpanData> = span_exporter()
            .get_finished_spans()
            .unwrap()
            .into_iter()
            .filter(|span| span.span_context.trace_id().to_string() == trace_id)
            .collect();
        if names.iter().all(|name| spans.iter().any(|s| s.name == *name)) {
            return spans;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("spans {names:?} were not exported for trace {trace_id}");
}

fn named<'a>(spans: &'a [SpanData], name: &str) -> &'a SpanData {
    spans.iter().find(|s| s.name == name).unwrap()
}

#[test]
fn test_extract_reads_valid_parent() {
    let propagator = Propagator::new("helloworld");
    let mut headers = HeaderMap::new();
    headers.insert("traceparent", HeaderValue::from_static(PARENT));

    let cx = propagator.extract(&headers);
    let span = cx.span();
    let remote = span.span_context();
    assert!(remote.is_valid());
    assert!(remote.is_remote());
    assert_eq!(remote.trace_id().to_string(), TRACE_ID);
    assert_eq!(remote.span_id().to_string(), CALLER_SPAN);
}

#[test]
fn test_extract_ignores_malformed_context() {
    let propagator = Propagator::new("helloworld");
    let mut garbage = HeaderMap::new();
    garbage.insert("traceparent", HeaderValue::from_static("not-a-trace"));

    assert!(!propagator.extract(&garbage).has_active_span());
    assert!(!propagator.extract(&HeaderMap::new()).has_active_span());
}

#[tokio::test]
async fn test_store_span_is_child_of_request_span() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    // A found record and an unknown one: the store span must end on both paths.
    for (id, status) in [("1", 200), ("3", 404)] {
        let trace_id = uuid::Uuid::new_v4().simple().to_string();
        let response = client
            .get(format!("{}/api/v1/content/{id}", app.address))
            .header("Authorization", basic("user1", "password1"))
            .header("traceparent", format!("00-{trace_id}-{CALLER_SPAN}-01"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), status);
        let traceparent = response_traceparent(&response);

        let spans = exported(&trace_id, &["GET /api/v1/content/{id}", "content.get"]).await;
        let route = named(&spans, "GET /api/v1/content/{id}");
        let store = named(&spans, "content.get");

        assert_eq!(route.span_kind, SpanKind::Server);
        assert_eq!(route.parent_span_id.to_string(), CALLER_SPAN);
        assert_eq!(store.parent_span_id, route.span_context.span_id());
        assert_eq!(span_id_of(&traceparent), route.span_context.span_id().to_string());
    }
}

#[tokio::test]
async fn test_request_without_context_starts_new_trace() {
    let app = spawn_app().await;
    let response = reqwest::Client::new()
        .get(format!("{}/api/v1/content", app.address))
        .header("Authorization", basic("user1", "password1"))
        .header("traceparent", "not-a-trace")
        .send()
        .await
        .unwrap();
    let traceparent = response_traceparent(&response);
    let trace_id = trace_id_of(&traceparent).to_string();
    assert_ne!(trace_id, TRACE_ID);

    let spans = exported(&trace_id, &["GET /api/v1/content", "content.list"]).await;
    let route = named(&spans, "GET /api/v1/content");
    let store = named(&spans, "content.list");
    assert_eq!(route.parent_span_id, SpanId::INVALID);
    assert_eq!(store.parent_span_id, route.span_context.span_id());
}

#[tokio::test]
async fn test_response_carries_continued_trace() {
    let app = spawn_app().await;
    let response = reqwest::Client::new()
        .get(format!("{}/api/v1/content", app.address))
        .header("Authorization", basic("user1", "password1"))
        .header("traceparent", PARENT)
        .send()
        .await
        .unwrap();

    let traceparent = response_traceparent(&response);
    assert_eq!(trace_id_of(&traceparent), TRACE_ID);
    assert_ne!(span_id_of(&traceparent), CALLER_SPAN);
}

#[tokio::test]
async fn test_failed_auth_still_returns_trace_context() {
    let app = spawn_app().await;
    let response = reqwest::Client::new()
        .get(format!("{}/api/v1/content", app.address))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 401);
    assert!(response.headers().contains_key("traceparent"));
}

// --- Proxy ---

async fn spawn_upstream() -> String {
    // Echoes the trace header and forwarded host it received.
    let upstream = Router::new().route(
        "/",
        get(|headers: HeaderMap| async move {
            let header = |name: &str| {
                headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string()
            };
            format!(
                "{}|{}|{}",
                header("traceparent"),
                header("x-forwarded-host"),
                header("authorization")
            )
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}/", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, upstream).await.unwrap();
    });
    address
}

#[tokio::test]
async fn test_proxy_forwards_trace_to_upstream() {
    let upstream = spawn_upstream().await;
    let config = AppConfig {
        proxy: Some(ProxyConfig {
            upstream,
            username: Some("svc".to_string()),
            password: Some("secret".to_string()),
        }),
        ..AppConfig::default()
    };
    let app = spawn_app_with(config).await;

    let response = reqwest::Client::new()
        .get(format!("{}/proxy", app.address))
        .header("traceparent", PARENT)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let server_traceparent = response_traceparent(&response);
    let body = response.text().await.unwrap();
    let mut parts = body.split('|');
    let upstream_traceparent = parts.next().unwrap();
    let forwarded_host = parts.next().unwrap();
    let authorization = parts.next().unwrap();

    // Same trace, but the upstream sees a child of this hop's span.
    assert_eq!(trace_id_of(upstream_traceparent), TRACE_ID);
    assert_ne!(span_id_of(upstream_traceparent), span_id_of(&server_traceparent));
    assert_ne!(span_id_of(upstream_traceparent), CALLER_SPAN);
    assert!(forwarded_host.starts_with("127.0.0.1:"));
    assert_eq!(authorization, basic("svc", "secret"));
}

#[tokio::test]
async fn test_proxy_upstream_failure_is_bad_gateway() {
    // Bind and drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = format!("http://{}/", listener.local_addr().unwrap());
    drop(listener);

    let config = AppConfig {
        proxy: Some(ProxyConfig {
            upstream: dead,
            username: None,
            password: None,
        }),
        ..AppConfig::default()
    };
    let app = spawn_app_with(config).await;

    let response = reqwest::Client::new()
        .get(format!("{}/proxy", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 502);
}

#[tokio::test]
async fn test_proxy_without_upstream_is_not_found() {
    let app = spawn_app().await;
    let response = reqwest::Client::new()
        .get(format!("{}/proxy", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}
