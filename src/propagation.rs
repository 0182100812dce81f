//! Distributed tracing.
//!
//! Spans are ordinary `tracing` spans; the `tracing-opentelemetry` layer turns the
//! ones emitted by this crate into OpenTelemetry spans and hands them to the
//! configured exporter when they close. Inbound `traceparent`/`tracestate` headers
//! become the parent of the request span (or a new trace starts when none is valid),
//! and the request span's context is written back on the response so callers and
//! downstream hops share one trace.

use std::sync::Arc;

use axum::{
    extract::{MatchedPath, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use opentelemetry::{
    Context, KeyValue,
    propagation::TextMapPropagator,
    trace::{TraceContextExt, TracerProvider as _},
};
use opentelemetry_http::{HeaderExtractor, HeaderInjector};
use opentelemetry_sdk::{
    Resource,
    propagation::TraceContextPropagator,
    trace::{self as sdktrace, RandomIdGenerator, Sampler, TracerProvider},
};
use tracing::{Instrument, Level, Span, Subscriber, field::Empty};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use tracing_subscriber::{
    Layer,
    filter::{LevelFilter, Targets},
    registry::LookupSpan,
};

use crate::auth::client_address;

/// Target of the access-log span. It is kept out of the exported traces because it
/// wraps the request span without being part of the propagated trace.
pub const ACCESS_LOG_TARGET: &str = "content_api::access";

/// provider_builder
///
/// Tracer provider settings shared by the binary and the tests: every span is
/// sampled and carries the service name as a resource attribute. The caller picks
/// the exporter.
pub fn provider_builder(service_name: &str) -> sdktrace::Builder {
    TracerProvider::builder().with_config(
        sdktrace::Config::default()
            .with_sampler(Sampler::AlwaysOn)
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(Resource::new(vec![KeyValue::new(
                "service.name",
                service_name.to_string(),
            )])),
    )
}

/// otel_layer
///
/// Bridges this crate's spans into `provider`. Spans from dependencies are not
/// exported.
pub fn otel_layer<S>(provider: &TracerProvider) -> impl Layer<S> + Send + Sync
where
    S: Subscriber + for<'span> LookupSpan<'span> + Send + Sync,
{
    tracing_opentelemetry::layer()
        .with_tracer(provider.tracer("content-api"))
        .with_filter(
            Targets::new()
                .with_target("content_api", Level::INFO)
                .with_target(ACCESS_LOG_TARGET, LevelFilter::OFF),
        )
}

/// Propagator
///
/// W3C trace-context codec plus the service name stamped on request spans.
#[derive(Clone)]
pub struct Propagator {
    service: Arc<str>,
    inner: Arc<TraceContextPropagator>,
}

impl Propagator {
    pub fn new(service: &str) -> Self {
        Self {
            service: Arc::from(service),
            inner: Arc::new(TraceContextPropagator::new()),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Reads the caller's context. Missing or malformed headers yield an empty context.
    pub fn extract(&self, headers: &HeaderMap) -> Context {
        self.inner.extract(&HeaderExtractor(headers))
    }

    /// Writes `span`'s context as `traceparent`/`tracestate` headers.
    pub fn inject(&self, span: &Span, headers: &mut HeaderMap) {
        self.inner
            .inject_context(&span.context(), &mut HeaderInjector(headers));
    }
}

/// trace_requests
///
/// Per-request tracing middleware. Opens a server span named after the method and
/// matched route template, parents it on the inbound context, runs the rest of the
/// chain inside it and injects its context into the response headers. The span
/// ends when the chain returns, on success and error paths alike.
pub async fn trace_requests(
    State(propagator): State<Propagator>,
    mut request: Request,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let method = request.method().as_str().to_owned();

    let span = tracing::info_span!(
        "route",
        otel.name = %format!("{method} {route}"),
        otel.kind = "server",
        service = %propagator.service(),
        route = %route,
        method = %method.to_lowercase(),
        client = %client_address(request.headers()),
        trace_id = Empty,
        http.status_code = Empty,
    );
    span.set_parent(propagator.extract(request.headers()));
    span.record(
        "trace_id",
        tracing::field::display(span.context().span().span_context().trace_id()),
    );

    // Downstream code reading the request headers sees this hop, not the caller.
    propagator.inject(&span, request.headers_mut());

    let mut response = next.run(request).instrument(span.clone()).await;
    span.record("http.status_code", response.status().as_u16());
    propagator.inject(&span, response.headers_mut());
    response
}
