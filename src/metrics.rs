//! Prometheus instrumentation for the HTTP surface.
//!
//! `track_metrics` wraps the full middleware and handler chain. It never buffers the
//! response: the body is wrapped in `MeteredBody`, which counts bytes as they stream
//! and records the observation exactly once, when the body ends or is dropped.

use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Instant,
};

use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    http::Version,
    middleware::Next,
    response::Response,
};
use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry,
    TextEncoder, exponential_buckets, linear_buckets,
};

const LABELS: &[&str] = &["method", "code", "path"];

/// HttpMetrics
///
/// Owns a dedicated registry so the exported families are exactly the ones below.
#[derive(Clone)]
pub struct HttpMetrics {
    registry: Registry,
    request_duration: HistogramVec,
    requests_total: IntCounterVec,
    response_time: Histogram,
    request_size: HistogramVec,
    response_size: HistogramVec,
}

impl HttpMetrics {
    /// Create and register metrics with a fresh registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric cannot be built or registered.
    pub fn new(app_name: &str, version: f64) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let version_gauge = Gauge::with_opts(
            Opts::new("version", "Version information about this binary")
                .const_label("appName", app_name),
        )?;
        version_gauge.set(version);

        let request_duration = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "Duration of all HTTP requests")
                .buckets(linear_buckets(0.01, 0.05, 10)?),
            LABELS,
        )?;
        let requests_total = IntCounterVec::new(
            Opts::new(
                "http_requests_total",
                "How many HTTP requests processed, partitioned by status code, method and HTTP path.",
            ),
            LABELS,
        )?;
        let response_time = Histogram::with_opts(
            HistogramOpts::new("response_time_seconds", "Request response times").namespace("http"),
        )?;
        let request_size = HistogramVec::new(
            HistogramOpts::new("http_request_size_bytes", "Summary of request bytes received")
                .buckets(exponential_buckets(64.0, 4.0, 8)?),
            LABELS,
        )?;
        let response_size = HistogramVec::new(
            HistogramOpts::new("http_response_size_bytes", "Summary of response bytes sent")
                .buckets(exponential_buckets(64.0, 4.0, 8)?),
            LABELS,
        )?;

        registry.register(Box::new(version_gauge))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(response_time.clone()))?;
        registry.register(Box::new(request_size.clone()))?;
        registry.register(Box::new(response_size.clone()))?;

        Ok(Self {
            registry,
            request_duration,
            requests_total,
            response_time,
            request_size,
            response_size,
        })
    }

    /// Text exposition of every registered family.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Number of recorded requests for a label set. Used by tests and health tooling.
    pub fn request_count(&self, method: &str, code: &str, path: &str) -> u64 {
        self.requests_total
            .with_label_values(&[method, code, path])
            .get()
    }

    fn observe(&self, labels: &RequestLabels, elapsed: f64, request_bytes: u64, response_bytes: u64) {
        let values = [labels.method.as_str(), labels.code.as_str(), labels.path.as_str()];
        self.requests_total.with_label_values(&values[..]).inc();
        self.request_duration
            .with_label_values(&values[..])
            .observe(elapsed);
        self.response_time.observe(elapsed);
        self.request_size
            .with_label_values(&values[..])
            .observe(request_bytes as f64);
        self.response_size
            .with_label_values(&values[..])
            .observe(response_bytes as f64);
    }
}

struct RequestLabels {
    method: String,
    code: String,
    path: String,
}

/// track_metrics
///
/// Outermost middleware. Labels come from the method, the final status code and the
/// matched route template (`unknown` when nothing matched, to bound cardinality).
pub async fn track_metrics(
    State(metrics): State<HttpMetrics>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().as_str().to_lowercase();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let request_bytes = estimate_request_size(&request);

    let response = next.run(request).await;

    let labels = RequestLabels {
        method,
        code: response.status().as_u16().to_string(),
        path,
    };
    let (parts, body) = response.into_parts();
    let metered = MeteredBody {
        inner: body,
        written: 0,
        pending: Some(PendingObservation {
            metrics,
            labels,
            start,
            request_bytes,
        }),
    };
    Response::from_parts(parts, Body::new(metered))
}

/// estimate_request_size
///
/// Approximates the wire size of a request: request line, headers and declared body
/// length. This is an estimate, not the exact byte count.
pub fn estimate_request_size<B>(request: &axum::http::Request<B>) -> u64 {
    let mut size = request.method().as_str().len() + request.uri().path().len();
    size += version_str(request.version()).len();
    // SP SP CRLF
    size += 4;

    for (name, value) in request.headers() {
        // ": " is not counted, CRLF is.
        size += name.as_str().len() + value.len() + 2;
    }

    let content_length = request
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(0);

    size as u64 + content_length
}

fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

struct PendingObservation {
    metrics: HttpMetrics,
    labels: RequestLabels,
    start: Instant,
    request_bytes: u64,
}

/// MeteredBody
///
/// Pass-through body that counts data bytes and records the pending observation once.
struct MeteredBody {
    inner: Body,
    written: u64,
    pending: Option<PendingObservation>,
}

impl MeteredBody {
    fn finish(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.metrics.observe(
                &pending.labels,
                pending.start.elapsed().as_secs_f64(),
                pending.request_bytes,
                self.written,
            );
        }
    }
}

impl HttpBody for MeteredBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.written += data.len() as u64;
                }
            }
            Poll::Ready(None) | Poll::Ready(Some(Err(_))) => this.finish(),
            Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for MeteredBody {
    fn drop(&mut self) {
        self.finish();
    }
}
