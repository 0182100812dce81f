#![allow(dead_code)]

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use content_api::{
    AppConfig, AppState, EventDispatcher, HttpMetrics, InMemoryRepository, RepositoryState,
    config::DispatchSettings,
    create_router,
    models::Content,
    propagation::{otel_layer, provider_builder},
    publisher::{ContentPublisher, PublishError},
};
use opentelemetry_sdk::{testing::trace::InMemorySpanExporter, trace::TracerProvider};
use std::{
    sync::{
        Arc, Mutex, OnceLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// --- Test Publishers ---

/// Records every published item so tests can assert on emitted events.
#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<Content>>,
    pub closed: AtomicBool,
}

impl RecordingPublisher {
    pub fn items(&self) -> Vec<Content> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentPublisher for RecordingPublisher {
    async fn publish(&self, item: &Content) -> Result<(), PublishError> {
        self.published.lock().unwrap().push(item.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), PublishError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails the first `failures` attempts, then succeeds.
pub struct FlakyPublisher {
    pub failures: usize,
    pub attempts: AtomicUsize,
    pub delivered: Mutex<Vec<Content>>,
}

impl FlakyPublisher {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            attempts: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ContentPublisher for FlakyPublisher {
    async fn publish(&self, item: &Content) -> Result<(), PublishError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(PublishError::Transport("broker unavailable".to_string()));
        }
        self.delivered.lock().unwrap().push(item.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Settings that keep retry tests fast.
pub fn fast_dispatch() -> DispatchSettings {
    DispatchSettings {
        buffer: 16,
        max_attempts: 3,
        backoff: Duration::from_millis(5),
        timeout: Duration::from_millis(200),
    }
}

// --- Span Capture ---

static SPANS: OnceLock<(TracerProvider, InMemorySpanExporter)> = OnceLock::new();

/// Installs the span-exporting subscriber once per test binary and returns the
/// exporter every finished span of this crate lands in.
pub fn span_exporter() -> &'static InMemorySpanExporter {
    let (_, exporter) = SPANS.get_or_init(|| {
        let exporter = InMemorySpanExporter::default();
        let provider = provider_builder("helloworld")
            .with_simple_exporter(exporter.clone())
            .build();
        tracing_subscriber::registry()
            .with(otel_layer(&provider))
            .init();
        (provider, exporter)
    });
    exporter
}

// --- Test Server ---

pub struct TestApp {
    pub address: String,
    pub state: AppState,
    pub publisher: Arc<RecordingPublisher>,
}

pub fn seed() -> Vec<Content> {
    vec![Content::new("1", "Content 1"), Content::new("2", "Content 2")]
}

/// Builds application state over a seeded in-memory store and a recording publisher.
pub fn test_state(config: AppConfig) -> (AppState, Arc<RecordingPublisher>) {
    span_exporter();
    let repo = Arc::new(InMemoryRepository::with_seed(seed())) as RepositoryState;
    let publisher = Arc::new(RecordingPublisher::default());
    let events = EventDispatcher::spawn(publisher.clone(), fast_dispatch());
    let metrics = HttpMetrics::new("helloworld", 1.0).expect("metrics registry");
    (AppState::new(config, repo, events, metrics), publisher)
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(AppConfig::default()).await
}

pub async fn spawn_app_with(config: AppConfig) -> TestApp {
    let (state, publisher) = test_state(config);
    let router = create_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp {
        address,
        state,
        publisher,
    }
}

pub fn basic(user: &str, pass: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")))
}

/// Extracts `token=<value>` from a `Set-Cookie` header value.
pub fn token_from_set_cookie(set_cookie: &str) -> String {
    set_cookie
        .split(';')
        .next()
        .and_then(|pair| pair.strip_prefix("token="))
        .expect("set-cookie carries the token")
        .to_string()
}
