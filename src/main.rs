use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use content_api::{
    AppState, DynamoContentRepository, EventDispatcher, HttpMetrics, InMemoryRepository,
    PublisherState, RepositoryState,
    config::{AppConfig, Env, TraceExporter},
    create_router, internal_router,
    models::Content,
    propagation::{otel_layer, provider_builder},
    publisher::{NoopPublisher, SqsPublisher},
};
use tokio::net::TcpListener;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Initializes configuration, logging, the repository and event backends, then runs
/// the API server and the internal metrics server until Ctrl-C.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Configuration & Environment Loading (Fail-Fast)
    dotenv::dotenv().ok();
    let config = AppConfig::load().context("invalid configuration")?;

    // 2. Logging Filter Setup
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "content_api=debug,tower_http=info,axum=trace".into());

    // 3. Span export. The filter above only governs log output.
    let provider = match config.traces {
        TraceExporter::Stdout => provider_builder(&config.service_name)
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build(),
        TraceExporter::None => provider_builder(&config.service_name).build(),
    };

    // 4. Initialize Logging based on Environment
    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(otel_layer(&provider))
                .with(tracing_subscriber::fmt::layer().pretty().with_filter(env_filter))
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(otel_layer(&provider))
                .with(tracing_subscriber::fmt::layer().json().with_filter(env_filter))
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 5. Repository Initialization
    let repo: RepositoryState = match &config.dynamodb {
        Some(dynamo) => match DynamoContentRepository::connect(dynamo).await {
            Ok(repo) => {
                tracing::info!(table = %dynamo.table, "using DynamoDB content store");
                Arc::new(repo)
            }
            Err(e) => {
                tracing::warn!(error = %e, "DynamoDB unavailable, falling back to in-memory store");
                Arc::new(seeded_memory_store())
            }
        },
        None => Arc::new(seeded_memory_store()),
    };

    // 6. Event Publisher Initialization
    let publisher: PublisherState = match &config.events {
        Some(events) => {
            tracing::info!(queue_url = %events.queue_url, "publishing content events to SQS");
            Arc::new(SqsPublisher::connect(events).await)
        }
        None => Arc::new(NoopPublisher),
    };
    let events = EventDispatcher::spawn(publisher, config.dispatch.clone());

    // 7. Metrics
    let metrics = HttpMetrics::new(&config.service_name, 1.0).context("failed to register metrics")?;

    // 8. Unified State Assembly
    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let app_state = AppState::new(config, repo, events.clone(), metrics.clone());

    // 9. Internal server (metrics and health checks)
    let internal_listener = TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics port {metrics_addr}"))?;
    tracing::info!("Metrics listening on {metrics_addr}");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(internal_listener, internal_router(metrics)).await {
            tracing::error!(error = %e, "metrics server stopped");
        }
    });

    // 10. API server
    let listener = TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("failed to bind {http_addr}"))?;
    tracing::info!("Listening on {http_addr}");
    tracing::info!("API Documentation (Swagger UI) available at: http://localhost:{}/swagger-ui", http_addr.port());

    axum::serve(listener, create_router(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // 11. Flush queued events and spans before exiting.
    events.shutdown().await;
    if let Err(e) = provider.shutdown() {
        tracing::warn!(error = %e, "failed to flush spans");
    }
    tracing::info!("shutdown complete");
    Ok(())
}

// Local runs start with the two demo records.
fn seeded_memory_store() -> InMemoryRepository {
    InMemoryRepository::with_seed([
        Content::new("1", "Content 1"),
        Content::new("2", "Content 2"),
    ])
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}
