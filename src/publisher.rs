use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sqs::{Client, error::DisplayErrorContext, types::MessageAttributeValue};
use thiserror::Error;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot,
};
use uuid::Uuid;

use crate::{
    config::{DispatchSettings, EventQueueConfig},
    models::Content,
};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("serialize event payload: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("event transport: {0}")]
    Transport(String),
    #[error("publisher is closed")]
    Closed,
}

// 1. ContentPublisher Contract
/// ContentPublisher
///
/// Emits an event for every successfully created content record. Implementations
/// only fail on transport or serialization problems; callers log those failures and
/// never surface them to the HTTP client.
#[async_trait]
pub trait ContentPublisher: Send + Sync {
    /// Publishes one event keyed by `item.id`.
    async fn publish(&self, item: &Content) -> Result<(), PublishError>;

    /// Releases transport resources. Safe to call more than once.
    async fn close(&self) -> Result<(), PublishError>;
}

/// PublisherState
///
/// The concrete type used to share the active publisher.
pub type PublisherState = Arc<dyn ContentPublisher>;

// 2. Default Implementation
/// NoopPublisher
///
/// Used whenever no event stream is configured, so event publication is entirely
/// optional and never changes observable API behaviour.
#[derive(Clone, Default)]
pub struct NoopPublisher;

#[async_trait]
impl ContentPublisher for NoopPublisher {
    async fn publish(&self, _item: &Content) -> Result<(), PublishError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

// 3. SQS Implementation
/// Message attribute carrying the event key.
pub const KEY_ATTRIBUTE: &str = "content_id";

/// SqsPublisher
///
/// Sends content events to an SQS queue. The queue URL plays the role of the topic
/// and the body is the record as JSON. Every message carries the content id as the
/// `content_id` string attribute, the event key consumers filter and route on. For
/// FIFO queues the id is also the message group id, which keeps events ordered
/// within a record.
pub struct SqsPublisher {
    client: Client,
    queue_url: String,
    fifo: bool,
    closed: AtomicBool,
}

impl SqsPublisher {
    pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
        let queue_url = queue_url.into();
        Self {
            client,
            fifo: queue_url.ends_with(".fifo"),
            queue_url,
            closed: AtomicBool::new(false),
        }
    }

    /// connect
    ///
    /// Builds the SQS client from the default AWS provider chain, optionally pinning
    /// the region when the queue lives outside the process default.
    pub async fn connect(config: &EventQueueConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared = loader.load().await;
        Self::new(Client::new(&shared), &config.queue_url)
    }
}

#[async_trait]
impl ContentPublisher for SqsPublisher {
    async fn publish(&self, item: &Content) -> Result<(), PublishError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PublishError::Closed);
        }

        let payload = serde_json::to_string(item)?;
        let key = MessageAttributeValue::builder()
            .data_type("String")
            .string_value(&item.id)
            .build()
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        let mut request = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(payload)
            .message_attributes(KEY_ATTRIBUTE, key);

        if self.fifo {
            request = request
                .message_group_id(&item.id)
                .message_deduplication_id(Uuid::new_v4().to_string());
        }

        request
            .send()
            .await
            .map_err(|e| PublishError::Transport(DisplayErrorContext(e).to_string()))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), PublishError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!(queue_url = %self.queue_url, "sqs publisher closed");
        }
        Ok(())
    }
}

// 4. Background Dispatch
enum Command {
    Publish(Content),
    Shutdown(oneshot::Sender<()>),
}

/// EventDispatcher
///
/// Decouples event publication from the request lifetime. Handlers hand a committed
/// record to `dispatch`, which enqueues it on a bounded channel without waiting; a
/// single worker task owns the publisher and applies the retry policy. A slow or
/// failing publisher therefore never adds latency to, or fails, a create request.
#[derive(Clone)]
pub struct EventDispatcher {
    tx: mpsc::Sender<Command>,
}

impl EventDispatcher {
    /// Spawns the worker on the current tokio runtime.
    pub fn spawn(publisher: PublisherState, settings: DispatchSettings) -> Self {
        let (tx, rx) = mpsc::channel(settings.buffer.max(1));
        tokio::spawn(run_worker(publisher, settings, rx));
        Self { tx }
    }

    pub fn dispatch(&self, item: Content) {
        let content_id = item.id.clone();
        if let Err(err) = self.tx.try_send(Command::Publish(item)) {
            let reason = match err {
                TrySendError::Full(_) => "buffer full",
                TrySendError::Closed(_) => "dispatcher stopped",
            };
            tracing::warn!(content_id = %content_id, reason, "dropping content event");
        }
    }

    /// shutdown
    ///
    /// Publishes everything already queued, closes the publisher and stops the worker.
    /// Later calls return immediately.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(done_tx)).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }
}

async fn run_worker(
    publisher: PublisherState,
    settings: DispatchSettings,
    mut rx: mpsc::Receiver<Command>,
) {
    while let Some(command) = rx.recv().await {
        let done = match command {
            Command::Publish(item) => {
                publish_with_retry(publisher.as_ref(), &settings, &item).await;
                continue;
            }
            Command::Shutdown(done) => done,
        };

        rx.close();
        let mut waiters = vec![done];
        while let Some(command) = rx.recv().await {
            match command {
                Command::Publish(item) => {
                    publish_with_retry(publisher.as_ref(), &settings, &item).await
                }
                Command::Shutdown(done) => waiters.push(done),
            }
        }

        if let Err(e) = publisher.close().await {
            tracing::error!(error = %e, "error closing content publisher");
        }
        for waiter in waiters {
            let _ = waiter.send(());
        }
        return;
    }
}

async fn publish_with_retry(
    publisher: &dyn ContentPublisher,
    settings: &DispatchSettings,
    item: &Content,
) {
    for attempt in 1..=settings.max_attempts {
        match tokio::time::timeout(settings.timeout, publisher.publish(item)).await {
            Ok(Ok(())) => {
                tracing::debug!(content_id = %item.id, attempt, "content event published");
                return;
            }
            Ok(Err(PublishError::Closed)) => {
                tracing::warn!(content_id = %item.id, "publisher closed, event discarded");
                return;
            }
            Ok(Err(e)) => {
                tracing::warn!(content_id = %item.id, attempt, error = %e, "publish failed")
            }
            Err(_) => tracing::warn!(content_id = %item.id, attempt, "publish timed out"),
        }

        if attempt < settings.max_attempts {
            tokio::time::sleep(settings.backoff * attempt).await;
        }
    }

    tracing::error!(
        content_id = %item.id,
        attempts = settings.max_attempts,
        "giving up on content event"
    );
}
