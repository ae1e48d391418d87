//! Ingestion controller: orchestrates decode → dispatch → dedup → write
//! → deliver for one message, and owns the ack/nack/DLQ decision.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};

use crate::bus::{BrokerAdapter, BrokerError, Delivery, MessageHandler};
use crate::delivery::{self, Topics};
use crate::dlq::{self, DeadLetterEnvelope, DeadLetterError};
use crate::envelope::{self, EnvelopeError};
use crate::notifications::{dedup, writer, NotificationCreationResult};
use crate::processors::{ProcessorError, ProcessorRegistry};
use crate::status::ServiceStatus;
use crate::storage::{NotificationStore, StorageError};
use crate::users::UserDirectory;

/// Error taxonomy for the ingestion path, carrying the `trace_id` and a
/// free-form context map on every variant that can occur past
/// normalization, for structured logging and DLQ payloads.
#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unknown processor type: {0}")]
    UnknownProcessorType(String),

    #[error("subscription not owned by user")]
    Authorization { trace_id: String, context: HashMap<String, String> },

    #[error("database connection error: {0}")]
    DatabaseConnection(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl From<EnvelopeError> for IngestionError {
    fn from(e: EnvelopeError) -> Self {
        match e {
            EnvelopeError::Parse(msg) => IngestionError::Parse(msg),
            EnvelopeError::Validation(msg) => IngestionError::Validation(msg),
            EnvelopeError::UnknownProcessorType(tag) => IngestionError::UnknownProcessorType(tag),
        }
    }
}

impl From<ProcessorError> for IngestionError {
    fn from(e: ProcessorError) -> Self {
        match e {
            ProcessorError::UnknownProcessorType(tag) => IngestionError::UnknownProcessorType(tag),
            ProcessorError::NotOwned { user_id, subscription_id } => IngestionError::Authorization {
                trace_id: String::new(),
                context: HashMap::from([
                    ("user_id".to_string(), user_id),
                    ("subscription_id".to_string(), subscription_id),
                ]),
            },
        }
    }
}

/// Terminal decision for one message's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    Nack,
}

/// A dropped dead letter is worse than a redelivery: nack so the broker
/// retries, rather than silently losing the failed message.
fn dlq_decision(delivered: bool) -> AckDecision {
    if delivered {
        AckDecision::Ack
    } else {
        AckDecision::Nack
    }
}

/// Process-wide counters, updated on every path through the pipeline.
#[derive(Default)]
pub struct IngestionMetrics {
    message_count: AtomicU64,
    successful_messages: AtomicU64,
    validation_errors: AtomicU64,
    processing_errors: AtomicU64,
    last_activity_ts: AtomicI64,
    avg_processing_time_ms: AtomicU64,
}

impl IngestionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, successful: bool, kind: Option<&'static str>, elapsed: Duration) {
        self.message_count.fetch_add(1, Ordering::Relaxed);
        if successful {
            self.successful_messages.fetch_add(1, Ordering::Relaxed);
        }
        match kind {
            Some("validation") => {
                self.validation_errors.fetch_add(1, Ordering::Relaxed);
            }
            Some("processing") => {
                self.processing_errors.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        self.last_activity_ts.store(Utc::now().timestamp(), Ordering::Relaxed);

        // Exponential moving average, alpha = 0.2.
        let sample = elapsed.as_millis() as u64;
        let prev = self.avg_processing_time_ms.load(Ordering::Relaxed);
        let next = if prev == 0 { sample } else { (prev * 4 + sample) / 5 };
        self.avg_processing_time_ms.store(next, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestionMetricsSnapshot {
        IngestionMetricsSnapshot {
            message_count: self.message_count.load(Ordering::Relaxed),
            successful_messages: self.successful_messages.load(Ordering::Relaxed),
            validation_errors: self.validation_errors.load(Ordering::Relaxed),
            processing_errors: self.processing_errors.load(Ordering::Relaxed),
            last_activity_ts: self.last_activity_ts.load(Ordering::Relaxed),
            avg_processing_time_ms: self.avg_processing_time_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionMetricsSnapshot {
    pub message_count: u64,
    pub successful_messages: u64,
    pub validation_errors: u64,
    pub processing_errors: u64,
    pub last_activity_ts: i64,
    pub avg_processing_time_ms: u64,
}

pub struct IngestionTopics {
    pub dlq: String,
    pub email_immediate: String,
    pub email_daily: String,
    pub realtime: String,
}

pub struct IngestionController {
    pub broker: Arc<dyn BrokerAdapter>,
    pub store: Arc<dyn NotificationStore>,
    pub directory: Arc<dyn UserDirectory>,
    pub registry: ProcessorRegistry,
    pub status: Arc<ServiceStatus>,
    pub metrics: Arc<IngestionMetrics>,
    pub topics: IngestionTopics,
    pub dedup_window_minutes: i64,
    pub message_deadline: Duration,
    semaphore: Arc<Semaphore>,
}

impl IngestionController {
    pub fn new(
        broker: Arc<dyn BrokerAdapter>,
        store: Arc<dyn NotificationStore>,
        directory: Arc<dyn UserDirectory>,
        registry: ProcessorRegistry,
        status: Arc<ServiceStatus>,
        metrics: Arc<IngestionMetrics>,
        topics: IngestionTopics,
        dedup_window_minutes: i64,
        message_deadline: Duration,
        max_concurrency: usize,
    ) -> Self {
        Self {
            broker,
            store,
            directory,
            registry,
            status,
            metrics,
            topics,
            dedup_window_minutes,
            message_deadline,
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    #[instrument(skip_all, fields(message_id = %delivery.message_id))]
    async fn handle_one(&self, delivery: Delivery) {
        let start = Instant::now();
        let raw = delivery.data.to_vec();

        let outcome = tokio::time::timeout(self.message_deadline, self.process(&raw)).await;

        let (decision, successful, metric_kind) = match outcome {
            Ok(Ok(result)) => {
                info!(
                    created = result.created,
                    errors = result.errors,
                    duplicates = result.duplicates,
                    "message processed"
                );
                (AckDecision::Ack, true, None)
            }
            Ok(Err(e)) => self.classify(&raw, e).await,
            Err(_) => {
                warn!("message processing deadline exceeded");
                (AckDecision::Nack, false, Some("processing"))
            }
        };

        self.metrics.record(successful, metric_kind, start.elapsed());

        match decision {
            AckDecision::Ack => delivery.ack().await,
            AckDecision::Nack => delivery.nack().await,
        }
    }

    /// Maps a processing error onto the ack/nack/DLQ policy table.
    async fn classify(&self, raw: &[u8], error: IngestionError) -> (AckDecision, bool, Option<&'static str>) {
        match error {
            IngestionError::Parse(msg) => {
                let delivered = self.dlq(raw, DeadLetterError::new("ParseError", msg)).await;
                (dlq_decision(delivered), false, Some("validation"))
            }
            IngestionError::Validation(msg) => {
                let delivered = self.dlq(raw, DeadLetterError::new("ValidationError", msg)).await;
                (dlq_decision(delivered), false, Some("validation"))
            }
            IngestionError::UnknownProcessorType(tag) => {
                let delivered = self
                    .dlq(
                        raw,
                        DeadLetterError::new("UnknownProcessorTypeError", format!("no processor registered for {tag}")),
                    )
                    .await;
                (dlq_decision(delivered), false, Some("validation"))
            }
            IngestionError::Authorization { .. } => {
                warn!("subscription not owned by user, skipping envelope");
                (AckDecision::Ack, false, Some("validation"))
            }
            IngestionError::DatabaseConnection(msg) => {
                error!(error = %msg, "database connection error, nacking for redelivery");
                self.status.set_db_active(false);
                self.status.record_error("database", msg);
                (AckDecision::Nack, false, Some("processing"))
            }
            IngestionError::DeadlineExceeded => (AckDecision::Nack, false, Some("processing")),
        }
    }

    async fn dlq(&self, raw: &[u8], error: DeadLetterError) -> bool {
        let envelope = DeadLetterEnvelope::new(raw, error);
        let delivered = dlq::publish(self.broker.as_ref(), &self.topics.dlq, envelope).await;
        self.status.set_broker_active(delivered);
        if !delivered {
            self.status.record_error("broker", "dead-letter publish failed");
        }
        delivered
    }

    async fn process(&self, raw: &[u8]) -> Result<NotificationCreationResult, IngestionError> {
        let normalized = envelope::normalize(raw)?;
        let processor = self.registry.get(&normalized.processor_type)?;

        if let Some(subscription) = self
            .directory
            .find_subscription(&normalized.subscription_id)
            .await
            .map_err(|e| IngestionError::Validation(e.to_string()))?
        {
            if !subscription.owned_by(&normalized.user_id) {
                return Err(ProcessorError::NotOwned {
                    user_id: normalized.user_id.clone(),
                    subscription_id: normalized.subscription_id.clone(),
                }
                .into());
            }
        }

        let processing = processor.process(&normalized);

        let mut to_write = Vec::with_capacity(processing.candidates.len());
        let mut result = NotificationCreationResult::default();
        for candidate in processing.candidates {
            let is_dup = dedup::is_duplicate(
                self.store.as_ref(),
                &candidate.user_id,
                &candidate.title,
                &candidate.source_url,
                &candidate.entity_type,
                &candidate.metadata,
                self.dedup_window_minutes,
            )
            .await;

            if is_dup {
                result.record_duplicate();
            } else {
                to_write.push(candidate);
            }
        }

        let (write_result, persisted) = writer::write_batch(self.store.as_ref(), to_write)
            .await
            .map_err(|e| IngestionError::DatabaseConnection(e.to_string()))?;
        self.status.set_db_active(true);

        result.created += write_result.created;
        result.errors += write_result.errors;
        result.records.extend(write_result.records);

        let delivery_topics = Topics {
            email_immediate: &self.topics.email_immediate,
            email_daily: &self.topics.email_daily,
            realtime: &self.topics.realtime,
        };

        for notification in &persisted {
            let realtime_published = delivery::deliver(
                self.broker.as_ref(),
                self.store.as_ref(),
                self.directory.as_ref(),
                &delivery_topics,
                notification,
                &normalized.subscription_id,
            )
            .await;
            self.status.set_broker_active(realtime_published);
        }

        Ok(result)
    }

    /// Run the subscribe loop, bounding in-flight handling to this
    /// controller's configured concurrency.
    pub async fn run(self: Arc<Self>, topic: &str, subscription: &str) -> Result<(), BrokerError> {
        self.status.set_subscription_active(true);
        let handler: Arc<dyn MessageHandler> = self.clone();
        let result = self.broker.subscribe(topic, subscription, handler).await;
        self.status.set_subscription_active(false);
        result
    }
}

#[async_trait]
impl MessageHandler for IngestionController {
    async fn handle(self: Arc<Self>, delivery: Delivery) {
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                delivery.nack().await;
                return;
            }
        };
        tokio::spawn(async move {
            self.handle_one(delivery).await;
            drop(permit);
        });
    }

    async fn on_error(&self, error: BrokerError) {
        error!(error = %error, "broker subscription error");
        self.status.record_error("broker", error.to_string());
        self.status.set_subscription_active(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::AckOutcome;
    use crate::bus::MockBroker;
    use crate::storage::mock::MockStore;
    use crate::users::{Subscription, User, UserLookupError};
    use async_trait::async_trait as at;

    struct NoUsersDirectory;

    #[at]
    impl UserDirectory for NoUsersDirectory {
        async fn find_user(&self, _user_id: &str) -> Result<Option<User>, UserLookupError> {
            Ok(None)
        }
        async fn find_subscription(&self, _subscription_id: &str) -> Result<Option<Subscription>, UserLookupError> {
            Ok(None)
        }
    }

    fn controller(mock: Arc<MockBroker>) -> Arc<IngestionController> {
        Arc::new(IngestionController::new(
            mock,
            Arc::new(MockStore::new()),
            Arc::new(NoUsersDirectory),
            ProcessorRegistry::new(),
            Arc::new(ServiceStatus::new()),
            Arc::new(IngestionMetrics::new()),
            IngestionTopics {
                dlq: "dlq".into(),
                email_immediate: "email-immediate".into(),
                email_daily: "email-daily".into(),
                realtime: "realtime".into(),
            },
            1440,
            Duration::from_secs(30),
            10,
        ))
    }

    #[tokio::test]
    async fn happy_path_acks_and_creates_notification() {
        let mock = Arc::new(MockBroker::new());
        let controller = controller(mock.clone());

        let raw = br#"{
            "processor_type": "boe",
            "trace_id": "t1",
            "request": {"user_id": "u1", "subscription_id": "s1", "prompts": ["p"]},
            "results": {"matches": [{"prompt": "p", "documents": [{
                "document_type": "boe_document",
                "title": "Resolución X",
                "summary": "S",
                "links": {"html": "https://boe.es/x"}
            }]}]}
        }"#;

        mock.enqueue("m1", raw.to_vec()).await;

        let handler: Arc<dyn MessageHandler> = controller.clone();
        mock.subscribe("t", "s", handler).await.unwrap();

        let outcomes = mock.ack_outcomes().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].1, AckOutcome::Acked);
        assert_eq!(controller.metrics.snapshot().successful_messages, 1);
    }

    #[tokio::test]
    async fn unknown_processor_type_goes_to_dlq_and_acks() {
        let mock = Arc::new(MockBroker::new());
        let controller = controller(mock.clone());

        let raw = br#"{
            "processor_type": "foo",
            "request": {"user_id": "u1", "subscription_id": "s1"},
            "results": {"matches": []}
        }"#;
        mock.enqueue("m1", raw.to_vec()).await;

        let handler: Arc<dyn MessageHandler> = controller.clone();
        mock.subscribe("t", "s", handler).await.unwrap();

        let outcomes = mock.ack_outcomes().await;
        assert_eq!(outcomes[0].1, AckOutcome::Acked);
        assert_eq!(mock.dlq_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn dlq_publish_failure_nacks_instead_of_acking() {
        let mock = Arc::new(MockBroker::new());
        let controller = controller(mock.clone());
        mock.set_fail_publish(true).await;

        let raw = br#"{"processor_type": "foo", "request": {"user_id": "u1", "subscription_id": "s1"}, "results": {"matches": []}}"#;
        mock.enqueue("m1", raw.to_vec()).await;

        let handler: Arc<dyn MessageHandler> = controller.clone();
        mock.subscribe("t", "s", handler).await.unwrap();

        let outcomes = mock.ack_outcomes().await;
        assert_eq!(outcomes[0].1, AckOutcome::Nacked);
    }
}
