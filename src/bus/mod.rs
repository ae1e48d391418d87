//! Broker adapter: message leasing, publish, and DLQ.
//!
//! `BrokerAdapter` is the seam between the ingestion controller and the
//! underlying pub/sub implementation. Implementations:
//! - `PubSubBroker`: Google Cloud Pub/Sub (the only production backend).
//! - `MockBroker`: in-memory, for tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{error, warn};

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
#[cfg(feature = "pubsub")]
pub mod pubsub;

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockBroker;
#[cfg(feature = "pubsub")]
pub use pubsub::PubSubBroker;

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors that can occur during broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),
}

/// One leased message, with the identifying metadata a handler needs
/// plus an ack/nack control handle.
pub struct Delivery {
    pub data: Bytes,
    pub message_id: String,
    pub publish_time: DateTime<Utc>,
    ack: Arc<dyn AckControl>,
}

impl Delivery {
    pub fn new(
        data: impl Into<Bytes>,
        message_id: impl Into<String>,
        publish_time: DateTime<Utc>,
        ack: Arc<dyn AckControl>,
    ) -> Self {
        Self {
            data: data.into(),
            message_id: message_id.into(),
            publish_time,
            ack,
        }
    }

    /// Acknowledge the message: it will not be redelivered.
    pub async fn ack(&self) {
        self.ack.ack().await;
    }

    /// Negative-acknowledge the message: the broker will redeliver it.
    pub async fn nack(&self) {
        self.ack.nack().await;
    }
}

/// Ack/nack control, abstracted so the ingestion controller never touches
/// a concrete broker client type.
#[async_trait]
pub trait AckControl: Send + Sync {
    async fn ack(&self);
    async fn nack(&self);
}

/// Handler invoked for every leased message.
///
/// Contract: the handler must invoke exactly one of `delivery.ack()` /
/// `delivery.nack()` on every call, on every path. `BrokerAdapter::subscribe`
/// does not enforce this itself; the ingestion controller is the sole
/// handler and owns that discipline.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Takes `Arc<Self>` rather than `&self` so implementations can spawn
    /// the per-message work as its own task and return before it finishes
    /// — letting the subscribe loop keep pulling up to its configured
    /// concurrency instead of processing one message at a time.
    async fn handle(self: Arc<Self>, delivery: Delivery);

    /// Invoked when the underlying subscription itself errors (not a
    /// per-message failure). The adapter remains alive; re-subscription,
    /// if desired, is the caller's job.
    async fn on_error(&self, error: BrokerError);
}

/// Interface for leasing and publishing messages.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Lease messages from `subscription`, invoking `handler` for each.
    /// Topics/subscriptions are created on demand if missing.
    async fn subscribe(
        &self,
        topic: &str,
        subscription: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()>;

    /// Publish `payload` to `topic`, retried with exponential backoff
    /// (initial 2s, factor 2, cap 15s, max 3 attempts).
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Publish `payload` to the DLQ topic. Failures are logged by the
    /// implementation; the returned `bool` tells the caller whether the
    /// dead letter actually made it, since a dropped dead letter changes
    /// the caller's ack/nack decision.
    async fn publish_dlq(&self, topic: &str, payload: Vec<u8>) -> bool;

    /// Stop leasing new messages and release broker resources.
    async fn close(&self);
}

/// The shared publish retry policy: initial 2s, factor 2, capped at 15s,
/// max 3 attempts. Used by every `BrokerAdapter::publish` implementation.
pub fn publish_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(2))
        .with_factor(2.0)
        .with_max_delay(Duration::from_secs(15))
        .with_max_times(3)
}

/// Run `op` under the shared publish retry policy, logging each retry.
pub async fn retry_publish<F, Fut, T>(topic: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = publish_backoff().build();
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => match backoff.next() {
                Some(delay) => {
                    warn!(topic, attempt, error = %e, delay_ms = %delay.as_millis(), "publish failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!(topic, attempt, error = %e, "publish failed, retries exhausted");
                    return Err(e);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retry_publish_succeeds_after_transient_failures() {
        let attempts = std::sync::atomic::AtomicUsize::new(0);
        let result: Result<()> = retry_publish("t", || {
            let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(BrokerError::Publish("transient".into()))
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_publish_gives_up_after_max_attempts() {
        let attempts = std::sync::atomic::AtomicUsize::new(0);
        let result: Result<()> = retry_publish("t", || {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move { Err(BrokerError::Publish("permanent".into())) }
        })
        .await;
        assert!(result.is_err());
        // 1 initial attempt + up to 3 retries per publish_backoff()
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 4);
    }
}
