//! In-memory broker for tests.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, RwLock};

use super::{AckControl, BrokerAdapter, BrokerError, Delivery, MessageHandler, Result};

/// Records every `ack`/`nack` decision a handler made, keyed by message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Acked,
    Nacked,
}

struct RecordingAck {
    message_id: String,
    outcomes: Arc<RwLock<Vec<(String, AckOutcome)>>>,
}

#[async_trait]
impl AckControl for RecordingAck {
    async fn ack(&self) {
        self.outcomes
            .write()
            .await
            .push((self.message_id.clone(), AckOutcome::Acked));
    }

    async fn nack(&self) {
        self.outcomes
            .write()
            .await
            .push((self.message_id.clone(), AckOutcome::Nacked));
    }
}

/// In-memory `BrokerAdapter`. Messages published to a topic are queued and
/// delivered to whatever handler is subscribed to a matching subscription
/// name; published DLQ/downstream payloads are retained for inspection.
#[derive(Default)]
pub struct MockBroker {
    published: RwLock<Vec<(String, Vec<u8>)>>,
    dlq: RwLock<Vec<(String, Vec<u8>)>>,
    outcomes: Arc<RwLock<Vec<(String, AckOutcome)>>>,
    queued: RwLock<Vec<(String, Vec<u8>)>>,
    fail_publish: RwLock<bool>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_publish(&self, fail: bool) {
        *self.fail_publish.write().await = fail;
    }

    /// Enqueue a raw payload as if it had arrived on the subscription, to
    /// be delivered the next time `subscribe` drains the queue.
    pub async fn enqueue(&self, message_id: impl Into<String>, payload: Vec<u8>) {
        self.queued.write().await.push((message_id.into(), payload));
    }

    pub async fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.read().await.clone()
    }

    pub async fn dlq_messages(&self) -> Vec<(String, Vec<u8>)> {
        self.dlq.read().await.clone()
    }

    pub async fn ack_outcomes(&self) -> Vec<(String, AckOutcome)> {
        self.outcomes.read().await.clone()
    }
}

#[async_trait]
impl BrokerAdapter for MockBroker {
    async fn subscribe(
        &self,
        _topic: &str,
        _subscription: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        let queued = std::mem::take(&mut *self.queued.write().await);
        for (message_id, payload) in queued {
            let ack = Arc::new(RecordingAck {
                message_id: message_id.clone(),
                outcomes: self.outcomes.clone(),
            });
            let delivery = Delivery::new(payload, message_id, Utc::now(), ack);
            handler.handle(delivery).await;
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if *self.fail_publish.read().await {
            return Err(BrokerError::Publish("mock configured to fail".into()));
        }
        self.published.write().await.push((topic.to_string(), payload));
        Ok(())
    }

    async fn publish_dlq(&self, topic: &str, payload: Vec<u8>) -> bool {
        if *self.fail_publish.read().await {
            return false;
        }
        self.dlq.write().await.push((topic.to_string(), payload));
        true
    }

    async fn close(&self) {}
}

/// Adapts an `mpsc::Receiver` into a stream of deliveries for tests that
/// need a live subscribe loop rather than one-shot draining.
pub async fn drain_into(
    mut rx: mpsc::Receiver<(String, Vec<u8>)>,
    outcomes: Arc<RwLock<Vec<(String, AckOutcome)>>>,
    handler: Arc<dyn MessageHandler>,
) {
    while let Some((message_id, payload)) = rx.recv().await {
        let ack = Arc::new(RecordingAck {
            message_id: message_id.clone(),
            outcomes: outcomes.clone(),
        });
        let delivery = Delivery::new(payload, message_id, Utc::now(), ack);
        handler.handle(delivery).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AckingHandler;

    #[async_trait]
    impl MessageHandler for AckingHandler {
        async fn handle(self: Arc<Self>, delivery: Delivery) {
            delivery.ack().await;
        }

        async fn on_error(&self, _error: BrokerError) {}
    }

    #[tokio::test]
    async fn enqueued_message_is_delivered_and_acked() {
        let broker = MockBroker::new();
        broker.enqueue("m1", b"payload".to_vec()).await;
        broker
            .subscribe("topic", "sub", Arc::new(AckingHandler))
            .await
            .unwrap();
        let outcomes = broker.ack_outcomes().await;
        assert_eq!(outcomes, vec![("m1".to_string(), AckOutcome::Acked)]);
    }

    #[tokio::test]
    async fn publish_records_payload() {
        let broker = MockBroker::new();
        broker.publish("t", b"hello".to_vec()).await.unwrap();
        assert_eq!(broker.published().await, vec![("t".to_string(), b"hello".to_vec())]);
    }

    #[tokio::test]
    async fn publish_failure_is_reported() {
        let broker = MockBroker::new();
        broker.set_fail_publish(true).await;
        assert!(broker.publish("t", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn dlq_publish_records_payload_and_reports_success() {
        let broker = MockBroker::new();
        assert!(broker.publish_dlq("dlq", b"bad".to_vec()).await);
        assert_eq!(broker.dlq_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn dlq_publish_reports_failure_without_panicking() {
        let broker = MockBroker::new();
        broker.set_fail_publish(true).await;
        assert!(!broker.publish_dlq("dlq", b"bad".to_vec()).await);
        assert!(broker.dlq_messages().await.is_empty());
    }
}
