//! Dead-letter envelope and publish helper.
//!
//! Messages that cannot be processed (parse failure, unknown processor
//! tag, schema validation failure) are wrapped in a `DeadLetterEnvelope`
//! and published to the configured DLQ topic. Publishing is best-effort:
//! callers decide what to do if it fails (see the ingestion controller's
//! ack/nack rules).

use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bus::BrokerAdapter;

/// `{message, name, stack}` — `name` identifies the error kind the way a
/// thrown-exception `.name` would in the systems this worker replaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterError {
    pub message: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl DeadLetterError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            name: name.into(),
            stack: None,
        }
    }
}

/// Wire payload for the DLQ topic: `{original_data, error, timestamp}`.
/// `original_data` carries the raw message bytes base64-encoded, since
/// they may not be valid JSON (that's often exactly why they're here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEnvelope {
    pub original_data: String,
    pub error: DeadLetterError,
    pub timestamp: DateTime<Utc>,
}

impl DeadLetterEnvelope {
    /// Build from the raw bytes that could not be processed.
    pub fn new(raw: &[u8], error: DeadLetterError) -> Self {
        Self {
            original_data: BASE64_STANDARD.encode(raw),
            error,
            timestamp: Utc::now(),
        }
    }
}

/// Publish `envelope` to `topic` via `broker`, returning whether the
/// publish succeeded so the caller can decide ack/nack accordingly — a
/// dropped dead letter is worse than a redelivery.
pub async fn publish(broker: &dyn BrokerAdapter, topic: &str, envelope: DeadLetterEnvelope) -> bool {
    match serde_json::to_vec(&envelope) {
        Ok(payload) => broker.publish_dlq(topic, payload).await,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize dead-letter envelope");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockBroker;

    #[tokio::test]
    async fn publishes_wrapped_payload_to_dlq() {
        let broker = MockBroker::new();
        let envelope = DeadLetterEnvelope::new(
            br#"{"processor_type":"foo"}"#,
            DeadLetterError::new("UnknownProcessorTypeError", "no processor registered for foo"),
        );
        assert!(publish(&broker, "dlq-topic", envelope).await);

        let messages = broker.dlq_messages().await;
        assert_eq!(messages.len(), 1);
        let decoded: DeadLetterEnvelope = serde_json::from_slice(&messages[0].1).unwrap();
        assert_eq!(decoded.error.name, "UnknownProcessorTypeError");
        assert_eq!(
            BASE64_STANDARD.decode(&decoded.original_data).unwrap(),
            br#"{"processor_type":"foo"}"#
        );
    }

    #[test]
    fn non_json_bytes_are_base64_encoded() {
        let envelope = DeadLetterEnvelope::new(b"not json", DeadLetterError::new("ParseError", "bad json"));
        assert_eq!(BASE64_STANDARD.decode(&envelope.original_data).unwrap(), b"not json");
    }

    #[tokio::test]
    async fn publish_failure_is_reported() {
        let broker = MockBroker::new();
        broker.set_fail_publish(true).await;
        let envelope = DeadLetterEnvelope::new(b"x", DeadLetterError::new("ParseError", "bad json"));
        assert!(!publish(&broker, "dlq-topic", envelope).await);
    }
}
