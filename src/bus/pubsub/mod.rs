//! Google Cloud Pub/Sub broker implementation.
//!
//! Topics and subscriptions are addressed by the plain names configured
//! in `BrokerConfig`; this worker has exactly one subscription to pull
//! from and a handful of well-known publish topics (DLQ, email-immediate,
//! email-daily, realtime), so there is no topic-per-domain routing.
//!
//! # Authentication
//!
//! Uses Application Default Credentials (ADC):
//! - `GOOGLE_APPLICATION_CREDENTIALS` pointing at a service account JSON, or
//! - `GOOGLE_APPLICATION_CREDENTIALS_JSON` with the JSON content inline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use google_cloud_googleapis::pubsub::v1::PubsubMessage;
use google_cloud_pubsub::client::{Client, ClientConfig};
use google_cloud_pubsub::publisher::Publisher;
use google_cloud_pubsub::subscription::SubscriptionConfig;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use super::{AckControl, BrokerAdapter, BrokerError, Delivery, MessageHandler, Result};

pub struct PubSubBroker {
    client: Client,
    publishers: RwLock<HashMap<String, Publisher>>,
}

impl PubSubBroker {
    /// Connect using Application Default Credentials.
    pub async fn new() -> Result<Self> {
        let config = ClientConfig::default()
            .with_auth()
            .await
            .map_err(|e| BrokerError::Connection(format!("pub/sub auth failed: {e}")))?;

        let client = Client::new(config)
            .await
            .map_err(|e| BrokerError::Connection(format!("pub/sub client init failed: {e}")))?;

        info!("connected to Google Cloud Pub/Sub");

        Ok(Self {
            client,
            publishers: RwLock::new(HashMap::new()),
        })
    }

    async fn get_publisher(&self, topic_name: &str) -> Result<Publisher> {
        if let Some(publisher) = self.publishers.read().await.get(topic_name) {
            return Ok(publisher.clone());
        }

        let topic = self.client.topic(topic_name);
        if !topic
            .exists(None)
            .await
            .map_err(|e| BrokerError::Publish(format!("checking topic {topic_name}: {e}")))?
        {
            topic
                .create(None, None)
                .await
                .map_err(|e| BrokerError::Publish(format!("creating topic {topic_name}: {e}")))?;
            info!(topic = %topic_name, "created pub/sub topic");
        }

        let publisher = topic.new_publisher(None);
        self.publishers
            .write()
            .await
            .insert(topic_name.to_string(), publisher.clone());
        Ok(publisher)
    }
}

struct PubSubAck {
    message: google_cloud_pubsub::subscriber::ReceivedMessage,
}

#[async_trait]
impl AckControl for PubSubAck {
    async fn ack(&self) {
        if let Err(e) = self.message.ack().await {
            error!(error = %e, "failed to ack pub/sub message");
        }
    }

    async fn nack(&self) {
        if let Err(e) = self.message.nack().await {
            error!(error = %e, "failed to nack pub/sub message");
        }
    }
}

#[async_trait]
impl BrokerAdapter for PubSubBroker {
    async fn subscribe(
        &self,
        topic: &str,
        subscription: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        let sub = self.client.subscription(subscription);

        if !sub
            .exists(None)
            .await
            .map_err(|e| BrokerError::Subscribe(format!("checking subscription {subscription}: {e}")))?
        {
            let topic_handle = self.client.topic(topic);
            let sub_config = SubscriptionConfig {
                ack_deadline_seconds: 30,
                ..Default::default()
            };
            sub.create(topic_handle.fully_qualified_name(), sub_config, None)
                .await
                .map_err(|e| {
                    BrokerError::Subscribe(format!("creating subscription {subscription}: {e}"))
                })?;
            info!(subscription, topic, "created pub/sub subscription");
        }

        loop {
            match sub.pull(10, None).await {
                Ok(messages) => {
                    for received in messages {
                        let data = bytes::Bytes::copy_from_slice(&received.message.data);
                        let message_id = received.message.message_id.clone();
                        let publish_time = received
                            .message
                            .publish_time
                            .as_ref()
                            .and_then(|t| chrono::DateTime::from_timestamp(t.seconds, t.nanos as u32))
                            .unwrap_or_else(chrono::Utc::now);

                        let ack = Arc::new(PubSubAck { message: received });
                        let delivery = Delivery::new(data, message_id, publish_time, ack);
                        handler.handle(delivery).await;
                    }
                }
                Err(e) => {
                    let err = BrokerError::Subscribe(format!("pull from {subscription}: {e}"));
                    handler.on_error(err).await;
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        super::retry_publish(topic, || async {
            let publisher = self.get_publisher(topic).await?;
            let message = PubsubMessage {
                data: payload.clone().into(),
                ..Default::default()
            };
            let awaiter = publisher.publish(message).await;
            awaiter
                .get()
                .await
                .map_err(|e| BrokerError::Publish(format!("publish to {topic}: {e}")))?;
            debug!(topic, "published message");
            Ok(())
        })
        .await
    }

    async fn publish_dlq(&self, topic: &str, payload: Vec<u8>) -> bool {
        match self.publish(topic, payload).await {
            Ok(()) => true,
            Err(e) => {
                error!(topic, error = %e, "failed to publish to dead-letter topic");
                false
            }
        }
    }

    async fn close(&self) {
        self.publishers.write().await.clear();
    }
}
