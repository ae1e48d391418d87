//! Delivery dispatcher: decides the email channel for each persisted
//! notification and publishes the realtime fan-out event.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{error, warn};

use crate::bus::BrokerAdapter;
use crate::notifications::Notification;
use crate::storage::NotificationStore;
use crate::users::{User, UserDirectory, UserLookupError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailChannel {
    None,
    Immediate,
    Digest,
}

#[derive(Debug, Serialize)]
struct EmailNotificationItem<'a> {
    id: String,
    title: &'a str,
    content: &'a str,
    source_url: &'a str,
    subscription_name: &'a str,
    created_at: chrono::DateTime<Utc>,
}

pub struct Topics<'a> {
    pub email_immediate: &'a str,
    pub email_daily: &'a str,
    pub realtime: &'a str,
}

/// Deliver one persisted notification: email (instant/digest/none) plus
/// an unconditional realtime publish. Every publish uses the broker's
/// own retry policy; realtime failures are logged and swallowed so they
/// never hold up the caller's ack decision. Returns whether the realtime
/// publish succeeded, since it's the one publish attempted on every call
/// and so doubles as a broker-health signal for the caller.
pub async fn deliver(
    broker: &dyn BrokerAdapter,
    store: &dyn NotificationStore,
    directory: &dyn UserDirectory,
    topics: &Topics<'_>,
    notification: &Notification,
    subscription_name: &str,
) -> bool {
    let user = match directory.find_user(&notification.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!(user_id = %notification.user_id, "user not found, skipping delivery");
            return publish_realtime(broker, topics.realtime, notification).await;
        }
        Err(UserLookupError::UserNotFound(_)) => {
            warn!(user_id = %notification.user_id, "user not found, skipping delivery");
            return publish_realtime(broker, topics.realtime, notification).await;
        }
        Err(e) => {
            error!(user_id = %notification.user_id, error = %e, "user lookup failed, skipping email");
            return publish_realtime(broker, topics.realtime, notification).await;
        }
    };

    let channel = if user.should_receive_instant() {
        EmailChannel::Immediate
    } else if user.should_receive_digest() {
        EmailChannel::Digest
    } else {
        EmailChannel::None
    };

    match channel {
        EmailChannel::Immediate => {
            if publish_email(broker, topics.email_immediate, &user, "immediate", notification, subscription_name)
                .await
                .is_ok()
            {
                if let Err(e) = store.mark_email_sent(notification.id).await {
                    error!(id = %notification.id, error = %e, "failed to flip email_sent flag");
                }
            }
        }
        EmailChannel::Digest => {
            let _ = publish_email(broker, topics.email_daily, &user, "digest", notification, subscription_name).await;
        }
        EmailChannel::None => {}
    }

    publish_realtime(broker, topics.realtime, notification).await
}

async fn publish_email(
    broker: &dyn BrokerAdapter,
    topic: &str,
    user: &User,
    kind: &str,
    notification: &Notification,
    subscription_name: &str,
) -> Result<(), ()> {
    let item = EmailNotificationItem {
        id: notification.id.to_string(),
        title: &notification.title,
        content: &notification.content,
        source_url: &notification.source_url,
        subscription_name,
        created_at: notification.created_at,
    };

    let payload = json!({
        "user_id": notification.user_id,
        "email": user.delivery_email(),
        "type": kind,
        "notifications": [item],
        "timestamp": Utc::now(),
    });

    let bytes = match serde_json::to_vec(&payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "failed to serialize email payload");
            return Err(());
        }
    };

    broker.publish(topic, bytes).await.map_err(|e| {
        error!(topic, error = %e, "email publish failed");
    })
}

async fn publish_realtime(broker: &dyn BrokerAdapter, topic: &str, notification: &Notification) -> bool {
    let payload = json!({
        "user_id": notification.user_id,
        "notification_id": notification.id,
        "title": notification.title,
        "entity_type": notification.entity_type,
        "timestamp": Utc::now(),
    });

    let Ok(bytes) = serde_json::to_vec(&payload) else {
        return false;
    };

    match broker.publish(topic, bytes).await {
        Ok(()) => true,
        Err(e) => {
            warn!(topic, error = %e, "realtime publish failed, swallowing");
            false
        }
    }
}
