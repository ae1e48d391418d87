//! Deduplication gate: best-effort, non-transactional duplicate check
//! over a sliding time window.

use serde_json::Value;
use tracing::warn;

use crate::storage::NotificationStore;

/// Is `candidate` a duplicate of something already persisted for
/// `user_id` within `window_minutes`? On store failure this returns
/// `false` (not a duplicate) and logs a warning — dedup unavailability
/// must never drop a notification.
pub async fn is_duplicate(
    store: &dyn NotificationStore,
    user_id: &str,
    title: &str,
    source_url: &str,
    entity_type: &str,
    metadata: &std::collections::HashMap<String, Value>,
    window_minutes: i64,
) -> bool {
    let document_id = metadata.get("document_id").and_then(Value::as_str);

    match store
        .find_duplicate(user_id, title, source_url, entity_type, document_id, window_minutes)
        .await
    {
        Ok(found) => found,
        Err(e) => {
            warn!(user_id, error = %e, "dedup lookup failed, treating as not a duplicate");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::NewNotification;
    use crate::storage::mock::MockStore;
    use std::collections::HashMap;

    #[tokio::test]
    async fn second_delivery_within_window_is_duplicate() {
        let store = MockStore::new();
        store
            .insert(NewNotification {
                user_id: "u1".into(),
                subscription_id: "s1".into(),
                title: "Resolución X".into(),
                content: "c".into(),
                source_url: "https://boe.es/x".into(),
                entity_type: "boe:boe_document".into(),
                metadata: HashMap::new(),
            })
            .await
            .unwrap();

        let duplicate = is_duplicate(
            &store,
            "u1",
            "Resolución X",
            "https://boe.es/x",
            "boe:boe_document",
            &HashMap::new(),
            1440,
        )
        .await;
        assert!(duplicate);
    }

    #[tokio::test]
    async fn different_entity_type_is_not_duplicate() {
        let store = MockStore::new();
        store
            .insert(NewNotification {
                user_id: "u1".into(),
                subscription_id: "s1".into(),
                title: "Resolución X".into(),
                content: "c".into(),
                source_url: "https://boe.es/x".into(),
                entity_type: "boe:boe_document".into(),
                metadata: HashMap::new(),
            })
            .await
            .unwrap();

        let duplicate = is_duplicate(
            &store,
            "u1",
            "Resolución X",
            "https://boe.es/x",
            "real-estate:listing",
            &HashMap::new(),
            1440,
        )
        .await;
        assert!(!duplicate);
    }
}
