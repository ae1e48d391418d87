//! In-memory notification store for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::notifications::{NewNotification, Notification, NotificationStatus};
use crate::storage::{window_start, NotificationStore, Result};

#[derive(Default)]
pub struct MockStore {
    rows: Mutex<Vec<Notification>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<Notification> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationStore for MockStore {
    async fn insert(&self, new: NewNotification) -> Result<Notification> {
        let now = Utc::now();
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            subscription_id: new.subscription_id,
            title: new.title,
            content: new.content,
            source_url: new.source_url,
            entity_type: new.entity_type,
            metadata: new.metadata,
            status: NotificationStatus::Unread,
            email_sent: false,
            created_at: now,
            updated_at: now,
        };
        self.rows.lock().unwrap().push(notification.clone());
        Ok(notification)
    }

    async fn find_duplicate(
        &self,
        user_id: &str,
        title: &str,
        source_url: &str,
        entity_type: &str,
        document_id: Option<&str>,
        window_minutes: i64,
    ) -> Result<bool> {
        let since = window_start(Utc::now(), window_minutes);
        let rows = self.rows.lock().unwrap();
        Ok(rows.iter().any(|row| {
            row.user_id == user_id
                && row.title == title
                && row.source_url == source_url
                && row.entity_type == entity_type
                && row.created_at >= since
                && document_id.map_or(true, |doc_id| {
                    row.metadata
                        .get("document_id")
                        .and_then(|v| v.as_str())
                        .is_some_and(|existing| existing == doc_id)
                })
        }))
    }

    async fn mark_email_sent(&self, id: Uuid) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|row| row.id == id) {
            row.email_sent = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample() -> NewNotification {
        NewNotification {
            user_id: "u1".into(),
            subscription_id: "s1".into(),
            title: "Title".into(),
            content: "Content".into(),
            source_url: "https://example.com".into(),
            entity_type: "boe:document".into(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn insert_then_find_duplicate_matches() {
        let store = MockStore::new();
        store.insert(sample()).await.unwrap();
        let dup = store
            .find_duplicate("u1", "Title", "https://example.com", "boe:document", None, 1440)
            .await
            .unwrap();
        assert!(dup);
    }

    #[tokio::test]
    async fn find_duplicate_false_for_other_user() {
        let store = MockStore::new();
        store.insert(sample()).await.unwrap();
        let dup = store
            .find_duplicate("u2", "Title", "https://example.com", "boe:document", None, 1440)
            .await
            .unwrap();
        assert!(!dup);
    }

    #[tokio::test]
    async fn mark_email_sent_flips_flag() {
        let store = MockStore::new();
        let notification = store.insert(sample()).await.unwrap();
        store.mark_email_sent(notification.id).await.unwrap();
        assert!(store.rows()[0].email_sent);
    }
}
