//! The persisted notification model and the per-batch outcome types that
//! flow out of the writer and dedup gate.

pub mod dedup;
pub mod writer;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Status a notification can be in once persisted. Only ever flipped
/// explicitly; never implied by other fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Unread,
    Read,
    Archived,
}

impl Default for NotificationStatus {
    fn default() -> Self {
        Self::Unread
    }
}

/// A notification row waiting to be inserted. Distinct from `Notification`
/// because `id`/`created_at`/`updated_at` are assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub user_id: String,
    pub subscription_id: String,
    pub title: String,
    pub content: String,
    pub source_url: String,
    pub entity_type: String,
    pub metadata: HashMap<String, Value>,
}

/// An immutable, persisted notification. Once written, only `status` and
/// `email_sent` are ever mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    pub subscription_id: String,
    pub title: String,
    pub content: String,
    pub source_url: String,
    pub entity_type: String,
    pub metadata: HashMap<String, Value>,
    pub status: NotificationStatus,
    pub email_sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The outcome of trying to persist one candidate notification.
#[derive(Debug, Clone, Serialize)]
pub struct RecordOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecordOutcome {
    pub fn success(id: Uuid) -> Self {
        Self {
            success: true,
            id: Some(id),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            id: None,
            error: Some(error.into()),
        }
    }
}

/// Aggregate outcome of persisting every candidate from one envelope.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NotificationCreationResult {
    pub records: Vec<RecordOutcome>,
    pub created: usize,
    pub errors: usize,
    pub duplicates: usize,
}

impl NotificationCreationResult {
    pub fn record_created(&mut self, id: Uuid) {
        self.records.push(RecordOutcome::success(id));
        self.created += 1;
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.records.push(RecordOutcome::failure(error));
        self.errors += 1;
    }

    pub fn record_duplicate(&mut self) {
        self.duplicates += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_result_tallies_match_record_count() {
        let mut result = NotificationCreationResult::default();
        result.record_created(Uuid::new_v4());
        result.record_error("boom");
        result.record_duplicate();

        assert_eq!(result.created, 1);
        assert_eq!(result.errors, 1);
        assert_eq!(result.duplicates, 1);
        // duplicates are not persisted-attempt records
        assert_eq!(result.records.len(), 2);
    }
}
