//! Notification writer: per-row persistence with RLS, continue-on-error,
//! and a narrow connection-failure retry.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use tracing::{error, warn};

use crate::notifications::{NewNotification, Notification, NotificationCreationResult};
use crate::storage::{NotificationStore, StorageError};

/// 100 ms, 200 ms, 400 ms, three attempts total — the connection-failure
/// retry window for a single INSERT.
fn connection_retry_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_factor(2.0)
        .with_max_delay(Duration::from_millis(400))
        .with_max_times(3)
}

/// Write one row, retrying only connection-shaped failures. Returns
/// `Ok(notification)` on success, or the last error if retries (if any)
/// are exhausted.
async fn insert_with_retry(
    store: &dyn NotificationStore,
    new: NewNotification,
) -> Result<Notification, StorageError> {
    let mut backoff = connection_retry_backoff().build();
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        match store.insert(new.clone()).await {
            Ok(notification) => return Ok(notification),
            Err(e) => {
                let retryable = matches!(&e, StorageError::Database(db_err) if crate::storage::is_retryable(db_err));
                if !retryable {
                    return Err(e);
                }
                match backoff.next() {
                    Some(delay) => {
                        warn!(attempt, error = %e, "transient write failure, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        error!(attempt, error = %e, "write retries exhausted");
                        return Err(e);
                    }
                }
            }
        }
    }
}

/// Persist `candidates` one at a time, in order. Stops early and returns
/// the connection error if a retried write exhausts its attempts — the
/// caller (the ingestion controller) nacks the whole message in that
/// case. Any other per-row error is recorded and the loop continues.
pub async fn write_batch(
    store: &dyn NotificationStore,
    candidates: Vec<NewNotification>,
) -> Result<(NotificationCreationResult, Vec<Notification>), StorageError> {
    let mut result = NotificationCreationResult::default();
    let mut persisted = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let user_id = candidate.user_id.clone();
        let trace_id = candidate.metadata.get("trace_id").and_then(|v| v.as_str()).map(str::to_string);
        let document_id = candidate.metadata.get("document_id").and_then(|v| v.as_str()).map(str::to_string);
        match insert_with_retry(store, candidate).await {
            Ok(notification) => {
                result.record_created(notification.id);
                persisted.push(notification);
            }
            Err(e) => {
                let connection_exhausted =
                    matches!(&e, StorageError::Database(db_err) if crate::storage::is_retryable(db_err));
                if connection_exhausted {
                    return Err(e);
                }
                error!(user_id, trace_id = ?trace_id, document_id = ?document_id, error = %e, "failed to persist notification");
                result.record_error(e.to_string());
            }
        }
    }

    Ok((result, persisted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::MockStore;
    use std::collections::HashMap;

    fn candidate(title: &str) -> NewNotification {
        NewNotification {
            user_id: "u1".into(),
            subscription_id: "s1".into(),
            title: title.into(),
            content: "c".into(),
            source_url: "https://example.com".into(),
            entity_type: "boe:document".into(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn writes_every_candidate_in_order() {
        let store = MockStore::new();
        let (result, persisted) =
            write_batch(&store, vec![candidate("a"), candidate("b")]).await.unwrap();
        assert_eq!(result.created, 2);
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[0].title, "a");
        assert_eq!(persisted[1].title, "b");
    }

    #[tokio::test]
    async fn empty_batch_is_a_noop() {
        let store = MockStore::new();
        let (result, persisted) = write_batch(&store, vec![]).await.unwrap();
        assert_eq!(result.created, 0);
        assert!(persisted.is_empty());
    }
}
