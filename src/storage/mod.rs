//! Notification persistence.
//!
//! `NotificationStore` is the seam the writer and dedup gate use; it has
//! one production implementation (`PostgresStore`, RLS-aware) and one
//! in-memory implementation for tests (`MockStore`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::notifications::{NewNotification, Notification};

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "postgres")]
pub mod schema;

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Error classes a caller can act on. The connection-ish classes are what
/// `is_retryable` matches to drive the writer's backoff loop.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    #[cfg(feature = "postgres")]
    Database(#[from] sqlx::Error),

    #[error("database error: {0}")]
    #[cfg(not(feature = "postgres"))]
    Database(String),

    #[error("notification {0} not found")]
    NotFound(Uuid),
}

/// Whether `error` belongs to the transient, connection-shaped class the
/// writer retries (ECONNREFUSED, timeout, admin_shutdown/57P01,
/// cannot_connect_now/57P03, connection terminated). Everything else
/// fails fast.
#[cfg(feature = "postgres")]
pub fn is_retryable(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => {
            matches!(db_err.code().as_deref(), Some("57P01") | Some("57P03"))
        }
        sqlx::Error::Protocol(msg) => msg.contains("connection terminated"),
        _ => false,
    }
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert one notification. Implementations must set the RLS session
    /// parameter for `new.user_id` on the same connection immediately
    /// before the INSERT.
    async fn insert(&self, new: NewNotification) -> Result<Notification>;

    /// Is there already a notification for `user_id` with the given
    /// composite key, created within `window_minutes` of now? `document_id`
    /// participates in the key when present.
    async fn find_duplicate(
        &self,
        user_id: &str,
        title: &str,
        source_url: &str,
        entity_type: &str,
        document_id: Option<&str>,
        window_minutes: i64,
    ) -> Result<bool>;

    async fn mark_email_sent(&self, id: Uuid) -> Result<()>;
}

/// Helper shared by both implementations: the lower bound of the dedup
/// window given "now".
pub fn window_start(now: DateTime<Utc>, window_minutes: i64) -> DateTime<Utc> {
    now - chrono::Duration::minutes(window_minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_start_subtracts_minutes() {
        let now = Utc::now();
        let start = window_start(now, 1440);
        assert_eq!((now - start).num_minutes(), 1440);
    }
}
