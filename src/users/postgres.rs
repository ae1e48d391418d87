//! Postgres-backed user/subscription lookups.
//!
//! Read-only: the `users` and `subscriptions` tables are owned by the
//! platform service that manages accounts, not by this worker. This
//! adapter only ever issues `SELECT`s.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::{DigestFrequency, Subscription, User, UserDirectory, UserLookupError, UserPrefs};

pub struct PostgresUserDirectory {
    pool: PgPool,
}

impl PostgresUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PostgresUserDirectory {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>, UserLookupError> {
        let row = sqlx::query(
            "SELECT id, email, email_notifications, instant_notifications, \
             notification_email, digest_frequency, is_test_user \
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| UserLookupError::Backend(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let digest_frequency = match row
            .try_get::<String, _>("digest_frequency")
            .map_err(|e| UserLookupError::Backend(e.to_string()))?
            .as_str()
        {
            "weekly" => DigestFrequency::Weekly,
            "never" => DigestFrequency::Never,
            _ => DigestFrequency::Daily,
        };

        Ok(Some(User {
            id: row.try_get("id").map_err(|e| UserLookupError::Backend(e.to_string()))?,
            email: row.try_get("email").map_err(|e| UserLookupError::Backend(e.to_string()))?,
            prefs: UserPrefs {
                email_notifications: row
                    .try_get("email_notifications")
                    .map_err(|e| UserLookupError::Backend(e.to_string()))?,
                instant_notifications: row
                    .try_get("instant_notifications")
                    .map_err(|e| UserLookupError::Backend(e.to_string()))?,
                notification_email: row
                    .try_get("notification_email")
                    .map_err(|e| UserLookupError::Backend(e.to_string()))?,
                digest_frequency,
            },
            is_test_user: row
                .try_get("is_test_user")
                .map_err(|e| UserLookupError::Backend(e.to_string()))?,
        }))
    }

    async fn find_subscription(&self, subscription_id: &str) -> Result<Option<Subscription>, UserLookupError> {
        let row = sqlx::query("SELECT id, user_id, name, status FROM subscriptions WHERE id = $1")
            .bind(subscription_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| UserLookupError::Backend(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(Subscription {
            id: row.try_get("id").map_err(|e| UserLookupError::Backend(e.to_string()))?,
            user_id: row.try_get("user_id").map_err(|e| UserLookupError::Backend(e.to_string()))?,
            name: row.try_get("name").map_err(|e| UserLookupError::Backend(e.to_string()))?,
            status: row.try_get("status").map_err(|e| UserLookupError::Backend(e.to_string()))?,
        }))
    }
}
