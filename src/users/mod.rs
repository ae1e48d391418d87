//! User and subscription lookups, and the email-eligibility predicates
//! derived from user preferences.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "postgres")]
pub use postgres::PostgresUserDirectory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestFrequency {
    Daily,
    Weekly,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPrefs {
    pub email_notifications: bool,
    pub instant_notifications: bool,
    pub notification_email: Option<String>,
    pub digest_frequency: DigestFrequency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub prefs: UserPrefs,
    pub is_test_user: bool,
}

impl User {
    /// Contains `@` and `.`, checked against `notification_email` if set,
    /// else the account email.
    pub fn valid_email(&self) -> bool {
        let candidate = self.prefs.notification_email.as_deref().unwrap_or(&self.email);
        candidate.contains('@') && candidate.contains('.')
    }

    pub fn should_receive_instant(&self) -> bool {
        self.is_test_user || (self.prefs.instant_notifications && self.valid_email())
    }

    pub fn should_receive_digest(&self) -> bool {
        self.prefs.email_notifications
            && self.prefs.digest_frequency != DigestFrequency::Never
            && self.valid_email()
    }

    pub fn delivery_email(&self) -> &str {
        self.prefs.notification_email.as_deref().unwrap_or(&self.email)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub status: String,
}

impl Subscription {
    pub fn owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UserLookupError {
    #[error("user {0} not found")]
    UserNotFound(String),

    #[error("subscription {0} not found")]
    SubscriptionNotFound(String),

    #[error("lookup backend error: {0}")]
    Backend(String),
}

/// Read-only lookup port; owned by whatever table/service holds users
/// and subscriptions (outside this worker's write path).
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>, UserLookupError>;
    async fn find_subscription(&self, subscription_id: &str) -> Result<Option<Subscription>, UserLookupError>;
}
