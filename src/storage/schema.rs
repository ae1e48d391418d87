//! Table and column identifiers for the `notifications` table, used with
//! sea-query's builder instead of hand-written SQL strings.

use sea_query::Iden;

#[derive(Iden)]
pub enum Notifications {
    Table,
    Id,
    UserId,
    SubscriptionId,
    Title,
    Content,
    SourceUrl,
    EntityType,
    Metadata,
    Status,
    EmailSent,
    CreatedAt,
    UpdatedAt,
}

/// Schema assumed pre-provisioned in production; used by test fixtures
/// that stand up a throwaway database.
pub const CREATE_NOTIFICATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS notifications (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    user_id TEXT NOT NULL,
    subscription_id TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    source_url TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    metadata JSONB NOT NULL DEFAULT '{}',
    status TEXT NOT NULL DEFAULT 'unread',
    email_sent BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_notifications_dedup
    ON notifications (user_id, entity_type, source_url, title, created_at);
"#;
