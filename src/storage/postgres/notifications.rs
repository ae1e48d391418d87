use async_trait::async_trait;
use sea_query::{Expr, PostgresQueryBuilder, Query};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::notifications::{NewNotification, Notification, NotificationStatus};
use crate::storage::schema::Notifications;
use crate::storage::{window_start, NotificationStore, Result};

/// Notification storage backed by Postgres. Every write borrows a
/// connection, sets `app.current_user_id` for RLS, performs the INSERT,
/// and returns the connection to the pool — no long-held transactions.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PostgresStore {
    async fn insert(&self, new: NewNotification) -> Result<Notification> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query("SELECT set_config('app.current_user_id', $1, true)")
            .bind(&new.user_id)
            .execute(&mut *conn)
            .await?;

        let metadata = serde_json::to_value(&new.metadata).unwrap_or_default();

        let query = Query::insert()
            .into_table(Notifications::Table)
            .columns([
                Notifications::UserId,
                Notifications::SubscriptionId,
                Notifications::Title,
                Notifications::Content,
                Notifications::SourceUrl,
                Notifications::EntityType,
                Notifications::Metadata,
            ])
            .values_panic([
                new.user_id.clone().into(),
                new.subscription_id.clone().into(),
                new.title.clone().into(),
                new.content.clone().into(),
                new.source_url.clone().into(),
                new.entity_type.clone().into(),
                metadata.into(),
            ])
            .returning_all()
            .to_string(PostgresQueryBuilder);

        let row = sqlx::query(&query).fetch_one(&mut *conn).await?;

        Ok(Notification {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            subscription_id: row.try_get("subscription_id")?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            source_url: row.try_get("source_url")?,
            entity_type: row.try_get("entity_type")?,
            metadata: serde_json::from_value(row.try_get("metadata")?).unwrap_or_default(),
            status: match row.try_get::<String, _>("status")?.as_str() {
                "read" => NotificationStatus::Read,
                "archived" => NotificationStatus::Archived,
                _ => NotificationStatus::Unread,
            },
            email_sent: row.try_get("email_sent")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
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
        let since = window_start(chrono::Utc::now(), window_minutes);

        let mut select = Query::select();
        select
            .expr(Expr::col(Notifications::Id).count())
            .from(Notifications::Table)
            .and_where(Expr::col(Notifications::UserId).eq(user_id))
            .and_where(Expr::col(Notifications::Title).eq(title))
            .and_where(Expr::col(Notifications::SourceUrl).eq(source_url))
            .and_where(Expr::col(Notifications::EntityType).eq(entity_type))
            .and_where(Expr::col(Notifications::CreatedAt).gte(since));

        if let Some(document_id) = document_id {
            select.and_where(
                Expr::cust_with_values(
                    "metadata->>'document_id' = $1",
                    [document_id],
                ),
            );
        }

        let query = select.to_string(PostgresQueryBuilder);
        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count > 0)
    }

    async fn mark_email_sent(&self, id: Uuid) -> Result<()> {
        let query = Query::update()
            .table(Notifications::Table)
            .value(Notifications::EmailSent, true)
            .value(Notifications::UpdatedAt, Expr::current_timestamp())
            .and_where(Expr::col(Notifications::Id).eq(id))
            .to_string(PostgresQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}
