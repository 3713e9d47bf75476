use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Executor, PgPool, Postgres, Transaction};
use tracing::{error, info, warn};

use super::NotificationStore;
use crate::notification::model::{DedupKey, Notification, NotificationError, NotificationRow};

const FIND_OPEN_SQL: &str = r#"
    SELECT id, user_id, actor_ids, type, entity_type, entity_id, is_read, created_at
    FROM notifications
    WHERE user_id = $1 AND entity_type = $2 AND entity_id = $3 AND type = $4
      AND created_at >= $5
    ORDER BY created_at DESC, id DESC
    LIMIT 1
"#;

const INSERT_SQL: &str = r#"
    INSERT INTO notifications (
        user_id, actor_ids, message, type, entity_type, entity_id, is_read, created_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, false, $7)
    RETURNING id, user_id, actor_ids, type, entity_type, entity_id, is_read, created_at
"#;

// Appends against the stored list, so writers outside the advisory lock are kept
const APPEND_ACTORS_SQL: &str = r#"
    UPDATE notifications
    SET actor_ids = actor_ids || $1::BIGINT[]
    WHERE id = $2
    RETURNING id, user_id, actor_ids, type, entity_type, entity_id, is_read, created_at
"#;

const LIST_FOR_USER_SQL: &str = r#"
    SELECT id, user_id, actor_ids, type, entity_type, entity_id, is_read, created_at
    FROM notifications
    WHERE user_id = $1
    ORDER BY is_read ASC, created_at DESC, id DESC
    LIMIT $2 OFFSET $3
"#;

/// Postgres-backed store over the `notifications` table
#[derive(Debug, Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
    window: Duration,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool, window: Duration) -> Self {
        Self { pool, window }
    }

    // Serializes writers of one dedup key until the transaction ends
    async fn lock_key(
        tx: &mut Transaction<'_, Postgres>,
        key: &DedupKey,
    ) -> Result<(), NotificationError> {
        let lock_name = format!(
            "notifications:{}:{}:{}:{}",
            key.recipient_user_id, key.entity_type, key.entity_id, key.notification_type
        );
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(lock_name)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn find_open<'e, E>(
        executor: E,
        key: &DedupKey,
        since: DateTime<Utc>,
    ) -> Result<Option<NotificationRow>, NotificationError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let row = sqlx::query_as::<_, NotificationRow>(FIND_OPEN_SQL)
            .bind(key.recipient_user_id)
            .bind(key.entity_type.as_str())
            .bind(key.entity_id)
            .bind(key.notification_type.as_str())
            .bind(since)
            .fetch_optional(executor)
            .await?;
        Ok(row)
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn save(&self, notification: Notification) -> Result<Notification, NotificationError> {
        let key = notification.dedup_key();
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            NotificationError::DatabaseError(e)
        })?;

        Self::lock_key(&mut tx, &key).await?;

        // Another writer may have opened a notification for this key since our lookup
        let open_since = notification.created_at() - self.window;
        let saved = match Self::find_open(&mut *tx, &key, open_since).await? {
            Some(row) => {
                let row = sqlx::query_as::<_, NotificationRow>(APPEND_ACTORS_SQL)
                    .bind(notification.actor_ids())
                    .bind(row.id)
                    .fetch_one(&mut *tx)
                    .await?;
                let merged = Notification::try_from(row)?;

                // The row stays locked until commit, so the list read back is current
                sqlx::query("UPDATE notifications SET message = $1 WHERE id = $2")
                    .bind(merged.message())
                    .bind(merged.id())
                    .execute(&mut *tx)
                    .await?;

                warn!(
                    "Merged concurrent insert into notification {:?} for user {}",
                    merged.id(),
                    key.recipient_user_id
                );
                merged
            }
            None => {
                let row = sqlx::query_as::<_, NotificationRow>(INSERT_SQL)
                    .bind(notification.recipient_user_id())
                    .bind(notification.actor_ids())
                    .bind(notification.message())
                    .bind(notification.notification_type().as_str())
                    .bind(notification.entity_type().as_str())
                    .bind(notification.entity_id())
                    .bind(notification.created_at())
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| {
                        error!("Failed to insert notification: {}", e);
                        NotificationError::DatabaseError(e)
                    })?;

                Notification::try_from(row)?
            }
        };

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            NotificationError::DatabaseError(e)
        })?;

        Ok(saved)
    }

    async fn update(&self, notification: &Notification) -> Result<(), NotificationError> {
        let id = notification.id().ok_or(NotificationError::NotFound)?;

        // Only applies if the stored list is still a strict prefix of ours
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET actor_ids = $1, message = $2
            WHERE id = $3
              AND cardinality(actor_ids) < cardinality($1)
              AND actor_ids = ($1)[1:cardinality(actor_ids)]
            "#,
        )
        .bind(notification.actor_ids())
        .bind(notification.message())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM notifications WHERE id = $1)",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        if exists {
            Err(NotificationError::Conflict)
        } else {
            Err(NotificationError::NotFound)
        }
    }

    async fn find_recent_by_key(
        &self,
        key: &DedupKey,
        since: DateTime<Utc>,
    ) -> Result<Option<Notification>, NotificationError> {
        let row = Self::find_open(&self.pool, key, since).await?;
        row.map(Notification::try_from).transpose()
    }

    async fn list_for_user(
        &self,
        recipient_user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>, NotificationError> {
        let rows = sqlx::query_as::<_, NotificationRow>(LIST_FOR_USER_SQL)
            .bind(recipient_user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Notification::try_from).collect()
    }

    async fn mark_read(&self, ids: &[i64]) -> Result<u64, NotificationError> {
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let result = sqlx::query(
            "UPDATE notifications SET is_read = true WHERE id = ANY($1) AND is_read = false",
        )
        .bind(&ids)
        .execute(&self.pool)
        .await?;

        info!(
            "Marked {} of {} notifications as read",
            result.rows_affected(),
            ids.len()
        );
        Ok(result.rows_affected())
    }

    async fn count_unread(&self, recipient_user_id: i64) -> Result<i64, NotificationError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND is_read = false",
        )
        .bind(recipient_user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_for_user(&self, recipient_user_id: i64) -> Result<i64, NotificationError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM notifications WHERE user_id = $1")
                .bind(recipient_user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn ping(&self) -> Result<(), NotificationError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
