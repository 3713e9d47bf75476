pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::notification::model::{DedupKey, Notification, NotificationError};

pub use self::memory::MemoryNotificationStore;
pub use self::postgres::PgNotificationStore;

/// Durable record of notifications.
///
/// Implementations own read state and actor-list persistence. `save` must not
/// create a second open notification for a dedup key: if another writer created one
/// inside the aggregation window first, the new actors are merged into it and the
/// merged notification is returned instead.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert a new notification and return it with its storage id
    async fn save(&self, notification: Notification) -> Result<Notification, NotificationError>;

    /// Persist the actor list and message of an existing notification.
    ///
    /// Fails with `NotFound` if the row is gone and with `Conflict` if the stored actor
    /// list is no longer a prefix of the new one (someone else merged first).
    async fn update(&self, notification: &Notification) -> Result<(), NotificationError>;

    /// Most recent notification for `key` created at or after `since`
    async fn find_recent_by_key(
        &self,
        key: &DedupKey,
        since: DateTime<Utc>,
    ) -> Result<Option<Notification>, NotificationError>;

    /// Unread first, then newest first
    async fn list_for_user(
        &self,
        recipient_user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>, NotificationError>;

    /// Flip the given notifications to read. Unknown or already read ids are ignored.
    /// Returns how many rows changed.
    async fn mark_read(&self, ids: &[i64]) -> Result<u64, NotificationError>;

    async fn count_unread(&self, recipient_user_id: i64) -> Result<i64, NotificationError>;

    async fn count_for_user(&self, recipient_user_id: i64) -> Result<i64, NotificationError>;

    async fn ping(&self) -> Result<(), NotificationError>;

    /// Short backend name for logs and health output
    fn backend(&self) -> &'static str;
}

/// True if `stored` is a strict prefix of `updated`, i.e. `updated` only appended
pub(crate) fn extends_actor_list(stored: &[i64], updated: &[i64]) -> bool {
    stored.len() < updated.len() && updated.starts_with(stored)
}
