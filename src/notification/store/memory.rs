use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{extends_actor_list, NotificationStore};
use crate::notification::model::{DedupKey, Notification, NotificationError};

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    rows: Vec<Notification>,
}

impl MemoryState {
    fn find_open(&self, key: &DedupKey, since: DateTime<Utc>) -> Option<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, n)| n.dedup_key() == *key && n.created_at() >= since)
            .max_by_key(|(_, n)| (n.created_at(), n.id()))
            .map(|(index, _)| index)
    }
}

/// Process-local store for development without Postgres and for tests.
///
/// Every operation runs under one mutex, which also makes `save` and `update`
/// atomic with their dedup checks.
#[derive(Debug, Clone)]
pub struct MemoryNotificationStore {
    state: Arc<Mutex<MemoryState>>,
    window: Duration,
}

impl MemoryNotificationStore {
    pub fn new(window: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            window,
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, NotificationError> {
        self.state
            .lock()
            .map_err(|_| NotificationError::InternalError("Notification store lock poisoned".into()))
    }

    /// Every notification for a dedup key, oldest first
    #[cfg(test)]
    pub fn notifications_for_key(&self, key: &DedupKey) -> Result<Vec<Notification>, NotificationError> {
        let state = self.state()?;
        let mut rows: Vec<Notification> = state
            .rows
            .iter()
            .filter(|n| n.dedup_key() == *key)
            .cloned()
            .collect();
        rows.sort_by_key(|n| (n.created_at(), n.id()));
        Ok(rows)
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn save(&self, notification: Notification) -> Result<Notification, NotificationError> {
        let mut state = self.state()?;

        let open_since = notification.created_at() - self.window;
        if let Some(index) = state.find_open(&notification.dedup_key(), open_since) {
            let existing = &mut state.rows[index];
            for actor_id in notification.actor_ids() {
                existing.push_actor(*actor_id);
            }
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let saved = notification.with_id(state.next_id);
        state.rows.push(saved.clone());
        Ok(saved)
    }

    async fn update(&self, notification: &Notification) -> Result<(), NotificationError> {
        let id = notification.id().ok_or(NotificationError::NotFound)?;
        let mut state = self.state()?;

        let stored = state
            .rows
            .iter_mut()
            .find(|n| n.id() == Some(id))
            .ok_or(NotificationError::NotFound)?;

        if !extends_actor_list(stored.actor_ids(), notification.actor_ids()) {
            return Err(NotificationError::Conflict);
        }

        let appended = notification.actor_ids()[stored.actor_ids().len()..].to_vec();
        for actor_id in appended {
            stored.push_actor(actor_id);
        }
        Ok(())
    }

    async fn find_recent_by_key(
        &self,
        key: &DedupKey,
        since: DateTime<Utc>,
    ) -> Result<Option<Notification>, NotificationError> {
        let state = self.state()?;
        Ok(state.find_open(key, since).map(|index| state.rows[index].clone()))
    }

    async fn list_for_user(
        &self,
        recipient_user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>, NotificationError> {
        let state = self.state()?;
        let mut rows: Vec<&Notification> = state
            .rows
            .iter()
            .filter(|n| n.recipient_user_id() == recipient_user_id)
            .collect();
        rows.sort_by_key(|n| (n.is_read(), Reverse(n.created_at()), Reverse(n.id())));

        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, ids: &[i64]) -> Result<u64, NotificationError> {
        let ids: HashSet<i64> = ids.iter().copied().collect();
        let mut state = self.state()?;

        let mut changed = 0;
        for notification in state.rows.iter_mut() {
            let matches = notification.id().map_or(false, |id| ids.contains(&id));
            if matches && !notification.is_read() {
                notification.set_read();
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn count_unread(&self, recipient_user_id: i64) -> Result<i64, NotificationError> {
        let state = self.state()?;
        Ok(state
            .rows
            .iter()
            .filter(|n| n.recipient_user_id() == recipient_user_id && !n.is_read())
            .count() as i64)
    }

    async fn count_for_user(&self, recipient_user_id: i64) -> Result<i64, NotificationError> {
        let state = self.state()?;
        Ok(state
            .rows
            .iter()
            .filter(|n| n.recipient_user_id() == recipient_user_id)
            .count() as i64)
    }

    async fn ping(&self) -> Result<(), NotificationError> {
        self.state().map(|_| ())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::model::{EntityType, NotificationRequest, NotificationType};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn request(recipient: i64, sender: i64, entity_id: i64) -> NotificationRequest {
        NotificationRequest {
            recipient_user_id: recipient,
            sender_id: sender,
            notification_type: NotificationType::NewReactionLike,
            entity_type: EntityType::Post,
            entity_id,
        }
    }

    fn store() -> MemoryNotificationStore {
        MemoryNotificationStore::new(Duration::minutes(30))
    }

    #[tokio::test]
    async fn test_save_assigns_increasing_ids() {
        let store = store();
        let first = store.save(Notification::new(&request(1, 7, 1), t0())).await.unwrap();
        let second = store.save(Notification::new(&request(1, 7, 2), t0())).await.unwrap();

        assert_eq!(first.id(), Some(1));
        assert_eq!(second.id(), Some(2));
    }

    #[tokio::test]
    async fn test_save_merges_into_open_notification() {
        let store = store();
        let first = store.save(Notification::new(&request(1, 7, 1), t0())).await.unwrap();
        let racing = store
            .save(Notification::new(&request(1, 8, 1), t0() + Duration::minutes(1)))
            .await
            .unwrap();

        assert_eq!(racing.id(), first.id());
        assert_eq!(racing.actor_ids(), &[7, 8]);
        assert_eq!(racing.message(), "7 and 8 liked your post.");
        assert_eq!(racing.created_at(), t0());
        assert_eq!(store.count_for_user(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_recent_respects_cutoff_and_key() {
        let store = store();
        let saved = store.save(Notification::new(&request(1, 7, 1), t0())).await.unwrap();
        let key = saved.dedup_key();

        let found = store.find_recent_by_key(&key, t0()).await.unwrap();
        assert_eq!(found.map(|n| n.id()), Some(saved.id()));

        let expired = store
            .find_recent_by_key(&key, t0() + Duration::seconds(1))
            .await
            .unwrap();
        assert!(expired.is_none());

        let other_recipient = DedupKey {
            recipient_user_id: 2,
            ..key
        };
        assert!(store
            .find_recent_by_key(&other_recipient, t0())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_appends_actors_only() {
        let store = store();
        let mut saved = store.save(Notification::new(&request(1, 7, 1), t0())).await.unwrap();
        saved.push_actor(9);
        store.update(&saved).await.unwrap();

        let stored = store.find_recent_by_key(&saved.dedup_key(), t0()).await.unwrap().unwrap();
        assert_eq!(stored.actor_ids(), &[7, 9]);
        assert_eq!(stored.message(), "7 and 9 liked your post.");
        assert_eq!(stored.created_at(), t0());
    }

    #[tokio::test]
    async fn test_update_detects_concurrent_merge() {
        let store = store();
        let saved = store.save(Notification::new(&request(1, 7, 1), t0())).await.unwrap();

        let mut first = saved.clone();
        first.push_actor(8);
        let mut second = saved.clone();
        second.push_actor(9);

        store.update(&first).await.unwrap();
        assert!(matches!(
            store.update(&second).await,
            Err(NotificationError::Conflict)
        ));
    }

    #[tokio::test]
    async fn test_update_missing_row_is_not_found() {
        let store = store();
        let mut ghost = Notification::new(&request(1, 7, 1), t0()).with_id(99);
        ghost.push_actor(8);
        assert!(matches!(
            store.update(&ghost).await,
            Err(NotificationError::NotFound)
        ));

        let unsaved = Notification::new(&request(1, 7, 1), t0());
        assert!(matches!(
            store.update(&unsaved).await,
            Err(NotificationError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let store = store();
        let saved = store.save(Notification::new(&request(1, 7, 1), t0())).await.unwrap();
        let id = saved.id().unwrap();

        assert_eq!(store.mark_read(&[id, id, 12345]).await.unwrap(), 1);
        assert_eq!(store.mark_read(&[id]).await.unwrap(), 0);
        assert_eq!(store.count_unread(1).await.unwrap(), 0);
        assert_eq!(store.count_for_user(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_orders_unread_first_then_newest() {
        let store = store();
        let mut ids = Vec::new();
        for i in 0..5 {
            let saved = store
                .save(Notification::new(
                    &request(1, 7, i + 1),
                    t0() + Duration::minutes(i),
                ))
                .await
                .unwrap();
            ids.push(saved.id().unwrap());
        }
        // Newest two become read
        store.mark_read(&[ids[3], ids[4]]).await.unwrap();
        store.save(Notification::new(&request(2, 7, 1), t0())).await.unwrap();

        let page = store.list_for_user(1, 10, 0).await.unwrap();
        let listed: Vec<i64> = page.iter().filter_map(|n| n.id()).collect();
        assert_eq!(listed, vec![ids[2], ids[1], ids[0], ids[4], ids[3]]);

        let second_page = store.list_for_user(1, 2, 2).await.unwrap();
        let listed: Vec<i64> = second_page.iter().filter_map(|n| n.id()).collect();
        assert_eq!(listed, vec![ids[0], ids[4]]);
    }
}
