use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::notification::model::{DedupKey, Notification, NotificationError, NotificationRequest};
use crate::notification::store::NotificationStore;

/// How often a merge is retried after losing an optimistic update race
const MAX_MERGE_ATTEMPTS: usize = 3;

/// Source of "now" for window calculations
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// One async mutex per dedup key with in-flight work. Entries are dropped again
/// when the last holder releases them.
#[derive(Debug, Default)]
struct KeyLocks {
    locks: DashMap<DedupKey, Arc<Mutex<()>>>,
}

impl KeyLocks {
    async fn lock(&self, key: DedupKey) -> KeyGuard<'_> {
        let lock = self.locks.entry(key).or_default().clone();
        let guard = lock.lock_owned().await;
        KeyGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: DedupKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // Release first so the map holds the only reference if nobody is waiting
        drop(self.guard.take());
        self.locks
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Merges occurrences of the same dedup key inside the aggregation window into
/// a single notification.
pub struct AggregationEngine {
    store: Arc<dyn NotificationStore>,
    clock: Arc<dyn Clock>,
    window: Duration,
    key_locks: KeyLocks,
}

impl AggregationEngine {
    pub fn new(store: Arc<dyn NotificationStore>, clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self {
            store,
            clock,
            window,
            key_locks: KeyLocks::default(),
        }
    }

    /// Record one occurrence and return the notification it ended up in.
    ///
    /// Either appends the sender to the open notification for the request's dedup
    /// key or starts a new one. Nothing is published here.
    pub async fn ingest(
        &self,
        request: &NotificationRequest,
    ) -> Result<Notification, NotificationError> {
        let key = request.dedup_key();
        let _guard = self.key_locks.lock(key).await;

        for attempt in 1..=MAX_MERGE_ATTEMPTS {
            let now = self.clock.now();
            let since = now - self.window;

            match self.store.find_recent_by_key(&key, since).await? {
                Some(mut existing) => {
                    existing.push_actor(request.sender_id);
                    match self.store.update(&existing).await {
                        Ok(()) => {
                            info!(
                                "Merged actor {} into notification {:?} ({} actors)",
                                request.sender_id,
                                existing.id(),
                                existing.actor_ids().len()
                            );
                            return Ok(existing);
                        }
                        Err(NotificationError::Conflict) => {
                            // Another process merged first; reload and try again
                            warn!(
                                "Concurrent merge on notification {:?}, attempt {} of {}",
                                existing.id(),
                                attempt,
                                MAX_MERGE_ATTEMPTS
                            );
                        }
                        Err(e) => return Err(e),
                    }
                }
                None => {
                    let created = self.store.save(Notification::new(request, now)).await?;
                    debug!(
                        "Stored notification {:?} for user {}",
                        created.id(),
                        created.recipient_user_id()
                    );
                    return Ok(created);
                }
            }
        }

        Err(NotificationError::Conflict)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::notification::model::{EntityType, NotificationType};
    use crate::notification::store::MemoryNotificationStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use mockall::mock;
    use mockall::Sequence;

    /// Clock that only moves when told to
    pub(crate) struct ManualClock {
        now: std::sync::Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        pub(crate) fn new(now: DateTime<Utc>) -> Self {
            Self {
                now: std::sync::Mutex::new(now),
            }
        }

        pub(crate) fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap();
            *now = *now + by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    mock! {
        pub Store {}

        #[async_trait]
        impl NotificationStore for Store {
            async fn save(&self, notification: Notification) -> Result<Notification, NotificationError>;
            async fn update(&self, notification: &Notification) -> Result<(), NotificationError>;
            async fn find_recent_by_key(
                &self,
                key: &DedupKey,
                since: DateTime<Utc>,
            ) -> Result<Option<Notification>, NotificationError>;
            async fn list_for_user(
                &self,
                recipient_user_id: i64,
                limit: i64,
                offset: i64,
            ) -> Result<Vec<Notification>, NotificationError>;
            async fn mark_read(&self, ids: &[i64]) -> Result<u64, NotificationError>;
            async fn count_unread(&self, recipient_user_id: i64) -> Result<i64, NotificationError>;
            async fn count_for_user(&self, recipient_user_id: i64) -> Result<i64, NotificationError>;
            async fn ping(&self) -> Result<(), NotificationError>;
            fn backend(&self) -> &'static str;
        }
    }

    pub(crate) fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn like(sender_id: i64) -> NotificationRequest {
        NotificationRequest {
            recipient_user_id: 1,
            sender_id,
            notification_type: NotificationType::NewReactionLike,
            entity_type: EntityType::Post,
            entity_id: 100,
        }
    }

    fn engine_with_memory_store() -> (
        AggregationEngine,
        Arc<MemoryNotificationStore>,
        Arc<ManualClock>,
    ) {
        let window = Duration::minutes(30);
        let store = Arc::new(MemoryNotificationStore::new(window));
        let clock = Arc::new(ManualClock::new(t0()));
        let engine = AggregationEngine::new(store.clone(), clock.clone(), window);
        (engine, store, clock)
    }

    #[tokio::test]
    async fn test_likes_merge_until_window_expires() {
        let (engine, store, clock) = engine_with_memory_store();

        let first = engine.ingest(&like(1)).await.unwrap();
        assert_eq!(first.actor_ids(), &[1]);
        assert_eq!(first.message(), "1 liked your post.");

        clock.advance(Duration::minutes(5));
        let merged = engine.ingest(&like(2)).await.unwrap();
        assert_eq!(merged.id(), first.id());
        assert_eq!(merged.actor_ids(), &[1, 2]);
        assert_eq!(merged.message(), "1 and 2 liked your post.");
        assert_eq!(merged.created_at(), t0());

        clock.advance(Duration::minutes(35));
        let fresh = engine.ingest(&like(3)).await.unwrap();
        assert_ne!(fresh.id(), first.id());
        assert_eq!(fresh.actor_ids(), &[3]);
        assert_eq!(fresh.created_at(), t0() + Duration::minutes(40));

        let rows = store.notifications_for_key(&like(1).dedup_key()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].actor_ids(), &[1, 2]);
        assert_eq!(rows[1].actor_ids(), &[3]);
    }

    #[tokio::test]
    async fn test_events_inside_window_share_one_row() {
        let (engine, store, clock) = engine_with_memory_store();

        // Spread over the window, each step still within 30 minutes of the first
        for (sender, minutes) in [(1, 0), (2, 10), (1, 10), (3, 9)] {
            clock.advance(Duration::minutes(minutes));
            engine.ingest(&like(sender)).await.unwrap();
        }

        let rows = store.notifications_for_key(&like(1).dedup_key()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].actor_ids(), &[1, 2, 1, 3]);
        assert_eq!(rows[0].message(), "1, 2 and 2 more liked your post.");
    }

    #[tokio::test]
    async fn test_different_keys_never_merge() {
        let (engine, store, _clock) = engine_with_memory_store();

        engine.ingest(&like(1)).await.unwrap();

        let mut love = like(2);
        love.notification_type = NotificationType::NewReactionLove;
        engine.ingest(&love).await.unwrap();

        let mut other_post = like(3);
        other_post.entity_id = 101;
        engine.ingest(&other_post).await.unwrap();

        let mut other_recipient = like(4);
        other_recipient.recipient_user_id = 2;
        engine.ingest(&other_recipient).await.unwrap();

        assert_eq!(store.count_for_user(1).await.unwrap(), 3);
        assert_eq!(store.count_for_user(2).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ingest_creates_single_notification() {
        let (engine, store, _clock) = engine_with_memory_store();
        let engine = Arc::new(engine);

        let handles: Vec<_> = (1..=20)
            .map(|sender| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.ingest(&like(sender)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let rows = store.notifications_for_key(&like(1).dedup_key()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].actor_ids().len(), 20);
        assert_eq!(engine.key_locks.len(), 0);
    }

    #[tokio::test]
    async fn test_lookup_failure_aborts_without_writing() {
        let mut store = MockStore::new();
        store
            .expect_find_recent_by_key()
            .times(1)
            .returning(|_, _| Err(NotificationError::DatabaseError(sqlx::Error::PoolTimedOut)));
        store.expect_save().never();
        store.expect_update().never();

        let engine = AggregationEngine::new(
            Arc::new(store),
            Arc::new(ManualClock::new(t0())),
            Duration::minutes(30),
        );

        assert!(matches!(
            engine.ingest(&like(1)).await,
            Err(NotificationError::DatabaseError(_))
        ));
    }

    #[tokio::test]
    async fn test_lookup_uses_window_cutoff() {
        let mut store = MockStore::new();
        store
            .expect_find_recent_by_key()
            .withf(|key, since| key.entity_id == 100 && *since == t0() - Duration::minutes(30))
            .times(1)
            .returning(|_, _| Ok(None));
        store
            .expect_save()
            .times(1)
            .returning(|notification| Ok(notification.with_id(1)));

        let engine = AggregationEngine::new(
            Arc::new(store),
            Arc::new(ManualClock::new(t0())),
            Duration::minutes(30),
        );

        let saved = engine.ingest(&like(1)).await.unwrap();
        assert_eq!(saved.id(), Some(1));
        assert_eq!(saved.created_at(), t0());
    }

    #[tokio::test]
    async fn test_vanished_notification_is_not_retried() {
        let existing = Notification::new(&like(1), t0()).with_id(5);

        let mut store = MockStore::new();
        store
            .expect_find_recent_by_key()
            .times(1)
            .returning(move |_, _| Ok(Some(existing.clone())));
        store
            .expect_update()
            .times(1)
            .returning(|_| Err(NotificationError::NotFound));
        store.expect_save().never();

        let engine = AggregationEngine::new(
            Arc::new(store),
            Arc::new(ManualClock::new(t0())),
            Duration::minutes(30),
        );

        assert!(matches!(
            engine.ingest(&like(2)).await,
            Err(NotificationError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_conflicting_merge_is_reloaded_and_retried() {
        let stale = Notification::new(&like(1), t0()).with_id(5);
        let mut reloaded = stale.clone();
        reloaded.push_actor(3);

        let mut seq = Sequence::new();
        let mut store = MockStore::new();
        store
            .expect_find_recent_by_key()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_, _| Ok(Some(stale.clone())));
        store
            .expect_update()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(NotificationError::Conflict));
        store
            .expect_find_recent_by_key()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_, _| Ok(Some(reloaded.clone())));
        store
            .expect_update()
            .withf(|n| n.actor_ids() == [1, 3, 2])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let engine = AggregationEngine::new(
            Arc::new(store),
            Arc::new(ManualClock::new(t0())),
            Duration::minutes(30),
        );

        let merged = engine.ingest(&like(2)).await.unwrap();
        assert_eq!(merged.actor_ids(), &[1, 3, 2]);
        assert_eq!(merged.message(), "1, 3 and 1 more liked your post.");
    }

    #[tokio::test]
    async fn test_gives_up_after_repeated_conflicts() {
        let existing = Notification::new(&like(1), t0()).with_id(5);

        let mut store = MockStore::new();
        store
            .expect_find_recent_by_key()
            .times(MAX_MERGE_ATTEMPTS)
            .returning(move |_, _| Ok(Some(existing.clone())));
        store
            .expect_update()
            .times(MAX_MERGE_ATTEMPTS)
            .returning(|_| Err(NotificationError::Conflict));

        let engine = AggregationEngine::new(
            Arc::new(store),
            Arc::new(ManualClock::new(t0())),
            Duration::minutes(30),
        );

        assert!(matches!(
            engine.ingest(&like(2)).await,
            Err(NotificationError::Conflict)
        ));
    }
}
