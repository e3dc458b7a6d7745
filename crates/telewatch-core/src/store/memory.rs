// ── In-memory reference store ──
//
// Implements all three store traits over process memory. Insert
// subscriptions are backed by a broadcast channel whose sender lives in an
// `ArcSwap`, so the store can close every open subscription at once by
// swapping in a fresh sender.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use super::{
    AlarmLog, AlarmQuery, InsertFailure, InsertManyResult, InsertStream, ReadingLog,
    ReadingQuery, StoreError, ThresholdStore, page,
};
use crate::model::{AlarmRecord, GatewayId, Reading, RecordId, RuleScope, ThresholdRule};

const INSERT_CHANNEL_CAPACITY: usize = 1024;

/// Process-local store for readings, thresholds and alarms.
pub struct MemoryStore {
    readings: RwLock<Vec<Arc<Reading>>>,
    alarms: RwLock<Vec<AlarmRecord>>,
    thresholds: DashMap<GatewayId, Vec<ThresholdRule>>,
    inserts: ArcSwap<broadcast::Sender<Arc<Reading>>>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(INSERT_CHANNEL_CAPACITY);
        Self {
            readings: RwLock::new(Vec::new()),
            alarms: RwLock::new(Vec::new()),
            thresholds: DashMap::new(),
            inserts: ArcSwap::from_pointee(tx),
            available: AtomicBool::new(true),
        }
    }

    /// End every open insert subscription, as a store failover would.
    /// New subscriptions work immediately.
    pub fn close_change_streams(&self) {
        let (tx, _) = broadcast::channel(INSERT_CHANNEL_CAPACITY);
        self.inserts.store(Arc::new(tx));
    }

    /// Toggle simulated reachability. While unavailable every operation
    /// fails with [`StoreError::Unavailable`] and open subscriptions are
    /// closed.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if !available {
            self.close_change_streams();
        }
    }

    /// Number of open insert subscriptions.
    pub fn watcher_count(&self) -> usize {
        self.inserts.load().receiver_count()
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::unavailable("memory store marked unavailable"))
        }
    }
}

// ── ReadingLog ──────────────────────────────────────────────────────

impl ReadingLog for MemoryStore {
    fn insert(&self, reading: Reading) -> BoxFuture<'_, Result<RecordId, StoreError>> {
        Box::pin(async move {
            self.ensure_available()?;
            let id = reading.id;
            let reading = Arc::new(reading);

            // Publish under the write lock so watchers see log order.
            let mut log = self.readings.write().await;
            log.push(Arc::clone(&reading));
            // No receivers is fine: nobody is watching right now.
            let _ = self.inserts.load().send(reading);
            drop(log);

            Ok(id)
        })
    }

    fn watch_inserts(&self) -> BoxFuture<'_, Result<InsertStream, StoreError>> {
        Box::pin(async move {
            self.ensure_available()?;
            let rx = self.inserts.load().subscribe();
            let stream = BroadcastStream::new(rx).map(|item| {
                item.map_err(|BroadcastStreamRecvError::Lagged(skipped)| StoreError::Lagged {
                    skipped,
                })
            });
            Ok(stream.boxed())
        })
    }

    fn find(&self, query: ReadingQuery) -> BoxFuture<'_, Result<Vec<Reading>, StoreError>> {
        Box::pin(async move {
            self.ensure_available()?;
            let matching: Vec<Arc<Reading>> = self
                .readings
                .read()
                .await
                .iter()
                .filter(|r| query.matches(r))
                .cloned()
                .collect();

            Ok(page(matching, |r| r.timestamp, query.sort, query.skip, query.limit)
                .into_iter()
                .map(|r| Reading::clone(&r))
                .collect())
        })
    }
}

// ── ThresholdStore ──────────────────────────────────────────────────

impl ThresholdStore for MemoryStore {
    fn find(&self, scope: RuleScope) -> BoxFuture<'_, Result<Vec<ThresholdRule>, StoreError>> {
        Box::pin(async move {
            self.ensure_available()?;
            Ok(self
                .thresholds
                .get(&scope.gateway_id)
                .map(|rules| rules.iter().filter(|r| scope.contains(r)).cloned().collect())
                .unwrap_or_default())
        })
    }

    fn replace(
        &self,
        scope: RuleScope,
        rules: Vec<ThresholdRule>,
    ) -> BoxFuture<'_, Result<usize, StoreError>> {
        Box::pin(async move {
            self.ensure_available()?;
            // The entry guard makes delete-then-insert a single step for readers.
            let mut entry = self.thresholds.entry(scope.gateway_id.clone()).or_default();
            entry.retain(|r| !scope.contains(r));
            entry.extend(rules);
            Ok(entry.iter().filter(|r| scope.contains(r)).count())
        })
    }
}

// ── AlarmLog ────────────────────────────────────────────────────────

impl AlarmLog for MemoryStore {
    fn insert_many(
        &self,
        records: Vec<AlarmRecord>,
    ) -> BoxFuture<'_, Result<InsertManyResult, StoreError>> {
        Box::pin(async move {
            self.ensure_available()?;
            let mut result = InsertManyResult::default();

            for (index, record) in records.into_iter().enumerate() {
                match record.validate() {
                    Ok(()) => result.inserted.push(record),
                    Err(error) => result.failures.push(InsertFailure { index, error }),
                }
            }

            self.alarms
                .write()
                .await
                .extend(result.inserted.iter().cloned());
            Ok(result)
        })
    }

    fn insert_one(&self, record: AlarmRecord) -> BoxFuture<'_, Result<RecordId, StoreError>> {
        Box::pin(async move {
            self.ensure_available()?;
            record.validate()?;
            let id = record.id;
            self.alarms.write().await.push(record);
            Ok(id)
        })
    }

    fn find(&self, query: AlarmQuery) -> BoxFuture<'_, Result<Vec<AlarmRecord>, StoreError>> {
        Box::pin(async move {
            self.ensure_available()?;
            let matching: Vec<AlarmRecord> = self
                .alarms
                .read()
                .await
                .iter()
                .filter(|r| query.matches(r))
                .cloned()
                .collect();
            Ok(page(matching, |r| r.timestamp, query.sort, query.skip, query.limit))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{Metrics, NewReading, OwnerId, Priority};
    use crate::store::SortOrder;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn reading(gateway: &str, secs: i64) -> Reading {
        NewReading::new(gateway, Metrics::new())
            .with_timestamp(at(secs))
            .into_reading(Utc::now())
            .unwrap()
    }

    fn alarm(gateway: &str, owner: Option<&str>, secs: i64) -> AlarmRecord {
        AlarmRecord {
            id: uuid::Uuid::new_v4(),
            gateway_id: GatewayId::new(gateway),
            owner_id: owner.map(OwnerId::new),
            timestamp: at(secs),
            category: "Voltage".into(),
            subcategory: "VL1".into(),
            value: 1.0,
            priority: Priority::High,
            message: String::new(),
        }
    }

    #[tokio::test]
    async fn latest_reading_per_gateway() {
        let store = MemoryStore::new();
        store.insert(reading("gw-1", 10)).await.unwrap();
        store.insert(reading("gw-1", 30)).await.unwrap();
        store.insert(reading("gw-1", 20)).await.unwrap();
        store.insert(reading("gw-2", 99)).await.unwrap();

        let latest = ReadingLog::find(&store, ReadingQuery::latest(GatewayId::new("gw-1")))
            .await
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].timestamp, at(30));
    }

    #[tokio::test]
    async fn reading_query_range_sort_and_skip() {
        let store = MemoryStore::new();
        for secs in 0..5 {
            store.insert(reading("gw-1", secs)).await.unwrap();
        }

        let query = ReadingQuery {
            gateway_id: Some(GatewayId::new("gw-1")),
            from: Some(at(1)),
            to: Some(at(3)),
            sort: SortOrder::Ascending,
            skip: 1,
            ..ReadingQuery::default()
        };
        let found = ReadingLog::find(&store, query).await.unwrap();
        let stamps: Vec<_> = found.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![at(2), at(3)]);
    }

    #[tokio::test]
    async fn watchers_receive_inserts_after_subscribing() {
        let store = MemoryStore::new();
        store.insert(reading("gw-1", 0)).await.unwrap();

        let mut stream = store.watch_inserts().await.unwrap();
        let inserted = reading("gw-1", 1);
        let id = inserted.id;
        store.insert(inserted).await.unwrap();

        let seen = stream.next().await.unwrap().unwrap();
        assert_eq!(seen.id, id);
    }

    #[tokio::test]
    async fn closing_change_streams_ends_open_subscriptions() {
        let store = MemoryStore::new();
        let mut stream = store.watch_inserts().await.unwrap();
        assert_eq!(store.watcher_count(), 1);

        store.close_change_streams();
        assert!(stream.next().await.is_none());
        assert_eq!(store.watcher_count(), 0);
    }

    #[tokio::test]
    async fn unavailable_store_refuses_subscriptions() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(
            store.watch_inserts().await,
            Err(StoreError::Unavailable { .. })
        ));
        store.set_available(true);
        assert!(store.watch_inserts().await.is_ok());
    }

    #[tokio::test]
    async fn replace_is_delete_all_then_insert_all() {
        let store = MemoryStore::new();
        let scope = RuleScope::gateway("gw-1");
        store
            .replace(
                scope.clone(),
                vec![
                    ThresholdRule::new("gw-1", "Voltage", "VL1").with_high(1.0),
                    ThresholdRule::new("gw-1", "Voltage", "VL2").with_high(1.0),
                ],
            )
            .await
            .unwrap();

        let active = store
            .replace(
                scope.clone(),
                vec![ThresholdRule::new("gw-1", "Current", "I1").with_low(0.5)],
            )
            .await
            .unwrap();
        assert_eq!(active, 1);

        let rules = ThresholdStore::find(&store, scope).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].category, "Current");
    }

    #[tokio::test]
    async fn owner_scoped_replace_keeps_other_owners() {
        let store = MemoryStore::new();
        let alice = RuleScope::gateway("gw-1").with_owner("alice");
        let bob = RuleScope::gateway("gw-1").with_owner("bob");
        store
            .replace(
                alice.clone(),
                vec![ThresholdRule::new("gw-1", "V", "a").with_owner("alice")],
            )
            .await
            .unwrap();
        store
            .replace(
                bob.clone(),
                vec![ThresholdRule::new("gw-1", "V", "a").with_owner("bob")],
            )
            .await
            .unwrap();
        store.replace(bob, Vec::new()).await.unwrap();

        assert_eq!(ThresholdStore::find(&store, alice).await.unwrap().len(), 1);
        assert_eq!(
            ThresholdStore::find(&store, RuleScope::gateway("gw-1"))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn insert_many_is_unordered_and_partial() {
        let store = MemoryStore::new();
        let mut bad = alarm("gw-1", None, 1);
        bad.category = String::new();

        let result = store
            .insert_many(vec![alarm("gw-1", None, 0), bad, alarm("gw-1", None, 2)])
            .await
            .unwrap();

        assert_eq!(result.inserted.len(), 2);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].index, 1);
        assert!(!result.is_complete());

        let all = AlarmLog::find(&store, AlarmQuery::default()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn owner_backlog_is_bounded_and_newest_first() {
        let store = MemoryStore::new();
        let mut batch: Vec<_> = (0..25).map(|s| alarm("gw-1", Some("u-1"), s)).collect();
        batch.push(alarm("gw-1", Some("u-2"), 100));
        store.insert_many(batch).await.unwrap();

        let backlog = AlarmLog::find(&store, AlarmQuery::owner_backlog(OwnerId::new("u-1"), 20))
            .await
            .unwrap();
        assert_eq!(backlog.len(), 20);
        assert!(backlog.iter().all(|a| a.owner_id == Some(OwnerId::new("u-1"))));
        assert_eq!(backlog[0].timestamp, at(24));
        assert!(backlog.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    }

    #[tokio::test]
    async fn insert_one_validates() {
        let store = MemoryStore::new();
        let mut record = alarm("gw-1", None, 0);
        record.gateway_id = GatewayId::new("");
        assert!(matches!(
            store.insert_one(record).await,
            Err(StoreError::Rejected(_))
        ));
    }
}
