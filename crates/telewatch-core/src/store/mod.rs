// ── Durable store boundary ──
//
// The pipeline consumes three externally-synchronized stores. Each is an
// object-safe trait so a deployment can plug in any engine; `MemoryStore`
// is the bundled reference implementation used by tests and single-node
// setups.

mod error;
mod memory;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;

use crate::error::ValidationError;
use crate::model::{AlarmRecord, GatewayId, OwnerId, Reading, RecordId, RuleScope, ThresholdRule};

pub use error::StoreError;
pub use memory::MemoryStore;

/// Live feed of newly inserted readings, starting at the subscription point.
///
/// The stream ending means the store closed the subscription.
pub type InsertStream = BoxStream<'static, Result<Arc<Reading>, StoreError>>;

// ── Queries ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    /// Most recent first.
    #[default]
    Descending,
}

/// Filter for [`ReadingLog::find`]. Results are ordered by timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadingQuery {
    pub gateway_id: Option<GatewayId>,
    pub owner_id: Option<OwnerId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub sort: SortOrder,
    pub limit: Option<usize>,
    pub skip: usize,
}

impl ReadingQuery {
    /// The single most recent reading of a gateway.
    pub fn latest(gateway_id: GatewayId) -> Self {
        Self {
            gateway_id: Some(gateway_id),
            limit: Some(1),
            ..Self::default()
        }
    }

    pub(crate) fn matches(&self, reading: &Reading) -> bool {
        self.gateway_id
            .as_ref()
            .is_none_or(|id| *id == reading.gateway_id)
            && self
                .owner_id
                .as_ref()
                .is_none_or(|id| reading.owner_id.as_ref() == Some(id))
            && self.from.is_none_or(|from| reading.timestamp >= from)
            && self.to.is_none_or(|to| reading.timestamp <= to)
    }
}

/// Filter for [`AlarmLog::find`]. Results are ordered by timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlarmQuery {
    pub gateway_id: Option<GatewayId>,
    pub owner_id: Option<OwnerId>,
    pub sort: SortOrder,
    pub limit: Option<usize>,
    pub skip: usize,
}

impl AlarmQuery {
    /// An owner's most recent alarms, newest first.
    pub fn owner_backlog(owner_id: OwnerId, limit: usize) -> Self {
        Self {
            owner_id: Some(owner_id),
            sort: SortOrder::Descending,
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub(crate) fn matches(&self, record: &AlarmRecord) -> bool {
        self.gateway_id
            .as_ref()
            .is_none_or(|id| *id == record.gateway_id)
            && self
                .owner_id
                .as_ref()
                .is_none_or(|id| record.owner_id.as_ref() == Some(id))
    }
}

// ── Batch insert outcome ────────────────────────────────────────────

/// One record of an unordered batch that the store refused.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertFailure {
    /// Position of the record in the submitted batch.
    pub index: usize,
    pub error: ValidationError,
}

/// Result of an unordered batch insert: partial success is normal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertManyResult {
    pub inserted: Vec<AlarmRecord>,
    pub failures: Vec<InsertFailure>,
}

impl InsertManyResult {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

// ── Store traits ────────────────────────────────────────────────────

/// Append-only log of telemetry readings.
pub trait ReadingLog: Send + Sync {
    fn insert(&self, reading: Reading) -> BoxFuture<'_, Result<RecordId, StoreError>>;

    /// Open a new insert subscription. May be called again after a previous
    /// subscription failed or ended.
    fn watch_inserts(&self) -> BoxFuture<'_, Result<InsertStream, StoreError>>;

    fn find(&self, query: ReadingQuery) -> BoxFuture<'_, Result<Vec<Reading>, StoreError>>;
}

/// Per-gateway threshold configuration.
pub trait ThresholdStore: Send + Sync {
    fn find(&self, scope: RuleScope) -> BoxFuture<'_, Result<Vec<ThresholdRule>, StoreError>>;

    /// Delete every rule in `scope`, then insert `rules`, as one step.
    /// Returns the number of rules now active in the scope.
    fn replace(
        &self,
        scope: RuleScope,
        rules: Vec<ThresholdRule>,
    ) -> BoxFuture<'_, Result<usize, StoreError>>;
}

/// Append-only log of alarm records.
pub trait AlarmLog: Send + Sync {
    /// Unordered insert: a rejected record never prevents the others.
    fn insert_many(
        &self,
        records: Vec<AlarmRecord>,
    ) -> BoxFuture<'_, Result<InsertManyResult, StoreError>>;

    fn insert_one(&self, record: AlarmRecord) -> BoxFuture<'_, Result<RecordId, StoreError>>;

    fn find(&self, query: AlarmQuery) -> BoxFuture<'_, Result<Vec<AlarmRecord>, StoreError>>;
}

// ── Stores ──────────────────────────────────────────────────────────

/// The three stores the pipeline is wired to.
#[derive(Clone)]
pub struct Stores {
    pub readings: Arc<dyn ReadingLog>,
    pub thresholds: Arc<dyn ThresholdStore>,
    pub alarms: Arc<dyn AlarmLog>,
}

impl Stores {
    /// Back all three stores with one in-memory instance.
    pub fn memory(store: &Arc<MemoryStore>) -> Self {
        Self {
            readings: Arc::clone(store) as Arc<dyn ReadingLog>,
            thresholds: Arc::clone(store) as Arc<dyn ThresholdStore>,
            alarms: Arc::clone(store) as Arc<dyn AlarmLog>,
        }
    }
}

/// Apply sort, skip and limit to timestamped items already in insertion order.
pub(crate) fn page<T, F>(
    mut items: Vec<T>,
    timestamp: F,
    sort: SortOrder,
    skip: usize,
    limit: Option<usize>,
) -> Vec<T>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    // Stable sort keeps insertion order between equal timestamps.
    items.sort_by_key(|item| timestamp(item));
    if sort == SortOrder::Descending {
        items.reverse();
    }
    items
        .into_iter()
        .skip(skip)
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}
