// ── Telemetry readings ──
//
// A reading is one timestamped sample from a gateway. The metric payload is
// dynamic: category name -> subcategory name -> numeric value, varying by
// device model, so it is kept as a nested map rather than named fields.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ids::{GatewayId, OwnerId};
use super::timestamp;
use crate::error::ValidationError;

/// Store-assigned identifier of a persisted document.
pub type RecordId = Uuid;

// ── Metrics ─────────────────────────────────────────────────────────

/// Two-level metric payload: category -> subcategory -> value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metrics(BTreeMap<String, BTreeMap<String, f64>>);

/// One `(category, subcategory, value)` leaf of a [`Metrics`] payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricLeaf<'a> {
    pub category: &'a str,
    pub subcategory: &'a str,
    pub value: f64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a single leaf, replacing any previous value.
    pub fn insert(
        &mut self,
        category: impl Into<String>,
        subcategory: impl Into<String>,
        value: f64,
    ) -> &mut Self {
        self.0
            .entry(category.into())
            .or_default()
            .insert(subcategory.into(), value);
        self
    }

    pub fn get(&self, category: &str, subcategory: &str) -> Option<f64> {
        self.0.get(category)?.get(subcategory).copied()
    }

    /// Every leaf exactly once, in category then subcategory order.
    pub fn leaves(&self) -> impl Iterator<Item = MetricLeaf<'_>> {
        self.0.iter().flat_map(|(category, subs)| {
            subs.iter().map(move |(subcategory, value)| MetricLeaf {
                category,
                subcategory,
                value: *value,
            })
        })
    }

    pub fn leaf_count(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count() == 0
    }

    fn validate(&self) -> Result<(), ValidationError> {
        for leaf in self.leaves() {
            if leaf.category.trim().is_empty() || leaf.subcategory.trim().is_empty() {
                return Err(ValidationError::InvalidValue {
                    field: "data".into(),
                    reason: "metric category and subcategory names must be non-empty".into(),
                });
            }
            if !leaf.value.is_finite() {
                return Err(ValidationError::InvalidValue {
                    field: format!("data.{}.{}", leaf.category, leaf.subcategory),
                    reason: "value must be a finite number".into(),
                });
            }
        }
        Ok(())
    }
}

impl<C, S> FromIterator<(C, S, f64)> for Metrics
where
    C: Into<String>,
    S: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (C, S, f64)>>(iter: I) -> Self {
        let mut metrics = Self::new();
        for (category, subcategory, value) in iter {
            metrics.insert(category, subcategory, value);
        }
        metrics
    }
}

// ── Reading ─────────────────────────────────────────────────────────

/// A persisted telemetry sample. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub id: RecordId,
    pub gateway_id: GatewayId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<OwnerId>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "data", alias = "metrics", default)]
    pub metrics: Metrics,
}

// ── NewReading ──────────────────────────────────────────────────────

/// Ingestion payload, before the store assigns an id.
///
/// The timestamp is optional; the server clock fills it in when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReading {
    #[serde(default)]
    pub gateway_id: Option<GatewayId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<OwnerId>,
    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "data", alias = "metrics", default)]
    pub metrics: Metrics,
}

impl NewReading {
    pub fn new(gateway_id: impl Into<GatewayId>, metrics: Metrics) -> Self {
        Self {
            gateway_id: Some(gateway_id.into()),
            owner_id: None,
            timestamp: None,
            metrics,
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<OwnerId>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Validate and stamp the payload into a storable [`Reading`].
    pub fn into_reading(self, now: DateTime<Utc>) -> Result<Reading, ValidationError> {
        let gateway_id = self
            .gateway_id
            .filter(|id| !id.is_blank())
            .ok_or_else(|| ValidationError::MissingField {
                field: "gatewayId".into(),
            })?;
        self.metrics.validate()?;

        Ok(Reading {
            id: Uuid::new_v4(),
            gateway_id,
            owner_id: self.owner_id,
            timestamp: self.timestamp.unwrap_or(now),
            metrics: self.metrics,
        })
    }
}
