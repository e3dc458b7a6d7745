// ── Alarm records ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ids::{GatewayId, OwnerId};
use super::reading::{MetricLeaf, Reading, RecordId};
use super::threshold::{Priority, ThresholdRule};
use super::timestamp;
use crate::error::ValidationError;

/// A persisted record that one metric of one reading violated a rule.
///
/// Append-only. The timestamp is the triggering reading's timestamp, not the
/// evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmRecord {
    #[serde(default = "Uuid::new_v4")]
    pub id: RecordId,
    #[serde(default)]
    pub gateway_id: GatewayId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<OwnerId>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    pub value: f64,
    pub priority: Priority,
    #[serde(default)]
    pub message: String,
}

impl AlarmRecord {
    /// Build the record for a leaf that violated `rule`.
    pub fn triggered(reading: &Reading, leaf: MetricLeaf<'_>, rule: &ThresholdRule) -> Self {
        Self {
            id: Uuid::new_v4(),
            gateway_id: reading.gateway_id.clone(),
            owner_id: reading.owner_id.clone(),
            timestamp: reading.timestamp,
            category: leaf.category.to_owned(),
            subcategory: leaf.subcategory.to_owned(),
            value: leaf.value,
            priority: rule.priority,
            message: rule.message.clone().unwrap_or_default(),
        }
    }

    /// Required-field checks applied by the alarm log on every insert.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.gateway_id.is_blank() {
            return Err(ValidationError::MissingField {
                field: "gatewayId".into(),
            });
        }
        if self.category.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "category".into(),
            });
        }
        if self.subcategory.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "subcategory".into(),
            });
        }
        if !self.value.is_finite() {
            return Err(ValidationError::InvalidValue {
                field: "value".into(),
                reason: "must be a finite number".into(),
            });
        }
        Ok(())
    }
}
