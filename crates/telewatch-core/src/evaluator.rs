// ── Alarm evaluation ──
//
// Turns one reading into zero or more alarm records. The pure `evaluate`
// function holds the trigger rules; `AlarmEvaluator` wraps it with the
// store round-trips (rule lookup, batch insert).

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::config::RuleScoping;
use crate::model::{AlarmRecord, Reading, RuleScope, ThresholdRule};
use crate::store::{AlarmLog, ThresholdStore};

/// Evaluate every metric leaf of `reading` against `rules`.
///
/// A leaf without a rule is skipped. When several rules share a
/// (category, subcategory) pair the first one in `rules` wins.
pub fn evaluate(reading: &Reading, rules: &[ThresholdRule]) -> Vec<AlarmRecord> {
    let mut index: HashMap<(&str, &str), &ThresholdRule> = HashMap::with_capacity(rules.len());
    for rule in rules {
        index
            .entry((rule.category.as_str(), rule.subcategory.as_str()))
            .or_insert(rule);
    }

    reading
        .metrics
        .leaves()
        .filter_map(|leaf| {
            let rule = index.get(&(leaf.category, leaf.subcategory))?;
            rule.is_violated_by(leaf.value)
                .then(|| AlarmRecord::triggered(reading, leaf, rule))
        })
        .collect()
}

/// Loads rules, evaluates, and persists alarms for one reading at a time.
///
/// Failures are logged and swallowed: the reading is already stored, so a
/// lost evaluation is never retried.
#[derive(Clone)]
pub struct AlarmEvaluator {
    thresholds: Arc<dyn ThresholdStore>,
    alarms: Arc<dyn AlarmLog>,
    scoping: RuleScoping,
}

impl AlarmEvaluator {
    pub fn new(
        thresholds: Arc<dyn ThresholdStore>,
        alarms: Arc<dyn AlarmLog>,
        scoping: RuleScoping,
    ) -> Self {
        Self {
            thresholds,
            alarms,
            scoping,
        }
    }

    fn scope_for(&self, reading: &Reading) -> RuleScope {
        let scope = RuleScope::gateway(reading.gateway_id.clone());
        match self.scoping {
            RuleScoping::Gateway => scope,
            RuleScoping::GatewayAndOwner => scope.owned_by(reading.owner_id.clone()),
        }
    }

    /// Evaluate `reading` and return the records the alarm log accepted.
    pub async fn process(&self, reading: &Reading) -> Vec<AlarmRecord> {
        let rules = match self.thresholds.find(self.scope_for(reading)).await {
            Ok(rules) => rules,
            Err(e) => {
                error!(
                    gateway_id = %reading.gateway_id,
                    reading_id = %reading.id,
                    error = %e,
                    "threshold lookup failed, reading not evaluated"
                );
                return Vec::new();
            }
        };

        let produced = evaluate(reading, &rules);
        if produced.is_empty() {
            return Vec::new();
        }
        debug!(
            gateway_id = %reading.gateway_id,
            count = produced.len(),
            "thresholds violated"
        );

        match self.alarms.insert_many(produced).await {
            Ok(result) => {
                for failure in &result.failures {
                    warn!(
                        gateway_id = %reading.gateway_id,
                        index = failure.index,
                        error = %failure.error,
                        "alarm record rejected"
                    );
                }
                result.inserted
            }
            Err(e) => {
                error!(
                    gateway_id = %reading.gateway_id,
                    reading_id = %reading.id,
                    error = %e,
                    "alarm batch insert failed"
                );
                Vec::new()
            }
        }
    }
}
