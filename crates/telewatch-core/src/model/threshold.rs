// ── Threshold rules ──
//
// Per-(owner, gateway, category, subcategory) high/low bounds. A gateway's
// rule set is only ever replaced wholesale, never merged.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::ids::{GatewayId, OwnerId};
use crate::error::ValidationError;

// ── Priority ────────────────────────────────────────────────────────

/// Alarm priority carried from the rule into every record it triggers.
///
/// Configuration front-ends historically say `"Medium"` where alarm records
/// say `"Normal"`; both parse to [`Priority::Normal`], which always
/// serializes as `"Normal"`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum Priority {
    High,
    #[default]
    #[serde(alias = "Medium")]
    #[strum(to_string = "Normal", serialize = "Medium")]
    Normal,
    Low,
}

// ── ThresholdRule ───────────────────────────────────────────────────

/// Bounds and priority for one metric of one gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<OwnerId>,
    pub gateway_id: GatewayId,
    pub category: String,
    pub subcategory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ThresholdRule {
    pub fn new(
        gateway_id: impl Into<GatewayId>,
        category: impl Into<String>,
        subcategory: impl Into<String>,
    ) -> Self {
        Self {
            owner_id: None,
            gateway_id: gateway_id.into(),
            category: category.into(),
            subcategory: subcategory.into(),
            high: None,
            low: None,
            priority: Priority::default(),
            message: None,
        }
    }

    pub fn with_high(mut self, high: f64) -> Self {
        self.high = Some(high);
        self
    }

    pub fn with_low(mut self, low: f64) -> Self {
        self.low = Some(low);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<OwnerId>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn applies_to(&self, category: &str, subcategory: &str) -> bool {
        self.category == category && self.subcategory == subcategory
    }

    /// Strict comparison: a value equal to either bound never triggers.
    /// A rule with neither bound set never triggers.
    pub fn is_violated_by(&self, value: f64) -> bool {
        self.high.is_some_and(|high| value > high) || self.low.is_some_and(|low| value < low)
    }
}

// ── Replacement input ───────────────────────────────────────────────

/// One entry of a rule-set replacement, scoped by the enclosing request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdRuleInput {
    pub category: String,
    pub subcategory: String,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub message: Option<String>,
}

/// Which owners' rules a [`RuleScope`] covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum OwnerFilter {
    /// Every rule of the gateway, whatever its owner.
    #[default]
    Any,
    /// Only rules whose owner is exactly this; `None` selects ownerless rules.
    Exactly(Option<OwnerId>),
}

impl OwnerFilter {
    pub fn matches(&self, owner_id: Option<&OwnerId>) -> bool {
        match self {
            Self::Any => true,
            Self::Exactly(expected) => expected.as_ref() == owner_id,
        }
    }
}

/// Which rules a lookup or a replacement addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleScope {
    pub gateway_id: GatewayId,
    pub owner: OwnerFilter,
}

impl RuleScope {
    /// Every rule of the gateway.
    pub fn gateway(gateway_id: impl Into<GatewayId>) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            owner: OwnerFilter::Any,
        }
    }

    /// Only the rules of `owner_id`.
    pub fn with_owner(self, owner_id: impl Into<OwnerId>) -> Self {
        self.owned_by(Some(owner_id.into()))
    }

    /// Only the rules whose owner is exactly `owner_id`, ownerless rules
    /// when `None`.
    pub fn owned_by(mut self, owner_id: Option<OwnerId>) -> Self {
        self.owner = OwnerFilter::Exactly(owner_id);
        self
    }

    /// Narrow [`OwnerFilter::Any`] to the ownerless slot. A replacement
    /// writes rules for one owner slot, so it must only delete that slot.
    pub fn exact(self) -> Self {
        match self.owner {
            OwnerFilter::Any => self.owned_by(None),
            OwnerFilter::Exactly(_) => self,
        }
    }

    /// The owner stamped on rules built for this scope.
    pub fn owner_id(&self) -> Option<&OwnerId> {
        match &self.owner {
            OwnerFilter::Any => None,
            OwnerFilter::Exactly(owner) => owner.as_ref(),
        }
    }

    pub fn contains(&self, rule: &ThresholdRule) -> bool {
        rule.gateway_id == self.gateway_id && self.owner.matches(rule.owner_id.as_ref())
    }

    /// Validate a replacement set and stamp it with this scope.
    pub fn build_rules(
        &self,
        inputs: Vec<ThresholdRuleInput>,
    ) -> Result<Vec<ThresholdRule>, ValidationError> {
        if self.gateway_id.is_blank() {
            return Err(ValidationError::MissingField {
                field: "gatewayId".into(),
            });
        }

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(inputs.len());

        for input in inputs {
            if input.category.trim().is_empty() || input.subcategory.trim().is_empty() {
                return Err(ValidationError::MissingField {
                    field: "category/subcategory".into(),
                });
            }
            if input.high.is_some_and(|v| !v.is_finite()) || input.low.is_some_and(|v| !v.is_finite())
            {
                return Err(ValidationError::InvalidValue {
                    field: format!("{}.{}", input.category, input.subcategory),
                    reason: "bounds must be finite numbers".into(),
                });
            }
            if let (Some(low), Some(high)) = (input.low, input.high) {
                if low > high {
                    return Err(ValidationError::InvalidValue {
                        field: format!("{}.{}", input.category, input.subcategory),
                        reason: format!("low bound {low} is above high bound {high}"),
                    });
                }
            }
            if !seen.insert((input.category.clone(), input.subcategory.clone())) {
                return Err(ValidationError::DuplicateRule {
                    category: input.category,
                    subcategory: input.subcategory,
                });
            }

            rules.push(ThresholdRule {
                owner_id: self.owner_id().cloned(),
                gateway_id: self.gateway_id.clone(),
                category: input.category,
                subcategory: input.subcategory,
                high: input.high,
                low: input.low,
                priority: input.priority,
                message: input.message.filter(|m| !m.is_empty()),
            });
        }

        Ok(rules)
    }
}
