// ── Runtime pipeline configuration ──
//
// These types describe how the pipeline behaves once running. They never
// touch disk; the config crate builds a `PipelineConfig` and hands it in.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Who receives `new-reading` and `global-alarms` events.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BroadcastPolicy {
    /// Deliver only to the gateway room and the owner room.
    #[default]
    Rooms,
    /// Deliver to every live connection.
    Global,
}

/// Which threshold rules apply to a reading.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RuleScoping {
    /// Every rule of the reading's gateway.
    #[default]
    Gateway,
    /// Only rules of the reading's gateway that belong to its owner.
    GatewayAndOwner,
}

/// Pipeline tuning, built by the binary and passed to `Pipeline::new`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Fixed delay before re-establishing a failed insert subscription.
    pub retry_delay: Duration,
    pub broadcast: BroadcastPolicy,
    pub rule_scoping: RuleScoping,
    /// Maximum alarms in an owner's catch-up backlog.
    pub backlog_limit: usize,
    /// Outbound queue depth per live connection.
    pub session_buffer: usize,
    /// Readings buffered between the notifier and its consumers.
    pub notifier_buffer: usize,
    /// Send the latest stored reading when a gateway room is joined.
    pub gateway_snapshot: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            broadcast: BroadcastPolicy::default(),
            rule_scoping: RuleScoping::default(),
            backlog_limit: 20,
            session_buffer: 256,
            notifier_buffer: 1024,
            gateway_snapshot: true,
        }
    }
}
