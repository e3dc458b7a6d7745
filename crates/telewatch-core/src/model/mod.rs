// ── Domain model ──
//
// Canonical types shared by the store, the evaluator, the router and the
// wire protocol.

pub mod alarm;
pub mod event;
pub mod ids;
pub mod reading;
pub mod threshold;
mod timestamp;

pub use alarm::AlarmRecord;
pub use event::{InboundMessage, OutboundEvent, SubscribeRequest, SubscribedAck};
pub use ids::{GatewayId, OWNER_ROOM_PREFIX, OwnerId, RoomKey};
pub use reading::{MetricLeaf, Metrics, NewReading, Reading, RecordId};
pub use threshold::{OwnerFilter, Priority, RuleScope, ThresholdRule, ThresholdRuleInput};
