// telewatch-core: change detection, alarm evaluation and live fan-out for
// gateway telemetry. Transport-agnostic; never reads files or env vars.

pub mod auth;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod model;
pub mod notifier;
pub mod pipeline;
pub mod router;
pub mod session;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use auth::{AuthError, DisabledVerifier, JwtVerifier, TokenVerifier};
pub use config::{BroadcastPolicy, PipelineConfig, RuleScoping};
pub use error::{CoreError, ValidationError};
pub use evaluator::{AlarmEvaluator, evaluate};
pub use notifier::{ChangeNotifier, NotifierConfig, NotifierState};
pub use pipeline::Pipeline;
pub use router::{ConnectionId, EventReceiver, Router};
pub use session::{Session, SessionContext, SessionState};
pub use store::{
    AlarmLog, AlarmQuery, InsertManyResult, MemoryStore, ReadingLog, ReadingQuery, SortOrder,
    StoreError, Stores, ThresholdStore,
};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    AlarmRecord, GatewayId, InboundMessage, MetricLeaf, Metrics, NewReading, OutboundEvent,
    OwnerFilter, OwnerId, Priority, Reading, RecordId, RoomKey, RuleScope, SubscribeRequest,
    SubscribedAck, ThresholdRule, ThresholdRuleInput,
};
