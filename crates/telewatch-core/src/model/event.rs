// ── Live-connection wire events ──
//
// Every frame is `{ "event": <name>, "data": <payload> }`. Event names are
// the contract dashboards and other services rely on, so they are pinned by
// tests below.

use std::sync::Arc;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use super::alarm::AlarmRecord;
use super::ids::GatewayId;
use super::reading::Reading;

// ── Outbound ────────────────────────────────────────────────────────

/// Server → client event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    /// A reading observed live by the change notifier.
    NewReading(Arc<Reading>),
    /// Most recent stored reading, sent once when a gateway room is joined.
    Reading(Arc<Reading>),
    /// Alarms produced by one reading, delivered to the gateway room.
    NewAlarms(Arc<[AlarmRecord]>),
    /// Alarms produced by one reading, delivered to the owner room.
    GlobalAlarms(Arc<[AlarmRecord]>),
    /// Owner catch-up on joining an owner room, most recent first.
    AlarmBacklog(Vec<AlarmRecord>),
    /// Acknowledgment of a `subscribe` request.
    Subscribed(SubscribedAck),
    /// The client sent something the server could not act on.
    Error { message: String },
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewReading(_) => "new-reading",
            Self::Reading(_) => "reading",
            Self::NewAlarms(_) => "new-alarms",
            Self::GlobalAlarms(_) => "global-alarms",
            Self::AlarmBacklog(_) => "alarm-backlog",
            Self::Subscribed(_) => "subscribed",
            Self::Error { .. } => "error",
        }
    }
}

/// Payload of the `subscribed` acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribedAck {
    pub ok: bool,
    pub gateway_id: GatewayId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_room: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ── Inbound ─────────────────────────────────────────────────────────

/// Client → server message.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum InboundMessage {
    Subscribe(SubscribeRequest),
}

/// Request to join a gateway room and, with a valid token, an owner room.
#[derive(Debug, Deserialize)]
#[serde(from = "RawSubscribe")]
pub struct SubscribeRequest {
    pub gateway_id: GatewayId,
    pub token: Option<SecretString>,
}

impl SubscribeRequest {
    pub fn gateway(gateway_id: impl Into<GatewayId>) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(SecretString::from(token.into()));
        self
    }
}

/// Older clients send the bare gateway id instead of an object.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawSubscribe {
    Bare(GatewayId),
    Full {
        #[serde(rename = "gatewayId")]
        gateway_id: GatewayId,
        #[serde(default)]
        token: Option<String>,
    },
}

impl From<RawSubscribe> for SubscribeRequest {
    fn from(raw: RawSubscribe) -> Self {
        match raw {
            RawSubscribe::Bare(gateway_id) => Self {
                gateway_id,
                token: None,
            },
            RawSubscribe::Full { gateway_id, token } => Self {
                gateway_id,
                token: token.filter(|t| !t.is_empty()).map(SecretString::from),
            },
        }
    }
}
