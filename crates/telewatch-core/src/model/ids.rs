// ── Core identity types ──
//
// Gateway and owner identifiers are opaque strings supplied by devices and
// the auth layer. Rooms are keyed by a typed enum so the two namespaces can
// never collide, even when a gateway id happens to look like an owner key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix for the string form of an owner room key.
pub const OWNER_ROOM_PREFIX: &str = "owner:";

// ── GatewayId ───────────────────────────────────────────────────────

/// Stable identifier of a telemetry-producing gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GatewayId(String);

impl GatewayId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for GatewayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for GatewayId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for GatewayId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for GatewayId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── OwnerId ─────────────────────────────────────────────────────────

/// Opaque identifier of the subscriber account that owns a gateway.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for OwnerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── RoomKey ─────────────────────────────────────────────────────────

/// A named delivery channel that live connections join and leave.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomKey {
    /// Device-level room, named by the gateway id verbatim.
    Gateway(GatewayId),
    /// Per-user dashboard room.
    Owner(OwnerId),
}

impl RoomKey {
    pub fn gateway(id: impl Into<GatewayId>) -> Self {
        Self::Gateway(id.into())
    }

    pub fn owner(id: impl Into<OwnerId>) -> Self {
        Self::Owner(id.into())
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gateway(id) => write!(f, "{id}"),
            Self::Owner(id) => write!(f, "{OWNER_ROOM_PREFIX}{id}"),
        }
    }
}
