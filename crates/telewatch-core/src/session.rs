//! Per-connection subscription state.
//!
//! A [`Session`] occupies at most one gateway room and at most one owner
//! room. The two slots are independent: switching gateways never touches
//! the owner room, and a rejected token never touches the gateway room.
//!
//! On a fresh join the session queues one-time catch-up frames after the
//! `subscribed` ack: the latest reading of the gateway and, for an owner,
//! the most recent alarm records. Re-subscribing to a room the session
//! already holds sends nothing extra.
//!
//! The gateway snapshot is queued before the connection joins the gateway
//! room, so it always precedes live `new-reading` events. The owner room
//! is joined before its backlog is read, so a fresh alarm may appear both
//! live and in the backlog.

use std::sync::Arc;

use secrecy::ExposeSecret;
use tracing::{debug, warn};

use crate::auth::TokenVerifier;
use crate::model::{
    GatewayId, OutboundEvent, OwnerId, Reading, RoomKey, SubscribeRequest, SubscribedAck,
};
use crate::router::{ConnectionId, EventReceiver, Router};
use crate::store::{AlarmLog, AlarmQuery, ReadingLog, ReadingQuery};

/// Everything a session needs from the running pipeline.
pub struct SessionContext {
    pub router: Arc<Router>,
    pub readings: Arc<dyn ReadingLog>,
    pub alarms: Arc<dyn AlarmLog>,
    pub verifier: Arc<dyn TokenVerifier>,
    /// Maximum alarms in an owner catch-up.
    pub backlog_limit: usize,
    /// Send the latest reading on a fresh gateway join.
    pub gateway_snapshot: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Disconnected,
}

pub struct Session {
    id: ConnectionId,
    ctx: Arc<SessionContext>,
    gateway_room: Option<GatewayId>,
    owner_room: Option<OwnerId>,
    state: SessionState,
}

impl Session {
    /// Register a new connection with the router.
    pub fn open(ctx: Arc<SessionContext>) -> (Self, EventReceiver) {
        let (id, rx) = ctx.router.register();
        let session = Self {
            id,
            ctx,
            gateway_room: None,
            owner_room: None,
            state: SessionState::Active,
        };
        (session, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn gateway_room(&self) -> Option<&GatewayId> {
        self.gateway_room.as_ref()
    }

    pub fn owner_room(&self) -> Option<&OwnerId> {
        self.owner_room.as_ref()
    }

    /// Handle a `subscribe` request and queue the ack plus any catch-up.
    pub async fn subscribe(&mut self, req: SubscribeRequest) -> SubscribedAck {
        let SubscribeRequest { gateway_id, token } = req;

        if self.state == SessionState::Disconnected {
            return SubscribedAck {
                ok: false,
                gateway_id,
                owner_room: None,
                error: Some("connection closed".into()),
            };
        }

        if gateway_id.is_blank() {
            let ack = SubscribedAck {
                ok: false,
                gateway_id,
                owner_room: None,
                error: Some("gatewayId is required".into()),
            };
            self.ctx
                .router
                .send_to(self.id, OutboundEvent::Subscribed(ack.clone()));
            return ack;
        }

        // Read before joining so no live reading is queued ahead of it.
        let snapshot = if self.gateway_room.as_ref() != Some(&gateway_id)
            && self.ctx.gateway_snapshot
        {
            self.latest_reading(&gateway_id).await
        } else {
            None
        };

        let mut ack = SubscribedAck {
            ok: true,
            gateway_id: gateway_id.clone(),
            owner_room: None,
            error: None,
        };
        let mut owner = None;

        if let Some(token) = token {
            match self.ctx.verifier.verify(token.expose_secret()) {
                Ok(verified) => {
                    ack.owner_room = Some(RoomKey::Owner(verified.clone()).to_string());
                    owner = Some(verified);
                }
                Err(e) => {
                    warn!(
                        connection = %self.id,
                        gateway_id = %gateway_id,
                        error = %e,
                        "subscribe token rejected, gateway-only subscription"
                    );
                    ack.error = Some(e.to_string());
                }
            }
        }

        self.ctx
            .router
            .send_to(self.id, OutboundEvent::Subscribed(ack.clone()));
        if let Some(latest) = snapshot {
            self.ctx
                .router
                .send_to(self.id, OutboundEvent::Reading(Arc::new(latest)));
        }
        self.enter_gateway(&gateway_id);

        if let Some(owner) = owner {
            if self.enter_owner(&owner) {
                self.send_alarm_backlog(owner).await;
            }
        }

        ack
    }

    /// Release every room. Safe to call more than once.
    pub fn disconnect(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.state = SessionState::Disconnected;
        self.gateway_room = None;
        self.owner_room = None;
        self.ctx.router.unregister(self.id);
        debug!(connection = %self.id, "session disconnected");
    }

    // ── Room slots ───────────────────────────────────────────────────

    fn enter_gateway(&mut self, gateway_id: &GatewayId) {
        if self.gateway_room.as_ref() == Some(gateway_id) {
            return;
        }
        if let Some(previous) = self.gateway_room.take() {
            self.ctx.router.leave(self.id, &RoomKey::Gateway(previous));
        }
        self.ctx
            .router
            .join(self.id, RoomKey::Gateway(gateway_id.clone()));
        self.gateway_room = Some(gateway_id.clone());
        debug!(connection = %self.id, gateway_id = %gateway_id, "joined gateway room");
    }

    fn enter_owner(&mut self, owner_id: &OwnerId) -> bool {
        if self.owner_room.as_ref() == Some(owner_id) {
            return false;
        }
        if let Some(previous) = self.owner_room.take() {
            self.ctx.router.leave(self.id, &RoomKey::Owner(previous));
        }
        self.ctx
            .router
            .join(self.id, RoomKey::Owner(owner_id.clone()));
        self.owner_room = Some(owner_id.clone());
        debug!(connection = %self.id, "joined owner room");
        true
    }

    // ── Catch-up ─────────────────────────────────────────────────────

    async fn latest_reading(&self, gateway_id: &GatewayId) -> Option<Reading> {
        match self
            .ctx
            .readings
            .find(ReadingQuery::latest(gateway_id.clone()))
            .await
        {
            Ok(found) => found.into_iter().next(),
            Err(e) => {
                warn!(connection = %self.id, error = %e, "latest reading lookup failed");
                None
            }
        }
    }

    async fn send_alarm_backlog(&self, owner_id: OwnerId) {
        let query = AlarmQuery::owner_backlog(owner_id, self.ctx.backlog_limit);
        match self.ctx.alarms.find(query).await {
            Ok(backlog) => {
                self.ctx
                    .router
                    .send_to(self.id, OutboundEvent::AlarmBacklog(backlog));
            }
            Err(e) => warn!(connection = %self.id, error = %e, "alarm backlog lookup failed"),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}
