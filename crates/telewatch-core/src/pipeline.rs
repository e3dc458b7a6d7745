// ── Pipeline facade ──
//
// Owns the notifier, the dispatch task, the evaluator and the router, and
// exposes the write boundary (ingest, manual alarm insert, threshold
// replacement) to the transport layer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::auth::TokenVerifier;
use crate::config::{BroadcastPolicy, PipelineConfig};
use crate::error::CoreError;
use crate::evaluator::AlarmEvaluator;
use crate::model::{
    AlarmRecord, NewReading, OutboundEvent, Reading, RoomKey, RuleScope, ThresholdRule,
    ThresholdRuleInput,
};
use crate::notifier::{ChangeNotifier, NotifierConfig, NotifierState};
use crate::router::{EventReceiver, Router};
use crate::session::{Session, SessionContext};
use crate::store::Stores;

// ── Pipeline ─────────────────────────────────────────────────────

/// The main entry point for the transport layer.
///
/// Cheaply cloneable via `Arc<PipelineInner>`. [`new`](Self::new) only wires
/// components; [`start`](Self::start) opens the insert subscription and
/// spawns background tasks.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    config: PipelineConfig,
    stores: Stores,
    router: Arc<Router>,
    sessions: Arc<SessionContext>,
    evaluator: AlarmEvaluator,
    notifier: OnceLock<ChangeNotifier>,
    started: AtomicBool,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, stores: Stores, verifier: Arc<dyn TokenVerifier>) -> Self {
        let router = Arc::new(Router::new(config.session_buffer));
        let sessions = Arc::new(SessionContext {
            router: Arc::clone(&router),
            readings: Arc::clone(&stores.readings),
            alarms: Arc::clone(&stores.alarms),
            verifier,
            backlog_limit: config.backlog_limit,
            gateway_snapshot: config.gateway_snapshot,
        });
        let evaluator = AlarmEvaluator::new(
            Arc::clone(&stores.thresholds),
            Arc::clone(&stores.alarms),
            config.rule_scoping,
        );

        Self {
            inner: Arc::new(PipelineInner {
                config,
                stores,
                router,
                sessions,
                evaluator,
                notifier: OnceLock::new(),
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.inner.router
    }

    pub fn stores(&self) -> &Stores {
        &self.inner.stores
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Open the insert subscription and spawn the dispatch task.
    ///
    /// A store that cannot be reached here is a fatal startup error; after
    /// this returns, store failures are retried forever in the background.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(CoreError::AlreadyStarted);
        }

        let config = &self.inner.config;
        let notifier = match ChangeNotifier::spawn(
            Arc::clone(&self.inner.stores.readings),
            NotifierConfig {
                retry_delay: config.retry_delay,
                buffer: config.notifier_buffer,
            },
            self.inner.cancel.child_token(),
            &self.inner.tracker,
        )
        .await
        {
            Ok(notifier) => notifier,
            Err(e) => {
                self.inner.started.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        let inserts = notifier.subscribe_inserts();
        let _ = self.inner.notifier.set(notifier);

        let dispatcher = Dispatcher {
            router: Arc::clone(&self.inner.router),
            evaluator: self.inner.evaluator.clone(),
            policy: config.broadcast,
            tracker: self.inner.tracker.clone(),
        };
        self.inner
            .tracker
            .spawn(dispatch_loop(dispatcher, inserts, self.inner.cancel.clone()));

        info!(
            broadcast = %config.broadcast,
            rule_scoping = %config.rule_scoping,
            "pipeline started"
        );
        Ok(())
    }

    /// Stop the notifier and dispatch task, then wait for in-flight
    /// evaluations to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("pipeline stopped");
    }

    /// `None` until [`start`](Self::start) succeeds.
    pub fn notifier_state(&self) -> Option<NotifierState> {
        self.inner.notifier.get().map(ChangeNotifier::state)
    }

    pub fn notifier_state_changes(&self) -> Option<watch::Receiver<NotifierState>> {
        self.inner.notifier.get().map(ChangeNotifier::state_changes)
    }

    // ── Live connections ─────────────────────────────────────────────

    /// Register a live connection. Events for its rooms arrive on the
    /// returned receiver.
    pub fn open_session(&self) -> (Session, EventReceiver) {
        Session::open(Arc::clone(&self.inner.sessions))
    }

    // ── Write boundary ───────────────────────────────────────────────

    /// Validate and append a reading. Fan-out happens when the notifier
    /// observes the insert.
    pub async fn ingest(&self, new: NewReading) -> Result<Reading, CoreError> {
        let reading = new.into_reading(Utc::now())?;
        self.inner.stores.readings.insert(reading.clone()).await?;
        debug!(gateway_id = %reading.gateway_id, reading_id = %reading.id, "reading ingested");
        Ok(reading)
    }

    /// Legacy manual alarm insert. Persisted only, never fanned out.
    pub async fn record_alarm(&self, record: AlarmRecord) -> Result<AlarmRecord, CoreError> {
        record.validate()?;
        self.inner.stores.alarms.insert_one(record.clone()).await?;
        Ok(record)
    }

    /// Replace the rules of one owner slot of a gateway with `inputs`.
    ///
    /// A scope without an owner addresses the gateway's ownerless rules;
    /// other owners' rules are kept.
    pub async fn replace_thresholds(
        &self,
        scope: RuleScope,
        inputs: Vec<ThresholdRuleInput>,
    ) -> Result<Vec<ThresholdRule>, CoreError> {
        let scope = scope.exact();
        let rules = scope.build_rules(inputs)?;
        let active = self
            .inner
            .stores
            .thresholds
            .replace(scope.clone(), rules.clone())
            .await?;
        info!(gateway_id = %scope.gateway_id, active, "threshold rules replaced");
        Ok(rules)
    }

    pub async fn thresholds(&self, scope: RuleScope) -> Result<Vec<ThresholdRule>, CoreError> {
        Ok(self.inner.stores.thresholds.find(scope).await?)
    }
}

// ── Dispatch ─────────────────────────────────────────────────────

#[derive(Clone)]
struct Dispatcher {
    router: Arc<Router>,
    evaluator: AlarmEvaluator,
    policy: BroadcastPolicy,
    tracker: TaskTracker,
}

impl Dispatcher {
    /// Deliver the reading itself. Runs inline in the dispatch loop so a
    /// room always sees a reading before that reading's alarms.
    fn publish_reading(&self, reading: &Arc<Reading>) {
        let event = Arc::new(OutboundEvent::NewReading(Arc::clone(reading)));
        let delivered = match self.policy {
            BroadcastPolicy::Global => self.router.publish_all(&event),
            BroadcastPolicy::Rooms => {
                let mut rooms = vec![RoomKey::Gateway(reading.gateway_id.clone())];
                if let Some(owner) = &reading.owner_id {
                    rooms.push(RoomKey::Owner(owner.clone()));
                }
                self.router.publish_many(&rooms, &event)
            }
        };
        debug!(gateway_id = %reading.gateway_id, delivered, "new-reading published");
    }

    async fn evaluate_and_publish(self, reading: Arc<Reading>) {
        let alarms = self.evaluator.process(&reading).await;
        if alarms.is_empty() {
            return;
        }

        let batch: Arc<[AlarmRecord]> = alarms.into();
        let gateway_room = RoomKey::Gateway(reading.gateway_id.clone());
        self.router.publish(
            &gateway_room,
            &Arc::new(OutboundEvent::NewAlarms(Arc::clone(&batch))),
        );

        let global = Arc::new(OutboundEvent::GlobalAlarms(batch));
        match (self.policy, &reading.owner_id) {
            (BroadcastPolicy::Global, _) => {
                self.router.publish_all(&global);
            }
            (BroadcastPolicy::Rooms, Some(owner)) => {
                self.router.publish(&RoomKey::Owner(owner.clone()), &global);
            }
            (BroadcastPolicy::Rooms, None) => {}
        }
    }
}

/// Consume the notifier: publish each reading, then evaluate it on its own
/// task so a slow evaluation never delays the next reading.
async fn dispatch_loop(
    dispatcher: Dispatcher,
    mut inserts: BoxStream<'static, Arc<Reading>>,
    cancel: CancellationToken,
) {
    loop {
        let reading = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = inserts.next() => match next {
                Some(reading) => reading,
                None => break,
            },
        };

        dispatcher.publish_reading(&reading);
        let worker = dispatcher.clone();
        dispatcher
            .tracker
            .spawn(worker.evaluate_and_publish(reading));
    }
    debug!("dispatch loop exiting");
}
