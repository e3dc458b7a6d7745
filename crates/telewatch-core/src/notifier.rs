//! Resilient insert subscription over a [`ReadingLog`].
//!
//! The notifier owns one long-lived task that reads the store's insert
//! stream and republishes each [`Reading`] on a broadcast channel, so every
//! consumer gets its own buffered receiver and a slow consumer never stalls
//! the others.
//!
//! When the store's stream fails or is closed, the task logs, waits a fixed
//! delay and subscribes again from the current point of the log. Readings
//! inserted while no subscription is open are not replayed: the store stays
//! the source of truth and gaps are tolerated. The loop never gives up; only
//! cancellation ends it.
//!
//! The very first subscription is made before [`ChangeNotifier::spawn`]
//! returns, so an unreachable store at startup is reported to the caller.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::model::Reading;
use crate::store::{InsertStream, ReadingLog, StoreError};

// ── NotifierConfig ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifierConfig {
    /// Fixed wait between a failed subscription and the next attempt. Default: 5s.
    pub retry_delay: Duration,
    /// Readings buffered per consumer before it starts lagging. Default: 1024.
    pub buffer: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            buffer: 1024,
        }
    }
}

// ── NotifierState ───────────────────────────────────────────────────

/// Subscription state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierState {
    Connecting,
    Watching,
    /// Waiting out the retry delay after `attempt` consecutive failures.
    Backoff { attempt: u32 },
    Stopped,
}

impl NotifierState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Watching => "watching",
            Self::Backoff { .. } => "backoff",
            Self::Stopped => "stopped",
        }
    }
}

// ── ChangeNotifier ──────────────────────────────────────────────────

/// Handle to the running insert-watch task.
pub struct ChangeNotifier {
    readings_tx: broadcast::Sender<Arc<Reading>>,
    state: watch::Receiver<NotifierState>,
    cancel: CancellationToken,
}

impl ChangeNotifier {
    /// Open the first insert subscription and spawn the watch loop on
    /// `tracker`.
    ///
    /// Fails only if that first subscription cannot be opened.
    pub async fn spawn(
        log: Arc<dyn ReadingLog>,
        config: NotifierConfig,
        cancel: CancellationToken,
        tracker: &TaskTracker,
    ) -> Result<Self, StoreError> {
        let (state_tx, state) = watch::channel(NotifierState::Connecting);
        let first = log.watch_inserts().await?;
        state_tx.send_replace(NotifierState::Watching);
        info!("watching reading inserts");

        let (readings_tx, _) = broadcast::channel(config.buffer.max(1));

        let task_tx = readings_tx.clone();
        let task_cancel = cancel.clone();
        tracker.spawn(async move {
            watch_loop(log, first, task_tx, state_tx, config.retry_delay, task_cancel).await;
        });

        Ok(Self {
            readings_tx,
            state,
            cancel,
        })
    }

    /// A new, independent stream of inserted readings, starting now.
    ///
    /// A consumer that falls more than the buffer behind skips the missed
    /// readings with a warning.
    pub fn subscribe_inserts(&self) -> BoxStream<'static, Arc<Reading>> {
        BroadcastStream::new(self.readings_tx.subscribe())
            .filter_map(|item| async move {
                match item {
                    Ok(reading) => Some(reading),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(skipped, "insert consumer lagged, readings skipped");
                        None
                    }
                }
            })
            .boxed()
    }

    pub fn state(&self) -> NotifierState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn state_changes(&self) -> watch::Receiver<NotifierState> {
        self.state.clone()
    }

    /// Signal the watch loop to stop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Watch loop ──────────────────────────────────────────────────────

enum StreamEnd {
    Cancelled,
    Closed,
    Failed(StoreError),
}

/// Main loop: read → on failure, wait → resubscribe.
async fn watch_loop(
    log: Arc<dyn ReadingLog>,
    first: InsertStream,
    readings_tx: broadcast::Sender<Arc<Reading>>,
    state_tx: watch::Sender<NotifierState>,
    retry_delay: Duration,
    cancel: CancellationToken,
) {
    let mut stream = Some(first);
    let mut attempt: u32 = 0;

    loop {
        let current = if let Some(s) = stream.take() {
            s
        } else {
            state_tx.send_replace(NotifierState::Connecting);
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = log.watch_inserts() => result,
            };
            match result {
                Ok(s) => {
                    info!(attempt, "insert subscription re-established");
                    s
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    warn!(error = %e, attempt, "insert subscription failed");
                    if !backoff(&state_tx, attempt, retry_delay, &cancel).await {
                        break;
                    }
                    continue;
                }
            }
        };

        attempt = 0;
        state_tx.send_replace(NotifierState::Watching);

        match forward(current, &readings_tx, &cancel).await {
            StreamEnd::Cancelled => break,
            StreamEnd::Closed => {
                attempt = attempt.saturating_add(1);
                warn!(attempt, "insert subscription closed by store");
            }
            StreamEnd::Failed(e) => {
                attempt = attempt.saturating_add(1);
                warn!(error = %e, attempt, "insert subscription errored");
            }
        }

        if !backoff(&state_tx, attempt, retry_delay, &cancel).await {
            break;
        }
    }

    state_tx.send_replace(NotifierState::Stopped);
    debug!("insert watch loop exiting");
}

/// Forward one subscription's readings until it ends.
async fn forward(
    mut stream: InsertStream,
    readings_tx: &broadcast::Sender<Arc<Reading>>,
    cancel: &CancellationToken,
) -> StreamEnd {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return StreamEnd::Cancelled,
            item = stream.next() => match item {
                Some(Ok(reading)) => {
                    debug!(gateway_id = %reading.gateway_id, "reading inserted");
                    // No receivers just means nobody is consuming right now.
                    let _ = readings_tx.send(reading);
                }
                Some(Err(StoreError::Lagged { skipped })) => {
                    warn!(skipped, "insert subscription lagged, continuing");
                }
                Some(Err(e)) => return StreamEnd::Failed(e),
                None => return StreamEnd::Closed,
            },
        }
    }
}

/// Sleep the fixed retry delay. Returns `false` if cancelled meanwhile.
async fn backoff(
    state_tx: &watch::Sender<NotifierState>,
    attempt: u32,
    delay: Duration,
    cancel: &CancellationToken,
) -> bool {
    state_tx.send_replace(NotifierState::Backoff { attempt });
    debug!(
        delay_secs = delay.as_secs(),
        attempt,
        "waiting before resubscribe"
    );
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}
