//! Reconciliation trigger: the background task that turns signals into passes.
//!
//! Signals arrive on a bounded channel. A reconnect waits out the settle
//! delay first; if the link drops again meanwhile nothing runs. After a
//! reconnect or a discard the watched views are refetched as well.
//!
//! While online the task also sleeps until the earliest backed-off entry
//! comes due, so transient failures are retried without any outside signal.

use crate::engine::{now_ms, SyncEngine};
use crate::events::{ConnectivitySignal, Trigger};
use std::sync::PoisonError;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Lower bound between automatic retry passes.
const MIN_RETRY_WAKE: Duration = Duration::from_millis(25);

/// Handle to the running trigger task.
pub struct ReconciliationTrigger {
    engine: SyncEngine,
    handle: JoinHandle<()>,
}

impl ReconciliationTrigger {
    /// Start the task. Returns `None` if one was already started for this
    /// engine.
    pub fn spawn(engine: &SyncEngine) -> Option<Self> {
        let triggers = engine
            .inner
            .trigger_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let shutdown = engine.inner.shutdown.subscribe();
        let handle = tokio::spawn(run(engine.clone(), triggers, shutdown));
        Some(Self {
            engine: engine.clone(),
            handle,
        })
    }

    /// Stop the task and wait for it to finish its current pass.
    pub async fn stop(self) {
        let _ = self.engine.inner.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "reconciliation task panicked");
        }
    }
}

async fn run(
    engine: SyncEngine,
    mut triggers: mpsc::Receiver<Trigger>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = engine.config().pass_interval.map(|period| {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    });

    tracing::debug!("reconciliation trigger started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let retry_at = retry_deadline(&engine).await;
        let trigger = tokio::select! {
            _ = shutdown.changed() => break,
            received = triggers.recv() => match received {
                Some(trigger) => trigger,
                None => break,
            },
            _ = tick(&mut ticker) => Trigger::Tick,
            _ = sleep_until(retry_at) => Trigger::Tick,
        };

        match trigger {
            Trigger::Connectivity(ConnectivitySignal::Online) => {
                if settle(&engine, &mut triggers, &mut shutdown).await {
                    reconcile(&engine).await;
                }
            }
            Trigger::Connectivity(ConnectivitySignal::Offline) => {
                tracing::debug!("offline, waiting for reconnect");
            }
            Trigger::Enqueued | Trigger::Tick => {
                engine.run_pass().await;
            }
            Trigger::Discarded => reconcile(&engine).await,
            Trigger::Rescheduled => {
                tracing::trace!("entries backing off, wake-up recomputed");
            }
        }
    }
    tracing::debug!("reconciliation trigger stopped");
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Instant the earliest backed-off entry comes due, while online.
async fn retry_deadline(engine: &SyncEngine) -> Option<Instant> {
    if !engine.is_online() {
        return None;
    }
    let due = engine.next_retry_at().await?;
    let delay = Duration::from_millis(due.saturating_sub(now_ms())).max(MIN_RETRY_WAKE);
    Some(Instant::now() + delay)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Wait out the settle delay. Returns whether the link is still up.
///
/// Other triggers arriving meanwhile are absorbed: the pass that follows
/// covers them.
async fn settle(
    engine: &SyncEngine,
    triggers: &mut mpsc::Receiver<Trigger>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let deadline = time::sleep(engine.config().settle_delay);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => return engine.is_online(),
            _ = shutdown.changed() => return false,
            received = triggers.recv() => match received {
                Some(Trigger::Connectivity(ConnectivitySignal::Offline)) | None => {
                    tracing::debug!("connection dropped while settling");
                    return false;
                }
                Some(_) => {}
            },
        }
    }
}

/// Pass over every table, then refetch what the host is displaying.
async fn reconcile(engine: &SyncEngine) {
    engine.run_pass().await;
    if !engine.is_online() {
        return;
    }
    if let Err(e) = engine.refresh_views().await {
        tracing::warn!(error = %e, "view refresh failed");
    }
}
