//! Background reconciliation against the execution backend.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::core::backend::ExecutionBackend;
use crate::core::Scheduler;
use crate::util::clock::now_ms;

/// Handle to a running reconciler task.
#[derive(Debug)]
pub struct ReconcilerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Stop the loop and wait for the current pass to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!("reconciler task ended abnormally: {}", e);
        }
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Run one pass: expire stale queue entries, pull backend state, and
/// snapshot usage of everything still running.
pub async fn reconcile_once<B: ExecutionBackend>(scheduler: &Scheduler<B>) {
    let expired = scheduler.expire_queued(now_ms());
    let changes = scheduler.reconcile_active().await;
    let snapshots = scheduler.collect_periodic_usage().await;
    tracing::debug!(
        expired = expired.len(),
        transitions = changes.len(),
        snapshots = snapshots.len(),
        "reconcile pass"
    );
}

/// Spawn a task that calls [`reconcile_once`] every `interval`.
///
/// Must be called from within a tokio runtime.
pub fn spawn_reconciler<B: ExecutionBackend>(
    scheduler: Arc<Scheduler<B>>,
    interval: Duration,
) -> ReconcilerHandle {
    let (tx, mut rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_ms = interval.as_millis(), "reconciler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => reconcile_once(&scheduler).await,
                changed = rx.changed() => {
                    if changed.is_err() || *rx.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("reconciler shutting down");
    });
    ReconcilerHandle { shutdown: tx, task }
}
