//! Job lifecycle phases, the transition table, and the append-only tracker.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::usage::UsageSnapshot;
use crate::core::SchedulerError;

/// One discrete state in a job's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    /// Accepted by the scheduler, not yet queued ("pending").
    Submitted,
    /// Waiting in the queue.
    Queued,
    /// A cluster was selected.
    Scheduled,
    /// Capacity debited, backend submission in flight.
    Starting,
    /// Executing on the backend.
    Running,
    /// Paused by the backend.
    Suspended,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully or rejected.
    Failed,
    /// Cancelled by the caller or the backend.
    Cancelled,
    /// Killed by the backend for exceeding its time limit.
    Timeout,
    /// No cluster was eligible at scheduling time.
    Unassigned,
    /// Billing has consumed the terminal record.
    Settled,
}

impl LifecyclePhase {
    /// Stable lowercase label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Queued => "queued",
            Self::Scheduled => "scheduled",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::Unassigned => "unassigned",
            Self::Settled => "settled",
        }
    }

    /// Completed, Failed, Cancelled or Timeout.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }

    /// Terminal or settled: nothing further can happen to the job's execution.
    pub const fn is_finished(self) -> bool {
        self.is_terminal() || matches!(self, Self::Settled)
    }

    /// Whether `self -> next` is in the state table.
    pub const fn can_transition_to(self, next: Self) -> bool {
        use LifecyclePhase::{
            Cancelled, Completed, Failed, Queued, Running, Scheduled, Settled, Starting, Submitted,
            Suspended, Timeout, Unassigned,
        };
        match self {
            Submitted => matches!(next, Queued | Failed | Cancelled),
            Queued => matches!(
                next,
                Scheduled | Unassigned | Starting | Running | Failed | Cancelled
            ),
            Scheduled => matches!(next, Starting | Running | Failed | Cancelled),
            Starting => matches!(next, Running | Failed | Cancelled),
            Running => matches!(next, Completed | Failed | Cancelled | Suspended | Timeout),
            Suspended => matches!(next, Running | Failed | Cancelled),
            Unassigned => matches!(next, Queued | Cancelled),
            Completed | Failed | Cancelled | Timeout => matches!(next, Settled),
            Settled => false,
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a job's phase log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    /// Phase entered.
    pub phase: LifecyclePhase,
    /// When it was entered, milliseconds since epoch.
    pub at_ms: u128,
    /// Why, when known.
    pub reason: Option<String>,
}

/// An accepted transition, as delivered to lifecycle callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Job that moved.
    pub job_id: String,
    /// Previous phase; `None` for the initial Submitted entry.
    pub from: Option<LifecyclePhase>,
    /// New phase.
    pub to: LifecyclePhase,
    /// Transition time, milliseconds since epoch.
    pub at_ms: u128,
    /// Why, when known.
    pub reason: Option<String>,
}

/// Observer invoked synchronously for every accepted transition.
pub type LifecycleCallback = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Per-job phase histories and usage snapshots.
///
/// Histories are append-only; a rejected transition leaves them untouched.
#[derive(Debug, Default)]
pub struct LifecycleTracker {
    histories: HashMap<String, Vec<PhaseRecord>>,
    usage: HashMap<String, Vec<UsageSnapshot>>,
}

impl LifecycleTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a history in the Submitted phase.
    pub fn begin(&mut self, job_id: &str, at_ms: u128) -> Result<LifecycleEvent, SchedulerError> {
        if self.histories.contains_key(job_id) {
            return Err(SchedulerError::DuplicateJob(job_id.to_string()));
        }
        self.histories.insert(
            job_id.to_string(),
            vec![PhaseRecord {
                phase: LifecyclePhase::Submitted,
                at_ms,
                reason: None,
            }],
        );
        Ok(LifecycleEvent {
            job_id: job_id.to_string(),
            from: None,
            to: LifecyclePhase::Submitted,
            at_ms,
            reason: None,
        })
    }

    /// Move a job to `to` if the state table allows it.
    pub fn transition(
        &mut self,
        job_id: &str,
        to: LifecyclePhase,
        at_ms: u128,
        reason: Option<String>,
    ) -> Result<LifecycleEvent, SchedulerError> {
        let history = self
            .histories
            .get_mut(job_id)
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
        let from = history
            .last()
            .map_or(LifecyclePhase::Submitted, |r| r.phase);
        if !from.can_transition_to(to) {
            tracing::error!(
                job_id,
                %from,
                %to,
                kind = "invalid_transition",
                "rejected lifecycle transition"
            );
            return Err(SchedulerError::InvalidTransition {
                job_id: job_id.to_string(),
                from,
                to,
            });
        }
        history.push(PhaseRecord {
            phase: to,
            at_ms,
            reason: reason.clone(),
        });
        tracing::debug!(job_id, %from, %to, "lifecycle transition");
        Ok(LifecycleEvent {
            job_id: job_id.to_string(),
            from: Some(from),
            to,
            at_ms,
            reason,
        })
    }

    /// Current phase of a job.
    pub fn current(&self, job_id: &str) -> Option<LifecyclePhase> {
        self.histories
            .get(job_id)
            .and_then(|h| h.last())
            .map(|r| r.phase)
    }

    /// Ordered phase history of a job.
    pub fn history(&self, job_id: &str) -> Option<&[PhaseRecord]> {
        self.histories.get(job_id).map(Vec::as_slice)
    }

    /// First time the job entered `phase`.
    pub fn entered_at(&self, job_id: &str, phase: LifecyclePhase) -> Option<u128> {
        self.histories
            .get(job_id)
            .and_then(|h| h.iter().find(|r| r.phase == phase))
            .map(|r| r.at_ms)
    }

    /// Attach a usage snapshot to a tracked job.
    pub fn attach_usage(&mut self, snapshot: UsageSnapshot) -> Result<(), SchedulerError> {
        if !self.histories.contains_key(&snapshot.job_id) {
            return Err(SchedulerError::JobNotFound(snapshot.job_id));
        }
        self.usage
            .entry(snapshot.job_id.clone())
            .or_default()
            .push(snapshot);
        Ok(())
    }

    /// Usage snapshots recorded for a job, oldest first.
    pub fn usage(&self, job_id: &str) -> &[UsageSnapshot] {
        self.usage.get(job_id).map(Vec::as_slice).unwrap_or(&[])
    }
}
