//! Queue abstraction and the scheduling order shared by queue backends.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::core::job::QueueEntry;
use crate::core::SchedulerError;

/// Running-job count per customer address.
pub type RunningCounts = HashMap<String, u32>;

/// Abstraction for queue backends.
///
/// Ordering depends on running counts that change between calls, so backends
/// must order fresh on every `dequeue`/`peek_order` rather than caching.
pub trait JobQueue: Send + Sync {
    /// Enqueue an entry if space permits.
    fn enqueue(&mut self, entry: QueueEntry) -> Result<(), SchedulerError>;
    /// Remove and return the head of the current order.
    fn dequeue(&mut self, running: &RunningCounts) -> Option<QueueEntry>;
    /// Job ids in current order, without mutating the queue.
    fn peek_order(&self, running: &RunningCounts) -> Vec<String>;
    /// Remove a specific job.
    fn remove(&mut self, job_id: &str) -> Option<QueueEntry>;
    /// Remove and return entries whose deadline has passed.
    fn drain_expired(&mut self, now_ms: u128) -> Vec<QueueEntry>;
    /// Maximum depth allowed for this queue.
    fn max_depth(&self) -> usize;
    /// Current depth.
    fn len(&self) -> usize;
    /// Whether the queue is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scheduling order: priority descending, then (with fair-share) fewer running
/// jobs first, then earlier submission. Callers sort stably so remaining ties
/// keep enqueue order.
pub fn compare_entries(
    a: &QueueEntry,
    b: &QueueEntry,
    running: &RunningCounts,
    fair_share: bool,
) -> Ordering {
    b.effective_priority()
        .cmp(&a.effective_priority())
        .then_with(|| {
            if fair_share {
                let ra = running.get(&a.job.customer).copied().unwrap_or(0);
                let rb = running.get(&b.job.customer).copied().unwrap_or(0);
                ra.cmp(&rb)
            } else {
                Ordering::Equal
            }
        })
        .then_with(|| a.job.submitted_at_ms.cmp(&b.job.submitted_at_ms))
}
