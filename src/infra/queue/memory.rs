//! In-memory queue with priority, fair-share and deadline awareness.

use crate::core::job::QueueEntry;
use crate::core::queue::{compare_entries, JobQueue, RunningCounts};
use crate::core::SchedulerError;

/// In-memory queue kept in enqueue order and sorted on demand.
///
/// A heap would go stale as running counts move between calls, so each
/// `dequeue` does a linear scan for the current head instead.
#[derive(Debug)]
pub struct InMemoryJobQueue {
    max_depth: usize,
    fair_share: bool,
    entries: Vec<QueueEntry>,
}

impl InMemoryJobQueue {
    /// Create a new in-memory queue with a maximum depth.
    pub fn new(max_depth: usize, fair_share: bool) -> Self {
        Self {
            max_depth,
            fair_share,
            entries: Vec::with_capacity(max_depth.min(1024)),
        }
    }

    /// Whether fair-share ordering is enabled.
    pub const fn fair_share(&self) -> bool {
        self.fair_share
    }

    fn sorted(&self, running: &RunningCounts) -> Vec<&QueueEntry> {
        let mut ordered: Vec<&QueueEntry> = self.entries.iter().collect();
        // stable: equal keys stay in enqueue order
        ordered.sort_by(|a, b| compare_entries(a, b, running, self.fair_share));
        ordered
    }
}

impl JobQueue for InMemoryJobQueue {
    fn enqueue(&mut self, entry: QueueEntry) -> Result<(), SchedulerError> {
        if self.len() >= self.max_depth() {
            return Err(SchedulerError::QueueFull {
                depth: self.len(),
                limit: self.max_depth,
            });
        }
        self.entries.push(entry);
        Ok(())
    }

    fn dequeue(&mut self, running: &RunningCounts) -> Option<QueueEntry> {
        // min_by keeps the first of equal elements, matching a stable sort's head
        let index = self
            .entries
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| compare_entries(a, b, running, self.fair_share))
            .map(|(i, _)| i)?;
        Some(self.entries.remove(index))
    }

    fn peek_order(&self, running: &RunningCounts) -> Vec<String> {
        self.sorted(running)
            .into_iter()
            .map(|e| e.job.id.clone())
            .collect()
    }

    fn remove(&mut self, job_id: &str) -> Option<QueueEntry> {
        let index = self.entries.iter().position(|e| e.job.id == job_id)?;
        Some(self.entries.remove(index))
    }

    fn drain_expired(&mut self, now_ms: u128) -> Vec<QueueEntry> {
        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.is_expired(now_ms));
        self.entries = kept;
        expired
    }

    fn max_depth(&self) -> usize {
        self.max_depth
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::{Job, QueueOptions, ResourceRequest};

    fn entry(id: &str, customer: &str, priority: i32, submitted_at_ms: u128) -> QueueEntry {
        let job = Job::new(id, customer, ResourceRequest::new(1, 1))
            .with_priority(priority)
            .submitted_at(submitted_at_ms);
        QueueEntry::new(job, QueueOptions::default(), submitted_at_ms)
    }

    #[test]
    fn test_priority_ordering() {
        let mut q = InMemoryJobQueue::new(100, false);
        q.enqueue(entry("low", "a", 1, 100)).unwrap();
        q.enqueue(entry("crit", "a", 20, 200)).unwrap();
        q.enqueue(entry("normal", "a", 5, 300)).unwrap();
        q.enqueue(entry("high", "a", 10, 400)).unwrap();

        let none = RunningCounts::new();
        assert_eq!(q.peek_order(&none), vec!["crit", "high", "normal", "low"]);
        assert_eq!(q.dequeue(&none).unwrap().job.id, "crit");
        assert_eq!(q.dequeue(&none).unwrap().job.id, "high");
        assert_eq!(q.dequeue(&none).unwrap().job.id, "normal");
        assert_eq!(q.dequeue(&none).unwrap().job.id, "low");
        assert!(q.dequeue(&none).is_none());
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut q = InMemoryJobQueue::new(100, false);
        q.enqueue(entry("j1", "a", 5, 300)).unwrap();
        q.enqueue(entry("j2", "a", 5, 100)).unwrap();
        q.enqueue(entry("j3", "a", 5, 200)).unwrap();

        let none = RunningCounts::new();
        assert_eq!(q.dequeue(&none).unwrap().job.id, "j2");
        assert_eq!(q.dequeue(&none).unwrap().job.id, "j3");
        assert_eq!(q.dequeue(&none).unwrap().job.id, "j1");
    }

    #[test]
    fn identical_keys_keep_enqueue_order() {
        let mut q = InMemoryJobQueue::new(100, true);
        q.enqueue(entry("first", "a", 5, 100)).unwrap();
        q.enqueue(entry("second", "b", 5, 100)).unwrap();
        let none = RunningCounts::new();
        assert_eq!(q.peek_order(&none), vec!["first", "second"]);
        assert_eq!(q.dequeue(&none).unwrap().job.id, "first");
    }

    #[test]
    fn fair_share_prefers_customers_with_fewer_running_jobs() {
        let mut q = InMemoryJobQueue::new(100, true);
        q.enqueue(entry("busy-early", "busy", 5, 100)).unwrap();
        q.enqueue(entry("idle-late", "idle", 5, 200)).unwrap();
        q.enqueue(entry("busy-urgent", "busy", 9, 300)).unwrap();

        let mut running = RunningCounts::new();
        running.insert("busy".into(), 3);
        // priority still dominates fair-share
        assert_eq!(
            q.peek_order(&running),
            vec!["busy-urgent", "idle-late", "busy-early"]
        );

        // order is recomputed from the counts passed in
        let none = RunningCounts::new();
        assert_eq!(q.peek_order(&none), vec!["busy-urgent", "busy-early", "idle-late"]);
    }

    #[test]
    fn fair_share_disabled_ignores_running_counts() {
        let mut q = InMemoryJobQueue::new(100, false);
        q.enqueue(entry("busy", "busy", 5, 100)).unwrap();
        q.enqueue(entry("idle", "idle", 5, 200)).unwrap();
        let mut running = RunningCounts::new();
        running.insert("busy".into(), 10);
        assert_eq!(q.peek_order(&running), vec!["busy", "idle"]);
    }

    #[test]
    fn test_queue_full() {
        let mut q = InMemoryJobQueue::new(2, false);
        q.enqueue(entry("j1", "a", 0, 100)).unwrap();
        q.enqueue(entry("j2", "a", 0, 200)).unwrap();

        let result = q.enqueue(entry("j3", "a", 0, 300));
        assert_eq!(result, Err(SchedulerError::QueueFull { depth: 2, limit: 2 }));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn peek_does_not_mutate() {
        let mut q = InMemoryJobQueue::new(10, false);
        q.enqueue(entry("j1", "a", 0, 100)).unwrap();
        let none = RunningCounts::new();
        assert_eq!(q.peek_order(&none), q.peek_order(&none));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn drain_expired_keeps_live_entries_in_order() {
        let mut q = InMemoryJobQueue::new(10, false);
        let mut stale = entry("stale", "a", 0, 100);
        stale.options.expires_at_ms = Some(500);
        let mut later = entry("later", "a", 0, 200);
        later.options.expires_at_ms = Some(2_000);
        q.enqueue(entry("forever", "a", 0, 50)).unwrap();
        q.enqueue(stale).unwrap();
        q.enqueue(later).unwrap();

        let expired = q.drain_expired(1_000);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].job.id, "stale");
        assert_eq!(q.peek_order(&RunningCounts::new()), vec!["forever", "later"]);
    }

    #[test]
    fn remove_takes_a_specific_job() {
        let mut q = InMemoryJobQueue::new(10, false);
        q.enqueue(entry("a", "x", 0, 1)).unwrap();
        q.enqueue(entry("b", "x", 0, 2)).unwrap();
        assert_eq!(q.remove("a").unwrap().job.id, "a");
        assert_eq!(q.peek_order(&RunningCounts::new()), vec!["b"]);
        assert!(q.remove("a").is_none());
        assert_eq!(q.len(), 1);
    }
}
