//! In-memory billing outbox.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::usage::{UsageSink, UsageSnapshot};
use crate::core::SchedulerError;

/// Final usage snapshots grouped by customer, for development and tests.
///
/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUsageSink {
    snapshots: Arc<Mutex<HashMap<String, Vec<UsageSnapshot>>>>,
}

impl InMemoryUsageSink {
    /// Create an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch snapshots for a customer, optionally since a timestamp.
    pub fn fetch(&self, customer: &str, since_ms: Option<u128>, limit: usize) -> Vec<UsageSnapshot> {
        self.snapshots
            .lock()
            .get(customer)
            .map(|snaps| {
                snaps
                    .iter()
                    .filter(|s| since_ms.is_none_or(|since| s.taken_at_ms >= since))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshots emitted for one job.
    pub fn for_job(&self, job_id: &str) -> Vec<UsageSnapshot> {
        self.snapshots
            .lock()
            .values()
            .flatten()
            .filter(|s| s.job_id == job_id)
            .cloned()
            .collect()
    }

    /// Total snapshots held.
    pub fn len(&self) -> usize {
        self.snapshots.lock().values().map(Vec::len).sum()
    }

    /// Whether nothing has been emitted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl UsageSink for InMemoryUsageSink {
    fn emit(&mut self, snapshot: UsageSnapshot) -> Result<(), SchedulerError> {
        self.snapshots
            .lock()
            .entry(snapshot.customer.clone())
            .or_default()
            .push(snapshot);
        Ok(())
    }
}
