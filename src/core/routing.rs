//! Scheduling decisions and the routing audit trail.
//!
//! Every scheduling attempt produces a [`RoutingRecord`], whether it placed
//! the job or not. Successful attempts also produce a [`SchedulingDecision`],
//! which is what `start_job` acts on.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::scoring::{CandidateScore, Ineligibility};
use crate::util::signing::sha256_hex;

/// Deterministic integrity hash over `(job id, cluster id, timestamp)`.
///
/// Failed attempts hash with an empty cluster id.
pub fn integrity_hash(job_id: &str, cluster_id: &str, created_at_ms: u128) -> String {
    sha256_hex(format!("{job_id}|{cluster_id}|{created_at_ms}").as_bytes())
}

/// Recorded output of cluster selection for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulingDecision {
    /// Decision identifier.
    pub decision_id: String,
    /// Job placed.
    pub job_id: String,
    /// Selected cluster.
    pub cluster_id: String,
    /// Provider operating the selected cluster.
    pub provider_id: String,
    /// Human-readable explanation.
    pub reason: String,
    /// Total score of every eligible candidate.
    pub scores: BTreeMap<String, f64>,
    /// Decision time, milliseconds since epoch.
    pub created_at_ms: u128,
    /// [`integrity_hash`] of job, cluster and time.
    pub integrity_hash: String,
}

impl SchedulingDecision {
    /// Recompute the hash and compare.
    pub fn verify_integrity(&self) -> bool {
        integrity_hash(&self.job_id, &self.cluster_id, self.created_at_ms) == self.integrity_hash
    }
}

/// Result of one scheduling attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingOutcome {
    /// A cluster was selected.
    Scheduled,
    /// Tier check failed; no scoring happened.
    AdmissionRejected,
    /// No cluster passed the filters.
    NoEligibleCluster,
}

/// Audit record of a scheduling attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRecord {
    /// Record identifier (the decision id on success).
    pub record_id: String,
    /// Job considered.
    pub job_id: String,
    /// Customer that submitted the job.
    pub customer: String,
    /// What happened.
    pub outcome: RoutingOutcome,
    /// Selected cluster, on success.
    pub selected_cluster: Option<String>,
    /// Provider of the selected cluster, on success.
    pub selected_provider: Option<String>,
    /// Human-readable explanation.
    pub reason: String,
    /// Full score breakdown of every eligible candidate.
    pub candidates: Vec<CandidateScore>,
    /// Clusters filtered out and why.
    pub rejected: BTreeMap<String, Ineligibility>,
    /// Attempt time, milliseconds since epoch.
    pub created_at_ms: u128,
    /// [`integrity_hash`] of job, selected cluster (or empty) and time.
    pub integrity_hash: String,
}

impl RoutingRecord {
    /// Recompute the hash and compare.
    pub fn verify_integrity(&self) -> bool {
        let cluster = self.selected_cluster.as_deref().unwrap_or("");
        integrity_hash(&self.job_id, cluster, self.created_at_ms) == self.integrity_hash
    }
}

/// Routing audit sink abstraction.
pub trait RoutingSink: Send {
    /// Record a scheduling attempt.
    fn record(&mut self, record: RoutingRecord);
}

/// Bounded in-memory routing log.
///
/// Clones share the same buffer, so a handle kept by the caller sees records
/// written through the scheduler.
#[derive(Debug, Clone)]
pub struct InMemoryRoutingLog {
    records: Arc<Mutex<VecDeque<RoutingRecord>>>,
    max_records: usize,
}

impl InMemoryRoutingLog {
    /// Create a new in-memory log with a bounded buffer.
    pub fn new(max_records: usize) -> Self {
        Self {
            records: Arc::new(Mutex::new(VecDeque::with_capacity(max_records.min(1024)))),
            max_records,
        }
    }

    /// Snapshot of stored records, oldest first.
    pub fn records(&self) -> Vec<RoutingRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Every recorded attempt for one job, oldest first.
    pub fn for_job(&self, job_id: &str) -> Vec<RoutingRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl RoutingSink for InMemoryRoutingLog {
    fn record(&mut self, record: RoutingRecord) {
        let mut records = self.records.lock();
        if self.max_records == 0 {
            return;
        }
        if records.len() >= self.max_records {
            records.pop_front();
        }
        records.push_back(record);
    }
}

/// Emits each record as one structured `info` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRoutingSink;

impl RoutingSink for TracingRoutingSink {
    fn record(&mut self, record: RoutingRecord) {
        match serde_json::to_string(&record) {
            Ok(json) => tracing::info!(
                target: "hpc_scheduler::routing",
                job_id = %record.job_id,
                outcome = ?record.outcome,
                record = %json,
                "routing record"
            ),
            Err(e) => tracing::error!(job_id = %record.job_id, "failed to serialize routing record: {}", e),
        }
    }
}

/// Fans one record out to several sinks.
#[derive(Default)]
pub struct CompositeRoutingSink {
    sinks: Vec<Box<dyn RoutingSink>>,
}

impl CompositeRoutingSink {
    /// Empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    #[must_use]
    pub fn with(mut self, sink: Box<dyn RoutingSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl RoutingSink for CompositeRoutingSink {
    fn record(&mut self, record: RoutingRecord) {
        for sink in &mut self.sinks {
            sink.record(record.clone());
        }
    }
}
