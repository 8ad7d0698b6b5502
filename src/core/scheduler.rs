//! The scheduler: queue, admission, placement, start, and lifecycle in one owned value.
//!
//! Scheduling state lives behind a single read/write lock. The cluster
//! registry has its own lock and is always taken after the scheduler lock.
//! Backend calls, sink emission, and lifecycle callbacks all run with no
//! scheduler lock held.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::core::backend::{ExecutionBackend, SchedulerJob, SignedStatusReport, SubmitRequest};
use crate::core::cluster::ClusterRegistry;
use crate::core::job::{Job, QueueEntry, QueueOptions};
use crate::core::lifecycle::{LifecycleCallback, LifecycleEvent, LifecyclePhase, LifecycleTracker, PhaseRecord};
use crate::core::queue::{JobQueue, RunningCounts};
use crate::core::routing::{
    integrity_hash, InMemoryRoutingLog, RoutingOutcome, RoutingRecord, RoutingSink, SchedulingDecision,
};
use crate::core::scoring::{evaluate, ScoringWeights};
use crate::core::usage::{DiscardUsageSink, JobMetrics, SnapshotKind, UsageSink, UsageSnapshot};
use crate::core::SchedulerError;
use crate::infra::backend::AnyBackend;
use crate::util::clock::{elapsed_secs, now_ms};
use crate::util::signing::ReportSigner;

/// Routing records kept when no sink is supplied.
pub const DEFAULT_ROUTING_LOG_CAPACITY: usize = 10_000;

/// Per-job bookkeeping kept beside the lifecycle history.
#[derive(Debug, Clone)]
struct JobRecord {
    job: Job,
    /// Partition handed to the backend, resolved at enqueue.
    partition: String,
    /// Cluster whose capacity is currently debited for this job.
    allocated: Option<String>,
    backend: Option<SchedulerJob>,
    /// Latest backend figures and when they were read.
    last_metrics: Option<(JobMetrics, u128)>,
    running_counted: bool,
}

struct SchedulerState {
    queue: Box<dyn JobQueue>,
    jobs: HashMap<String, JobRecord>,
    lifecycle: LifecycleTracker,
    decisions: HashMap<String, SchedulingDecision>,
    running: RunningCounts,
}

/// Side effects collected under the lock and released after it.
#[derive(Default)]
struct Effects {
    events: Vec<LifecycleEvent>,
    snapshots: Vec<UsageSnapshot>,
    routing: Vec<RoutingRecord>,
}

impl SchedulerState {
    fn phase(&self, job_id: &str) -> Result<LifecyclePhase, SchedulerError> {
        self.lifecycle
            .current(job_id)
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))
    }

    /// Apply one transition plus its bookkeeping.
    ///
    /// Terminal transitions release debited capacity, settle the running
    /// counter, and produce the final usage snapshot.
    fn apply(
        &mut self,
        registry: &ClusterRegistry,
        job_id: &str,
        to: LifecyclePhase,
        at_ms: u128,
        reason: Option<String>,
        fx: &mut Effects,
    ) -> Result<(), SchedulerError> {
        // a suspended job stops accruing usage when it is suspended
        let held_until = match self.lifecycle.history(job_id).and_then(<[PhaseRecord]>::last) {
            Some(last) if last.phase == LifecyclePhase::Suspended => last.at_ms,
            _ => at_ms,
        };
        let event = self.lifecycle.transition(job_id, to, at_ms, reason)?;
        fx.events.push(event);

        let Some(record) = self.jobs.get_mut(job_id) else {
            return Ok(());
        };
        if to == LifecyclePhase::Running && !record.running_counted {
            *self.running.entry(record.job.customer.clone()).or_insert(0) += 1;
            record.running_counted = true;
        }
        if !to.is_terminal() {
            return Ok(());
        }

        if record.running_counted {
            if let Some(count) = self.running.get_mut(&record.job.customer) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.running.remove(&record.job.customer);
                }
            }
            record.running_counted = false;
        }
        if let Some(cluster_id) = record.allocated.take() {
            registry.release(&cluster_id, &record.job.resources);
        }

        let started = self.lifecycle.entered_at(job_id, LifecyclePhase::Running);
        let metrics = match (record.last_metrics, started) {
            (Some((reported, read_at)), _) => reported.saturating_add(JobMetrics::estimate(
                &record.job.resources,
                elapsed_secs(read_at, held_until),
            )),
            (None, Some(start)) => {
                JobMetrics::estimate(&record.job.resources, elapsed_secs(start, held_until))
            }
            (None, None) => JobMetrics::default(),
        };
        let window_start = started.unwrap_or(at_ms);
        let snapshot = UsageSnapshot {
            job_id: job_id.to_string(),
            customer: record.job.customer.clone(),
            cluster_id: record.job.assigned_cluster.clone(),
            kind: SnapshotKind::Final,
            taken_at_ms: at_ms,
            records: metrics.to_records(window_start, at_ms),
        };
        self.lifecycle.attach_usage(snapshot.clone())?;
        fx.snapshots.push(snapshot);
        Ok(())
    }

    fn record_mut(&mut self, job_id: &str) -> Result<&mut JobRecord, SchedulerError> {
        self.jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))
    }
}

fn invalid_transition(job_id: &str, from: LifecyclePhase, to: LifecyclePhase) -> SchedulerError {
    tracing::error!(job_id, %from, %to, kind = "invalid_transition", "rejected lifecycle transition");
    SchedulerError::InvalidTransition {
        job_id: job_id.to_string(),
        from,
        to,
    }
}

/// Provider-side HPC job scheduler.
///
/// Each instance owns all of its state; several can coexist in one process.
pub struct Scheduler<B: ExecutionBackend = AnyBackend> {
    state: RwLock<SchedulerState>,
    registry: Arc<ClusterRegistry>,
    weights: ScoringWeights,
    backend: B,
    routing: Mutex<Box<dyn RoutingSink>>,
    usage_sink: Mutex<Box<dyn UsageSink>>,
    callbacks: RwLock<Vec<LifecycleCallback>>,
    provider_id: String,
    signer: Option<ReportSigner>,
}

impl<B: ExecutionBackend> std::fmt::Debug for Scheduler<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Scheduler")
            .field("backend", &self.backend.backend_type())
            .field("queued", &state.queue.len())
            .field("jobs", &state.jobs.len())
            .field("clusters", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl<B: ExecutionBackend> Scheduler<B> {
    /// Scheduler with default weights, an in-memory routing log, and no billing sink.
    pub fn new(queue: Box<dyn JobQueue>, registry: Arc<ClusterRegistry>, backend: B) -> Self {
        Self {
            state: RwLock::new(SchedulerState {
                queue,
                jobs: HashMap::new(),
                lifecycle: LifecycleTracker::new(),
                decisions: HashMap::new(),
                running: RunningCounts::new(),
            }),
            registry,
            weights: ScoringWeights::default(),
            backend,
            routing: Mutex::new(Box::new(InMemoryRoutingLog::new(DEFAULT_ROUTING_LOG_CAPACITY))),
            usage_sink: Mutex::new(Box::new(DiscardUsageSink)),
            callbacks: RwLock::new(Vec::new()),
            provider_id: "provider".to_string(),
            signer: None,
        }
    }

    /// Replace the scoring weights.
    #[must_use]
    pub fn with_weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Replace the routing audit sink.
    #[must_use]
    pub fn with_routing_sink(mut self, sink: Box<dyn RoutingSink>) -> Self {
        self.routing = Mutex::new(sink);
        self
    }

    /// Attach the billing outbox.
    #[must_use]
    pub fn with_usage_sink(mut self, sink: Box<dyn UsageSink>) -> Self {
        self.usage_sink = Mutex::new(sink);
        self
    }

    /// Provider identity and key used for status reports.
    #[must_use]
    pub fn with_report_signer(mut self, provider_id: impl Into<String>, signer: ReportSigner) -> Self {
        self.provider_id = provider_id.into();
        self.signer = Some(signer);
        self
    }

    /// Shared cluster registry.
    pub const fn registry(&self) -> &Arc<ClusterRegistry> {
        &self.registry
    }

    /// Execution backend.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Scoring weights in use.
    pub const fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Observe every accepted lifecycle transition.
    pub fn register_lifecycle_callback(&self, callback: LifecycleCallback) {
        self.callbacks.write().push(callback);
    }

    fn release(&self, fx: Effects) {
        if !fx.routing.is_empty() {
            let mut sink = self.routing.lock();
            for record in fx.routing {
                sink.record(record);
            }
        }
        if !fx.snapshots.is_empty() {
            let mut sink = self.usage_sink.lock();
            for snapshot in fx.snapshots {
                let job_id = snapshot.job_id.clone();
                if let Err(e) = sink.emit(snapshot) {
                    tracing::warn!(%job_id, error = %e, "usage sink rejected final snapshot");
                }
            }
        }
        if fx.events.is_empty() {
            return;
        }
        let callbacks = self.callbacks.read().clone();
        for event in &fx.events {
            for callback in &callbacks {
                callback(event);
            }
        }
    }

    /// Accept a job into the queue (Submitted, then Queued).
    ///
    /// A full queue or a known job id leaves no lifecycle trace.
    pub fn enqueue(&self, job: Job, options: QueueOptions) -> Result<(), SchedulerError> {
        job.validate()?;
        let mut fx = Effects::default();
        {
            let mut state = self.state.write();
            if state.jobs.contains_key(&job.id) || state.lifecycle.current(&job.id).is_some() {
                return Err(SchedulerError::DuplicateJob(job.id));
            }
            let now = now_ms();
            let entry = QueueEntry::new(job.clone(), options, now);
            let partition = entry.effective_partition().to_string();
            if let Err(e) = state.queue.enqueue(entry) {
                tracing::warn!(job_id = %job.id, kind = e.kind().as_str(), "{}", e);
                return Err(e);
            }
            fx.events.push(state.lifecycle.begin(&job.id, now)?);
            let event = state
                .lifecycle
                .transition(&job.id, LifecyclePhase::Queued, now, None)?;
            fx.events.push(event);
            tracing::debug!(job_id = %job.id, customer = %job.customer, priority = job.priority, "job queued");
            state.jobs.insert(
                job.id.clone(),
                JobRecord {
                    job,
                    partition,
                    allocated: None,
                    backend: None,
                    last_metrics: None,
                    running_counted: false,
                },
            );
        }
        self.release(fx);
        Ok(())
    }

    /// Put an Unassigned job back in the queue.
    pub fn requeue_unassigned(&self, job_id: &str, options: QueueOptions) -> Result<(), SchedulerError> {
        let mut fx = Effects::default();
        {
            let mut state = self.state.write();
            let current = state.phase(job_id)?;
            if current != LifecyclePhase::Unassigned {
                return Err(invalid_transition(job_id, current, LifecyclePhase::Queued));
            }
            let now = now_ms();
            let record = state.record_mut(job_id)?;
            record.job.assigned_cluster = None;
            let entry = QueueEntry::new(record.job.clone(), options, now);
            record.partition = entry.effective_partition().to_string();
            if let Err(e) = state.queue.enqueue(entry) {
                tracing::warn!(job_id, kind = e.kind().as_str(), "{}", e);
                return Err(e);
            }
            let event = state
                .lifecycle
                .transition(job_id, LifecyclePhase::Queued, now, Some("requeued".into()))?;
            fx.events.push(event);
        }
        self.release(fx);
        Ok(())
    }

    /// Job ids in current scheduling order.
    pub fn peek_queue(&self) -> Vec<String> {
        let state = self.state.read();
        state.queue.peek_order(&state.running)
    }

    /// Queued job count.
    pub fn queue_len(&self) -> usize {
        self.state.read().queue.len()
    }

    /// Configured queue depth limit.
    pub fn queue_capacity(&self) -> usize {
        self.state.read().queue.max_depth()
    }

    /// Dequeue the head job, admit it, and pick a cluster.
    ///
    /// `Ok(None)` means the queue was empty. Admission failure leaves the
    /// job Failed; no eligible cluster leaves it Unassigned. Every attempt
    /// is written to the routing sink.
    pub fn schedule_next(&self) -> Result<Option<SchedulingDecision>, SchedulerError> {
        let mut fx = Effects::default();
        let result = self.schedule_locked(&mut fx);
        self.release(fx);
        result
    }

    fn schedule_locked(&self, fx: &mut Effects) -> Result<Option<SchedulingDecision>, SchedulerError> {
        let mut state = self.state.write();
        let running = state.running.clone();
        let Some(entry) = state.queue.dequeue(&running) else {
            return Ok(None);
        };
        let now = now_ms();
        let waited_ms = now.saturating_sub(entry.enqueued_at_ms);
        let job = entry.job;

        if job.required_tier > job.customer_tier {
            let err = SchedulerError::Admission {
                job_id: job.id.clone(),
                customer_tier: job.customer_tier,
                required_tier: job.required_tier,
            };
            tracing::warn!(job_id = %job.id, kind = err.kind().as_str(), "{}", err);
            state.apply(
                &self.registry,
                &job.id,
                LifecyclePhase::Failed,
                now,
                Some(err.to_string()),
                fx,
            )?;
            fx.routing.push(RoutingRecord {
                record_id: uuid::Uuid::new_v4().to_string(),
                job_id: job.id.clone(),
                customer: job.customer.clone(),
                outcome: RoutingOutcome::AdmissionRejected,
                selected_cluster: None,
                selected_provider: None,
                reason: err.to_string(),
                candidates: Vec::new(),
                rejected: std::collections::BTreeMap::new(),
                created_at_ms: now,
                integrity_hash: integrity_hash(&job.id, "", now),
            });
            return Err(err);
        }

        let clusters = self.registry.list();
        let evaluation = evaluate(&job, &clusters, &self.weights);
        let Some(best) = evaluation.best().cloned() else {
            let reason = evaluation.rejection_summary();
            let err = SchedulerError::NoEligibleCluster {
                job_id: job.id.clone(),
                reason: reason.clone(),
            };
            tracing::warn!(job_id = %job.id, kind = err.kind().as_str(), "{}", err);
            state.apply(
                &self.registry,
                &job.id,
                LifecyclePhase::Unassigned,
                now,
                Some(reason.clone()),
                fx,
            )?;
            fx.routing.push(RoutingRecord {
                record_id: uuid::Uuid::new_v4().to_string(),
                job_id: job.id.clone(),
                customer: job.customer.clone(),
                outcome: RoutingOutcome::NoEligibleCluster,
                selected_cluster: None,
                selected_provider: None,
                reason,
                candidates: evaluation.candidates,
                rejected: evaluation.rejected,
                created_at_ms: now,
                integrity_hash: integrity_hash(&job.id, "", now),
            });
            return Err(err);
        };

        let reason = format!(
            "selected {} (score {:.4}) from {} eligible of {} cluster(s)",
            best.cluster_id,
            best.total,
            evaluation.candidates.len(),
            clusters.len()
        );
        let decision = SchedulingDecision {
            decision_id: uuid::Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            cluster_id: best.cluster_id.clone(),
            provider_id: best.provider_id.clone(),
            reason: reason.clone(),
            scores: evaluation.score_map(),
            created_at_ms: now,
            integrity_hash: integrity_hash(&job.id, &best.cluster_id, now),
        };

        state.record_mut(&job.id)?.job.assigned_cluster = Some(best.cluster_id.clone());
        state.apply(
            &self.registry,
            &job.id,
            LifecyclePhase::Scheduled,
            now,
            Some(reason.clone()),
            fx,
        )?;
        state.decisions.insert(job.id.clone(), decision.clone());
        fx.routing.push(RoutingRecord {
            record_id: decision.decision_id.clone(),
            job_id: job.id.clone(),
            customer: job.customer.clone(),
            outcome: RoutingOutcome::Scheduled,
            selected_cluster: Some(best.cluster_id.clone()),
            selected_provider: Some(best.provider_id.clone()),
            reason,
            candidates: evaluation.candidates,
            rejected: evaluation.rejected,
            created_at_ms: now,
            integrity_hash: decision.integrity_hash.clone(),
        });
        tracing::info!(
            job_id = %job.id,
            cluster = %decision.cluster_id,
            provider = %decision.provider_id,
            score = best.total,
            waited_ms = u64::try_from(waited_ms).unwrap_or(u64::MAX),
            "job scheduled"
        );
        Ok(Some(decision))
    }

    /// Re-check capacity, debit it, and submit the job to the backend.
    ///
    /// Capacity that vanished since the decision fails the job and discards
    /// the decision; there is no re-route.
    pub async fn start_job(&self, job_id: &str) -> Result<SchedulerJob, SchedulerError> {
        let mut fx = Effects::default();
        let prepared = self.prepare_start(job_id, &mut fx);
        self.release(fx);
        let request = prepared?;

        let submitted = self.backend.submit_job(request).await;

        let mut fx = Effects::default();
        let (outcome, cancel_on_backend) = self.finish_start(job_id, submitted, &mut fx);
        self.release(fx);
        if cancel_on_backend {
            tracing::info!(job_id, "job cancelled during submission, cancelling on backend");
            self.backend.cancel_job(job_id).await?;
        }
        outcome
    }

    fn prepare_start(&self, job_id: &str, fx: &mut Effects) -> Result<SubmitRequest, SchedulerError> {
        let mut state = self.state.write();
        let current = state.phase(job_id)?;
        if current != LifecyclePhase::Scheduled {
            return Err(invalid_transition(job_id, current, LifecyclePhase::Starting));
        }
        let decision = state
            .decisions
            .get(job_id)
            .cloned()
            .ok_or_else(|| SchedulerError::DecisionNotFound(job_id.to_string()))?;
        let record = state.record_mut(job_id)?;
        let job = record.job.clone();
        let partition = record.partition.clone();
        let now = now_ms();

        if let Err(shortfall) = self.registry.try_allocate(&decision.cluster_id, &job.resources) {
            let err = SchedulerError::CapacityRace {
                job_id: job_id.to_string(),
                cluster_id: decision.cluster_id.clone(),
                shortfall,
            };
            tracing::warn!(job_id, cluster = %decision.cluster_id, kind = err.kind().as_str(), "{}", err);
            state.decisions.remove(job_id);
            state.apply(
                &self.registry,
                job_id,
                LifecyclePhase::Failed,
                now,
                Some(err.to_string()),
                fx,
            )?;
            return Err(err);
        }
        state.record_mut(job_id)?.allocated = Some(decision.cluster_id.clone());

        let Some(cluster) = self.registry.get(&decision.cluster_id) else {
            // removed between the debit and this read
            let err = SchedulerError::ClusterNotFound(decision.cluster_id.clone());
            state.decisions.remove(job_id);
            state.apply(
                &self.registry,
                job_id,
                LifecyclePhase::Failed,
                now,
                Some(err.to_string()),
                fx,
            )?;
            return Err(err);
        };
        state.apply(&self.registry, job_id, LifecyclePhase::Starting, now, None, fx)?;
        tracing::debug!(job_id, cluster = %cluster.id, "capacity debited, submitting");
        Ok(SubmitRequest {
            job,
            partition,
            cluster,
            decision_id: decision.decision_id,
        })
    }

    fn finish_start(
        &self,
        job_id: &str,
        submitted: Result<SchedulerJob, SchedulerError>,
        fx: &mut Effects,
    ) -> (Result<SchedulerJob, SchedulerError>, bool) {
        let mut state = self.state.write();
        let current = match state.phase(job_id) {
            Ok(phase) => phase,
            Err(e) => return (Err(e), false),
        };
        let now = now_ms();
        match submitted {
            Ok(view) => {
                if let Ok(record) = state.record_mut(job_id) {
                    record.backend = Some(view.clone());
                }
                if current != LifecyclePhase::Starting {
                    // cancelled while the submission was in flight
                    return (Err(invalid_transition(job_id, current, LifecyclePhase::Running)), true);
                }
                if let Err(e) = state.apply(&self.registry, job_id, LifecyclePhase::Running, now, None, fx) {
                    return (Err(e), false);
                }
                tracing::info!(job_id, backend_job_id = %view.backend_job_id, "job running");
                (Ok(view), false)
            }
            Err(e) => {
                let message = match e {
                    SchedulerError::BackendSubmission { message, .. } => message,
                    other => other.to_string(),
                };
                let err = SchedulerError::BackendSubmission {
                    job_id: job_id.to_string(),
                    message,
                };
                tracing::warn!(job_id, kind = err.kind().as_str(), "{}", err);
                if current == LifecyclePhase::Starting {
                    if let Err(e) = state.apply(
                        &self.registry,
                        job_id,
                        LifecyclePhase::Failed,
                        now,
                        Some(err.to_string()),
                        fx,
                    ) {
                        return (Err(e), false);
                    }
                }
                (Err(err), false)
            }
        }
    }

    fn mark(&self, job_id: &str, to: LifecyclePhase, reason: Option<String>) -> Result<(), SchedulerError> {
        let mut fx = Effects::default();
        let result = {
            let mut state = self.state.write();
            state.apply(&self.registry, job_id, to, now_ms(), reason, &mut fx)
        };
        self.release(fx);
        result
    }

    /// Running -> Completed.
    pub fn mark_completed(&self, job_id: &str) -> Result<(), SchedulerError> {
        self.mark(job_id, LifecyclePhase::Completed, None)
    }

    /// Move a live job to Failed.
    pub fn mark_failed(&self, job_id: &str, reason: impl Into<String>) -> Result<(), SchedulerError> {
        self.mark(job_id, LifecyclePhase::Failed, Some(reason.into()))
    }

    /// Move a live job to Cancelled without contacting the backend.
    pub fn mark_cancelled(&self, job_id: &str, reason: impl Into<String>) -> Result<(), SchedulerError> {
        let reason = reason.into();
        let mut fx = Effects::default();
        let result = {
            let mut state = self.state.write();
            state.queue.remove(job_id);
            state.apply(&self.registry, job_id, LifecyclePhase::Cancelled, now_ms(), Some(reason), &mut fx)
        };
        self.release(fx);
        result
    }

    /// Running -> Timeout, as reported by the backend.
    pub fn mark_timeout(&self, job_id: &str) -> Result<(), SchedulerError> {
        self.mark(job_id, LifecyclePhase::Timeout, Some("backend time limit reached".into()))
    }

    /// Running -> Suspended.
    pub fn mark_suspended(&self, job_id: &str) -> Result<(), SchedulerError> {
        self.mark(job_id, LifecyclePhase::Suspended, None)
    }

    /// Suspended -> Running.
    pub fn mark_resumed(&self, job_id: &str) -> Result<(), SchedulerError> {
        self.mark(job_id, LifecyclePhase::Running, Some("resumed".into()))
    }

    /// Terminal -> Settled, once billing has consumed the job.
    pub fn mark_settled(&self, job_id: &str) -> Result<(), SchedulerError> {
        self.mark(job_id, LifecyclePhase::Settled, None)
    }

    /// Cancel a non-terminal job, and cancel it on the backend if it was submitted.
    ///
    /// The scheduler records Cancelled before the backend is contacted; a
    /// backend error is returned but does not undo it.
    pub async fn cancel_job(&self, job_id: &str, reason: impl Into<String> + Send) -> Result<(), SchedulerError> {
        let reason = reason.into();
        let mut fx = Effects::default();
        let submitted = {
            let mut state = self.state.write();
            let current = state.phase(job_id)?;
            if !current.can_transition_to(LifecyclePhase::Cancelled) {
                return Err(invalid_transition(job_id, current, LifecyclePhase::Cancelled));
            }
            state.queue.remove(job_id);
            let submitted = state.jobs.get(job_id).is_some_and(|r| r.backend.is_some());
            state.apply(&self.registry, job_id, LifecyclePhase::Cancelled, now_ms(), Some(reason), &mut fx)?;
            submitted
        };
        self.release(fx);
        if submitted {
            self.backend.cancel_job(job_id).await?;
        }
        Ok(())
    }

    /// Remove queued jobs whose deadline has passed and cancel them.
    pub fn expire_queued(&self, now_ms: u128) -> Vec<String> {
        let mut fx = Effects::default();
        let mut expired_ids = Vec::new();
        {
            let mut state = self.state.write();
            let expired = state.queue.drain_expired(now_ms);
            for entry in expired {
                let id = entry.job.id;
                match state.apply(
                    &self.registry,
                    &id,
                    LifecyclePhase::Cancelled,
                    now_ms,
                    Some("queue deadline expired".into()),
                    &mut fx,
                ) {
                    Ok(()) => expired_ids.push(id),
                    Err(e) => tracing::error!(job_id = %id, error = %e, "failed to expire queued job"),
                }
            }
        }
        if !expired_ids.is_empty() {
            tracing::warn!(count = expired_ids.len(), "expired queued jobs");
        }
        self.release(fx);
        expired_ids
    }

    /// Pull the backend's view of one job and apply any state change.
    ///
    /// Returns the new phase when one was applied. Observations that the
    /// state table does not allow (e.g. `PENDING` for a running job) are
    /// ignored.
    pub async fn reconcile_job(&self, job_id: &str) -> Result<Option<LifecyclePhase>, SchedulerError> {
        {
            let state = self.state.read();
            let record = state
                .jobs
                .get(job_id)
                .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
            if record.backend.is_none() {
                return Ok(None);
            }
        }

        let status = self.backend.get_job_status(job_id).await?;

        let mut fx = Effects::default();
        let result = {
            let mut state = self.state.write();
            let current = state.phase(job_id)?;
            let now = now_ms();
            let record = state.record_mut(job_id)?;
            if !current.is_finished() {
                record.last_metrics = Some((status.metrics, now));
            }
            record.backend = Some(status.clone());
            let target = status.state;
            let reason = status.exit_code.map(|code| format!("exit code {code}"));

            if target == current || current.is_finished() {
                Ok(None)
            } else if current.can_transition_to(target) {
                state
                    .apply(&self.registry, job_id, target, now, reason, &mut fx)
                    .map(|()| Some(target))
            } else if current == LifecyclePhase::Suspended
                && LifecyclePhase::Running.can_transition_to(target)
            {
                // resumed and finished between two polls
                state
                    .apply(&self.registry, job_id, LifecyclePhase::Running, now, None, &mut fx)
                    .and_then(|()| state.apply(&self.registry, job_id, target, now, reason, &mut fx))
                    .map(|()| Some(target))
            } else {
                tracing::debug!(job_id, %current, observed = %target, "ignoring backend state");
                Ok(None)
            }
        };
        self.release(fx);
        result
    }

    /// Reconcile every job currently on the backend.
    ///
    /// Per-job failures are logged and skipped.
    pub async fn reconcile_active(&self) -> Vec<(String, LifecyclePhase)> {
        let mut changes = Vec::new();
        for job_id in self.active_job_ids() {
            match self.reconcile_job(&job_id).await {
                Ok(Some(phase)) => changes.push((job_id, phase)),
                Ok(None) => {}
                Err(e) => tracing::warn!(%job_id, error = %e, "reconcile failed"),
            }
        }
        changes
    }

    /// Job ids submitted to the backend and not yet finished, sorted.
    pub fn active_job_ids(&self) -> Vec<String> {
        let state = self.state.read();
        let mut ids: Vec<String> = state
            .jobs
            .iter()
            .filter(|(id, record)| {
                record.backend.is_some()
                    && state
                        .lifecycle
                        .current(id)
                        .is_some_and(|p| matches!(p, LifecyclePhase::Running | LifecyclePhase::Suspended))
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Take a periodic usage snapshot from backend accounting.
    pub async fn collect_usage(&self, job_id: &str) -> Result<UsageSnapshot, SchedulerError> {
        {
            let state = self.state.read();
            let current = state.phase(job_id)?;
            let submitted = state.jobs.get(job_id).is_some_and(|r| r.backend.is_some());
            if !submitted || current.is_finished() {
                return Err(SchedulerError::Backend(format!(
                    "job {job_id} is not running on the backend"
                )));
            }
        }

        let metrics = self.backend.get_job_accounting(job_id).await?;

        let mut state = self.state.write();
        // the job may have finished while accounting was in flight
        let current = state.phase(job_id)?;
        if current.is_finished() {
            return Err(SchedulerError::Backend(format!(
                "job {job_id} finished while usage was being collected"
            )));
        }
        let now = now_ms();
        let window_start = state
            .lifecycle
            .entered_at(job_id, LifecyclePhase::Running)
            .unwrap_or(now);
        let record = state.record_mut(job_id)?;
        record.last_metrics = Some((metrics, now));
        let snapshot = UsageSnapshot {
            job_id: job_id.to_string(),
            customer: record.job.customer.clone(),
            cluster_id: record.job.assigned_cluster.clone(),
            kind: SnapshotKind::Periodic,
            taken_at_ms: now,
            records: metrics.to_records(window_start, now),
        };
        state.lifecycle.attach_usage(snapshot.clone())?;
        Ok(snapshot)
    }

    /// Periodic snapshots for every active job. Per-job failures are logged and skipped.
    pub async fn collect_periodic_usage(&self) -> Vec<UsageSnapshot> {
        let mut snapshots = Vec::new();
        for job_id in self.active_job_ids() {
            match self.collect_usage(&job_id).await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => tracing::warn!(%job_id, error = %e, "usage collection failed"),
            }
        }
        snapshots
    }

    /// Signed attestation of a submitted job's backend state.
    pub async fn create_status_report(&self, job_id: &str) -> Result<SignedStatusReport, SchedulerError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| SchedulerError::Config("no report signing key configured".into()))?;
        {
            let state = self.state.read();
            let record = state
                .jobs
                .get(job_id)
                .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
            if record.backend.is_none() {
                return Err(SchedulerError::Backend(format!(
                    "job {job_id} was never submitted to the backend"
                )));
            }
        }
        self.backend
            .create_status_report(job_id, &self.provider_id, signer)
            .await
    }

    /// Ordered phase history of a job.
    pub fn get_lifecycle(&self, job_id: &str) -> Option<Vec<PhaseRecord>> {
        self.state.read().lifecycle.history(job_id).map(<[PhaseRecord]>::to_vec)
    }

    /// Usage snapshots of a job, oldest first.
    pub fn get_usage_snapshots(&self, job_id: &str) -> Vec<UsageSnapshot> {
        self.state.read().lifecycle.usage(job_id).to_vec()
    }

    /// Active scheduling decision of a job.
    pub fn get_decision(&self, job_id: &str) -> Option<SchedulingDecision> {
        self.state.read().decisions.get(job_id).cloned()
    }

    /// Current phase of a job.
    pub fn current_phase(&self, job_id: &str) -> Option<LifecyclePhase> {
        self.state.read().lifecycle.current(job_id)
    }

    /// The job as submitted, with its assigned cluster if any.
    pub fn job(&self, job_id: &str) -> Option<Job> {
        self.state.read().jobs.get(job_id).map(|r| r.job.clone())
    }

    /// Last backend view of a submitted job.
    pub fn backend_job(&self, job_id: &str) -> Option<SchedulerJob> {
        self.state.read().jobs.get(job_id).and_then(|r| r.backend.clone())
    }

    /// Running (or suspended) jobs of one customer.
    pub fn running_count(&self, customer: &str) -> u32 {
        self.state.read().running.get(customer).copied().unwrap_or(0)
    }

    /// Number of jobs ever accepted.
    pub fn job_count(&self) -> usize {
        self.state.read().jobs.len()
    }
}
