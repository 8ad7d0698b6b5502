//! API-facing request/response models.

use serde::{Deserialize, Serialize};

use crate::core::backend::ExecutionBackend;
use crate::core::job::{Job, QueueOptions, ResourceRequest};
use crate::core::lifecycle::{LifecyclePhase, PhaseRecord};
use crate::core::{Scheduler, SchedulerError};
use crate::util::clock::now_ms;

/// Inbound job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    /// Canonical job id.
    pub job_id: String,
    /// Owning customer address.
    pub customer: String,
    /// Requested resources.
    pub resources: ResourceRequest,
    /// Target queue; `default` when absent.
    #[serde(default)]
    pub queue: Option<String>,
    /// Priority, higher first.
    #[serde(default)]
    pub priority: i32,
    /// Tier held by the customer.
    #[serde(default)]
    pub customer_tier: u32,
    /// Tier the job requires.
    #[serde(default)]
    pub required_tier: u32,
    /// Preferred region.
    #[serde(default)]
    pub required_region: Option<String>,
    /// Allowed regions; empty allows all.
    #[serde(default)]
    pub allowed_regions: Vec<String>,
    /// Wall-clock limit for the backend.
    #[serde(default)]
    pub max_runtime_secs: Option<u64>,
    /// Batch script body.
    #[serde(default)]
    pub script: Option<String>,
    /// Submission time; the receive time when absent.
    #[serde(default)]
    pub submitted_at_ms: Option<u128>,
    /// Queueing options.
    #[serde(default)]
    pub options: QueueOptions,
}

impl JobSubmission {
    /// Split into the job and its queueing options.
    pub fn into_parts(self, received_at_ms: u128) -> (Job, QueueOptions) {
        let mut job = Job::new(self.job_id, self.customer, self.resources)
            .with_priority(self.priority)
            .with_tiers(self.customer_tier, self.required_tier)
            .with_allowed_regions(self.allowed_regions)
            .submitted_at(self.submitted_at_ms.unwrap_or(received_at_ms));
        if let Some(queue) = self.queue {
            job = job.with_queue(queue);
        }
        if let Some(region) = self.required_region {
            job = job.with_required_region(region);
        }
        if let Some(limit) = self.max_runtime_secs {
            job = job.with_max_runtime(limit);
        }
        if let Some(script) = self.script {
            job = job.with_script(script);
        }
        (job, self.options)
    }
}

/// Job status response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusResponse {
    /// Job identifier.
    pub job_id: String,
    /// Current phase.
    pub phase: LifecyclePhase,
    /// Assigned cluster, once scheduled.
    pub cluster_id: Option<String>,
    /// Backend job id, once submitted.
    pub backend_job_id: Option<String>,
    /// Reason attached to the latest transition.
    pub reason: Option<String>,
    /// Full phase history.
    pub history: Vec<PhaseRecord>,
}

/// Queue snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Current depth.
    pub depth: usize,
    /// Configured depth limit.
    pub max_depth: usize,
    /// Job ids in scheduling order.
    pub order: Vec<String>,
}

/// Health response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
    /// Queued jobs.
    pub queued: usize,
    /// Registered clusters.
    pub clusters: usize,
}

/// Enqueue a submission and report its status.
pub fn submit_job<B: ExecutionBackend>(
    scheduler: &Scheduler<B>,
    req: JobSubmission,
) -> Result<JobStatusResponse, SchedulerError> {
    let (job, options) = req.into_parts(now_ms());
    let job_id = job.id.clone();
    scheduler.enqueue(job, options)?;
    job_status(scheduler, &job_id).ok_or(SchedulerError::JobNotFound(job_id))
}

/// Status of one job.
pub fn job_status<B: ExecutionBackend>(scheduler: &Scheduler<B>, job_id: &str) -> Option<JobStatusResponse> {
    let history = scheduler.get_lifecycle(job_id)?;
    let latest = history.last()?;
    Some(JobStatusResponse {
        job_id: job_id.to_string(),
        phase: latest.phase,
        cluster_id: scheduler.job(job_id).and_then(|j| j.assigned_cluster),
        backend_job_id: scheduler.backend_job(job_id).map(|b| b.backend_job_id),
        reason: latest.reason.clone(),
        history,
    })
}

/// Current queue contents in scheduling order.
pub fn queue_snapshot<B: ExecutionBackend>(scheduler: &Scheduler<B>) -> QueueSnapshot {
    let order = scheduler.peek_queue();
    QueueSnapshot {
        depth: order.len(),
        max_depth: scheduler.queue_capacity(),
        order,
    }
}

/// Return a health payload.
pub fn health<B: ExecutionBackend>(scheduler: &Scheduler<B>) -> Health {
    Health {
        ok: true,
        queued: scheduler.queue_len(),
        clusters: scheduler.registry().len(),
    }
}
