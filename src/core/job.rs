//! Job, resource request and queueing option types.

use serde::{Deserialize, Serialize};

use crate::core::SchedulerError;

/// Resources a job asks for, expressed per node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Number of nodes. Zero is read as one.
    #[serde(default = "default_nodes")]
    pub nodes: u32,
    /// CPU cores per node.
    pub cpu_cores_per_node: u32,
    /// Memory per node in GB.
    pub memory_gb_per_node: u64,
    /// GPUs per node.
    #[serde(default)]
    pub gpus_per_node: u32,
    /// Required GPU model, if any.
    #[serde(default)]
    pub gpu_type: Option<String>,
}

const fn default_nodes() -> u32 {
    1
}

impl ResourceRequest {
    /// Single-node CPU/memory request.
    pub fn new(cpu_cores_per_node: u32, memory_gb_per_node: u64) -> Self {
        Self {
            nodes: 1,
            cpu_cores_per_node,
            memory_gb_per_node,
            gpus_per_node: 0,
            gpu_type: None,
        }
    }

    /// Request `count` GPUs of `gpu_type` per node.
    #[must_use]
    pub fn with_gpus(mut self, count: u32, gpu_type: impl Into<String>) -> Self {
        self.gpus_per_node = count;
        self.gpu_type = Some(gpu_type.into());
        self
    }

    /// Spread the request across `nodes` nodes.
    #[must_use]
    pub fn with_nodes(mut self, nodes: u32) -> Self {
        self.nodes = nodes;
        self
    }

    /// Effective node count.
    pub fn node_count(&self) -> u64 {
        u64::from(self.nodes.max(1))
    }

    /// CPU cores across all nodes.
    pub fn total_cpu(&self) -> u64 {
        u64::from(self.cpu_cores_per_node) * self.node_count()
    }

    /// Memory in GB across all nodes.
    pub fn total_memory_gb(&self) -> u64 {
        self.memory_gb_per_node.saturating_mul(self.node_count())
    }

    /// GPUs across all nodes.
    pub fn total_gpus(&self) -> u64 {
        u64::from(self.gpus_per_node) * self.node_count()
    }

    /// GPU model that a cluster must support, ignoring blank strings.
    pub fn required_gpu_type(&self) -> Option<&str> {
        self.gpu_type.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// A unit of HPC work with its placement constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Canonical job identifier.
    pub id: String,
    /// Address of the owning customer.
    pub customer: String,
    /// Requested resources.
    pub resources: ResourceRequest,
    /// Target queue/partition.
    pub queue: String,
    /// Higher runs first.
    pub priority: i32,
    /// Tier currently held by the customer.
    pub customer_tier: u32,
    /// Minimum tier needed to run this job.
    pub required_tier: u32,
    /// Preferred (or, without an allowed set, mandatory) region.
    pub required_region: Option<String>,
    /// Regions the job may run in; empty allows all.
    pub allowed_regions: Vec<String>,
    /// Submission time, milliseconds since epoch.
    pub submitted_at_ms: u128,
    /// Wall-clock limit forwarded to the backend.
    pub max_runtime_secs: Option<u64>,
    /// Batch script body executed by the backend.
    pub script: Option<String>,
    /// Cluster chosen at scheduling time.
    pub assigned_cluster: Option<String>,
}

impl Job {
    /// Create a job on the `default` queue with neutral priority and tiers.
    pub fn new(id: impl Into<String>, customer: impl Into<String>, resources: ResourceRequest) -> Self {
        Self {
            id: id.into(),
            customer: customer.into(),
            resources,
            queue: "default".to_string(),
            priority: 0,
            customer_tier: 0,
            required_tier: 0,
            required_region: None,
            allowed_regions: Vec::new(),
            submitted_at_ms: crate::util::clock::now_ms(),
            max_runtime_secs: None,
            script: None,
            assigned_cluster: None,
        }
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set customer and required tiers.
    #[must_use]
    pub fn with_tiers(mut self, customer_tier: u32, required_tier: u32) -> Self {
        self.customer_tier = customer_tier;
        self.required_tier = required_tier;
        self
    }

    /// Set the required region.
    #[must_use]
    pub fn with_required_region(mut self, region: impl Into<String>) -> Self {
        self.required_region = Some(region.into());
        self
    }

    /// Restrict placement to these regions.
    #[must_use]
    pub fn with_allowed_regions<I, S>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_regions = regions.into_iter().map(Into::into).collect();
        self
    }

    /// Set the target queue/partition.
    #[must_use]
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Override the submission timestamp.
    #[must_use]
    pub fn submitted_at(mut self, submitted_at_ms: u128) -> Self {
        self.submitted_at_ms = submitted_at_ms;
        self
    }

    /// Set a wall-clock limit for the backend to enforce.
    #[must_use]
    pub fn with_max_runtime(mut self, secs: u64) -> Self {
        self.max_runtime_secs = Some(secs);
        self
    }

    /// Attach a batch script body.
    #[must_use]
    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    fn required_region(&self) -> Option<&str> {
        self.required_region.as_deref().filter(|r| !r.is_empty())
    }

    /// Hard region constraint.
    ///
    /// A non-empty allowed set is authoritative. Without one, a required
    /// region pins the job to that region.
    pub fn region_allowed(&self, region: &str) -> bool {
        if !self.allowed_regions.is_empty() {
            return self.allowed_regions.iter().any(|r| r == region);
        }
        self.required_region().is_none_or(|r| r == region)
    }

    /// Soft region preference used by scoring.
    pub fn prefers_region(&self, region: &str) -> bool {
        self.required_region().is_none_or(|r| r == region)
    }

    /// Reject structurally unusable submissions.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.id.trim().is_empty() {
            return Err(SchedulerError::InvalidJob("job id must not be empty".into()));
        }
        if self.customer.trim().is_empty() {
            return Err(SchedulerError::InvalidJob(format!(
                "job {} has no customer address",
                self.id
            )));
        }
        if self.resources.cpu_cores_per_node == 0 {
            return Err(SchedulerError::InvalidJob(format!(
                "job {} requests zero cpu cores",
                self.id
            )));
        }
        Ok(())
    }
}

/// Per-submission queueing options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOptions {
    /// Replaces the job's own priority for ordering.
    #[serde(default)]
    pub priority: Option<i32>,
    /// Replaces the job's queue/partition at submission.
    #[serde(default)]
    pub partition: Option<String>,
    /// Drop the entry if still queued at this time.
    #[serde(default)]
    pub expires_at_ms: Option<u128>,
}

/// A job waiting in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Queued job.
    pub job: Job,
    /// Options supplied at enqueue.
    pub options: QueueOptions,
    /// Enqueue time, milliseconds since epoch.
    pub enqueued_at_ms: u128,
}

impl QueueEntry {
    /// Wrap a job for enqueueing.
    pub const fn new(job: Job, options: QueueOptions, enqueued_at_ms: u128) -> Self {
        Self {
            job,
            options,
            enqueued_at_ms,
        }
    }

    /// Priority used for ordering.
    pub fn effective_priority(&self) -> i32 {
        self.options.priority.unwrap_or(self.job.priority)
    }

    /// Partition the backend should receive.
    pub fn effective_partition(&self) -> &str {
        self.options.partition.as_deref().unwrap_or(&self.job.queue)
    }

    /// Whether the queue deadline has passed.
    pub fn is_expired(&self, now_ms: u128) -> bool {
        self.options.expires_at_ms.is_some_and(|d| now_ms >= d)
    }
}
