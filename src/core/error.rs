//! Error types for scheduler operations.

use thiserror::Error;

use crate::core::cluster::CapacityShortfall;
use crate::core::lifecycle::LifecyclePhase;

/// Errors produced by scheduler components.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulerError {
    /// Customer tier is below the tier the job requires.
    #[error("admission denied for job {job_id}: customer tier {customer_tier} below required tier {required_tier}")]
    Admission {
        /// Rejected job.
        job_id: String,
        /// Tier of the submitting customer.
        customer_tier: u32,
        /// Minimum tier demanded by the job.
        required_tier: u32,
    },
    /// Queue is at its configured depth.
    #[error("queue full: depth {depth} at limit {limit}")]
    QueueFull {
        /// Depth observed at rejection.
        depth: usize,
        /// Configured maximum depth.
        limit: usize,
    },
    /// No registered cluster passed the eligibility filters.
    #[error("no eligible cluster for job {job_id}: {reason}")]
    NoEligibleCluster {
        /// Job left unassigned.
        job_id: String,
        /// Summary of why candidates were filtered out.
        reason: String,
    },
    /// Capacity seen at decision time was gone when the job started.
    #[error("capacity race for job {job_id} on cluster {cluster_id}: {shortfall}")]
    CapacityRace {
        /// Job that failed to start.
        job_id: String,
        /// Cluster chosen by the discarded decision.
        cluster_id: String,
        /// What no longer fits.
        shortfall: CapacityShortfall,
    },
    /// Lifecycle transition not present in the state table.
    #[error("invalid lifecycle transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        /// Job whose state was left unchanged.
        job_id: String,
        /// Current phase.
        from: LifecyclePhase,
        /// Requested phase.
        to: LifecyclePhase,
    },
    /// The execution backend refused or failed the submission.
    #[error("backend submission failed for job {job_id}: {message}")]
    BackendSubmission {
        /// Job that failed to submit.
        job_id: String,
        /// Backend-provided failure text.
        message: String,
    },
    /// Job id is unknown to this scheduler.
    #[error("job not found: {0}")]
    JobNotFound(String),
    /// Job id is already tracked.
    #[error("job already exists: {0}")]
    DuplicateJob(String),
    /// Cluster id is not registered.
    #[error("cluster not found: {0}")]
    ClusterNotFound(String),
    /// Job has no active scheduling decision.
    #[error("no scheduling decision for job {0}")]
    DecisionNotFound(String),
    /// Job submission is malformed.
    #[error("invalid job: {0}")]
    InvalidJob(String),
    /// Cluster advertisement is malformed.
    #[error("invalid cluster: {0}")]
    InvalidCluster(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
    /// Configuration failed validation.
    #[error("config invalid: {0}")]
    Config(String),
}

/// Coarse classification used for log fields and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Tier policy rejection.
    Admission,
    /// Backpressure from the bounded queue.
    QueueFull,
    /// Transient lack of eligible capacity.
    NoEligibleCluster,
    /// Capacity vanished between decision and start.
    CapacityRace,
    /// Caller attempted a transition outside the state table.
    InvalidTransition,
    /// Backend refused the submission.
    BackendSubmission,
    /// Lookup of an unknown job, cluster or decision.
    NotFound,
    /// Malformed input or configuration.
    Invalid,
    /// Other backend failure.
    Backend,
}

impl ErrorKind {
    /// Stable label for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admission => "admission",
            Self::QueueFull => "queue_full",
            Self::NoEligibleCluster => "no_eligible_cluster",
            Self::CapacityRace => "capacity_race",
            Self::InvalidTransition => "invalid_transition",
            Self::BackendSubmission => "backend_submission",
            Self::NotFound => "not_found",
            Self::Invalid => "invalid",
            Self::Backend => "backend",
        }
    }
}

impl SchedulerError {
    /// Classification of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Admission { .. } => ErrorKind::Admission,
            Self::QueueFull { .. } => ErrorKind::QueueFull,
            Self::NoEligibleCluster { .. } => ErrorKind::NoEligibleCluster,
            Self::CapacityRace { .. } => ErrorKind::CapacityRace,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::BackendSubmission { .. } => ErrorKind::BackendSubmission,
            Self::JobNotFound(_) | Self::ClusterNotFound(_) | Self::DecisionNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::DuplicateJob(_) | Self::InvalidJob(_) | Self::InvalidCluster(_) | Self::Config(_) => {
                ErrorKind::Invalid
            }
            Self::Backend(_) => ErrorKind::Backend,
        }
    }

    /// Whether resubmitting or retrying later can succeed without a code change.
    ///
    /// Admission is retryable only after the customer's tier changes, so it is
    /// reported as not retryable here.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QueueFull { .. }
                | Self::NoEligibleCluster { .. }
                | Self::CapacityRace { .. }
                | Self::BackendSubmission { .. }
                | Self::Backend(_)
        )
    }

    /// Capacity or fairness pressure rather than a fault.
    pub const fn is_capacity_condition(&self) -> bool {
        matches!(
            self,
            Self::QueueFull { .. } | Self::NoEligibleCluster { .. } | Self::CapacityRace { .. }
        )
    }

    /// Caller bug: the requested operation can never be valid in this state.
    pub const fn is_defect(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
