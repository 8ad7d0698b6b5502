//! Core scheduling types: jobs, clusters, scoring, lifecycle, routing, and the scheduler.

pub mod backend;
pub mod cluster;
pub mod error;
pub mod job;
pub mod lifecycle;
pub mod queue;
pub mod routing;
pub mod scheduler;
pub mod scoring;
pub mod usage;

pub use backend::{
    BackendCallback, BackendType, ExecutionBackend, SchedulerJob, SignedStatusReport, StatusReport,
    SubmitRequest,
};
pub use cluster::{CapacityShortfall, Cluster, ClusterRegistry};
pub use error::{AppResult, ErrorKind, SchedulerError};
pub use job::{Job, QueueEntry, QueueOptions, ResourceRequest};
pub use lifecycle::{LifecycleCallback, LifecycleEvent, LifecyclePhase, LifecycleTracker, PhaseRecord};
pub use queue::{JobQueue, RunningCounts};
pub use routing::{
    CompositeRoutingSink, InMemoryRoutingLog, RoutingOutcome, RoutingRecord, RoutingSink,
    SchedulingDecision, TracingRoutingSink,
};
pub use scheduler::Scheduler;
pub use scoring::{CandidateScore, Evaluation, Ineligibility, ScoringWeights};
pub use usage::{DiscardUsageSink, JobMetrics, SnapshotKind, UsageRecord, UsageResource, UsageSink, UsageSnapshot};
