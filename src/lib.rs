//! # HPC Scheduler
//!
//! A provider-side scheduler that turns submitted compute jobs into placements
//! on heterogeneous clusters, drives them through an external batch system,
//! and keeps an auditable record of every placement decision.
//!
//! ## Flow
//!
//! 1. **Queue**: jobs wait in a bounded queue ordered by priority, then (with
//!    fair-share) by how many jobs the customer already runs, then by
//!    submission time.
//! 2. **Admission and placement**: `schedule_next` checks the customer's tier,
//!    filters clusters on region, GPU model and free capacity, and scores the
//!    survivors. The decision is hashed and written to the routing log.
//! 3. **Start**: `start_job` re-checks capacity *now*, debits it, and submits
//!    to the backend (SLURM-style or mock). Capacity that vanished since the
//!    decision fails the job rather than oversubscribing the cluster.
//! 4. **Lifecycle**: every transition follows a fixed state table and is
//!    appended to the job's history. Terminal transitions release capacity and
//!    emit a final usage snapshot to the billing outbox.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hpc_scheduler::builders::SchedulerBuilder;
//! use hpc_scheduler::config::SchedulerConfig;
//! use hpc_scheduler::core::{Cluster, Job, QueueOptions, ResourceRequest};
//!
//! let scheduler = SchedulerBuilder::new(SchedulerConfig::default()).build()?;
//! scheduler
//!     .registry()
//!     .register(Cluster::new("eu-1", "acme", "eu-west", 128, 512))?;
//!
//! let job = Job::new("job-1", "cust-1", ResourceRequest::new(8, 32)).with_priority(5);
//! scheduler.enqueue(job, QueueOptions::default())?;
//!
//! let decision = scheduler.schedule_next()?.expect("queue was not empty");
//! let running = scheduler.start_job(&decision.job_id).await?;
//! ```

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Jobs, clusters, scoring, lifecycle, routing records, and the scheduler.
pub mod core;
/// Configuration models for the scheduler and its backend.
pub mod config;
/// Builders to construct schedulers from configuration.
pub mod builders;
/// Infrastructure adapters for queues, execution backends, and billing outboxes.
pub mod infra;
/// API surface and background reconciliation.
pub mod runtime;
/// Shared utilities.
pub mod util;

pub use crate::builders::SchedulerBuilder;
pub use crate::config::SchedulerConfig;
pub use crate::core::{Scheduler, SchedulerError};
