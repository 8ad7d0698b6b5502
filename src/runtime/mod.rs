//! Runtime adapters and API surface.

pub mod api;
#[cfg(feature = "tokio-runtime")]
pub mod poller;

pub use api::{health, job_status, queue_snapshot, submit_job, Health, JobStatusResponse, JobSubmission, QueueSnapshot};
#[cfg(feature = "tokio-runtime")]
pub use poller::{reconcile_once, spawn_reconciler, ReconcilerHandle};
