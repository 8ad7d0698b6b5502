//! Configuration models for the scheduler, its backend, and scoring.

pub mod scheduler;

pub use scheduler::{BackendConfig, SchedulerConfig, SlurmBackendConfig, ENV_PREFIX};
