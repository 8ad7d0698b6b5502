//! Infrastructure adapters for queues, execution backends, and billing outboxes.

pub mod backend;
pub mod queue;
pub mod usage;

pub use backend::{AnyBackend, InMemorySlurmClient, MockBackend, SlurmBackend, SlurmClient};
pub use queue::InMemoryJobQueue;
pub use usage::InMemoryUsageSink;
