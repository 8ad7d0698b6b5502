//! Billing outbox backends.

pub mod memory;

pub use memory::InMemoryUsageSink;
