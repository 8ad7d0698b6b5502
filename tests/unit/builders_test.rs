//! Tests for builder modules

use std::sync::Arc;

use hpc_scheduler::builders::{build_backend, SchedulerBuilder};
use hpc_scheduler::config::{BackendConfig, SchedulerConfig, SlurmBackendConfig};
use hpc_scheduler::core::{BackendType, Cluster, ClusterRegistry, ErrorKind, ExecutionBackend};
use hpc_scheduler::infra::InMemorySlurmClient;

fn slurm_config() -> SchedulerConfig {
    SchedulerConfig {
        backend: BackendConfig::Slurm(SlurmBackendConfig {
            endpoint: "http://slurmctld:6820".into(),
            default_partition: Some("batch".into()),
            account: None,
        }),
        ..SchedulerConfig::default()
    }
}

#[test]
fn test_builder_defaults_to_mock() {
    let scheduler = SchedulerBuilder::new(SchedulerConfig::default()).build().unwrap();
    assert_eq!(scheduler.backend().backend_type(), BackendType::Mock);
    assert_eq!(scheduler.queue_capacity(), 1_000);
    assert!(scheduler.registry().is_empty());
}

#[test]
fn test_builder_rejects_invalid_config() {
    let cfg = SchedulerConfig {
        max_queue_depth: 0,
        ..SchedulerConfig::default()
    };
    let err = SchedulerBuilder::new(cfg).build().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
}

#[test]
fn test_slurm_without_client_is_config_error() {
    let err = SchedulerBuilder::new(slurm_config()).build().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert!(err.to_string().contains("http://slurmctld:6820"));
}

#[test]
fn test_slurm_with_client() {
    let client = Arc::new(InMemorySlurmClient::new());
    let scheduler = SchedulerBuilder::new(slurm_config())
        .with_slurm_client(client)
        .build()
        .unwrap();
    assert_eq!(scheduler.backend().backend_type(), BackendType::Slurm);
}

#[test]
fn test_build_backend_mock_ignores_client() {
    let backend = build_backend(&BackendConfig::Mock, Some(Arc::new(InMemorySlurmClient::new()))).unwrap();
    assert_eq!(backend.backend_type(), BackendType::Mock);
}

#[test]
fn test_builder_shares_registry() {
    let registry = Arc::new(ClusterRegistry::new());
    let scheduler = SchedulerBuilder::new(SchedulerConfig::default())
        .with_registry(Arc::clone(&registry))
        .build()
        .unwrap();
    registry.register(Cluster::new("c1", "p", "eu", 8, 32)).unwrap();
    assert_eq!(scheduler.registry().len(), 1);
}

#[test]
fn test_builder_applies_weights() {
    let mut cfg = SchedulerConfig::default();
    cfg.scoring.price = 0.9;
    let scheduler = SchedulerBuilder::new(cfg).build().unwrap();
    assert!((scheduler.weights().price - 0.9).abs() < f64::EPSILON);
}
