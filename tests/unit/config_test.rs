//! Tests for configuration validation and loading

use std::collections::HashMap;

use hpc_scheduler::config::{BackendConfig, SchedulerConfig, SlurmBackendConfig};

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_default_config_is_valid() {
    let cfg = SchedulerConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.backend, BackendConfig::Mock);
    assert!(cfg.fair_share);
}

#[test]
fn test_invalid_queue_depth() {
    let cfg = SchedulerConfig {
        max_queue_depth: 0,
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_invalid_weights() {
    let mut cfg = SchedulerConfig::default();
    cfg.scoring.latency = -1.0;
    let err = cfg.validate().unwrap_err();
    assert!(err.starts_with("scoring invalid"), "{err}");
}

#[test]
fn test_slurm_requires_endpoint() {
    let cfg = SchedulerConfig {
        backend: BackendConfig::Slurm(SlurmBackendConfig::default()),
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_from_json_str() {
    let cfg = SchedulerConfig::from_json_str(
        r#"{
            "max_queue_depth": 5,
            "fair_share": false,
            "backend": { "kind": "slurm", "endpoint": "http://slurmctld:6820", "account": "proj-1" },
            "scoring": { "latency": 0.5 }
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.max_queue_depth, 5);
    assert!(!cfg.fair_share);
    assert!((cfg.scoring.latency - 0.5).abs() < f64::EPSILON);
    assert!((cfg.scoring.resource_fit - 0.4).abs() < f64::EPSILON);
    match cfg.backend {
        BackendConfig::Slurm(slurm) => {
            assert_eq!(slurm.endpoint, "http://slurmctld:6820");
            assert_eq!(slurm.account.as_deref(), Some("proj-1"));
            assert_eq!(slurm.default_partition, None);
        }
        BackendConfig::Mock => panic!("expected slurm backend"),
    }
}

#[test]
fn test_from_json_str_rejects_invalid() {
    assert!(SchedulerConfig::from_json_str(r#"{ "max_queue_depth": 0 }"#).is_err());
    assert!(SchedulerConfig::from_json_str("not json").is_err());
}

#[test]
fn test_from_lookup_overrides_defaults() {
    let cfg = SchedulerConfig::from_lookup(lookup(&[
        ("HPC_SCHED_MAX_QUEUE_DEPTH", "42"),
        ("HPC_SCHED_FAIR_SHARE", "false"),
        ("HPC_SCHED_BACKEND", "slurm"),
        ("HPC_SCHED_SLURM_ENDPOINT", "unix:///run/slurmrestd.sock"),
        ("HPC_SCHED_SLURM_PARTITION", "gpu"),
        ("HPC_SCHED_REPORT_SIGNING_KEY", "s3cret"),
        ("HPC_SCHED_WEIGHT_PRICE", "0.6"),
    ]))
    .unwrap();
    assert_eq!(cfg.max_queue_depth, 42);
    assert!(!cfg.fair_share);
    assert_eq!(cfg.report_signing_key, "s3cret");
    assert!((cfg.scoring.price - 0.6).abs() < f64::EPSILON);
    assert_eq!(
        cfg.backend,
        BackendConfig::Slurm(SlurmBackendConfig {
            endpoint: "unix:///run/slurmrestd.sock".into(),
            default_partition: Some("gpu".into()),
            account: None,
        })
    );
}

#[test]
fn test_from_lookup_rejects_bad_values() {
    let err = SchedulerConfig::from_lookup(lookup(&[("HPC_SCHED_MAX_QUEUE_DEPTH", "lots")])).unwrap_err();
    assert!(err.to_string().contains("HPC_SCHED_MAX_QUEUE_DEPTH"));
    assert!(SchedulerConfig::from_lookup(lookup(&[("HPC_SCHED_BACKEND", "pbs")])).is_err());
    assert!(SchedulerConfig::from_lookup(lookup(&[("HPC_SCHED_BACKEND", "slurm")])).is_err());
}

#[test]
fn test_from_lookup_empty_uses_defaults() {
    let cfg = SchedulerConfig::from_lookup(|_| None).unwrap();
    assert_eq!(cfg, SchedulerConfig::default());
}

#[test]
fn test_log_summary_does_not_panic() {
    let cfg = SchedulerConfig {
        report_signing_key: "hidden".into(),
        ..SchedulerConfig::default()
    };
    cfg.log_summary();
}
