//! Tests for error types

use hpc_scheduler::core::{CapacityShortfall, ErrorKind, LifecyclePhase, SchedulerError};

#[test]
fn test_queue_full_error() {
    let err = SchedulerError::QueueFull { depth: 2, limit: 2 };
    assert_eq!(format!("{}", err), "queue full: depth 2 at limit 2");
    assert_eq!(err.kind(), ErrorKind::QueueFull);
    assert!(err.is_retryable());
    assert!(err.is_capacity_condition());
}

#[test]
fn test_capacity_race_error() {
    let err = SchedulerError::CapacityRace {
        job_id: "j1".into(),
        cluster_id: "c1".into(),
        shortfall: CapacityShortfall::Memory {
            requested: 64,
            available: 16,
        },
    };
    assert_eq!(
        format!("{}", err),
        "capacity race for job j1 on cluster c1: insufficient memory (requested 64 GB, available 16 GB)"
    );
    assert!(err.is_retryable());
    assert!(!err.is_defect());
}

#[test]
fn test_invalid_transition_is_defect() {
    let err = SchedulerError::InvalidTransition {
        job_id: "j1".into(),
        from: LifecyclePhase::Completed,
        to: LifecyclePhase::Running,
    };
    assert_eq!(
        format!("{}", err),
        "invalid lifecycle transition for job j1: completed -> running"
    );
    assert!(err.is_defect());
    assert!(!err.is_retryable());
    assert_eq!(err.kind().as_str(), "invalid_transition");
}

#[test]
fn test_admission_not_retryable() {
    let err = SchedulerError::Admission {
        job_id: "j1".into(),
        customer_tier: 50,
        required_tier: 70,
    };
    assert!(!err.is_retryable());
    assert!(!err.is_capacity_condition());
    assert_eq!(err.kind(), ErrorKind::Admission);
}

#[test]
fn test_backend_error() {
    let err = SchedulerError::Backend("connection failed".to_string());
    assert_eq!(format!("{}", err), "backend error: connection failed");
}

#[test]
fn test_lookup_errors_share_kind() {
    for err in [
        SchedulerError::JobNotFound("j".into()),
        SchedulerError::ClusterNotFound("c".into()),
        SchedulerError::DecisionNotFound("j".into()),
    ] {
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
