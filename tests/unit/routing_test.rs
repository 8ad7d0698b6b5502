//! Tests for the routing decision recorder

use std::collections::BTreeMap;

use hpc_scheduler::core::routing::integrity_hash;
use hpc_scheduler::core::{InMemoryRoutingLog, RoutingOutcome, RoutingRecord, RoutingSink, SchedulingDecision};

fn decision(job_id: &str, cluster_id: &str, at: u128) -> SchedulingDecision {
    SchedulingDecision {
        decision_id: "d-1".into(),
        job_id: job_id.into(),
        cluster_id: cluster_id.into(),
        provider_id: "prov".into(),
        reason: "test".into(),
        scores: BTreeMap::from([(cluster_id.to_string(), 0.8)]),
        created_at_ms: at,
        integrity_hash: integrity_hash(job_id, cluster_id, at),
    }
}

#[test]
fn test_decision_hash_is_reproducible() {
    let d = decision("job-1", "c-1", 1_700_000_000_123);
    assert!(d.verify_integrity());
    assert_eq!(d.integrity_hash, integrity_hash("job-1", "c-1", 1_700_000_000_123));
}

#[test]
fn test_decision_hash_detects_tampering() {
    let mut d = decision("job-1", "c-1", 10);
    d.created_at_ms += 1;
    assert!(!d.verify_integrity());
}

#[test]
fn test_failed_attempt_hashes_empty_cluster() {
    let record = RoutingRecord {
        record_id: "r".into(),
        job_id: "job-1".into(),
        customer: "cust".into(),
        outcome: RoutingOutcome::NoEligibleCluster,
        selected_cluster: None,
        selected_provider: None,
        reason: "no clusters registered".into(),
        candidates: Vec::new(),
        rejected: BTreeMap::new(),
        created_at_ms: 5,
        integrity_hash: integrity_hash("job-1", "", 5),
    };
    assert!(record.verify_integrity());
}

#[test]
fn test_routing_log_overflow() {
    let log = InMemoryRoutingLog::new(2);
    let mut sink = log.clone();
    for at in 0..3u128 {
        let d = decision(&format!("job-{at}"), "c", at);
        sink.record(RoutingRecord {
            record_id: d.decision_id.clone(),
            job_id: d.job_id.clone(),
            customer: "cust".into(),
            outcome: RoutingOutcome::Scheduled,
            selected_cluster: Some(d.cluster_id.clone()),
            selected_provider: Some(d.provider_id.clone()),
            reason: d.reason.clone(),
            candidates: Vec::new(),
            rejected: BTreeMap::new(),
            created_at_ms: at,
            integrity_hash: d.integrity_hash.clone(),
        });
    }
    let records = log.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].job_id, "job-1");
    assert_eq!(records[1].job_id, "job-2");
}
