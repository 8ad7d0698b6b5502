//! Tests for the billing outbox

use hpc_scheduler::core::{JobMetrics, SnapshotKind, UsageResource, UsageSink, UsageSnapshot};
use hpc_scheduler::infra::InMemoryUsageSink;

fn snapshot(job_id: &str, customer: &str, at: u128) -> UsageSnapshot {
    UsageSnapshot {
        job_id: job_id.into(),
        customer: customer.into(),
        cluster_id: Some("c-1".into()),
        kind: SnapshotKind::Final,
        taken_at_ms: at,
        records: JobMetrics {
            wall_clock_seconds: 10,
            cpu_core_seconds: 40,
            memory_gb_seconds: 80,
            gpu_seconds: 0,
        }
        .to_records(at - 10_000, at),
    }
}

#[test]
fn test_sink_groups_by_customer() {
    let sink = InMemoryUsageSink::new();
    let mut writer = sink.clone();
    writer.emit(snapshot("j1", "alice", 20_000)).unwrap();
    writer.emit(snapshot("j2", "alice", 30_000)).unwrap();
    writer.emit(snapshot("j3", "bob", 40_000)).unwrap();

    assert_eq!(sink.len(), 3);
    assert_eq!(sink.fetch("alice", None, 10).len(), 2);
    assert_eq!(sink.fetch("bob", None, 10).len(), 1);
    assert!(sink.fetch("carol", None, 10).is_empty());
}

#[test]
fn test_fetch_since_and_limit() {
    let mut sink = InMemoryUsageSink::new();
    for (i, at) in [20_000u128, 30_000, 40_000].into_iter().enumerate() {
        sink.emit(snapshot(&format!("j{i}"), "alice", at)).unwrap();
    }
    let recent = sink.fetch("alice", Some(30_000), 10);
    assert_eq!(recent.len(), 2);
    assert_eq!(sink.fetch("alice", None, 1)[0].job_id, "j0");
}

#[test]
fn test_snapshot_quantity_lookup() {
    let snap = snapshot("j1", "alice", 20_000);
    assert_eq!(snap.quantity(UsageResource::CpuCoreSeconds), Some(40));
    assert_eq!(snap.quantity(UsageResource::GpuSeconds), Some(0));
    assert_eq!(UsageResource::MemoryGbSeconds.unit(), "gb-seconds");
}
