//! Tests for the API surface and the background reconciler

use std::sync::Arc;
use std::time::Duration;

use hpc_scheduler::builders::SchedulerBuilder;
use hpc_scheduler::config::SchedulerConfig;
use hpc_scheduler::core::{Cluster, LifecyclePhase};
use hpc_scheduler::runtime::{health, job_status, queue_snapshot, spawn_reconciler, submit_job, JobSubmission};
use hpc_scheduler::Scheduler;

fn scheduler() -> Scheduler {
    SchedulerBuilder::new(SchedulerConfig::default()).build().unwrap()
}

fn submission(job_id: &str, priority: i32) -> JobSubmission {
    serde_json::from_value(serde_json::json!({
        "job_id": job_id,
        "customer": "0xabc",
        "resources": { "cpu_cores_per_node": 4, "memory_gb_per_node": 16 },
        "priority": priority,
    }))
    .unwrap()
}

#[test]
fn test_submit_job_reports_queued() {
    let scheduler = scheduler();
    let status = submit_job(&scheduler, submission("job-1", 1)).unwrap();
    assert_eq!(status.phase, LifecyclePhase::Queued);
    assert_eq!(status.history.len(), 2);
    assert_eq!(status.history[0].phase, LifecyclePhase::Submitted);
    assert_eq!(status.cluster_id, None);
    assert_eq!(status.backend_job_id, None);
}

#[test]
fn test_submit_duplicate_is_rejected() {
    let scheduler = scheduler();
    submit_job(&scheduler, submission("job-1", 1)).unwrap();
    let err = submit_job(&scheduler, submission("job-1", 1)).unwrap_err();
    assert_eq!(err, hpc_scheduler::SchedulerError::DuplicateJob("job-1".into()));
}

#[test]
fn test_job_status_unknown() {
    assert!(job_status(&scheduler(), "missing").is_none());
}

#[test]
fn test_submission_defaults() {
    let (job, options) = submission("job-1", 3).into_parts(42);
    assert_eq!(job.submitted_at_ms, 42);
    assert_eq!(job.queue, "default");
    assert_eq!(job.resources.nodes, 1);
    assert_eq!(options.priority, None);
}

#[test]
fn test_queue_snapshot_and_health() {
    let scheduler = scheduler();
    scheduler
        .registry()
        .register(Cluster::new("c1", "prov", "eu", 64, 256))
        .unwrap();
    submit_job(&scheduler, submission("low", 1)).unwrap();
    submit_job(&scheduler, submission("high", 9)).unwrap();

    let snapshot = queue_snapshot(&scheduler);
    assert_eq!(snapshot.depth, 2);
    assert_eq!(snapshot.max_depth, 1_000);
    assert_eq!(snapshot.order, vec!["high".to_string(), "low".to_string()]);

    let h = health(&scheduler);
    assert!(h.ok);
    assert_eq!((h.queued, h.clusters), (2, 1));
}

#[tokio::test]
async fn test_status_after_start_carries_backend_id() {
    let scheduler = scheduler();
    scheduler
        .registry()
        .register(Cluster::new("c1", "prov", "eu", 64, 256))
        .unwrap();
    submit_job(&scheduler, submission("job-1", 1)).unwrap();
    scheduler.schedule_next().unwrap().unwrap();
    let view = scheduler.start_job("job-1").await.unwrap();

    let status = job_status(&scheduler, "job-1").unwrap();
    assert_eq!(status.phase, LifecyclePhase::Running);
    assert_eq!(status.cluster_id.as_deref(), Some("c1"));
    assert_eq!(status.backend_job_id, Some(view.backend_job_id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reconciler_expires_and_shuts_down() {
    let scheduler = Arc::new(scheduler());
    let mut req = submission("stale", 1);
    req.options.expires_at_ms = Some(1);
    submit_job(&scheduler, req).unwrap();

    let handle = spawn_reconciler(Arc::clone(&scheduler), Duration::from_millis(10));
    for _ in 0..100 {
        if scheduler.current_phase("stale") == Some(LifecyclePhase::Cancelled) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(scheduler.current_phase("stale"), Some(LifecyclePhase::Cancelled));
    assert!(!handle.is_finished());
    handle.shutdown().await;
}
