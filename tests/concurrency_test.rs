//! Scheduler shared across tasks: capacity accounting under contention and
//! cancellation while a submission is in flight.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use hpc_scheduler::core::{
    BackendCallback, BackendType, Cluster, ClusterRegistry, ExecutionBackend, Job, JobMetrics,
    LifecyclePhase, QueueOptions, ResourceRequest, SchedulerError, SchedulerJob, SnapshotKind,
    SubmitRequest, UsageResource,
};
use hpc_scheduler::infra::{InMemoryJobQueue, MockBackend};
use hpc_scheduler::Scheduler;

/// Backend whose submissions and accounting reads block until the test opens a gate.
#[derive(Default)]
struct GatedBackend {
    gate: Notify,
    accounting_gate: Notify,
    accounting_calls: AtomicUsize,
    cancels: AtomicUsize,
}

#[async_trait]
impl ExecutionBackend for GatedBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Mock
    }

    async fn submit_job(&self, request: SubmitRequest) -> Result<SchedulerJob, SchedulerError> {
        self.gate.notified().await;
        Ok(SchedulerJob {
            job_id: request.job.id.clone(),
            backend_job_id: format!("gated-{}", request.job.id),
            backend_type: BackendType::Mock,
            cluster_id: request.cluster.id,
            state: LifecyclePhase::Running,
            submit_time_ms: 0,
            start_time_ms: Some(0),
            end_time_ms: None,
            exit_code: None,
            metrics: JobMetrics::default(),
        })
    }

    async fn cancel_job(&self, _job_id: &str) -> Result<(), SchedulerError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_job_status(&self, job_id: &str) -> Result<SchedulerJob, SchedulerError> {
        Err(SchedulerError::JobNotFound(job_id.to_string()))
    }

    async fn get_job_accounting(&self, _job_id: &str) -> Result<JobMetrics, SchedulerError> {
        self.accounting_calls.fetch_add(1, Ordering::SeqCst);
        self.accounting_gate.notified().await;
        Ok(JobMetrics {
            wall_clock_seconds: 10,
            cpu_core_seconds: 999,
            memory_gb_seconds: 10,
            gpu_seconds: 0,
        })
    }

    async fn list_active_jobs(&self) -> Result<Vec<SchedulerJob>, SchedulerError> {
        Ok(Vec::new())
    }

    fn register_lifecycle_callback(&self, _callback: BackendCallback) {}
}

fn registry(cpu: u64) -> Arc<ClusterRegistry> {
    let registry = Arc::new(ClusterRegistry::new());
    registry.register(Cluster::new("c1", "prov", "eu", cpu, 1024)).unwrap();
    registry
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_during_submission_cancels_on_backend() {
    let scheduler = Arc::new(Scheduler::new(
        Box::new(InMemoryJobQueue::new(8, true)),
        registry(16),
        GatedBackend::default(),
    ));
    scheduler
        .enqueue(Job::new("j", "cust", ResourceRequest::new(4, 4)), QueueOptions::default())
        .unwrap();
    scheduler.schedule_next().unwrap().unwrap();

    let starter = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.start_job("j").await })
    };
    for _ in 0..200 {
        if scheduler.current_phase("j") == Some(LifecyclePhase::Starting) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(scheduler.current_phase("j"), Some(LifecyclePhase::Starting));
    assert_eq!(scheduler.registry().get("c1").unwrap().available_cpu, 12);

    scheduler.cancel_job("j", "user request").await.unwrap();
    assert_eq!(scheduler.registry().get("c1").unwrap().available_cpu, 16);

    scheduler.backend().gate.notify_one();
    let result = starter.await.unwrap();
    assert!(matches!(result, Err(SchedulerError::InvalidTransition { .. })));
    assert_eq!(scheduler.backend().cancels.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.current_phase("j"), Some(LifecyclePhase::Cancelled));
    assert!(scheduler.backend_job("j").is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_finishing_during_usage_collection_keeps_final_snapshot_last() {
    let scheduler = Arc::new(Scheduler::new(
        Box::new(InMemoryJobQueue::new(8, true)),
        registry(16),
        GatedBackend::default(),
    ));
    scheduler
        .enqueue(Job::new("j", "cust", ResourceRequest::new(4, 4)), QueueOptions::default())
        .unwrap();
    scheduler.schedule_next().unwrap().unwrap();
    // stored permit lets the submission straight through
    scheduler.backend().gate.notify_one();
    scheduler.start_job("j").await.unwrap();

    let collector = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.collect_usage("j").await })
    };
    for _ in 0..200 {
        if scheduler.backend().accounting_calls.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(scheduler.backend().accounting_calls.load(Ordering::SeqCst), 1);

    scheduler.mark_completed("j").unwrap();
    scheduler.backend().accounting_gate.notify_one();

    assert!(collector.await.unwrap().is_err());
    let snaps = scheduler.get_usage_snapshots("j");
    assert_eq!(
        snaps.iter().map(|s| s.kind).collect::<Vec<_>>(),
        vec![SnapshotKind::Final]
    );
    assert_eq!(snaps[0].quantity(UsageResource::CpuCoreSeconds), Some(0));
    assert_eq!(scheduler.current_phase("j"), Some(LifecyclePhase::Completed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contended_starts_never_oversubscribe() {
    let scheduler = Arc::new(Scheduler::new(
        Box::new(InMemoryJobQueue::new(64, true)),
        registry(16),
        MockBackend::new(),
    ));
    for i in 0..20 {
        scheduler
            .enqueue(
                Job::new(format!("j{i:02}"), format!("cust-{}", i % 3), ResourceRequest::new(2, 8)),
                QueueOptions::default(),
            )
            .unwrap();
    }

    let mut workers = Vec::new();
    for _ in 0..8 {
        let scheduler = Arc::clone(&scheduler);
        workers.push(tokio::spawn(async move {
            loop {
                match scheduler.schedule_next() {
                    Ok(Some(decision)) => {
                        if let Err(e) = scheduler.start_job(&decision.job_id).await {
                            assert!(e.is_capacity_condition(), "{e}");
                        }
                    }
                    Ok(None) => break,
                    Err(e) => assert!(e.is_capacity_condition(), "{e}"),
                }
                tokio::task::yield_now().await;
            }
        }));
    }
    for worker in workers {
        worker.await.unwrap();
    }

    let ids: Vec<String> = (0..20).map(|i| format!("j{i:02}")).collect();
    let running = ids
        .iter()
        .filter(|id| scheduler.current_phase(id) == Some(LifecyclePhase::Running))
        .count();
    let available = scheduler.registry().get("c1").unwrap().available_cpu;
    assert_eq!(running, 8);
    assert_eq!(available, 0);
    assert_eq!(scheduler.active_job_ids().len(), running);
    assert_eq!(scheduler.queue_len(), 0);
    let total: u32 = (0..3).map(|c| scheduler.running_count(&format!("cust-{c}"))).sum();
    assert_eq!(total as usize, running);
}

#[tokio::test]
async fn readers_run_alongside_writers() {
    let scheduler = Scheduler::new(
        Box::new(InMemoryJobQueue::new(128, true)),
        registry(64),
        MockBackend::new(),
    );
    let writer = async {
        for i in 0..50 {
            scheduler
                .enqueue(Job::new(format!("w{i}"), "cust", ResourceRequest::new(1, 1)), QueueOptions::default())
                .unwrap();
            tokio::task::yield_now().await;
        }
    };
    let reader = async {
        let mut last = 0;
        for _ in 0..50 {
            let order = scheduler.peek_queue();
            assert!(order.len() >= last);
            last = order.len();
            tokio::task::yield_now().await;
        }
    };
    futures::join!(writer, reader);
    assert_eq!(scheduler.queue_len(), 50);
    assert_eq!(scheduler.peek_queue(), scheduler.peek_queue());
}
