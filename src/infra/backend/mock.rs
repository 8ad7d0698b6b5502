//! In-process backend for development and tests.
//!
//! Jobs start running as soon as they are submitted. Tests drive them
//! through the remaining states with [`MockBackend::set_state`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::core::backend::{BackendCallback, BackendType, ExecutionBackend, SchedulerJob, SubmitRequest};
use crate::core::job::ResourceRequest;
use crate::core::lifecycle::LifecyclePhase;
use crate::core::usage::JobMetrics;
use crate::core::SchedulerError;
use crate::util::clock::{elapsed_secs, now_ms};

#[derive(Default)]
struct MockInner {
    jobs: RwLock<HashMap<String, MockJob>>,
    callbacks: RwLock<Vec<BackendCallback>>,
    next_id: AtomicU64,
    fail_next: Mutex<Option<String>>,
    submissions: AtomicU64,
}

struct MockJob {
    view: SchedulerJob,
    request: ResourceRequest,
    reported_metrics: Option<JobMetrics>,
}

impl MockJob {
    fn metrics_at(&self, now: u128) -> JobMetrics {
        if let Some(metrics) = self.reported_metrics {
            return metrics;
        }
        let Some(start) = self.view.start_time_ms else {
            return JobMetrics::default();
        };
        let end = self.view.end_time_ms.unwrap_or(now);
        JobMetrics::estimate(&self.request, elapsed_secs(start, end))
    }
}

/// In-process backend. Clones share state.
#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Arc<MockInner>,
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("jobs", &self.inner.jobs.read().len())
            .finish_non_exhaustive()
    }
}

impl MockBackend {
    /// Empty mock backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `submit_job` call fail with `message`.
    pub fn fail_next_submit(&self, message: impl Into<String>) {
        *self.inner.fail_next.lock() = Some(message.into());
    }

    /// Number of successful submissions so far.
    pub fn submission_count(&self) -> u64 {
        self.inner.submissions.load(Ordering::SeqCst)
    }

    /// Whether the backend knows `job_id`.
    pub fn contains(&self, job_id: &str) -> bool {
        self.inner.jobs.read().contains_key(job_id)
    }

    /// Force a job into `state`, as the real scheduler would report it.
    pub fn set_state(
        &self,
        job_id: &str,
        state: LifecyclePhase,
        exit_code: Option<i32>,
    ) -> Result<(), SchedulerError> {
        let snapshot = {
            let mut jobs = self.inner.jobs.write();
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
            let now = now_ms();
            job.view.state = state;
            if state == LifecyclePhase::Running && job.view.start_time_ms.is_none() {
                job.view.start_time_ms = Some(now);
            }
            if state.is_terminal() {
                job.view.end_time_ms.get_or_insert(now);
                job.view.exit_code = exit_code.or(job.view.exit_code);
            }
            job.view.metrics = job.metrics_at(now);
            job.view.clone()
        };
        self.notify(&snapshot);
        Ok(())
    }

    /// Report accounting figures for a job, replacing the allocation estimate.
    pub fn record_usage(&self, job_id: &str, metrics: JobMetrics) -> Result<(), SchedulerError> {
        let mut jobs = self.inner.jobs.write();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
        job.reported_metrics = Some(metrics);
        job.view.metrics = metrics;
        Ok(())
    }

    fn notify(&self, job: &SchedulerJob) {
        let callbacks = self.inner.callbacks.read().clone();
        for callback in &callbacks {
            callback(job);
        }
    }
}

#[async_trait]
impl ExecutionBackend for MockBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Mock
    }

    async fn submit_job(&self, request: SubmitRequest) -> Result<SchedulerJob, SchedulerError> {
        if let Some(message) = self.inner.fail_next.lock().take() {
            tracing::debug!(job_id = %request.job.id, "mock backend rejecting submission");
            return Err(SchedulerError::BackendSubmission {
                job_id: request.job.id,
                message,
            });
        }
        let seq = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = now_ms();
        let view = SchedulerJob {
            job_id: request.job.id.clone(),
            backend_job_id: format!("mock-{seq}"),
            backend_type: BackendType::Mock,
            cluster_id: request.cluster.id.clone(),
            state: LifecyclePhase::Running,
            submit_time_ms: now,
            start_time_ms: Some(now),
            end_time_ms: None,
            exit_code: None,
            metrics: JobMetrics::default(),
        };
        self.inner.jobs.write().insert(
            request.job.id.clone(),
            MockJob {
                view: view.clone(),
                request: request.job.resources,
                reported_metrics: None,
            },
        );
        self.inner.submissions.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(job_id = %view.job_id, backend_job_id = %view.backend_job_id, "mock job started");
        self.notify(&view);
        Ok(view)
    }

    async fn cancel_job(&self, job_id: &str) -> Result<(), SchedulerError> {
        let current = self
            .inner
            .jobs
            .read()
            .get(job_id)
            .map(|j| j.view.state)
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
        if current.is_finished() {
            return Ok(());
        }
        self.set_state(job_id, LifecyclePhase::Cancelled, None)
    }

    async fn get_job_status(&self, job_id: &str) -> Result<SchedulerJob, SchedulerError> {
        let jobs = self.inner.jobs.read();
        let job = jobs
            .get(job_id)
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
        let mut view = job.view.clone();
        view.metrics = job.metrics_at(now_ms());
        Ok(view)
    }

    async fn get_job_accounting(&self, job_id: &str) -> Result<JobMetrics, SchedulerError> {
        self.inner
            .jobs
            .read()
            .get(job_id)
            .map(|j| j.metrics_at(now_ms()))
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))
    }

    async fn list_active_jobs(&self) -> Result<Vec<SchedulerJob>, SchedulerError> {
        let mut active: Vec<SchedulerJob> = self
            .inner
            .jobs
            .read()
            .values()
            .filter(|j| !j.view.state.is_finished())
            .map(|j| j.view.clone())
            .collect();
        active.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        Ok(active)
    }

    fn register_lifecycle_callback(&self, callback: BackendCallback) {
        self.inner.callbacks.write().push(callback);
    }
}
