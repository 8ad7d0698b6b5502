//! SLURM-style backend over a pluggable transport.
//!
//! The adapter renders an `sbatch` script, hands it to a [`SlurmClient`], and
//! translates the scheduler's state strings into canonical phases. How the
//! client talks to `slurmctld` (REST, CLI, RPC) is up to the client.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::config::SlurmBackendConfig;
use crate::core::backend::{BackendCallback, BackendType, ExecutionBackend, SchedulerJob, SubmitRequest};
use crate::core::lifecycle::LifecyclePhase;
use crate::core::usage::JobMetrics;
use crate::core::SchedulerError;
use crate::util::clock::now_ms;

/// One row of `squeue`/`sacct` output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlurmJobRecord {
    /// SLURM job id.
    pub job_id: String,
    /// Raw state string, e.g. `RUNNING` or `CANCELLED by 1000`.
    pub state: String,
    /// Raw `code:signal` exit string.
    pub exit_code: Option<String>,
    /// Elapsed seconds.
    pub elapsed_secs: u64,
    /// Allocated CPUs across all nodes.
    pub alloc_cpus: u64,
    /// Allocated memory in GB across all nodes.
    pub alloc_mem_gb: u64,
    /// Allocated GPUs across all nodes.
    pub alloc_gpus: u64,
    /// Start time, if started.
    pub start_time_ms: Option<u128>,
    /// End time, if finished.
    pub end_time_ms: Option<u128>,
}

impl SlurmJobRecord {
    /// Accounting figures, computed the way `sacct` reports `CPUTimeRAW`.
    pub fn metrics(&self) -> JobMetrics {
        JobMetrics {
            wall_clock_seconds: self.elapsed_secs,
            cpu_core_seconds: self.alloc_cpus.saturating_mul(self.elapsed_secs),
            memory_gb_seconds: self.alloc_mem_gb.saturating_mul(self.elapsed_secs),
            gpu_seconds: self.alloc_gpus.saturating_mul(self.elapsed_secs),
        }
    }
}

/// Transport to a SLURM controller.
#[async_trait]
pub trait SlurmClient: Send + Sync {
    /// Submit a batch script; returns the SLURM job id.
    async fn submit_batch(&self, script: &str) -> Result<String, SchedulerError>;
    /// `scancel` a job.
    async fn cancel(&self, slurm_job_id: &str) -> Result<(), SchedulerError>;
    /// Look a job up; `None` once SLURM has forgotten it.
    async fn query(&self, slurm_job_id: &str) -> Result<Option<SlurmJobRecord>, SchedulerError>;
}

/// Translate a SLURM state string into a canonical phase.
///
/// Accepts the long and short forms, trailing `+`, and suffixes such as
/// `CANCELLED by 1000`. Unknown states map to `None`.
pub fn map_slurm_state(raw: &str) -> Option<LifecyclePhase> {
    let token = raw
        .split_whitespace()
        .next()?
        .trim_end_matches('+')
        .to_ascii_uppercase();
    let phase = match token.as_str() {
        "PENDING" | "PD" | "REQUEUED" | "RQ" | "REQUEUE_HOLD" | "REQUEUE_FED" | "RESV_DEL_HOLD"
        | "CONFIGURING" | "CF" => LifecyclePhase::Queued,
        "RUNNING" | "R" | "COMPLETING" | "CG" | "STAGE_OUT" | "SO" | "SIGNALING" | "SI"
        | "RESIZING" | "RS" => LifecyclePhase::Running,
        "SUSPENDED" | "S" | "STOPPED" | "ST" => LifecyclePhase::Suspended,
        "COMPLETED" | "CD" => LifecyclePhase::Completed,
        "FAILED" | "F" | "NODE_FAIL" | "NF" | "OUT_OF_MEMORY" | "OOM" | "BOOT_FAIL" | "BF"
        | "PREEMPTED" | "PR" | "SPECIAL_EXIT" | "SE" | "REVOKED" | "RV" => LifecyclePhase::Failed,
        "CANCELLED" | "CA" => LifecyclePhase::Cancelled,
        "TIMEOUT" | "TO" | "DEADLINE" | "DL" => LifecyclePhase::Timeout,
        _ => return None,
    };
    Some(phase)
}

/// Parse a `code:signal` exit string.
///
/// A job killed by a signal with exit code 0 reports `128 + signal`.
pub fn parse_exit_code(raw: &str) -> Option<i32> {
    let mut parts = raw.trim().splitn(2, ':');
    let code: i32 = parts.next()?.trim().parse().ok()?;
    let signal: i32 = match parts.next() {
        Some(s) => s.trim().parse().ok()?,
        None => 0,
    };
    if code == 0 && signal > 0 {
        Some(128 + signal)
    } else {
        Some(code)
    }
}

/// Whether an observed state moves a job forward. A suspended job may
/// finish between two polls.
fn advances(current: LifecyclePhase, observed: LifecyclePhase) -> bool {
    current.can_transition_to(observed)
        || (current == LifecyclePhase::Suspended && LifecyclePhase::Running.can_transition_to(observed))
}

/// Render a duration as a SLURM time limit (`[D-]HH:MM:SS`).
pub fn format_time_limit(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    let seconds = secs % 60;
    if days > 0 {
        format!("{days}-{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}

/// Render the `sbatch` script for a submission.
pub fn render_batch_script(request: &SubmitRequest, config: &SlurmBackendConfig) -> String {
    let job = &request.job;
    let res = &job.resources;
    let partition = match config.default_partition.as_deref() {
        Some(default) if request.partition.is_empty() || request.partition == "default" => default,
        _ => request.partition.as_str(),
    };

    let mut script = String::from("#!/bin/bash\n");
    let _ = writeln!(script, "#SBATCH --job-name={}", job.id);
    if !partition.is_empty() {
        let _ = writeln!(script, "#SBATCH --partition={partition}");
    }
    if let Some(account) = config.account.as_deref().filter(|a| !a.is_empty()) {
        let _ = writeln!(script, "#SBATCH --account={account}");
    }
    let _ = writeln!(script, "#SBATCH --nodes={}", res.node_count());
    let _ = writeln!(script, "#SBATCH --cpus-per-task={}", res.cpu_cores_per_node);
    // --mem=0 would claim the whole node
    if res.memory_gb_per_node > 0 {
        let _ = writeln!(script, "#SBATCH --mem={}G", res.memory_gb_per_node);
    }
    if res.gpus_per_node > 0 {
        match res.required_gpu_type() {
            Some(gpu) => {
                let _ = writeln!(
                    script,
                    "#SBATCH --gres=gpu:{}:{}",
                    gpu.to_ascii_lowercase(),
                    res.gpus_per_node
                );
            }
            None => {
                let _ = writeln!(script, "#SBATCH --gres=gpu:{}", res.gpus_per_node);
            }
        }
    }
    if let Some(limit) = job.max_runtime_secs {
        let _ = writeln!(script, "#SBATCH --time={}", format_time_limit(limit));
    }
    let _ = writeln!(script, "#SBATCH --clusters={}", request.cluster.id);
    let _ = writeln!(script, "#SBATCH --comment=decision:{}", request.decision_id);
    script.push('\n');
    if let Some(body) = job.script.as_deref() {
        script.push_str(body);
        if !body.ends_with('\n') {
            script.push('\n');
        }
    }
    script
}

/// SLURM-style execution backend.
pub struct SlurmBackend {
    client: Arc<dyn SlurmClient>,
    config: SlurmBackendConfig,
    jobs: RwLock<HashMap<String, SchedulerJob>>,
    callbacks: RwLock<Vec<BackendCallback>>,
}

impl std::fmt::Debug for SlurmBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlurmBackend")
            .field("endpoint", &self.config.endpoint)
            .field("jobs", &self.jobs.read().len())
            .finish_non_exhaustive()
    }
}

impl SlurmBackend {
    /// Backend over `client`.
    pub fn new(client: Arc<dyn SlurmClient>, config: SlurmBackendConfig) -> Self {
        Self {
            client,
            config,
            jobs: RwLock::new(HashMap::new()),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Connection settings in use.
    pub const fn config(&self) -> &SlurmBackendConfig {
        &self.config
    }

    fn backend_id(&self, job_id: &str) -> Result<String, SchedulerError> {
        self.jobs
            .read()
            .get(job_id)
            .map(|j| j.backend_job_id.clone())
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))
    }

    fn notify(&self, job: &SchedulerJob) {
        let callbacks = self.callbacks.read().clone();
        for callback in &callbacks {
            callback(job);
        }
    }

    async fn refresh(&self, job_id: &str) -> Result<SchedulerJob, SchedulerError> {
        let backend_id = self.backend_id(job_id)?;
        let record = self.client.query(&backend_id).await?;
        let (view, changed) = {
            let mut jobs = self.jobs.write();
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
            let mut changed = false;
            if let Some(record) = record {
                match map_slurm_state(&record.state) {
                    Some(phase) if phase == job.state => {}
                    Some(phase) if advances(job.state, phase) => {
                        job.state = phase;
                        changed = true;
                    }
                    Some(phase) => tracing::debug!(
                        job_id,
                        slurm_job_id = %backend_id,
                        current = %job.state,
                        observed = %phase,
                        "ignoring backward slurm state"
                    ),
                    None => tracing::warn!(
                        job_id,
                        slurm_job_id = %backend_id,
                        state = %record.state,
                        "unrecognised slurm state"
                    ),
                }
                if let Some(code) = record.exit_code.as_deref().and_then(parse_exit_code) {
                    job.exit_code = Some(code);
                }
                job.start_time_ms = record.start_time_ms.or(job.start_time_ms);
                job.end_time_ms = record.end_time_ms.or(job.end_time_ms);
                job.metrics = record.metrics();
            }
            (job.clone(), changed)
        };
        if changed {
            tracing::debug!(job_id, state = %view.state, "slurm state changed");
            self.notify(&view);
        }
        Ok(view)
    }
}

#[async_trait]
impl ExecutionBackend for SlurmBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Slurm
    }

    async fn submit_job(&self, request: SubmitRequest) -> Result<SchedulerJob, SchedulerError> {
        let script = render_batch_script(&request, &self.config);
        let backend_job_id = self.client.submit_batch(&script).await.map_err(|e| {
            SchedulerError::BackendSubmission {
                job_id: request.job.id.clone(),
                message: e.to_string(),
            }
        })?;
        let now = now_ms();
        let view = SchedulerJob {
            job_id: request.job.id.clone(),
            backend_job_id,
            backend_type: BackendType::Slurm,
            cluster_id: request.cluster.id.clone(),
            state: LifecyclePhase::Running,
            submit_time_ms: now,
            start_time_ms: Some(now),
            end_time_ms: None,
            exit_code: None,
            metrics: JobMetrics::default(),
        };
        tracing::info!(
            job_id = %view.job_id,
            slurm_job_id = %view.backend_job_id,
            cluster = %view.cluster_id,
            "submitted batch job"
        );
        self.jobs.write().insert(view.job_id.clone(), view.clone());
        self.notify(&view);
        Ok(view)
    }

    async fn cancel_job(&self, job_id: &str) -> Result<(), SchedulerError> {
        let (backend_id, finished) = {
            let jobs = self.jobs.read();
            let job = jobs
                .get(job_id)
                .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
            (job.backend_job_id.clone(), job.state.is_finished())
        };
        if finished {
            return Ok(());
        }
        self.client.cancel(&backend_id).await?;
        let view = {
            let mut jobs = self.jobs.write();
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
            job.state = LifecyclePhase::Cancelled;
            job.end_time_ms.get_or_insert_with(now_ms);
            job.clone()
        };
        self.notify(&view);
        Ok(())
    }

    async fn get_job_status(&self, job_id: &str) -> Result<SchedulerJob, SchedulerError> {
        self.refresh(job_id).await
    }

    async fn get_job_accounting(&self, job_id: &str) -> Result<JobMetrics, SchedulerError> {
        Ok(self.refresh(job_id).await?.metrics)
    }

    async fn list_active_jobs(&self) -> Result<Vec<SchedulerJob>, SchedulerError> {
        let mut ids: Vec<String> = self
            .jobs
            .read()
            .values()
            .filter(|j| !j.state.is_finished())
            .map(|j| j.job_id.clone())
            .collect();
        ids.sort();
        let mut active = Vec::with_capacity(ids.len());
        for id in ids {
            let view = self.refresh(&id).await?;
            if !view.state.is_finished() {
                active.push(view);
            }
        }
        Ok(active)
    }

    fn register_lifecycle_callback(&self, callback: BackendCallback) {
        self.callbacks.write().push(callback);
    }
}

/// In-memory stand-in for a SLURM controller.
///
/// Accepts every script, allocates what its `#SBATCH` lines ask for, and
/// leaves jobs `PENDING` until told otherwise.
#[derive(Debug)]
pub struct InMemorySlurmClient {
    records: Mutex<HashMap<String, SlurmJobRecord>>,
    scripts: Mutex<HashMap<String, String>>,
    next_id: AtomicU64,
    reject_next: Mutex<Option<String>>,
}

impl Default for InMemorySlurmClient {
    fn default() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1000),
            reject_next: Mutex::new(None),
        }
    }
}

impl InMemorySlurmClient {
    /// Empty controller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `sbatch` with `message`.
    pub fn reject_next(&self, message: impl Into<String>) {
        *self.reject_next.lock() = Some(message.into());
    }

    /// Script submitted for a SLURM job id.
    pub fn script(&self, slurm_job_id: &str) -> Option<String> {
        self.scripts.lock().get(slurm_job_id).cloned()
    }

    /// Current record for a SLURM job id.
    pub fn record(&self, slurm_job_id: &str) -> Option<SlurmJobRecord> {
        self.records.lock().get(slurm_job_id).cloned()
    }

    /// Set the raw state (and optionally the exit string) of a job.
    pub fn set_state(&self, slurm_job_id: &str, state: &str, exit_code: Option<&str>) {
        self.update(slurm_job_id, |record| {
            record.state = state.to_string();
            if let Some(code) = exit_code {
                record.exit_code = Some(code.to_string());
            }
        });
    }

    /// Mutate a record in place; unknown ids are ignored.
    pub fn update(&self, slurm_job_id: &str, f: impl FnOnce(&mut SlurmJobRecord)) {
        if let Some(record) = self.records.lock().get_mut(slurm_job_id) {
            f(record);
        }
    }

    /// Forget a job, as `squeue` does once it ages out.
    pub fn forget(&self, slurm_job_id: &str) {
        self.records.lock().remove(slurm_job_id);
    }
}

fn directive<'a>(script: &'a str, flag: &str) -> Option<&'a str> {
    let prefix = format!("#SBATCH --{flag}=");
    script
        .lines()
        .find_map(|line| line.trim().strip_prefix(prefix.as_str()))
}

fn allocation_from_script(script: &str) -> (u64, u64, u64) {
    let nodes = directive(script, "nodes")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(1);
    let cpus = directive(script, "cpus-per-task")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(1);
    let mem = directive(script, "mem")
        .and_then(|v| v.trim_end_matches('G').parse::<u64>().ok())
        .unwrap_or(0);
    let gpus = directive(script, "gres")
        .and_then(|v| v.rsplit(':').next())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    (nodes * cpus, nodes * mem, nodes * gpus)
}

#[async_trait]
impl SlurmClient for InMemorySlurmClient {
    async fn submit_batch(&self, script: &str) -> Result<String, SchedulerError> {
        if let Some(message) = self.reject_next.lock().take() {
            return Err(SchedulerError::Backend(format!("sbatch: error: {message}")));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let (alloc_cpus, alloc_mem_gb, alloc_gpus) = allocation_from_script(script);
        self.records.lock().insert(
            id.clone(),
            SlurmJobRecord {
                job_id: id.clone(),
                state: "PENDING".to_string(),
                exit_code: None,
                elapsed_secs: 0,
                alloc_cpus,
                alloc_mem_gb,
                alloc_gpus,
                start_time_ms: None,
                end_time_ms: None,
            },
        );
        self.scripts.lock().insert(id.clone(), script.to_string());
        Ok(id)
    }

    async fn cancel(&self, slurm_job_id: &str) -> Result<(), SchedulerError> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(slurm_job_id)
            .ok_or_else(|| SchedulerError::Backend(format!("scancel: invalid job id {slurm_job_id}")))?;
        record.state = "CANCELLED by 0".to_string();
        record.end_time_ms.get_or_insert_with(now_ms);
        Ok(())
    }

    async fn query(&self, slurm_job_id: &str) -> Result<Option<SlurmJobRecord>, SchedulerError> {
        Ok(self.records.lock().get(slurm_job_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cluster::Cluster;
    use crate::core::job::{Job, ResourceRequest};

    #[test]
    fn maps_long_and_short_states() {
        assert_eq!(map_slurm_state("PENDING"), Some(LifecyclePhase::Queued));
        assert_eq!(map_slurm_state("CG"), Some(LifecyclePhase::Running));
        assert_eq!(map_slurm_state("suspended"), Some(LifecyclePhase::Suspended));
        assert_eq!(map_slurm_state("COMPLETED"), Some(LifecyclePhase::Completed));
        assert_eq!(map_slurm_state("OUT_OF_MEMORY"), Some(LifecyclePhase::Failed));
        assert_eq!(map_slurm_state("NODE_FAIL"), Some(LifecyclePhase::Failed));
        assert_eq!(map_slurm_state("CANCELLED by 1000"), Some(LifecyclePhase::Cancelled));
        assert_eq!(map_slurm_state("CANCELLED+"), Some(LifecyclePhase::Cancelled));
        assert_eq!(map_slurm_state("TIMEOUT"), Some(LifecyclePhase::Timeout));
        assert_eq!(map_slurm_state("DEADLINE"), Some(LifecyclePhase::Timeout));
        assert_eq!(map_slurm_state("WHATEVER"), None);
        assert_eq!(map_slurm_state(""), None);
    }

    #[test]
    fn parses_exit_codes() {
        assert_eq!(parse_exit_code("0:0"), Some(0));
        assert_eq!(parse_exit_code("1:0"), Some(1));
        assert_eq!(parse_exit_code("0:9"), Some(137));
        assert_eq!(parse_exit_code("2"), Some(2));
        assert_eq!(parse_exit_code("x:0"), None);
    }

    #[test]
    fn time_limits() {
        assert_eq!(format_time_limit(59), "00:00:59");
        assert_eq!(format_time_limit(3_661), "01:01:01");
        assert_eq!(format_time_limit(90_061), "1-01:01:01");
    }

    #[test]
    fn backward_states_do_not_advance() {
        assert!(!advances(LifecyclePhase::Running, LifecyclePhase::Queued));
        assert!(advances(LifecyclePhase::Running, LifecyclePhase::Suspended));
        assert!(advances(LifecyclePhase::Suspended, LifecyclePhase::Completed));
        assert!(!advances(LifecyclePhase::Cancelled, LifecyclePhase::Completed));
    }

    #[test]
    fn zero_memory_omits_the_mem_directive() {
        let request = SubmitRequest {
            job: Job::new("j", "cust", ResourceRequest::new(2, 0)),
            partition: "default".into(),
            cluster: Cluster::new("c1", "prov", "eu", 8, 16),
            decision_id: "d-1".into(),
        };
        let script = render_batch_script(&request, &SlurmBackendConfig::default());
        assert!(!script.contains("--mem"), "{script}");
        assert!(script.contains("#SBATCH --cpus-per-task=2\n"));
    }

    #[test]
    fn allocation_is_read_back_from_directives() {
        let script = "#!/bin/bash\n#SBATCH --nodes=2\n#SBATCH --cpus-per-task=8\n#SBATCH --mem=32G\n#SBATCH --gres=gpu:a100:4\n";
        assert_eq!(allocation_from_script(script), (16, 64, 8));
    }
}
