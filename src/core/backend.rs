//! Execution backend abstraction.
//!
//! A backend receives jobs that already hold debited capacity and reports
//! their progress in canonical [`LifecyclePhase`] terms. All operations are
//! keyed by the canonical job id; backend-native ids stay inside the adapter.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::cluster::Cluster;
use crate::core::job::Job;
use crate::core::lifecycle::LifecyclePhase;
use crate::core::usage::JobMetrics;
use crate::core::SchedulerError;
use crate::util::clock::now_ms;
use crate::util::signing::ReportSigner;

/// Closed set of backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    /// SLURM-style batch scheduler.
    Slurm,
    /// In-process mock.
    Mock,
}

impl BackendType {
    /// Stable lowercase label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Slurm => "slurm",
            Self::Mock => "mock",
        }
    }
}

/// Everything a backend needs to launch one job.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Job to launch, with its assigned cluster set.
    pub job: Job,
    /// Partition resolved from the queue options.
    pub partition: String,
    /// Cluster snapshot taken when capacity was debited.
    pub cluster: Cluster,
    /// Decision that placed the job.
    pub decision_id: String,
}

/// The adapter's view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerJob {
    /// Canonical job id.
    pub job_id: String,
    /// Id assigned by the backend.
    pub backend_job_id: String,
    /// Backend that runs the job.
    pub backend_type: BackendType,
    /// Cluster the job runs on.
    pub cluster_id: String,
    /// Canonical state as last observed.
    pub state: LifecyclePhase,
    /// Backend submission time, milliseconds since epoch.
    pub submit_time_ms: u128,
    /// Execution start, if started.
    pub start_time_ms: Option<u128>,
    /// Execution end, if finished.
    pub end_time_ms: Option<u128>,
    /// Process exit code, if finished.
    pub exit_code: Option<i32>,
    /// Latest accounting figures.
    pub metrics: JobMetrics,
}

/// Observer for backend-side state changes.
pub type BackendCallback = Arc<dyn Fn(&SchedulerJob) + Send + Sync>;

/// Attested job state handed to settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Canonical job id.
    pub job_id: String,
    /// Backend job id.
    pub backend_job_id: String,
    /// Provider attesting the report.
    pub provider_id: String,
    /// Cluster the job ran on.
    pub cluster_id: String,
    /// Canonical state.
    pub state: LifecyclePhase,
    /// Exit code, if finished.
    pub exit_code: Option<i32>,
    /// Backend submission time.
    pub submit_time_ms: u128,
    /// Execution start.
    pub start_time_ms: Option<u128>,
    /// Execution end.
    pub end_time_ms: Option<u128>,
    /// Accounting figures.
    pub metrics: JobMetrics,
    /// Report issue time.
    pub issued_at_ms: u128,
}

impl StatusReport {
    /// Report the current state of `job` on behalf of `provider_id`.
    pub fn from_job(job: &SchedulerJob, provider_id: &str, issued_at_ms: u128) -> Self {
        Self {
            job_id: job.job_id.clone(),
            backend_job_id: job.backend_job_id.clone(),
            provider_id: provider_id.to_string(),
            cluster_id: job.cluster_id.clone(),
            state: job.state,
            exit_code: job.exit_code,
            submit_time_ms: job.submit_time_ms,
            start_time_ms: job.start_time_ms,
            end_time_ms: job.end_time_ms,
            metrics: job.metrics,
            issued_at_ms,
        }
    }

    fn canonical_bytes(&self) -> Result<Vec<u8>, SchedulerError> {
        serde_json::to_vec(self)
            .map_err(|e| SchedulerError::Backend(format!("status report encoding failed: {e}")))
    }
}

/// A status report plus its HMAC-SHA256 signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedStatusReport {
    /// Attested state.
    pub report: StatusReport,
    /// Signing key identifier.
    pub key_id: String,
    /// Hex signature over the JSON encoding of `report`.
    pub signature: String,
}

impl SignedStatusReport {
    /// Sign a report.
    pub fn sign(report: StatusReport, signer: &ReportSigner) -> Result<Self, SchedulerError> {
        let signature = signer.sign(&report.canonical_bytes()?);
        Ok(Self {
            report,
            key_id: signer.key_id().to_string(),
            signature,
        })
    }

    /// Check key id and signature against `signer`.
    pub fn verify(&self, signer: &ReportSigner) -> bool {
        if self.key_id != signer.key_id() {
            return false;
        }
        self.report
            .canonical_bytes()
            .is_ok_and(|bytes| signer.verify(&bytes, &self.signature))
    }
}

/// Pluggable batch-scheduler adapter.
#[async_trait]
pub trait ExecutionBackend: Send + Sync + 'static {
    /// Which kind of backend this is.
    fn backend_type(&self) -> BackendType;

    /// Launch a job. Failure leaves nothing running on the backend.
    async fn submit_job(&self, request: SubmitRequest) -> Result<SchedulerJob, SchedulerError>;

    /// Cancel a job. Cancelling a finished job is a no-op.
    async fn cancel_job(&self, job_id: &str) -> Result<(), SchedulerError>;

    /// Current backend view of a job, refreshed from the backend.
    async fn get_job_status(&self, job_id: &str) -> Result<SchedulerJob, SchedulerError>;

    /// Accounting figures for a job so far.
    async fn get_job_accounting(&self, job_id: &str) -> Result<JobMetrics, SchedulerError>;

    /// Jobs the backend still considers live.
    async fn list_active_jobs(&self) -> Result<Vec<SchedulerJob>, SchedulerError>;

    /// Observe backend-side state changes.
    fn register_lifecycle_callback(&self, callback: BackendCallback);

    /// Signed attestation of a job's current state.
    async fn create_status_report(
        &self,
        job_id: &str,
        provider_id: &str,
        signer: &ReportSigner,
    ) -> Result<SignedStatusReport, SchedulerError> {
        let job = self.get_job_status(job_id).await?;
        SignedStatusReport::sign(StatusReport::from_job(&job, provider_id, now_ms()), signer)
    }
}
