//! Execution backends.

pub mod mock;
pub mod slurm;

use async_trait::async_trait;

pub use mock::MockBackend;
pub use slurm::{InMemorySlurmClient, SlurmBackend, SlurmClient, SlurmJobRecord};

use crate::core::backend::{
    BackendCallback, BackendType, ExecutionBackend, SchedulerJob, SignedStatusReport, SubmitRequest,
};
use crate::core::usage::JobMetrics;
use crate::core::SchedulerError;
use crate::util::signing::ReportSigner;

/// The closed set of backends a scheduler can be built with.
#[derive(Debug)]
pub enum AnyBackend {
    /// SLURM-style batch scheduler.
    Slurm(SlurmBackend),
    /// In-process mock.
    Mock(MockBackend),
}

impl From<SlurmBackend> for AnyBackend {
    fn from(backend: SlurmBackend) -> Self {
        Self::Slurm(backend)
    }
}

impl From<MockBackend> for AnyBackend {
    fn from(backend: MockBackend) -> Self {
        Self::Mock(backend)
    }
}

macro_rules! delegate {
    ($self:ident, $b:ident => $call:expr) => {
        match $self {
            AnyBackend::Slurm($b) => $call,
            AnyBackend::Mock($b) => $call,
        }
    };
}

#[async_trait]
impl ExecutionBackend for AnyBackend {
    fn backend_type(&self) -> BackendType {
        delegate!(self, b => b.backend_type())
    }

    async fn submit_job(&self, request: SubmitRequest) -> Result<SchedulerJob, SchedulerError> {
        delegate!(self, b => b.submit_job(request).await)
    }

    async fn cancel_job(&self, job_id: &str) -> Result<(), SchedulerError> {
        delegate!(self, b => b.cancel_job(job_id).await)
    }

    async fn get_job_status(&self, job_id: &str) -> Result<SchedulerJob, SchedulerError> {
        delegate!(self, b => b.get_job_status(job_id).await)
    }

    async fn get_job_accounting(&self, job_id: &str) -> Result<JobMetrics, SchedulerError> {
        delegate!(self, b => b.get_job_accounting(job_id).await)
    }

    async fn list_active_jobs(&self) -> Result<Vec<SchedulerJob>, SchedulerError> {
        delegate!(self, b => b.list_active_jobs().await)
    }

    fn register_lifecycle_callback(&self, callback: BackendCallback) {
        delegate!(self, b => b.register_lifecycle_callback(callback));
    }

    async fn create_status_report(
        &self,
        job_id: &str,
        provider_id: &str,
        signer: &ReportSigner,
    ) -> Result<SignedStatusReport, SchedulerError> {
        delegate!(self, b => b.create_status_report(job_id, provider_id, signer).await)
    }
}
