//! Assemble a scheduler from configuration.

use std::sync::Arc;

use crate::config::{BackendConfig, SchedulerConfig};
use crate::core::backend::ExecutionBackend;
use crate::core::routing::{CompositeRoutingSink, InMemoryRoutingLog, RoutingSink, TracingRoutingSink};
use crate::core::usage::UsageSink;
use crate::core::{ClusterRegistry, Scheduler, SchedulerError};
use crate::infra::backend::{AnyBackend, MockBackend, SlurmBackend, SlurmClient};
use crate::infra::queue::InMemoryJobQueue;
use crate::util::signing::ReportSigner;

/// Build the configured backend.
///
/// A SLURM backend needs a transport; the crate does not ship a network client.
pub fn build_backend(
    cfg: &BackendConfig,
    slurm_client: Option<Arc<dyn SlurmClient>>,
) -> Result<AnyBackend, SchedulerError> {
    match cfg {
        BackendConfig::Mock => Ok(AnyBackend::Mock(MockBackend::new())),
        BackendConfig::Slurm(slurm) => {
            slurm.validate().map_err(SchedulerError::Config)?;
            let client = slurm_client.ok_or_else(|| {
                SchedulerError::Config(format!(
                    "slurm backend at {} configured without a client",
                    slurm.endpoint
                ))
            })?;
            Ok(AnyBackend::Slurm(SlurmBackend::new(client, slurm.clone())))
        }
    }
}

/// Builder for a [`Scheduler`] over the closed backend set.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    registry: Option<Arc<ClusterRegistry>>,
    slurm_client: Option<Arc<dyn SlurmClient>>,
    routing_sink: Option<Box<dyn RoutingSink>>,
    usage_sink: Option<Box<dyn UsageSink>>,
}

impl std::fmt::Debug for SchedulerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerBuilder")
            .field("config", &self.config.max_queue_depth)
            .field("shared_registry", &self.registry.is_some())
            .finish_non_exhaustive()
    }
}

impl SchedulerBuilder {
    /// Start from a configuration.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            registry: None,
            slurm_client: None,
            routing_sink: None,
            usage_sink: None,
        }
    }

    /// Share an existing cluster registry.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ClusterRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Transport for a SLURM backend.
    #[must_use]
    pub fn with_slurm_client(mut self, client: Arc<dyn SlurmClient>) -> Self {
        self.slurm_client = Some(client);
        self
    }

    /// Replace the default routing sink (bounded in-memory log plus tracing).
    #[must_use]
    pub fn with_routing_sink(mut self, sink: Box<dyn RoutingSink>) -> Self {
        self.routing_sink = Some(sink);
        self
    }

    /// Attach the billing outbox.
    #[must_use]
    pub fn with_usage_sink(mut self, sink: Box<dyn UsageSink>) -> Self {
        self.usage_sink = Some(sink);
        self
    }

    /// Validate the configuration and assemble the scheduler.
    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        let cfg = self.config;
        cfg.validate().map_err(SchedulerError::Config)?;

        let backend = build_backend(&cfg.backend, self.slurm_client)?;
        let registry = self.registry.unwrap_or_default();
        let queue = InMemoryJobQueue::new(cfg.max_queue_depth, cfg.fair_share);
        let routing = self.routing_sink.unwrap_or_else(|| {
            Box::new(
                CompositeRoutingSink::new()
                    .with(Box::new(InMemoryRoutingLog::new(cfg.routing_log_capacity)))
                    .with(Box::new(TracingRoutingSink)),
            )
        });

        let mut scheduler = Scheduler::new(Box::new(queue), registry, backend)
            .with_weights(cfg.scoring.clone())
            .with_routing_sink(routing);
        if let Some(sink) = self.usage_sink {
            scheduler = scheduler.with_usage_sink(sink);
        }
        if cfg.report_signing_key.is_empty() {
            tracing::warn!("no report signing key configured; status reports disabled");
        } else {
            scheduler = scheduler.with_report_signer(
                cfg.provider_id.clone(),
                ReportSigner::new(cfg.report_key_id.clone(), cfg.report_signing_key.as_bytes())?,
            );
        }
        tracing::info!(
            backend = scheduler.backend().backend_type().as_str(),
            max_queue_depth = cfg.max_queue_depth,
            fair_share = cfg.fair_share,
            "scheduler built"
        );
        Ok(scheduler)
    }
}
