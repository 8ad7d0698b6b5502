//! Cluster records and the registry of advertised capacity.
//!
//! Capacity figures are whatever the owning provider last advertised. The
//! registry only debits them when a job actually starts and credits them back
//! when the job finishes; a fresh advertisement overwrites both.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::job::ResourceRequest;
use crate::core::SchedulerError;

/// A provider-operated pool of compute capacity in one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Cluster identifier.
    pub id: String,
    /// Operating provider.
    pub provider_id: String,
    /// Region label.
    pub region: String,
    /// Free CPU cores.
    pub available_cpu: u64,
    /// Free memory in GB.
    pub available_memory_gb: u64,
    /// Free GPUs.
    pub available_gpus: u64,
    /// GPU models offered.
    #[serde(default)]
    pub gpu_types: Vec<String>,
    /// Externally supplied latency score in `[0, 1]`, higher is better.
    pub latency_score: f64,
    /// Externally supplied price score in `[0, 1]`, higher is better.
    pub price_score: f64,
}

impl Cluster {
    /// CPU/memory-only cluster with neutral scores.
    pub fn new(
        id: impl Into<String>,
        provider_id: impl Into<String>,
        region: impl Into<String>,
        available_cpu: u64,
        available_memory_gb: u64,
    ) -> Self {
        Self {
            id: id.into(),
            provider_id: provider_id.into(),
            region: region.into(),
            available_cpu,
            available_memory_gb,
            available_gpus: 0,
            gpu_types: Vec::new(),
            latency_score: 0.5,
            price_score: 0.5,
        }
    }

    /// Advertise GPUs.
    #[must_use]
    pub fn with_gpus<I, S>(mut self, count: u64, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.available_gpus = count;
        self.gpu_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Set latency and price scores.
    #[must_use]
    pub fn with_scores(mut self, latency_score: f64, price_score: f64) -> Self {
        self.latency_score = latency_score;
        self.price_score = price_score;
        self
    }

    /// Whether this cluster offers the given GPU model.
    pub fn supports_gpu_type(&self, gpu_type: &str) -> bool {
        self.gpu_types.iter().any(|t| t.eq_ignore_ascii_case(gpu_type))
    }

    /// First resource the request does not fit into, if any.
    pub fn shortfall(&self, req: &ResourceRequest) -> Option<CapacityShortfall> {
        if let Some(gpu_type) = req.required_gpu_type() {
            if !self.supports_gpu_type(gpu_type) {
                return Some(CapacityShortfall::GpuType {
                    requested: gpu_type.to_string(),
                });
            }
        }
        if req.total_cpu() > self.available_cpu {
            return Some(CapacityShortfall::Cpu {
                requested: req.total_cpu(),
                available: self.available_cpu,
            });
        }
        if req.total_memory_gb() > self.available_memory_gb {
            return Some(CapacityShortfall::Memory {
                requested: req.total_memory_gb(),
                available: self.available_memory_gb,
            });
        }
        if req.total_gpus() > self.available_gpus {
            return Some(CapacityShortfall::Gpu {
                requested: req.total_gpus(),
                available: self.available_gpus,
            });
        }
        None
    }

    fn validate(&self) -> Result<(), SchedulerError> {
        if self.id.trim().is_empty() {
            return Err(SchedulerError::InvalidCluster("cluster id must not be empty".into()));
        }
        for (name, value) in [("latency_score", self.latency_score), ("price_score", self.price_score)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SchedulerError::InvalidCluster(format!(
                    "cluster {}: {name} {value} outside [0, 1]",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

/// Why a request does not fit a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case", tag = "resource")]
pub enum CapacityShortfall {
    /// Cluster is no longer registered.
    #[error("cluster no longer registered")]
    ClusterMissing,
    /// Not enough CPU cores.
    #[error("insufficient cpu (requested {requested}, available {available})")]
    Cpu {
        /// Cores requested.
        requested: u64,
        /// Cores free.
        available: u64,
    },
    /// Not enough memory.
    #[error("insufficient memory (requested {requested} GB, available {available} GB)")]
    Memory {
        /// GB requested.
        requested: u64,
        /// GB free.
        available: u64,
    },
    /// Not enough GPUs.
    #[error("insufficient gpus (requested {requested}, available {available})")]
    Gpu {
        /// GPUs requested.
        requested: u64,
        /// GPUs free.
        available: u64,
    },
    /// GPU model not offered.
    #[error("gpu type {requested} not supported")]
    GpuType {
        /// Model requested.
        requested: String,
    },
}

/// Keyed store of clusters, ordered by id.
#[derive(Debug, Default)]
pub struct ClusterRegistry {
    clusters: RwLock<BTreeMap<String, Cluster>>,
}

impl ClusterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a cluster advertisement. Returns the previous record.
    pub fn register(&self, cluster: Cluster) -> Result<Option<Cluster>, SchedulerError> {
        cluster.validate()?;
        tracing::debug!(
            cluster = %cluster.id,
            cpu = cluster.available_cpu,
            memory_gb = cluster.available_memory_gb,
            gpus = cluster.available_gpus,
            "cluster advertised"
        );
        Ok(self.clusters.write().insert(cluster.id.clone(), cluster))
    }

    /// Replace the advertised free capacity of a registered cluster.
    pub fn update_capacity(
        &self,
        cluster_id: &str,
        available_cpu: u64,
        available_memory_gb: u64,
        available_gpus: u64,
    ) -> Result<(), SchedulerError> {
        let mut clusters = self.clusters.write();
        let cluster = clusters
            .get_mut(cluster_id)
            .ok_or_else(|| SchedulerError::ClusterNotFound(cluster_id.to_string()))?;
        cluster.available_cpu = available_cpu;
        cluster.available_memory_gb = available_memory_gb;
        cluster.available_gpus = available_gpus;
        Ok(())
    }

    /// Snapshot of one cluster.
    pub fn get(&self, cluster_id: &str) -> Option<Cluster> {
        self.clusters.read().get(cluster_id).cloned()
    }

    /// Snapshot of all clusters, sorted by id.
    pub fn list(&self) -> Vec<Cluster> {
        self.clusters.read().values().cloned().collect()
    }

    /// Forget a cluster.
    pub fn remove(&self, cluster_id: &str) -> Option<Cluster> {
        self.clusters.write().remove(cluster_id)
    }

    /// Number of registered clusters.
    pub fn len(&self) -> usize {
        self.clusters.read().len()
    }

    /// Whether no clusters are registered.
    pub fn is_empty(&self) -> bool {
        self.clusters.read().is_empty()
    }

    /// Re-check the request against current capacity and debit it if it fits.
    pub fn try_allocate(&self, cluster_id: &str, req: &ResourceRequest) -> Result<(), CapacityShortfall> {
        let mut clusters = self.clusters.write();
        let cluster = clusters
            .get_mut(cluster_id)
            .ok_or(CapacityShortfall::ClusterMissing)?;
        if let Some(shortfall) = cluster.shortfall(req) {
            return Err(shortfall);
        }
        cluster.available_cpu -= req.total_cpu();
        cluster.available_memory_gb -= req.total_memory_gb();
        cluster.available_gpus -= req.total_gpus();
        Ok(())
    }

    /// Credit back capacity debited by [`ClusterRegistry::try_allocate`].
    ///
    /// A cluster removed in the meantime is ignored.
    pub fn release(&self, cluster_id: &str, req: &ResourceRequest) {
        if let Some(cluster) = self.clusters.write().get_mut(cluster_id) {
            cluster.available_cpu = cluster.available_cpu.saturating_add(req.total_cpu());
            cluster.available_memory_gb = cluster
                .available_memory_gb
                .saturating_add(req.total_memory_gb());
            cluster.available_gpus = cluster.available_gpus.saturating_add(req.total_gpus());
        }
    }
}
