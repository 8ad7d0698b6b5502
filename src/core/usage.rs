//! Usage metrics: backend accounting figures and the snapshots billed from them.

use serde::{Deserialize, Serialize};

use crate::core::job::ResourceRequest;
use crate::core::SchedulerError;

/// Resource a usage record measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageResource {
    /// CPU time across all allocated cores.
    CpuCoreSeconds,
    /// Allocated memory integrated over time.
    MemoryGbSeconds,
    /// GPU time across all allocated GPUs.
    GpuSeconds,
    /// Elapsed wall-clock time.
    WallClockSeconds,
}

impl UsageResource {
    /// Billing unit label.
    pub const fn unit(self) -> &'static str {
        match self {
            Self::CpuCoreSeconds => "core-seconds",
            Self::MemoryGbSeconds => "gb-seconds",
            Self::GpuSeconds => "gpu-seconds",
            Self::WallClockSeconds => "seconds",
        }
    }
}

/// Accounting figures for one job, as reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetrics {
    /// Elapsed wall-clock seconds.
    pub wall_clock_seconds: u64,
    /// CPU core-seconds.
    pub cpu_core_seconds: u64,
    /// Memory GB-seconds.
    pub memory_gb_seconds: u64,
    /// GPU-seconds.
    pub gpu_seconds: u64,
}

impl JobMetrics {
    /// Allocation-based estimate: the full request held for `elapsed_secs`.
    pub fn estimate(req: &ResourceRequest, elapsed_secs: u64) -> Self {
        Self {
            wall_clock_seconds: elapsed_secs,
            cpu_core_seconds: req.total_cpu().saturating_mul(elapsed_secs),
            memory_gb_seconds: req.total_memory_gb().saturating_mul(elapsed_secs),
            gpu_seconds: req.total_gpus().saturating_mul(elapsed_secs),
        }
    }

    /// Field-wise sum, saturating.
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self {
            wall_clock_seconds: self.wall_clock_seconds.saturating_add(other.wall_clock_seconds),
            cpu_core_seconds: self.cpu_core_seconds.saturating_add(other.cpu_core_seconds),
            memory_gb_seconds: self.memory_gb_seconds.saturating_add(other.memory_gb_seconds),
            gpu_seconds: self.gpu_seconds.saturating_add(other.gpu_seconds),
        }
    }

    /// One record per resource over the given window.
    pub fn to_records(self, window_start_ms: u128, window_end_ms: u128) -> Vec<UsageRecord> {
        [
            (UsageResource::CpuCoreSeconds, self.cpu_core_seconds),
            (UsageResource::MemoryGbSeconds, self.memory_gb_seconds),
            (UsageResource::GpuSeconds, self.gpu_seconds),
            (UsageResource::WallClockSeconds, self.wall_clock_seconds),
        ]
        .into_iter()
        .map(|(resource, quantity)| UsageRecord {
            resource,
            quantity,
            unit: resource.unit().to_string(),
            window_start_ms,
            window_end_ms,
        })
        .collect()
    }
}

/// A resource quantity over a time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Measured resource.
    pub resource: UsageResource,
    /// Amount in `unit`.
    pub quantity: u64,
    /// Unit label.
    pub unit: String,
    /// Window start, milliseconds since epoch.
    pub window_start_ms: u128,
    /// Window end, milliseconds since epoch.
    pub window_end_ms: u128,
}

/// Periodic snapshots are informational; the final one is what gets invoiced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    /// Taken while the job runs.
    Periodic,
    /// Taken on the terminal transition.
    Final,
}

/// Usage records attached to a job at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Job measured.
    pub job_id: String,
    /// Customer billed.
    pub customer: String,
    /// Cluster the job ran on, if it was placed.
    pub cluster_id: Option<String>,
    /// Periodic or final.
    pub kind: SnapshotKind,
    /// Snapshot time, milliseconds since epoch.
    pub taken_at_ms: u128,
    /// Measured quantities.
    pub records: Vec<UsageRecord>,
}

impl UsageSnapshot {
    /// Quantity recorded for one resource, if present.
    pub fn quantity(&self, resource: UsageResource) -> Option<u64> {
        self.records
            .iter()
            .find(|r| r.resource == resource)
            .map(|r| r.quantity)
    }
}

/// Outbound channel to the billing pipeline.
pub trait UsageSink: Send {
    /// Hand a final usage snapshot to billing.
    fn emit(&mut self, snapshot: UsageSnapshot) -> Result<(), SchedulerError>;
}

/// Sink that drops everything; used when no billing pipeline is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardUsageSink;

impl UsageSink for DiscardUsageSink {
    fn emit(&mut self, snapshot: UsageSnapshot) -> Result<(), SchedulerError> {
        tracing::trace!(job_id = %snapshot.job_id, "usage snapshot discarded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_scales_request_by_elapsed_time() {
        let req = ResourceRequest::new(4, 8).with_gpus(1, "a100").with_nodes(2);
        let m = JobMetrics::estimate(&req, 10);
        assert_eq!(m.cpu_core_seconds, 80);
        assert_eq!(m.memory_gb_seconds, 160);
        assert_eq!(m.gpu_seconds, 20);
        assert_eq!(m.wall_clock_seconds, 10);
    }

    #[test]
    fn reported_figures_extend_by_estimate() {
        let reported = JobMetrics {
            wall_clock_seconds: 60,
            cpu_core_seconds: 200,
            memory_gb_seconds: 0,
            gpu_seconds: u64::MAX,
        };
        let extended = reported.saturating_add(JobMetrics::estimate(&ResourceRequest::new(8, 2), 5));
        assert_eq!(extended.wall_clock_seconds, 65);
        assert_eq!(extended.cpu_core_seconds, 240);
        assert_eq!(extended.memory_gb_seconds, 10);
        assert_eq!(extended.gpu_seconds, u64::MAX);
    }

    #[test]
    fn records_carry_units_and_window() {
        let records = JobMetrics {
            wall_clock_seconds: 1,
            cpu_core_seconds: 2,
            memory_gb_seconds: 3,
            gpu_seconds: 4,
        }
        .to_records(10, 20);
        assert_eq!(records.len(), 4);
        let gpu = records
            .iter()
            .find(|r| r.resource == UsageResource::GpuSeconds)
            .unwrap();
        assert_eq!((gpu.quantity, gpu.unit.as_str()), (4, "gpu-seconds"));
        assert!(records.iter().all(|r| r.window_start_ms == 10 && r.window_end_ms == 20));
    }
}
