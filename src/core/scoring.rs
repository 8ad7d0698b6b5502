//! Cluster eligibility and scoring.
//!
//! Every cluster is checked against the job's hard constraints (region, GPU
//! model, free capacity). Survivors get a weighted score:
//!
//! ```text
//! score = w_fit * resource_fit + w_lat * latency + w_price * price + w_region * region
//! resource_fit = clamp(1 - avg(cpu_ratio, mem_ratio, gpu_ratio), 0, 1)
//! ```
//!
//! Candidates are evaluated in cluster-id order and the first strictly
//! highest score wins, so ties always resolve to the lowest id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::cluster::{CapacityShortfall, Cluster};
use crate::core::job::{Job, ResourceRequest};

/// Weights for the scoring components and the region score values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Weight of the resource-fit component.
    pub resource_fit: f64,
    /// Weight of the latency score.
    pub latency: f64,
    /// Weight of the price score.
    pub price: f64,
    /// Weight of the region score.
    pub region: f64,
    /// Region score when the cluster is in the preferred region (or none is set).
    pub region_match: f64,
    /// Region score otherwise.
    pub region_mismatch: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            resource_fit: 0.4,
            latency: 0.3,
            price: 0.2,
            region: 0.1,
            region_match: 1.0,
            region_mismatch: 0.2,
        }
    }
}

impl ScoringWeights {
    /// Validate that all values are finite and non-negative.
    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            ("resource_fit", self.resource_fit),
            ("latency", self.latency),
            ("price", self.price),
            ("region", self.region),
            ("region_match", self.region_match),
            ("region_mismatch", self.region_mismatch),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("scoring weight `{name}` must be a non-negative number"));
            }
        }
        if self.resource_fit + self.latency + self.price + self.region <= 0.0 {
            return Err("at least one scoring weight must be positive".into());
        }
        Ok(())
    }
}

/// Score breakdown for one eligible cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    /// Cluster identifier.
    pub cluster_id: String,
    /// Provider operating the cluster.
    pub provider_id: String,
    /// Weighted total.
    pub total: f64,
    /// Resource-fit component.
    pub resource_fit: f64,
    /// Latency component (as advertised).
    pub latency: f64,
    /// Price component (as advertised).
    pub price: f64,
    /// Region component.
    pub region: f64,
}

/// Why a cluster was filtered out before scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum Ineligibility {
    /// Region is outside the job's allowed set.
    RegionNotAllowed {
        /// Cluster region.
        region: String,
    },
    /// Capacity or GPU model mismatch.
    Capacity {
        /// What does not fit.
        shortfall: CapacityShortfall,
    },
}

impl std::fmt::Display for Ineligibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RegionNotAllowed { region } => write!(f, "region {region} not allowed"),
            Self::Capacity { shortfall } => write!(f, "{shortfall}"),
        }
    }
}

/// Hard-constraint check of one cluster.
pub fn check_eligibility(job: &Job, cluster: &Cluster) -> Result<(), Ineligibility> {
    if !job.region_allowed(&cluster.region) {
        return Err(Ineligibility::RegionNotAllowed {
            region: cluster.region.clone(),
        });
    }
    match cluster.shortfall(&job.resources) {
        Some(shortfall) => Err(Ineligibility::Capacity { shortfall }),
        None => Ok(()),
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(requested: u64, available: u64) -> f64 {
    if available == 0 {
        return if requested == 0 { 0.0 } else { 1.0 };
    }
    requested as f64 / available as f64
}

/// `clamp(1 - avg(cpu, mem, gpu ratios), 0, 1)`.
pub fn resource_fit(req: &ResourceRequest, cluster: &Cluster) -> f64 {
    let cpu = ratio(req.total_cpu(), cluster.available_cpu);
    let mem = ratio(req.total_memory_gb(), cluster.available_memory_gb);
    let gpu = ratio(req.total_gpus(), cluster.available_gpus);
    (1.0 - (cpu + mem + gpu) / 3.0).clamp(0.0, 1.0)
}

/// Region component for a cluster.
pub fn region_score(job: &Job, cluster: &Cluster, weights: &ScoringWeights) -> f64 {
    if job.prefers_region(&cluster.region) {
        weights.region_match
    } else {
        weights.region_mismatch
    }
}

/// Score a cluster already known to be eligible.
pub fn score_cluster(job: &Job, cluster: &Cluster, weights: &ScoringWeights) -> CandidateScore {
    let fit = resource_fit(&job.resources, cluster);
    let region = region_score(job, cluster, weights);
    let total = weights.resource_fit * fit
        + weights.latency * cluster.latency_score
        + weights.price * cluster.price_score
        + weights.region * region;
    CandidateScore {
        cluster_id: cluster.id.clone(),
        provider_id: cluster.provider_id.clone(),
        total,
        resource_fit: fit,
        latency: cluster.latency_score,
        price: cluster.price_score,
        region,
    }
}

/// Result of evaluating every registered cluster for one job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// Eligible candidates, in cluster-id order.
    pub candidates: Vec<CandidateScore>,
    /// Filtered clusters and why.
    pub rejected: BTreeMap<String, Ineligibility>,
}

impl Evaluation {
    /// Highest-scoring candidate; the lowest cluster id wins a tie.
    pub fn best(&self) -> Option<&CandidateScore> {
        let mut best: Option<&CandidateScore> = None;
        for candidate in &self.candidates {
            if best.is_none_or(|b| candidate.total > b.total) {
                best = Some(candidate);
            }
        }
        best
    }

    /// Total score keyed by cluster id.
    pub fn score_map(&self) -> BTreeMap<String, f64> {
        self.candidates
            .iter()
            .map(|c| (c.cluster_id.clone(), c.total))
            .collect()
    }

    /// Human-readable account of why nothing was eligible.
    pub fn rejection_summary(&self) -> String {
        if self.rejected.is_empty() {
            return "no clusters registered".to_string();
        }
        let details: Vec<String> = self
            .rejected
            .iter()
            .map(|(id, why)| format!("{id}: {why}"))
            .collect();
        format!(
            "{} cluster(s) considered; {}",
            self.rejected.len(),
            details.join("; ")
        )
    }
}

/// Filter and score `clusters` for `job`.
///
/// The input order does not matter; clusters are sorted by id first.
pub fn evaluate(job: &Job, clusters: &[Cluster], weights: &ScoringWeights) -> Evaluation {
    let mut ordered: Vec<&Cluster> = clusters.iter().collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));

    let mut evaluation = Evaluation::default();
    for cluster in ordered {
        match check_eligibility(job, cluster) {
            Ok(()) => evaluation.candidates.push(score_cluster(job, cluster, weights)),
            Err(why) => {
                evaluation.rejected.insert(cluster.id.clone(), why);
            }
        }
    }
    evaluation
}
