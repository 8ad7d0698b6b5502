//! Scheduler and backend configuration structures.

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::scoring::ScoringWeights;
use crate::core::AppResult;

/// Prefix shared by every environment variable read by [`SchedulerConfig::from_env`].
pub const ENV_PREFIX: &str = "HPC_SCHED_";

/// Connection settings for a SLURM-style backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlurmBackendConfig {
    /// Controller endpoint handed to the transport.
    pub endpoint: String,
    /// Partition used when a job names the `default` queue.
    #[serde(default)]
    pub default_partition: Option<String>,
    /// Account charged for submitted jobs.
    #[serde(default)]
    pub account: Option<String>,
}

/// Execution backend selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BackendConfig {
    /// In-process mock backend.
    #[default]
    Mock,
    /// SLURM-style backend.
    Slurm(SlurmBackendConfig),
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum queued jobs before rejection.
    pub max_queue_depth: usize,
    /// Order equal-priority jobs by the customer's running-job count.
    pub fair_share: bool,
    /// Cluster scoring weights.
    pub scoring: ScoringWeights,
    /// Execution backend.
    pub backend: BackendConfig,
    /// Records kept by the in-memory routing log.
    pub routing_log_capacity: usize,
    /// Provider identity used in status reports.
    pub provider_id: String,
    /// Identifier of the report signing key.
    pub report_key_id: String,
    /// Shared key for status report signatures.
    pub report_signing_key: String,
    /// Seconds between backend reconciliation passes.
    pub reconcile_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: 1_000,
            fair_share: true,
            scoring: ScoringWeights::default(),
            backend: BackendConfig::Mock,
            routing_log_capacity: 10_000,
            provider_id: "provider".to_string(),
            report_key_id: "default".to_string(),
            report_signing_key: String::new(),
            reconcile_interval_secs: 30,
        }
    }
}

impl SlurmBackendConfig {
    /// Validate backend settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.endpoint.trim().is_empty() {
            return Err("slurm endpoint must not be empty".into());
        }
        Ok(())
    }
}

fn parse_value<T>(key: &str, raw: &str) -> AppResult<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("{ENV_PREFIX}{key} has invalid value `{raw}`"))
}

impl SchedulerConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.reconcile_interval_secs == 0 {
            return Err("reconcile_interval_secs must be greater than 0".into());
        }
        if self.provider_id.trim().is_empty() {
            return Err("provider_id must not be empty".into());
        }
        self.scoring
            .validate()
            .map_err(|e| format!("scoring invalid: {e}"))?;
        if let BackendConfig::Slurm(slurm) = &self.backend {
            slurm
                .validate()
                .map_err(|e| format!("backend invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `.env` if present, then read `HPC_SCHED_*` variables over defaults.
    ///
    /// `HPC_SCHED_CONFIG` may name a JSON file used as the base instead of the
    /// defaults.
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Keys are full variable names.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(&format!("{ENV_PREFIX}{key}")).filter(|v| !v.trim().is_empty());

        let mut cfg = match get("CONFIG") {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading scheduler config {path}"))?;
                serde_json::from_str(&raw).with_context(|| format!("parsing scheduler config {path}"))?
            }
            None => Self::default(),
        };

        if let Some(v) = get("MAX_QUEUE_DEPTH") {
            cfg.max_queue_depth = parse_value("MAX_QUEUE_DEPTH", &v)?;
        }
        if let Some(v) = get("FAIR_SHARE") {
            cfg.fair_share = parse_value("FAIR_SHARE", &v)?;
        }
        if let Some(v) = get("ROUTING_LOG_CAPACITY") {
            cfg.routing_log_capacity = parse_value("ROUTING_LOG_CAPACITY", &v)?;
        }
        if let Some(v) = get("RECONCILE_INTERVAL_SECS") {
            cfg.reconcile_interval_secs = parse_value("RECONCILE_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("PROVIDER_ID") {
            cfg.provider_id = v;
        }
        if let Some(v) = get("REPORT_KEY_ID") {
            cfg.report_key_id = v;
        }
        if let Some(v) = get("REPORT_SIGNING_KEY") {
            cfg.report_signing_key = v;
        }
        if let Some(v) = get("WEIGHT_RESOURCE_FIT") {
            cfg.scoring.resource_fit = parse_value("WEIGHT_RESOURCE_FIT", &v)?;
        }
        if let Some(v) = get("WEIGHT_LATENCY") {
            cfg.scoring.latency = parse_value("WEIGHT_LATENCY", &v)?;
        }
        if let Some(v) = get("WEIGHT_PRICE") {
            cfg.scoring.price = parse_value("WEIGHT_PRICE", &v)?;
        }
        if let Some(v) = get("WEIGHT_REGION") {
            cfg.scoring.region = parse_value("WEIGHT_REGION", &v)?;
        }

        match get("BACKEND").map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None => {}
            Some("mock") => cfg.backend = BackendConfig::Mock,
            Some("slurm") => {
                let mut slurm = match cfg.backend {
                    BackendConfig::Slurm(existing) => existing,
                    BackendConfig::Mock => SlurmBackendConfig::default(),
                };
                if let Some(v) = get("SLURM_ENDPOINT") {
                    slurm.endpoint = v;
                }
                if let Some(v) = get("SLURM_PARTITION") {
                    slurm.default_partition = Some(v);
                }
                if let Some(v) = get("SLURM_ACCOUNT") {
                    slurm.account = Some(v);
                }
                cfg.backend = BackendConfig::Slurm(slurm);
            }
            Some(other) => anyhow::bail!("{ENV_PREFIX}BACKEND must be `mock` or `slurm`, got `{other}`"),
        }

        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }

    /// Log a redacted summary at startup.
    pub fn log_summary(&self) {
        let backend = match &self.backend {
            BackendConfig::Mock => "mock".to_string(),
            BackendConfig::Slurm(s) => format!("slurm ({})", s.endpoint),
        };
        tracing::info!(
            max_queue_depth = self.max_queue_depth,
            fair_share = self.fair_share,
            backend = %backend,
            provider = %self.provider_id,
            report_key_id = %self.report_key_id,
            signing_key_set = !self.report_signing_key.is_empty(),
            reconcile_interval_secs = self.reconcile_interval_secs,
            "scheduler config loaded"
        );
    }
}
