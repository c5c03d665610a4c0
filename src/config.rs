//! Configuration: agent descriptors and runtime policies
//!
//! Loaded once from TOML at start; immutable for the process lifetime.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HiveError, Result};
use crate::escalation::ExpiryPolicy;
use crate::ledger::BudgetLimits;
use crate::types::AgentId;

/// How an agent is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMethod {
    Live,
    Relay,
    /// Live with relay fallback
    Hybrid,
}

impl TransportMethod {
    pub fn has_live(self) -> bool {
        matches!(self, TransportMethod::Live | TransportMethod::Hybrid)
    }

    pub fn has_relay(self) -> bool {
        matches!(self, TransportMethod::Relay | TransportMethod::Hybrid)
    }
}

/// Static description of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub transport: TransportMethod,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Task type -> suitability in `0.0..=1.0`
    #[serde(default)]
    pub affinities: BTreeMap<String, f64>,
    #[serde(default = "default_concurrency")]
    pub max_concurrent: usize,
    pub daily_budget_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_budget_usd: Option<f64>,
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    1
}

impl AgentDescriptor {
    pub fn new(id: impl Into<AgentId>, transport: TransportMethod) -> Self {
        Self {
            id: id.into(),
            name: None,
            transport,
            enabled: true,
            affinities: BTreeMap::new(),
            max_concurrent: 1,
            daily_budget_usd: 10.0,
            monthly_budget_usd: None,
        }
    }

    pub fn with_affinity(mut self, task_type: impl Into<String>, score: f64) -> Self {
        self.affinities.insert(task_type.into(), score);
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_daily_budget(mut self, usd: f64) -> Self {
        self.daily_budget_usd = usd;
        self
    }

    pub fn with_monthly_budget(mut self, usd: f64) -> Self {
        self.monthly_budget_usd = Some(usd);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Affinity for a task type; unknown types score zero (incapable)
    pub fn affinity(&self, task_type: &str) -> f64 {
        self.affinities.get(task_type).copied().unwrap_or(0.0)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }

    pub fn budget_limits(&self) -> BudgetLimits {
        BudgetLimits {
            daily_usd: self.daily_budget_usd,
            monthly_usd: self.monthly_budget_usd,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Root of the `{agent}/inbox` / `{agent}/outbox` tree
    pub root: PathBuf,
    pub poll_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("hivemind-comms"),
            poll_interval_ms: 30_000,
        }
    }
}

impl RelayConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Live call retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Score lost per failed live call
    pub failure_penalty: f64,
    /// Score regained per successful live call
    pub success_recovery: f64,
    /// Below this the agent is degraded
    pub degraded_threshold: f64,
    pub cooldown_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_penalty: 0.25,
            success_recovery: 0.1,
            degraded_threshold: 0.5,
            cooldown_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Invocations allowed to wait beyond an agent's concurrency ceiling
    pub queue_depth: usize,
    /// Thread entries handed to an agent with each job
    pub context_window: usize,
    pub summary_chars: usize,
    pub default_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_job_budget_usd: Option<f64>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            queue_depth: 8,
            context_window: 10,
            summary_chars: 500,
            default_timeout_secs: 3600,
            default_job_budget_usd: None,
        }
    }
}

/// What happens to an `in_progress` job whose deadline passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlinePolicy {
    #[default]
    FailClosed,
    /// Leave the job running; a late response still completes it
    KeepWaiting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub deadline: DeadlinePolicy,
    pub escalation_expiry: ExpiryPolicy,
    pub escalation_timeout_secs: u64,
    /// How often the loop sweeps deadlines, escalations and degraded agents
    pub maintenance_interval_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            deadline: DeadlinePolicy::FailClosed,
            escalation_expiry: ExpiryPolicy::Cancel,
            escalation_timeout_secs: 86_400,
            maintenance_interval_ms: 5_000,
        }
    }
}

/// Whole hive configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HiveConfig {
    #[serde(default)]
    pub agents: Vec<AgentDescriptor>,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Where the binary writes a store snapshot on shutdown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,
}

impl HiveConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: HiveConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            HiveError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn agent(&self, id: &AgentId) -> Option<&AgentDescriptor> {
        self.agents.iter().find(|a| &a.id == id)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.id.as_str().is_empty() {
                return Err(HiveError::Config("agent with empty id".into()));
            }
            if !seen.insert(agent.id.clone()) {
                return Err(HiveError::Config(format!("duplicate agent id {}", agent.id)));
            }
            if agent.max_concurrent == 0 {
                return Err(HiveError::Config(format!(
                    "agent {} has a zero concurrency ceiling",
                    agent.id
                )));
            }
            if agent.daily_budget_usd < 0.0 || agent.monthly_budget_usd.is_some_and(|m| m < 0.0) {
                return Err(HiveError::Config(format!("agent {} has a negative budget", agent.id)));
            }
            for (task_type, score) in &agent.affinities {
                if !(0.0..=1.0).contains(score) {
                    return Err(HiveError::Config(format!(
                        "agent {} affinity for {task_type} out of range: {score}",
                        agent.id
                    )));
                }
            }
        }
        let health = &self.health;
        if !(0.0..=1.0).contains(&health.degraded_threshold) {
            return Err(HiveError::Config("health.degraded_threshold must be in 0..=1".into()));
        }
        Ok(())
    }
}
