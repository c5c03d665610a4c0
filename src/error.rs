//! Hive error types

use thiserror::Error;

use crate::job::JobStatus;
use crate::types::{AgentId, EscalationId, JobId};

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, HiveError>;

/// Errors that can occur in the orchestration core
#[derive(Debug, Error)]
pub enum HiveError {
    /// Live call failed (retryable, triggers relay fallback on hybrid agents)
    #[error("Transport error from {agent}: {message}")]
    Transport { agent: AgentId, message: String },

    /// Deadline passed while waiting on a relay response
    #[error("relay timeout")]
    RelayTimeout,

    /// No agent survived routing
    #[error("no eligible agent")]
    NoEligibleAgent,

    /// Agents matched but none had budget left for the job
    #[error("budget exceeded: job needs ${needed:.4}, best remaining ${remaining:.4}")]
    BudgetExceeded { needed: f64, remaining: f64 },

    /// Agent reply failed validation
    #[error("Malformed response from {agent}: {reason}")]
    MalformedResponse { agent: AgentId, reason: String },

    /// Secondary request block could not be parsed
    #[error("Malformed request block: {0}")]
    MalformedRequest(String),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// Escalation not found
    #[error("Escalation not found: {0}")]
    EscalationNotFound(EscalationId),

    /// Escalation was already resolved, expired or cancelled
    #[error("Escalation already closed: {0}")]
    EscalationClosed(EscalationId),

    /// Agent not configured
    #[error("Agent not found: {0}")]
    AgentNotFound(AgentId),

    /// Rejected state machine move
    #[error("Invalid transition for job {job}: {from} -> {to}")]
    InvalidTransition {
        job: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// Job still waiting on human approval
    #[error("Job {0} requires approval before dispatch")]
    ApprovalRequired(JobId),

    /// Relay collaborator failure (not a missing file)
    #[error("Relay error: {0}")]
    Relay(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Channel error
    #[error("Channel error: {0}")]
    ChannelClosed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl HiveError {
    /// Whether a live call failing with this error may be retried.
    ///
    /// Malformed replies count as transport failures for retry purposes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HiveError::Transport { .. } | HiveError::MalformedResponse { .. }
        )
    }

    /// Admission failures are terminal and never retried.
    pub fn is_admission_failure(&self) -> bool {
        matches!(
            self,
            HiveError::NoEligibleAgent | HiveError::BudgetExceeded { .. }
        )
    }

    /// Human-readable reason recorded as a failed job's `status_detail`.
    pub fn status_detail(&self) -> String {
        match self {
            HiveError::RelayTimeout => "relay timeout".to_string(),
            HiveError::NoEligibleAgent => "no eligible agent".to_string(),
            HiveError::BudgetExceeded { .. } => format!("budget exceeded ({self})"),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let transport = HiveError::Transport {
            agent: AgentId::from("a"),
            message: "connection reset".into(),
        };
        let malformed = HiveError::MalformedResponse {
            agent: AgentId::from("a"),
            reason: "missing status".into(),
        };
        assert!(transport.is_retryable());
        assert!(malformed.is_retryable());
        assert!(!HiveError::RelayTimeout.is_retryable());
        assert!(!HiveError::NoEligibleAgent.is_retryable());
    }

    #[test]
    fn test_status_detail() {
        assert_eq!(HiveError::RelayTimeout.status_detail(), "relay timeout");
        assert_eq!(HiveError::NoEligibleAgent.status_detail(), "no eligible agent");
        let budget = HiveError::BudgetExceeded { needed: 5.0, remaining: 2.0 };
        assert!(budget.is_admission_failure());
        assert!(budget.status_detail().starts_with("budget exceeded"));
    }
}
