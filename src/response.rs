//! Responses, agent replies and artifacts

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{AgentId, ArtifactId, JobId, ResponseId, Usage};

/// Outcome reported by an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Completed,
    Failed,
    Escalated,
}

/// Which transport produced a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Via {
    Live,
    Relay,
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Via::Live => f.write_str("live"),
            Via::Relay => f.write_str("relay"),
        }
    }
}

/// Measured cost and performance of one call
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResponseMetrics {
    #[serde(flatten)]
    pub usage: Usage,
    #[serde(default)]
    pub latency_ms: u64,
    /// Concrete model that served the call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Structured follow-up request attached to a reply
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FollowUp {
    #[serde(default)]
    pub needs_human: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_agent: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
}

/// Artifact content carried inline in a reply, before it is stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDraft {
    pub name: String,
    pub content: String,
}

/// What a transport hands back for a job attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    pub status: ResponseStatus,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactDraft>,
    #[serde(default)]
    pub metrics: ResponseMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<FollowUp>,
}

fn default_format() -> String {
    "markdown".to_string()
}

impl AgentReply {
    pub fn completed(content: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Completed,
            content: content.into(),
            format: default_format(),
            artifacts: Vec::new(),
            metrics: ResponseMetrics::default(),
            follow_up: None,
        }
    }

    pub fn failed(content: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Failed,
            ..Self::completed(content)
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.metrics.usage = usage;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.metrics.model = Some(model.into());
        self
    }

    pub fn with_follow_up(mut self, follow_up: FollowUp) -> Self {
        self.follow_up = Some(follow_up);
        self
    }

    pub fn with_artifact(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.artifacts.push(ArtifactDraft {
            name: name.into(),
            content: content.into(),
        });
        self
    }

    /// Schema checks beyond what serde enforces
    pub fn validate(&self) -> std::result::Result<(), String> {
        let cost = self.metrics.usage.cost_usd;
        if !cost.is_finite() || cost < 0.0 {
            return Err(format!("invalid cost {cost}"));
        }
        if let Some(follow_up) = &self.follow_up {
            if follow_up.needs_agent.is_some()
                && follow_up.request.as_deref().map_or(true, |r| r.trim().is_empty())
            {
                return Err("follow_up.needs_agent without a request".to_string());
            }
        }
        if self.artifacts.iter().any(|a| a.name.trim().is_empty()) {
            return Err("artifact without a name".to_string());
        }
        Ok(())
    }
}

/// Immutable stored result of one job attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: ResponseId,
    pub job_id: JobId,
    pub attempt: u32,
    pub agent: AgentId,
    pub via: Via,
    pub status: ResponseStatus,
    pub content: String,
    pub format: String,
    #[serde(default)]
    pub artifacts: Vec<ArtifactId>,
    pub metrics: ResponseMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<FollowUp>,
    /// False for late or post-cancel responses kept only for audit
    pub accepted: bool,
    pub created_at: DateTime<Utc>,
}

/// Content-addressed output blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub name: String,
    /// Job that first produced this content
    pub job_id: JobId,
    pub content: String,
    pub size: usize,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(job_id: JobId, name: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: Self::checksum(&content),
            name: name.into(),
            job_id,
            size: content.len(),
            content,
            created_at: Utc::now(),
        }
    }

    /// Hex SHA-256 of the content
    pub fn checksum(content: &str) -> ArtifactId {
        let digest = Sha256::digest(content.as_bytes());
        ArtifactId::from_checksum(hex::encode(digest))
    }
}
