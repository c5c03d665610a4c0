//! Jobs and their lifecycle state machine
//!
//! ```text
//! pending ──▶ assigned ──▶ in_progress ──▶ completed
//!    │           │             │  ▲    ├──▶ failed
//!    │           │             │  │    └──▶ cancelled
//!    │           │             ▼  │
//!    │           │          escalated ──▶ completed | failed | cancelled
//!    └──▶ failed └──▶ failed
//!    └──▶ cancelled (from any non-terminal state)
//! ```

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AgentId, JobId, Priority, ThreadId};

/// Protocol version stamped on every job
pub const PROTOCOL_VERSION: &str = "1.0";

/// Timeout used when neither the job nor the configuration sets one
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Escalated,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Pending,
        JobStatus::Assigned,
        JobStatus::InProgress,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Escalated,
        JobStatus::Cancelled,
    ];

    /// Terminal states have no outgoing transitions
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the state machine allows `self -> next`
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Assigned | Failed | Cancelled) => true,
            (Assigned, InProgress | Failed | Cancelled) => true,
            (InProgress, Completed | Failed | Escalated | Cancelled) => true,
            (Escalated, InProgress | Completed | Failed | Cancelled) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Assigned => "assigned",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Escalated => "escalated",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: JobStatus,
    pub to: JobStatus,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Check that a recorded transition sequence is a valid path starting at `pending`
pub fn is_valid_path(transitions: &[Transition]) -> bool {
    let mut current = JobStatus::Pending;
    for t in transitions {
        if t.from != current || !current.can_transition_to(t.to) {
            return false;
        }
        current = t.to;
    }
    true
}

/// What the job asks for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTask {
    /// Open string used for affinity lookup
    pub task_type: String,
    pub description: String,
    #[serde(default)]
    pub inputs: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
}

/// Resource ceilings for a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    /// Monetary ceiling in USD; admission requires this much remaining daily budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for JobConstraints {
    fn default() -> Self {
        Self {
            max_tokens: None,
            max_cost_usd: None,
            timeout_secs: None,
        }
    }
}

/// A unit of requested work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub protocol_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,

    /// Who asked: `"orchestrator"`, `"human"`, or an agent id
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_agent: Option<AgentId>,
    pub thread_id: ThreadId,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,

    pub task: JobTask,
    #[serde(default)]
    pub constraints: JobConstraints,

    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_job: Option<JobId>,

    /// Incremented each time an escalated job resumes
    #[serde(default = "first_attempt")]
    pub attempt: u32,
    /// Relay instruction already written for the current attempt
    #[serde(default)]
    pub relay_dispatched: bool,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

fn first_attempt() -> u32 {
    1
}

impl Job {
    /// New pending job on a fresh thread
    pub fn new(task_type: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            created_at: now,
            updated_at: now,
            deadline: None,
            origin: "orchestrator".to_string(),
            to_agent: None,
            thread_id: ThreadId::new(),
            priority: Priority::Normal,
            requires_approval: false,
            approved_at: None,
            task: JobTask {
                task_type: task_type.into(),
                description: description.into(),
                inputs: serde_json::Value::Null,
                expected_output: None,
            },
            constraints: JobConstraints::default(),
            status: JobStatus::Pending,
            status_detail: None,
            parent_job: None,
            attempt: 1,
            relay_dispatched: false,
            cancel_requested: false,
            started_at: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_to_agent(mut self, agent: impl Into<AgentId>) -> Self {
        self.to_agent = Some(agent.into());
        self
    }

    pub fn with_thread(mut self, thread_id: ThreadId) -> Self {
        self.thread_id = thread_id;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.constraints.timeout_secs = Some(secs);
        self
    }

    pub fn with_budget(mut self, max_cost_usd: f64) -> Self {
        self.constraints.max_cost_usd = Some(max_cost_usd);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.constraints.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_inputs(mut self, inputs: serde_json::Value) -> Self {
        self.task.inputs = inputs;
        self
    }

    pub fn with_expected_output(mut self, shape: impl Into<String>) -> Self {
        self.task.expected_output = Some(shape.into());
        self
    }

    pub fn with_parent(mut self, parent: JobId) -> Self {
        self.parent_job = Some(parent);
        self
    }

    pub fn requiring_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    /// Explicit deadline, else creation time plus the timeout
    pub fn effective_deadline(&self) -> DateTime<Utc> {
        self.deadline.unwrap_or_else(|| {
            let secs = self.constraints.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
            self.created_at + Duration::seconds(secs as i64)
        })
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.effective_deadline()
    }

    /// Start a fresh timeout window at `now` for a resumed attempt. An
    /// explicit deadline further out is kept.
    pub fn renew_deadline(&mut self, now: DateTime<Utc>) {
        let secs = self.constraints.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let renewed = now + Duration::seconds(secs as i64);
        self.deadline = Some(self.deadline.map_or(renewed, |d| d.max(renewed)));
    }

    /// Budget the router must find remaining on the agent
    pub fn budget_ceiling(&self) -> f64 {
        self.constraints.max_cost_usd.unwrap_or(0.0)
    }

    /// Approval gate: dispatch allowed
    pub fn is_approved(&self) -> bool {
        !self.requires_approval || self.approved_at.is_some()
    }
}
