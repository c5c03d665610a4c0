//! Operations submitted to the hive and the events it emits

use serde::{Deserialize, Serialize};

use crate::escalation::{EscalationStatus, Resolution};
use crate::job::{Job, JobStatus};
use crate::response::Via;
use crate::types::{AgentId, EscalationId, JobId, ResponseId};

/// Requests from a client to the orchestrator loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Op {
    CreateJob {
        job: Box<Job>,
    },
    ApproveJob {
        job_id: JobId,
    },
    CancelJob {
        job_id: JobId,
        #[serde(default)]
        reason: Option<String>,
    },
    ResolveEscalation {
        escalation_id: EscalationId,
        answer: String,
        resolution: Resolution,
    },
    Shutdown,
}

/// Notifications from the hive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    JobCreated {
        job_id: JobId,
        parent: Option<JobId>,
        to_agent: Option<AgentId>,
    },
    JobTransitioned {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
        detail: Option<String>,
    },
    /// Every eligible agent was at capacity; the job stays pending
    JobDeferred {
        job_id: JobId,
    },
    RelayDispatched {
        job_id: JobId,
        agent: AgentId,
        attempt: u32,
    },
    ResponseRecorded {
        job_id: JobId,
        response_id: ResponseId,
        via: Via,
        accepted: bool,
    },
    EscalationRaised {
        escalation_id: EscalationId,
        job_id: JobId,
        question: String,
    },
    EscalationClosed {
        escalation_id: EscalationId,
        job_id: JobId,
        status: EscalationStatus,
    },
    AgentDegraded {
        agent: AgentId,
    },
    AgentRecovered {
        agent: AgentId,
    },
    Error {
        message: String,
    },
}

impl Event {
    /// Job the event concerns, if any
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Event::JobCreated { job_id, .. }
            | Event::JobTransitioned { job_id, .. }
            | Event::JobDeferred { job_id }
            | Event::RelayDispatched { job_id, .. }
            | Event::ResponseRecorded { job_id, .. }
            | Event::EscalationRaised { job_id, .. }
            | Event::EscalationClosed { job_id, .. } => Some(*job_id),
            Event::AgentDegraded { .. } | Event::AgentRecovered { .. } | Event::Error { .. } => {
                None
            }
        }
    }
}
