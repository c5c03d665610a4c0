//! Escalations - blocking requests for a human decision

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobStatus;
use crate::types::{EscalationId, JobId, ResponseId};

/// Where an escalation came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RaisedBy {
    /// Response carried a human request (follow-up field or block)
    Response { response_id: ResponseId },
    /// Core detected a problem it will not guess at (malformed block)
    Router,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Open,
    Resolved,
    Expired,
    Cancelled,
}

/// How a human answer moves the blocked job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Hand the answer back to the agent, job returns to `in_progress`
    Resume,
    Complete,
    Fail,
    Cancel,
}

impl Resolution {
    pub fn target_status(self) -> JobStatus {
        match self {
            Resolution::Resume => JobStatus::InProgress,
            Resolution::Complete => JobStatus::Completed,
            Resolution::Fail => JobStatus::Failed,
            Resolution::Cancel => JobStatus::Cancelled,
        }
    }
}

/// Behaviour when an escalation deadline passes without an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryPolicy {
    #[default]
    Cancel,
    /// Resume the job without an answer
    Proceed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub id: EscalationId,
    pub job_id: JobId,
    pub raised_by: RaisedBy,
    pub reason: String,
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub deadline: DateTime<Utc>,
    pub status: EscalationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Escalation {
    pub fn new(
        job_id: JobId,
        raised_by: RaisedBy,
        reason: impl Into<String>,
        question: impl Into<String>,
        options: Vec<String>,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EscalationId::new(),
            job_id,
            raised_by,
            reason: reason.into(),
            question: question.into(),
            options,
            deadline,
            status: EscalationStatus::Open,
            answer: None,
            resolution: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == EscalationStatus::Open
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && now >= self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let esc = Escalation::new(
            JobId::new(),
            RaisedBy::Router,
            "malformed request block",
            "How should this proceed?",
            vec![],
            now + Duration::minutes(5),
        );
        assert!(esc.is_open());
        assert!(!esc.is_expired(now));
        assert!(esc.is_expired(now + Duration::minutes(5)));
    }

    #[test]
    fn test_resolution_targets() {
        assert_eq!(Resolution::Resume.target_status(), JobStatus::InProgress);
        assert_eq!(Resolution::Cancel.target_status(), JobStatus::Cancelled);
    }
}
