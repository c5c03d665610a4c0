//! Job store - the single source of truth for lifecycle state
//!
//! Owns jobs, their transition audit trail, responses, artifacts and
//! escalations. Every mutation happens under one write lock so that
//! "check current state, then change it" is atomic.

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{HiveError, Result};
use crate::escalation::{Escalation, EscalationStatus, Resolution};
use crate::job::{Job, JobStatus, Transition};
use crate::ledger::{CostLedger, LedgerEntry};
use crate::response::{Artifact, Response};
use crate::types::{AgentId, ArtifactId, EscalationId, JobId, ResponseId};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreState {
    jobs: HashMap<JobId, Job>,
    transitions: HashMap<JobId, Vec<Transition>>,
    responses: HashMap<ResponseId, Response>,
    responses_by_job: HashMap<JobId, Vec<ResponseId>>,
    artifacts: HashMap<ArtifactId, Artifact>,
    escalations: HashMap<EscalationId, Escalation>,
}

/// On-disk form: the store plus every ledger entry, so spend survives a
/// restart
#[derive(Serialize, Deserialize)]
struct Snapshot {
    store: StoreState,
    #[serde(default)]
    ledger: Vec<LedgerEntry>,
}

impl StoreState {
    fn job_mut(&mut self, id: JobId) -> Result<&mut Job> {
        self.jobs.get_mut(&id).ok_or(HiveError::JobNotFound(id))
    }

    fn apply_transition(&mut self, id: JobId, to: JobStatus, detail: Option<String>) -> Result<Job> {
        let job = self.job_mut(id)?;
        let from = job.status;
        if !from.can_transition_to(to) {
            return Err(HiveError::InvalidTransition { job: id, from, to });
        }
        if from == JobStatus::Pending && to != JobStatus::Cancelled && !job.is_approved() {
            return Err(HiveError::ApprovalRequired(id));
        }

        let now = Utc::now();
        job.status = to;
        job.updated_at = now;
        if to == JobStatus::InProgress && job.started_at.is_none() {
            job.started_at = Some(now);
        }
        if detail.is_some() {
            job.status_detail = detail.clone();
        }
        let snapshot = job.clone();

        self.transitions
            .entry(id)
            .or_default()
            .push(Transition { from, to, at: now, detail });

        debug!(job_id = %id, from = %from, to = %to, "Job transitioned");
        Ok(snapshot)
    }
}

/// In-memory job store with JSON snapshot persistence
#[derive(Default)]
pub struct JobStore {
    state: RwLock<StoreState>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new pending job
    pub fn create(&self, job: Job) -> Result<JobId> {
        if job.status != JobStatus::Pending {
            return Err(HiveError::InvalidTransition {
                job: job.id,
                from: job.status,
                to: JobStatus::Pending,
            });
        }
        let id = job.id;
        let mut state = self.state.write();
        state.transitions.entry(id).or_default();
        state.jobs.insert(id, job);
        Ok(id)
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        self.state.read().jobs.get(&id).cloned()
    }

    pub fn require(&self, id: JobId) -> Result<Job> {
        self.job(id).ok_or(HiveError::JobNotFound(id))
    }

    /// All jobs, oldest first
    pub fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.state.read().jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub fn jobs_with_status(&self, status: JobStatus) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .state
            .read()
            .jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    /// Pending jobs ready for routing: highest priority first, then oldest
    pub fn dispatchable(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .state
            .read()
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.is_approved())
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        jobs
    }

    /// Follow-up jobs spawned by `parent`
    pub fn children(&self, parent: JobId) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .state
            .read()
            .jobs
            .values()
            .filter(|j| j.parent_job == Some(parent))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub fn counts_by_status(&self) -> HashMap<JobStatus, usize> {
        let mut counts = HashMap::new();
        for job in self.state.read().jobs.values() {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        counts
    }

    /// Move a job along the state machine, recording the transition
    pub fn transition(&self, id: JobId, to: JobStatus, detail: Option<String>) -> Result<Job> {
        self.state.write().apply_transition(id, to, detail)
    }

    /// `pending -> assigned` with the chosen agent
    pub fn assign(&self, id: JobId, agent: &AgentId) -> Result<Job> {
        let mut state = self.state.write();
        state.apply_transition(id, JobStatus::Assigned, None)?;
        let job = state.job_mut(id)?;
        job.to_agent = Some(agent.clone());
        Ok(job.clone())
    }

    /// `escalated -> in_progress` as a fresh attempt
    pub fn resume(&self, id: JobId, detail: Option<String>) -> Result<Job> {
        let mut state = self.state.write();
        let from = state.job_mut(id)?.status;
        if from != JobStatus::Escalated {
            return Err(HiveError::InvalidTransition {
                job: id,
                from,
                to: JobStatus::InProgress,
            });
        }
        state.apply_transition(id, JobStatus::InProgress, detail)?;
        let job = state.job_mut(id)?;
        job.attempt += 1;
        job.relay_dispatched = false;
        job.renew_deadline(Utc::now());
        Ok(job.clone())
    }

    /// Record human approval of a pending job
    pub fn approve(&self, id: JobId) -> Result<Job> {
        let mut state = self.state.write();
        let job = state.job_mut(id)?;
        if job.status != JobStatus::Pending {
            return Err(HiveError::InvalidTransition {
                job: id,
                from: job.status,
                to: JobStatus::Pending,
            });
        }
        if job.approved_at.is_none() {
            job.approved_at = Some(Utc::now());
            info!(job_id = %id, "Job approved");
        }
        Ok(job.clone())
    }

    /// Set the relay guard for the current attempt.
    ///
    /// Returns `false` if the instruction was already written, or if the job
    /// is not `in_progress` on the given attempt.
    pub fn mark_relay_dispatched(&self, id: JobId, attempt: u32) -> Result<bool> {
        let mut state = self.state.write();
        let job = state.job_mut(id)?;
        if job.status != JobStatus::InProgress || job.attempt != attempt || job.relay_dispatched {
            return Ok(false);
        }
        job.relay_dispatched = true;
        Ok(true)
    }

    /// Cancel a job; in-flight work keeps running but its response is ignored
    pub fn cancel(&self, id: JobId, reason: Option<String>) -> Result<(Job, JobStatus)> {
        let mut state = self.state.write();
        let from = state.job_mut(id)?.status;
        let job = state.apply_transition(id, JobStatus::Cancelled, reason)?;
        if from == JobStatus::InProgress {
            state.job_mut(id)?.cancel_requested = true;
        }
        Ok((job, from))
    }

    /// Store a response; first committed response for a job attempt wins.
    ///
    /// The response is accepted only if the job is still `in_progress` on
    /// that attempt and has no accepted response yet. Rejected responses
    /// are kept for audit with `accepted = false`.
    pub fn record_response(&self, mut response: Response) -> Result<Response> {
        let mut state = self.state.write();
        let job = state
            .jobs
            .get(&response.job_id)
            .ok_or(HiveError::JobNotFound(response.job_id))?;

        let already_accepted = state
            .responses_by_job
            .get(&response.job_id)
            .into_iter()
            .flatten()
            .filter_map(|rid| state.responses.get(rid))
            .any(|r| r.accepted && r.attempt == response.attempt);

        response.accepted = job.status == JobStatus::InProgress
            && job.attempt == response.attempt
            && !already_accepted;

        if !response.accepted {
            warn!(
                job_id = %response.job_id,
                response_id = %response.id,
                status = %job.status,
                "Response recorded but not accepted"
            );
        }

        state
            .responses_by_job
            .entry(response.job_id)
            .or_default()
            .push(response.id);
        state.responses.insert(response.id, response.clone());
        Ok(response)
    }

    pub fn response(&self, id: ResponseId) -> Option<Response> {
        self.state.read().responses.get(&id).cloned()
    }

    /// All responses for a job in recording order
    pub fn responses_for(&self, job: JobId) -> Vec<Response> {
        let state = self.state.read();
        state
            .responses_by_job
            .get(&job)
            .into_iter()
            .flatten()
            .filter_map(|rid| state.responses.get(rid).cloned())
            .collect()
    }

    pub fn accepted_response(&self, job: JobId) -> Option<Response> {
        self.responses_for(job).into_iter().rev().find(|r| r.accepted)
    }

    /// Store artifact content; identical content yields the same id and the
    /// existing record is never rewritten
    pub fn put_artifact(&self, job: JobId, name: &str, content: &str) -> ArtifactId {
        let artifact = Artifact::new(job, name, content);
        let id = artifact.id.clone();
        self.state
            .write()
            .artifacts
            .entry(id.clone())
            .or_insert(artifact);
        id
    }

    pub fn artifact(&self, id: &ArtifactId) -> Option<Artifact> {
        self.state.read().artifacts.get(id).cloned()
    }

    pub fn transitions(&self, id: JobId) -> Vec<Transition> {
        self.state
            .read()
            .transitions
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn add_escalation(&self, escalation: Escalation) -> EscalationId {
        let id = escalation.id;
        self.state.write().escalations.insert(id, escalation);
        id
    }

    pub fn escalation(&self, id: EscalationId) -> Option<Escalation> {
        self.state.read().escalations.get(&id).cloned()
    }

    pub fn open_escalations(&self) -> Vec<Escalation> {
        let mut open: Vec<Escalation> = self
            .state
            .read()
            .escalations
            .values()
            .filter(|e| e.is_open())
            .cloned()
            .collect();
        open.sort_by_key(|e| e.created_at);
        open
    }

    pub fn escalations_for(&self, job: JobId) -> Vec<Escalation> {
        let mut found: Vec<Escalation> = self
            .state
            .read()
            .escalations
            .values()
            .filter(|e| e.job_id == job)
            .cloned()
            .collect();
        found.sort_by_key(|e| e.created_at);
        found
    }

    /// Close an open escalation. Fails if it was already closed.
    pub fn close_escalation(
        &self,
        id: EscalationId,
        status: EscalationStatus,
        answer: Option<String>,
        resolution: Option<Resolution>,
    ) -> Result<Escalation> {
        let mut state = self.state.write();
        let esc = state
            .escalations
            .get_mut(&id)
            .ok_or(HiveError::EscalationNotFound(id))?;
        if !esc.is_open() {
            return Err(HiveError::EscalationClosed(id));
        }
        esc.status = status;
        esc.answer = answer;
        esc.resolution = resolution;
        esc.resolved_at = Some(Utc::now());
        Ok(esc.clone())
    }

    /// Write the whole store and the ledger's entries as JSON
    pub async fn save_snapshot(&self, path: impl AsRef<Path>, ledger: &CostLedger) -> Result<()> {
        let snapshot = Snapshot {
            store: self.state.read().clone(),
            ledger: ledger.all_entries(),
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = path.as_ref().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path.as_ref(), json).await?;
        info!(path = %path.as_ref().display(), "Store snapshot written");
        Ok(())
    }

    /// Load a store and ledger written by [`JobStore::save_snapshot`]
    pub async fn load_snapshot(path: impl AsRef<Path>) -> Result<(Self, CostLedger)> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        info!(
            path = %path.as_ref().display(),
            jobs = snapshot.store.jobs.len(),
            ledger_entries = snapshot.ledger.len(),
            "Store snapshot loaded"
        );
        let store = Self {
            state: RwLock::new(snapshot.store),
        };
        Ok((store, CostLedger::from_entries(snapshot.ledger)))
    }
}
