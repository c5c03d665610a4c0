//! The hive - jobs, agents and the rules that connect them
//!
//! A [`Hive`] owns the job store, cost ledger, thread contexts and one
//! [`AccessChannel`] per configured agent. Every job operation lives here;
//! the [`Orchestrator`](crate::orchestrator::Orchestrator) only decides
//! *when* to call them.

use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::access::{AccessChannel, ChannelOutcome, GatePermit, GateTicket};
use crate::agent::{AgentInvoker, InvocationRequest, Transport};
use crate::config::{DeadlinePolicy, HiveConfig};
use crate::context::ThreadContextManager;
use crate::dashboard::DashboardSnapshot;
use crate::error::{HiveError, Result};
use crate::escalation::{Escalation, EscalationStatus, ExpiryPolicy, RaisedBy, Resolution};
use crate::health::HealthTracker;
use crate::job::{Job, JobStatus};
use crate::ledger::CostLedger;
use crate::protocol::Event;
use crate::relay::{FsRelay, RelayStore};
use crate::response::{AgentReply, Response, ResponseStatus, Via};
use crate::router::{FollowUps, RouteDecision, TaskRouter};
use crate::store::JobStore;
use crate::types::{AgentId, EscalationId, JobId, ResponseId};

/// What a single drive of a job achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Job reached `completed`, `failed`, `escalated` or `cancelled`
    Finished(JobStatus),
    /// Relay instruction is out, re-check later
    Pending,
    /// Every eligible agent is at capacity
    Deferred,
    AwaitingApproval,
    /// Job was not in a state this call acts on
    Skipped(JobStatus),
    /// A response arrived after the job moved on; stored, not acted on
    Ignored,
}

struct InFlight {
    attempt: u32,
    _permit: Option<GatePermit>,
    /// Restored attempt still waiting for a free slot
    _queued: Option<GateTicket>,
}

/// Builder for [`Hive`]
pub struct HiveBuilder {
    config: HiveConfig,
    relay: Option<Arc<dyn RelayStore>>,
    invokers: HashMap<AgentId, Arc<dyn AgentInvoker>>,
    store: Option<JobStore>,
    ledger: Option<CostLedger>,
    event_tx: Option<mpsc::UnboundedSender<Event>>,
}

impl HiveBuilder {
    pub fn new(config: HiveConfig) -> Self {
        Self {
            config,
            relay: None,
            invokers: HashMap::new(),
            store: None,
            ledger: None,
            event_tx: None,
        }
    }

    /// Relay backend; defaults to an [`FsRelay`] at `relay.root`
    pub fn relay(mut self, relay: Arc<dyn RelayStore>) -> Self {
        self.relay = Some(relay);
        self
    }

    /// Live invoker for a `live` or `hybrid` agent
    pub fn invoker(mut self, agent: impl Into<AgentId>, invoker: Arc<dyn AgentInvoker>) -> Self {
        self.invokers.insert(agent.into(), invoker);
        self
    }

    /// Start from a restored store instead of an empty one
    pub fn store(mut self, store: JobStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Continue the spend history of a restored ledger
    pub fn ledger(mut self, ledger: CostLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn events(mut self, event_tx: mpsc::UnboundedSender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn build(mut self) -> Result<HiveHandle> {
        self.config.validate()?;
        let config = self.config;
        let relay = self
            .relay
            .unwrap_or_else(|| Arc::new(FsRelay::new(config.relay.root.clone())));
        let event_tx = self
            .event_tx
            .unwrap_or_else(|| mpsc::unbounded_channel().0);
        let ledger = Arc::new(self.ledger.take().unwrap_or_default());

        let mut channels = BTreeMap::new();
        for descriptor in &config.agents {
            let invoker = self.invokers.remove(&descriptor.id);
            let transport = Transport::from_config(&descriptor.id, descriptor.transport, invoker)?;
            let channel = AccessChannel::new(
                descriptor.clone(),
                transport,
                Arc::clone(&relay),
                Arc::clone(&ledger),
                HealthTracker::new(config.health.clone()),
                config.retry.clone(),
                config.limits.queue_depth,
                event_tx.clone(),
            );
            channels.insert(descriptor.id.clone(), Arc::new(channel));
        }
        for agent in self.invokers.keys() {
            warn!(agent = %agent, "Invoker registered for an unknown agent, ignoring");
        }

        info!(agents = channels.len(), "Hive built");
        Ok(HiveHandle::new(Hive {
            contexts: ThreadContextManager::new(config.limits.summary_chars),
            router: TaskRouter::new(Arc::clone(&ledger)),
            store: self.store.unwrap_or_default(),
            config,
            ledger,
            channels,
            inflight: Mutex::new(HashMap::new()),
            event_tx,
        }))
    }
}

/// Orchestration core
pub struct Hive {
    config: HiveConfig,
    store: JobStore,
    ledger: Arc<CostLedger>,
    contexts: ThreadContextManager,
    router: TaskRouter,
    channels: BTreeMap<AgentId, Arc<AccessChannel>>,
    inflight: Mutex<HashMap<JobId, InFlight>>,
    event_tx: mpsc::UnboundedSender<Event>,
}

impl Hive {
    pub fn builder(config: HiveConfig) -> HiveBuilder {
        HiveBuilder::new(config)
    }

    pub fn config(&self) -> &HiveConfig {
        &self.config
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn ledger(&self) -> &CostLedger {
        &self.ledger
    }

    pub fn contexts(&self) -> &ThreadContextManager {
        &self.contexts
    }

    pub fn channel(&self, agent: &AgentId) -> Option<&Arc<AccessChannel>> {
        self.channels.get(agent)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Arc<AccessChannel>> {
        self.channels.values()
    }

    fn require_channel(&self, agent: &AgentId) -> Result<&Arc<AccessChannel>> {
        self.channels
            .get(agent)
            .ok_or_else(|| HiveError::AgentNotFound(agent.clone()))
    }

    fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    fn emit_transition(&self, job: &Job) {
        if let Some(t) = self.store.transitions(job.id).pop() {
            self.emit(Event::JobTransitioned {
                job_id: job.id,
                from: t.from,
                to: t.to,
                detail: t.detail,
            });
        }
    }

    fn transition(&self, id: JobId, to: JobStatus, detail: Option<String>) -> Result<Job> {
        let job = self.store.transition(id, to, detail)?;
        self.emit_transition(&job);
        Ok(job)
    }

    /// Fail a job unless something else already moved it on
    fn fail(&self, id: JobId, error: &HiveError) -> Result<DispatchOutcome> {
        match self.transition(id, JobStatus::Failed, Some(error.status_detail())) {
            Ok(_) => {
                warn!(job_id = %id, error = %error, "Job failed");
                Ok(DispatchOutcome::Finished(JobStatus::Failed))
            }
            Err(HiveError::InvalidTransition { from, .. }) => Ok(DispatchOutcome::Skipped(from)),
            Err(e) => Err(e),
        }
    }

    /// Drop the concurrency slot and budget reservation held for an attempt
    fn finish_attempt(&self, id: JobId, agent: &AgentId, attempt: u32) {
        let mut inflight = self.inflight.lock();
        if inflight.get(&id).is_some_and(|f| f.attempt == attempt) {
            inflight.remove(&id);
        }
        drop(inflight);
        self.ledger.release(agent, id);
        if let Some(channel) = self.channels.get(agent) {
            channel.forget(id, attempt);
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, task_type = %job.task.task_type))]
    pub fn submit(&self, mut job: Job) -> Result<JobId> {
        let limits = &self.config.limits;
        if job.constraints.timeout_secs.is_none() {
            job.constraints.timeout_secs = Some(limits.default_timeout_secs);
        }
        if job.constraints.max_cost_usd.is_none() {
            job.constraints.max_cost_usd = limits.default_job_budget_usd;
        }
        let parent = job.parent_job;
        let to_agent = job.to_agent.clone();
        let priority = job.priority;

        let id = self.store.create(job)?;
        info!(priority = %priority, "Job submitted");
        self.emit(Event::JobCreated {
            job_id: id,
            parent,
            to_agent,
        });
        Ok(id)
    }

    pub fn approve(&self, id: JobId) -> Result<Job> {
        self.store.approve(id)
    }

    /// Cancel a job.
    ///
    /// Work already in flight is not interrupted; whatever it returns is
    /// recorded with `accepted = false`.
    #[instrument(skip(self, reason))]
    pub fn cancel(&self, id: JobId, reason: Option<String>) -> Result<Job> {
        let (job, from) = self.store.cancel(id, reason)?;
        self.emit_transition(&job);

        match from {
            JobStatus::Assigned => {
                if let Some(agent) = &job.to_agent {
                    self.ledger.release(agent, id);
                }
            }
            JobStatus::Escalated => {
                for esc in self.store.escalations_for(id).into_iter().filter(|e| e.is_open()) {
                    if self
                        .store
                        .close_escalation(esc.id, EscalationStatus::Cancelled, None, None)
                        .is_ok()
                    {
                        self.emit(Event::EscalationClosed {
                            escalation_id: esc.id,
                            job_id: id,
                            status: EscalationStatus::Cancelled,
                        });
                    }
                }
            }
            _ => {}
        }
        info!(from = %from, "Job cancelled");
        Ok(job)
    }

    /// Route, admit and run one pending job
    #[instrument(skip(self))]
    pub async fn dispatch(&self, id: JobId) -> Result<DispatchOutcome> {
        let job = self.store.require(id)?;
        if job.status != JobStatus::Pending {
            return Ok(DispatchOutcome::Skipped(job.status));
        }
        if !job.is_approved() {
            debug!("Job awaiting approval");
            return Ok(DispatchOutcome::AwaitingApproval);
        }

        let selection = match self.router.select(&job, &self.channels, Utc::now()) {
            Ok(RouteDecision::Selected(selection)) => selection,
            Ok(RouteDecision::Deferred) => {
                self.emit(Event::JobDeferred { job_id: id });
                return Ok(DispatchOutcome::Deferred);
            }
            Err(e) if e.is_admission_failure() => return self.fail(id, &e),
            Err(e) => return Err(e),
        };

        let agent = selection.agent.clone();
        let job = match self.store.assign(id, &agent) {
            Ok(job) => job,
            Err(e) => {
                self.ledger.release(&agent, id);
                return match e {
                    HiveError::InvalidTransition { from, .. } => Ok(DispatchOutcome::Skipped(from)),
                    e => Err(e),
                };
            }
        };
        self.emit_transition(&job);

        let permit = selection.ticket.acquire().await?;
        let job = match self.transition(id, JobStatus::InProgress, None) {
            Ok(job) => job,
            Err(e) => {
                self.ledger.release(&agent, id);
                return match e {
                    // cancelled while queued
                    HiveError::InvalidTransition { from, .. } => Ok(DispatchOutcome::Skipped(from)),
                    e => Err(e),
                };
            }
        };
        self.inflight.lock().insert(
            id,
            InFlight {
                attempt: job.attempt,
                _permit: Some(permit),
                _queued: None,
            },
        );
        self.run_attempt(job, &agent).await
    }

    /// Run the next attempt of a resumed job
    #[instrument(skip(self))]
    pub async fn continue_job(&self, id: JobId) -> Result<DispatchOutcome> {
        let job = self.store.require(id)?;
        if job.status != JobStatus::InProgress || job.relay_dispatched {
            return Ok(DispatchOutcome::Skipped(job.status));
        }
        let Some(agent) = job.to_agent.clone() else {
            return Ok(DispatchOutcome::Skipped(job.status));
        };
        let channel = self.require_channel(&agent)?;

        {
            let mut inflight = self.inflight.lock();
            if inflight.contains_key(&id) {
                return Ok(DispatchOutcome::Skipped(job.status));
            }
            inflight.insert(
                id,
                InFlight {
                    attempt: job.attempt,
                    _permit: None,
                    _queued: None,
                },
            );
        }

        let permit = match channel.force_enqueue().acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                self.inflight.lock().remove(&id);
                return Err(e);
            }
        };
        if let Some(entry) = self.inflight.lock().get_mut(&id) {
            entry._permit = Some(permit);
        }

        let job = self.store.require(id)?;
        if job.status != JobStatus::InProgress {
            self.finish_attempt(id, &agent, job.attempt);
            return Ok(DispatchOutcome::Skipped(job.status));
        }
        self.run_attempt(job, &agent).await
    }

    async fn run_attempt(&self, job: Job, agent: &AgentId) -> Result<DispatchOutcome> {
        let channel = match self.require_channel(agent) {
            Ok(channel) => Arc::clone(channel),
            Err(e) => {
                self.finish_attempt(job.id, agent, job.attempt);
                return self.fail(job.id, &e);
            }
        };
        let context = self
            .contexts
            .snapshot(job.thread_id, self.config.limits.context_window);
        let request = InvocationRequest::new(job.clone(), context);

        match channel.invoke_with_fallback(&request).await {
            Ok(ChannelOutcome::Reply { reply, via }) => self.record_reply(&job, agent, reply, via),
            Ok(ChannelOutcome::Pending) => {
                if self.store.mark_relay_dispatched(job.id, job.attempt)? {
                    self.emit(Event::RelayDispatched {
                        job_id: job.id,
                        agent: agent.clone(),
                        attempt: job.attempt,
                    });
                    return Ok(DispatchOutcome::Pending);
                }
                let current = self.store.require(job.id)?;
                if current.status == JobStatus::InProgress && current.attempt == job.attempt {
                    return Ok(DispatchOutcome::Pending);
                }
                self.finish_attempt(job.id, agent, job.attempt);
                Ok(DispatchOutcome::Skipped(current.status))
            }
            Err(e) => {
                self.finish_attempt(job.id, agent, job.attempt);
                self.fail(job.id, &e)
            }
        }
    }

    /// Poll once for a relay-pending job's response
    #[instrument(skip(self, now))]
    pub async fn recheck_relay(&self, id: JobId, now: DateTime<Utc>) -> Result<DispatchOutcome> {
        let job = self.store.require(id)?;
        let active = job.status == JobStatus::InProgress;
        // a cancelled job's late reply is still collected for the record
        let cancelled_in_flight = job.status == JobStatus::Cancelled
            && job.cancel_requested
            && !self
                .store
                .responses_for(id)
                .iter()
                .any(|r| r.attempt == job.attempt);
        if !job.relay_dispatched || !(active || cancelled_in_flight) {
            return Ok(DispatchOutcome::Skipped(job.status));
        }
        let Some(agent) = job.to_agent.clone() else {
            return Ok(DispatchOutcome::Skipped(job.status));
        };
        let channel = Arc::clone(self.require_channel(&agent)?);
        let overdue = job.is_past_deadline(now);

        match channel.poll_relay(&job).await {
            Ok(ChannelOutcome::Reply { reply, via }) => self.record_reply(&job, &agent, reply, via),
            Ok(ChannelOutcome::Pending) if !overdue => Ok(DispatchOutcome::Pending),
            Ok(ChannelOutcome::Pending) => {
                self.finish_attempt(id, &agent, job.attempt);
                if active {
                    self.fail(id, &HiveError::RelayTimeout)
                } else {
                    Ok(DispatchOutcome::Skipped(job.status))
                }
            }
            // a reply the agent is still writing reads as malformed
            Err(e) if !overdue => {
                warn!(agent = %agent, error = %e, "Relay reply not usable yet, will retry");
                Ok(DispatchOutcome::Pending)
            }
            Err(e) => {
                self.finish_attempt(id, &agent, job.attempt);
                if active {
                    self.fail(id, &e)
                } else {
                    Ok(DispatchOutcome::Skipped(job.status))
                }
            }
        }
    }

    /// Commit an agent reply and act on it
    fn record_reply(
        &self,
        job: &Job,
        agent: &AgentId,
        reply: AgentReply,
        via: Via,
    ) -> Result<DispatchOutcome> {
        let now = Utc::now();
        let artifacts = reply
            .artifacts
            .iter()
            .map(|a| self.store.put_artifact(job.id, &a.name, &a.content))
            .collect();
        let response = self.store.record_response(Response {
            id: ResponseId::new(),
            job_id: job.id,
            attempt: job.attempt,
            agent: agent.clone(),
            via,
            status: reply.status,
            content: reply.content,
            format: reply.format,
            artifacts,
            metrics: reply.metrics,
            follow_up: reply.follow_up,
            accepted: false,
            created_at: now,
        })?;

        self.ledger.record(agent, job.id, response.metrics.usage, now);
        self.finish_attempt(job.id, agent, job.attempt);
        self.emit(Event::ResponseRecorded {
            job_id: job.id,
            response_id: response.id,
            via,
            accepted: response.accepted,
        });
        if !response.accepted {
            return Ok(DispatchOutcome::Ignored);
        }

        self.contexts
            .append_response(job.thread_id, job.id, response.id, agent, &response.content);

        let follow_ups = self.router.inspect(&response);
        for request in &follow_ups.teammates {
            let child = self.router.materialize(job, agent, request);
            let child_id = self.submit(child)?;
            info!(job_id = %job.id, child_id = %child_id, to_agent = %request.agent, "Teammate job created");
        }
        if follow_ups.needs_human() {
            return self.escalate(job, agent, &response, &follow_ups);
        }

        let (to, detail) = match response.status {
            ResponseStatus::Failed => (JobStatus::Failed, Some(format!("agent {agent} reported failure"))),
            _ => (JobStatus::Completed, None),
        };
        match self.transition(job.id, to, detail) {
            Ok(_) => {
                info!(job_id = %job.id, agent = %agent, via = %via, status = %to, "Job finished");
                Ok(DispatchOutcome::Finished(to))
            }
            Err(HiveError::InvalidTransition { from, .. }) => {
                warn!(job_id = %job.id, status = %from, "Job moved on before its reply was applied");
                Ok(DispatchOutcome::Ignored)
            }
            Err(e) => Err(e),
        }
    }

    fn escalate(
        &self,
        job: &Job,
        agent: &AgentId,
        response: &Response,
        follow_ups: &FollowUps,
    ) -> Result<DispatchOutcome> {
        let deadline =
            Utc::now() + Duration::seconds(self.config.policy.escalation_timeout_secs as i64);
        let mut questions: Vec<String> = follow_ups.humans.iter().map(|h| h.question.clone()).collect();
        let options: Vec<String> = follow_ups
            .humans
            .iter()
            .flat_map(|h| h.options.iter().cloned())
            .collect();

        let (raised_by, reason) = if follow_ups.malformed.is_empty() {
            let reason = follow_ups
                .humans
                .first()
                .map(|h| h.reason.clone())
                .unwrap_or_default();
            (RaisedBy::Response { response_id: response.id }, reason)
        } else {
            warn!(
                job_id = %job.id,
                agent = %agent,
                errors = ?follow_ups.malformed,
                "Malformed request block in agent output"
            );
            questions.insert(
                0,
                format!(
                    "Agent {agent} sent a request block that could not be parsed ({}). How should this job proceed?",
                    follow_ups.malformed.join("; ")
                ),
            );
            (RaisedBy::Router, "malformed request block".to_string())
        };

        match self.transition(job.id, JobStatus::Escalated, Some(reason.clone())) {
            Ok(_) => {}
            Err(HiveError::InvalidTransition { .. }) => return Ok(DispatchOutcome::Ignored),
            Err(e) => return Err(e),
        }
        let escalation = Escalation::new(job.id, raised_by, reason, questions.join("\n"), options, deadline);
        let question = escalation.question.clone();
        let escalation_id = self.store.add_escalation(escalation);
        info!(job_id = %job.id, escalation_id = %escalation_id, "Escalation raised");
        self.emit(Event::EscalationRaised {
            escalation_id,
            job_id: job.id,
            question,
        });
        Ok(DispatchOutcome::Finished(JobStatus::Escalated))
    }

    /// Apply a human answer to an open escalation.
    ///
    /// With [`Resolution::Resume`] the job is back `in_progress` on a new
    /// attempt; call [`Hive::continue_job`] to run it.
    #[instrument(skip(self, answer))]
    pub fn resolve_escalation(
        &self,
        id: EscalationId,
        answer: &str,
        resolution: Resolution,
    ) -> Result<Job> {
        let escalation = self
            .store
            .escalation(id)
            .ok_or(HiveError::EscalationNotFound(id))?;
        if !escalation.is_open() {
            return Err(HiveError::EscalationClosed(id));
        }
        let job = self.store.require(escalation.job_id)?;
        if job.status != JobStatus::Escalated {
            return Err(HiveError::InvalidTransition {
                job: job.id,
                from: job.status,
                to: resolution.target_status(),
            });
        }

        self.store.close_escalation(
            id,
            EscalationStatus::Resolved,
            Some(answer.to_string()),
            Some(resolution),
        )?;
        self.emit(Event::EscalationClosed {
            escalation_id: id,
            job_id: job.id,
            status: EscalationStatus::Resolved,
        });
        self.contexts
            .append(job.thread_id, job.id, None, "human", answer);

        let job = match resolution {
            Resolution::Resume => {
                let job = self
                    .store
                    .resume(job.id, Some(format!("resumed with answer: {answer}")))?;
                self.emit_transition(&job);
                job
            }
            other => self.transition(
                job.id,
                other.target_status(),
                Some(format!("resolved by human: {answer}")),
            )?,
        };
        info!(job_id = %job.id, resolution = ?resolution, "Escalation resolved");
        Ok(job)
    }

    /// Close escalations whose deadline passed. Returns jobs resumed under
    /// [`ExpiryPolicy::Proceed`]; they still need [`Hive::continue_job`].
    pub fn expire_escalations(&self, now: DateTime<Utc>) -> Result<Vec<JobId>> {
        let mut resumed = Vec::new();
        for esc in self
            .store
            .open_escalations()
            .into_iter()
            .filter(|e| e.is_expired(now))
        {
            match self
                .store
                .close_escalation(esc.id, EscalationStatus::Expired, None, None)
            {
                Ok(_) => {}
                Err(HiveError::EscalationClosed(_)) => continue,
                Err(e) => return Err(e),
            }
            warn!(escalation_id = %esc.id, job_id = %esc.job_id, "Escalation expired");
            self.emit(Event::EscalationClosed {
                escalation_id: esc.id,
                job_id: esc.job_id,
                status: EscalationStatus::Expired,
            });

            let outcome = match self.config.policy.escalation_expiry {
                ExpiryPolicy::Cancel => self
                    .store
                    .cancel(esc.job_id, Some("escalation expired".into()))
                    .map(|(job, _)| job),
                ExpiryPolicy::Proceed => self.store.resume(
                    esc.job_id,
                    Some("escalation expired, proceeding without an answer".into()),
                ),
            };
            match outcome {
                Ok(job) => {
                    self.emit_transition(&job);
                    if job.status == JobStatus::InProgress {
                        resumed.push(job.id);
                    }
                }
                Err(HiveError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(resumed)
    }

    /// Enforce deadlines on jobs nobody is waiting on a relay for.
    ///
    /// Returns relay-pending jobs past their deadline; they time out through
    /// [`Hive::recheck_relay`] so a reply written at the last moment still
    /// counts.
    pub fn sweep_deadlines(&self, now: DateTime<Utc>) -> Result<Vec<JobId>> {
        let mut relay_due = Vec::new();
        for job in self.store.jobs() {
            if !job.is_past_deadline(now) {
                continue;
            }
            match job.status {
                JobStatus::InProgress if job.relay_dispatched => relay_due.push(job.id),
                // a live call still running keeps its slot until it returns
                JobStatus::Pending | JobStatus::InProgress
                    if self.config.policy.deadline == DeadlinePolicy::FailClosed =>
                {
                    match self.transition(job.id, JobStatus::Failed, Some("deadline exceeded".into())) {
                        Ok(_) => warn!(job_id = %job.id, "Job failed, deadline exceeded"),
                        Err(HiveError::InvalidTransition { .. } | HiveError::ApprovalRequired(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                _ => {}
            }
        }
        Ok(relay_due)
    }

    /// Settle jobs left mid-flight by a previous process.
    ///
    /// Live calls cannot survive a restart, so those attempts fail. Relay
    /// attempts take back their gate slot and budget reservation and are
    /// returned for re-checking.
    pub fn reconcile_restored(&self) -> Result<Vec<JobId>> {
        let mut relay_pending = Vec::new();
        for job in self.store.jobs() {
            match job.status {
                JobStatus::InProgress if job.relay_dispatched => {
                    if let Some(channel) = job.to_agent.as_ref().and_then(|a| self.channels.get(a)) {
                        self.ledger
                            .restore_reservation(channel.id(), job.id, job.budget_ceiling());
                        let (permit, queued) = match channel.force_enqueue().try_acquire() {
                            Ok(permit) => (Some(permit), None),
                            Err(ticket) => (None, Some(ticket)),
                        };
                        self.inflight.lock().insert(
                            job.id,
                            InFlight {
                                attempt: job.attempt,
                                _permit: permit,
                                _queued: queued,
                            },
                        );
                    }
                    relay_pending.push(job.id);
                }
                JobStatus::Assigned | JobStatus::InProgress => {
                    self.transition(
                        job.id,
                        JobStatus::Failed,
                        Some("interrupted by restart".into()),
                    )?;
                }
                _ => {}
            }
        }
        Ok(relay_pending)
    }

    /// Probe degraded agents whose cool-down has elapsed
    pub async fn recover_agents(&self) -> Vec<AgentId> {
        let mut recovered = Vec::new();
        for channel in self.channels.values() {
            if channel.probe().await == Some(true) {
                recovered.push(channel.id().clone());
            }
        }
        recovered
    }

    /// Persist the store together with the ledger
    pub async fn save_snapshot(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        self.store.save_snapshot(path, &self.ledger).await
    }

    pub fn dashboard(&self, now: DateTime<Utc>) -> DashboardSnapshot {
        DashboardSnapshot::collect(self, now)
    }
}

/// Cheap shared handle to a [`Hive`]
#[derive(Clone)]
pub struct HiveHandle {
    inner: Arc<Hive>,
}

impl HiveHandle {
    pub fn new(hive: Hive) -> Self {
        Self {
            inner: Arc::new(hive),
        }
    }
}

impl Deref for HiveHandle {
    type Target = Hive;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
