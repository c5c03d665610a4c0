//! Task routing and follow-up detection

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info};

use crate::access::{AccessChannel, GateTicket};
use crate::error::{HiveError, Result};
use crate::job::Job;
use crate::ledger::CostLedger;
use crate::requests::{parse_requests, HumanRequest, SecondaryRequest, TeammateRequest};
use crate::response::{Response, ResponseStatus};
use crate::types::AgentId;

/// An admitted job: budget reserved and a queue slot held
#[derive(Debug)]
pub struct Selection {
    pub agent: AgentId,
    pub affinity: f64,
    pub ticket: GateTicket,
}

#[derive(Debug)]
pub enum RouteDecision {
    Selected(Selection),
    /// Eligible agents exist but every one of them is at capacity
    Deferred,
}

/// Secondary work discovered in a response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FollowUps {
    pub teammates: Vec<TeammateRequest>,
    pub humans: Vec<HumanRequest>,
    /// Diagnostics for request blocks that could not be parsed
    pub malformed: Vec<String>,
}

impl FollowUps {
    pub fn needs_human(&self) -> bool {
        !self.humans.is_empty() || !self.malformed.is_empty()
    }
}

/// Picks the agent for a job and turns responses into follow-up work
pub struct TaskRouter {
    ledger: Arc<CostLedger>,
}

impl TaskRouter {
    pub fn new(ledger: Arc<CostLedger>) -> Self {
        Self { ledger }
    }

    /// Choose and admit an agent for `job`.
    ///
    /// Candidates must be enabled, reachable, explicitly addressed (if the
    /// job names an agent) and have affinity above zero. Among those, agents
    /// without budget for the job are dropped, then agents whose queue is
    /// full. Survivors are ranked by affinity, then current load, then id.
    pub fn select(
        &self,
        job: &Job,
        channels: &BTreeMap<AgentId, Arc<AccessChannel>>,
        now: DateTime<Utc>,
    ) -> Result<RouteDecision> {
        let task_type = job.task.task_type.as_str();
        let needed = job.budget_ceiling();

        let eligible: Vec<&Arc<AccessChannel>> = channels
            .values()
            .filter(|ch| job.to_agent.as_ref().map_or(true, |to| to == ch.id()))
            .filter(|ch| ch.is_routable())
            .filter(|ch| ch.descriptor().affinity(task_type) > 0.0)
            .collect();
        if eligible.is_empty() {
            debug!(job_id = %job.id, task_type, "No eligible agent");
            return Err(HiveError::NoEligibleAgent);
        }

        let mut best_remaining = 0.0_f64;
        let funded: Vec<&Arc<AccessChannel>> = eligible
            .into_iter()
            .filter(|ch| {
                let remaining =
                    self.ledger
                        .remaining(ch.id(), ch.descriptor().budget_limits(), now);
                best_remaining = best_remaining.max(remaining);
                remaining > 0.0 && remaining >= needed
            })
            .collect();
        if funded.is_empty() {
            return Err(HiveError::BudgetExceeded {
                needed,
                remaining: best_remaining.max(0.0),
            });
        }

        let mut open: Vec<&Arc<AccessChannel>> =
            funded.into_iter().filter(|ch| !ch.is_saturated()).collect();
        if open.is_empty() {
            debug!(job_id = %job.id, "All eligible agents saturated, deferring");
            return Ok(RouteDecision::Deferred);
        }
        rank(&mut open, task_type);

        let mut refused: Option<HiveError> = None;
        for ch in open {
            if let Err(e) = self
                .ledger
                .try_reserve(ch.id(), job.id, needed, ch.descriptor().budget_limits(), now)
            {
                refused = Some(e);
                continue;
            }
            let Some(ticket) = ch.try_enqueue() else {
                self.ledger.release(ch.id(), job.id);
                continue;
            };
            let affinity = ch.descriptor().affinity(task_type);
            info!(job_id = %job.id, agent = %ch.id(), affinity, "Job routed");
            return Ok(RouteDecision::Selected(Selection {
                agent: ch.id().clone(),
                affinity,
                ticket,
            }));
        }

        // Lost every race between the checks above and admission
        match refused {
            Some(e) => Err(e),
            None => Ok(RouteDecision::Deferred),
        }
    }

    /// Collect secondary requests from a response.
    ///
    /// The structured follow-up field and blocks embedded in the content are
    /// both honoured. A response that reports `escalated` without saying what
    /// it needs still produces a human request.
    pub fn inspect(&self, response: &Response) -> FollowUps {
        let mut follow_ups = FollowUps::default();

        if let Some(follow_up) = &response.follow_up {
            if let (Some(agent), Some(request)) = (&follow_up.needs_agent, &follow_up.request) {
                follow_ups.teammates.push(TeammateRequest {
                    agent: agent.clone(),
                    request: request.clone(),
                    task_type: None,
                });
            }
            if follow_up.needs_human {
                follow_ups.humans.push(HumanRequest {
                    reason: "agent requested human input".into(),
                    question: follow_up
                        .request
                        .clone()
                        .unwrap_or_else(|| "How should this job proceed?".into()),
                    options: Vec::new(),
                });
            }
        }

        if response.status != ResponseStatus::Failed {
            let parsed = parse_requests(&response.content);
            for request in parsed.requests {
                match request {
                    SecondaryRequest::Teammate(t) => follow_ups.teammates.push(t),
                    SecondaryRequest::Human(h) => follow_ups.humans.push(h),
                }
            }
            follow_ups.malformed = parsed.errors;
        }

        if response.status == ResponseStatus::Escalated && !follow_ups.needs_human() {
            follow_ups.humans.push(HumanRequest {
                reason: "agent reported the job as escalated".into(),
                question: "The agent could not finish this job on its own. How should it proceed?"
                    .into(),
                options: Vec::new(),
            });
        }
        follow_ups
    }

    /// New pending job for a teammate request, on the parent's thread
    pub fn materialize(&self, parent: &Job, origin: &AgentId, request: &TeammateRequest) -> Job {
        let task_type = request
            .task_type
            .clone()
            .unwrap_or_else(|| parent.task.task_type.clone());
        let mut child = Job::new(task_type, request.request.clone())
            .with_origin(origin.as_str())
            .with_to_agent(request.agent.clone())
            .with_thread(parent.thread_id)
            .with_priority(parent.priority)
            .with_parent(parent.id)
            .with_inputs(json!({ "parent_job": parent.id }));
        child.constraints.timeout_secs = parent.constraints.timeout_secs;
        child
    }
}

fn rank(candidates: &mut [&Arc<AccessChannel>], task_type: &str) {
    candidates.sort_by(|a, b| {
        let by_affinity = b
            .descriptor()
            .affinity(task_type)
            .partial_cmp(&a.descriptor().affinity(task_type))
            .unwrap_or(Ordering::Equal);
        by_affinity
            .then_with(|| a.load().cmp(&b.load()))
            .then_with(|| a.id().cmp(b.id()))
    });
}
