//! Per-agent access channel
//!
//! Wraps an agent's [`Transport`] with everything the hive needs around a
//! call: bounded retries with backoff, relay fallback, health tracking and a
//! concurrency gate.
//!
//! The gate has two parts. A semaphore sized to `max_concurrent` bounds calls
//! actually in flight; a ticket counter bounds how many jobs may be waiting on
//! that semaphore (`max_concurrent + queue_depth`). The router takes a ticket
//! at admission and the job turns it into a permit before its first call.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument, warn};

use crate::agent::{InvocationRequest, InvokeFailure, Transport};
use crate::config::{AgentDescriptor, RetryConfig, TransportMethod};
use crate::error::{HiveError, Result};
use crate::health::HealthTracker;
use crate::job::Job;
use crate::ledger::CostLedger;
use crate::protocol::Event;
use crate::relay::{instruction_path, parse_reply, render_instruction, response_path, RelayStore};
use crate::response::{AgentReply, Via};
use crate::retry::{backoff_delay, total_attempts};
use crate::types::{AgentId, JobId};

/// What a call through the channel produced
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelOutcome {
    Reply { reply: AgentReply, via: Via },
    /// Relay instruction is out; poll for the response later
    Pending,
}

#[derive(Debug)]
struct Gate {
    permits: Arc<Semaphore>,
    tickets: AtomicUsize,
    capacity: usize,
}

/// Admission slot in an agent's queue
#[derive(Debug)]
pub struct GateTicket {
    gate: Arc<Gate>,
}

impl GateTicket {
    /// Wait for a concurrency slot
    pub async fn acquire(self) -> Result<GatePermit> {
        let permit = Arc::clone(&self.gate.permits)
            .acquire_owned()
            .await
            .map_err(|_| HiveError::ChannelClosed("agent gate closed".into()))?;
        Ok(GatePermit {
            _permit: permit,
            _ticket: self,
        })
    }

    /// Take a concurrency slot only if one is free now; the ticket comes
    /// back otherwise
    pub fn try_acquire(self) -> std::result::Result<GatePermit, GateTicket> {
        match Arc::clone(&self.gate.permits).try_acquire_owned() {
            Ok(permit) => Ok(GatePermit {
                _permit: permit,
                _ticket: self,
            }),
            Err(_) => Err(self),
        }
    }
}

impl Drop for GateTicket {
    fn drop(&mut self) {
        self.gate.tickets.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A held concurrency slot; dropping it frees both the slot and the ticket
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    _ticket: GateTicket,
}

/// Uniform access to one agent
pub struct AccessChannel {
    descriptor: AgentDescriptor,
    transport: Transport,
    relay: Arc<dyn RelayStore>,
    ledger: Arc<CostLedger>,
    health: HealthTracker,
    retry: RetryConfig,
    gate: Arc<Gate>,
    instructed: Mutex<HashSet<(JobId, u32)>>,
    event_tx: mpsc::UnboundedSender<Event>,
}

impl AccessChannel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        descriptor: AgentDescriptor,
        transport: Transport,
        relay: Arc<dyn RelayStore>,
        ledger: Arc<CostLedger>,
        health: HealthTracker,
        retry: RetryConfig,
        queue_depth: usize,
        event_tx: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let ceiling = descriptor.max_concurrent.max(1);
        Self {
            gate: Arc::new(Gate {
                permits: Arc::new(Semaphore::new(ceiling)),
                tickets: AtomicUsize::new(0),
                capacity: ceiling + queue_depth,
            }),
            descriptor,
            transport,
            relay,
            ledger,
            health,
            retry,
            instructed: Mutex::new(HashSet::new()),
            event_tx,
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    pub fn method(&self) -> TransportMethod {
        self.transport.method()
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    /// Jobs admitted and not yet finished (in flight plus queued)
    pub fn load(&self) -> usize {
        self.gate.tickets.load(Ordering::Acquire)
    }

    pub fn is_saturated(&self) -> bool {
        self.load() >= self.gate.capacity
    }

    /// Enabled and reachable by at least one transport
    pub fn is_routable(&self) -> bool {
        if !self.descriptor.enabled {
            return false;
        }
        !(self.health.is_degraded() && !self.transport.has_relay())
    }

    /// Claim a queue slot, or `None` if the queue is full
    pub fn try_enqueue(&self) -> Option<GateTicket> {
        let gate = &self.gate;
        let mut current = gate.tickets.load(Ordering::Acquire);
        loop {
            if current >= gate.capacity {
                return None;
            }
            match gate.tickets.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(GateTicket {
                        gate: Arc::clone(gate),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Claim a slot even past queue depth; used for resumed jobs that were
    /// already admitted once
    pub fn force_enqueue(&self) -> GateTicket {
        self.gate.tickets.fetch_add(1, Ordering::AcqRel);
        GateTicket {
            gate: Arc::clone(&self.gate),
        }
    }

    /// Live call with bounded retries.
    ///
    /// Each try is cut off at the job's deadline. Failures count against the
    /// agent's health and any cost they incurred is billed.
    #[instrument(skip(self, request), fields(agent = %self.descriptor.id, job_id = %request.job.id))]
    pub async fn invoke(&self, request: &InvocationRequest) -> Result<AgentReply> {
        let agent = &self.descriptor.id;
        let invoker = self.transport.live().ok_or_else(|| {
            HiveError::Config(format!("agent {agent} has no live transport"))
        })?;
        let deadline = request.job.effective_deadline();
        let attempts = total_attempts(&self.retry);
        let mut last_error = None;

        for attempt in 0..attempts {
            let remaining = (deadline - Utc::now()).to_std().unwrap_or_default();
            if remaining.is_zero() {
                last_error = Some(HiveError::Transport {
                    agent: agent.clone(),
                    message: "deadline passed before the call completed".into(),
                });
                break;
            }

            let started = Instant::now();
            let failure = match tokio::time::timeout(remaining, invoker.invoke(request)).await {
                Ok(Ok(mut reply)) => match reply.validate() {
                    Ok(()) => {
                        self.health.record_success();
                        if reply.metrics.latency_ms == 0 {
                            reply.metrics.latency_ms = started.elapsed().as_millis() as u64;
                        }
                        debug!(attempt, "Live call succeeded");
                        return Ok(reply);
                    }
                    Err(reason) => {
                        warn!(attempt, reason = %reason, content = %reply.content, "Malformed live response");
                        InvokeFailure::from(HiveError::MalformedResponse {
                            agent: agent.clone(),
                            reason,
                        })
                        .with_usage(reply.metrics.usage)
                    }
                },
                Ok(Err(failure)) => failure,
                Err(_) => InvokeFailure::transport(agent, "live call timed out"),
            };

            self.ledger
                .record(agent, request.job.id, failure.usage, Utc::now());
            if self.health.record_failure() {
                warn!(score = self.health.score(), "Agent degraded, live transport suspended");
                let _ = self.event_tx.send(Event::AgentDegraded {
                    agent: agent.clone(),
                });
            }

            if !failure.error.is_retryable() {
                return Err(failure.error);
            }
            warn!(attempt, error = %failure.error, "Live call failed");
            last_error = Some(failure.error);

            if attempt + 1 < attempts {
                tokio::time::sleep(backoff_delay(&self.retry, attempt)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| HiveError::Transport {
            agent: agent.clone(),
            message: "no attempts made".into(),
        }))
    }

    /// Live first, then relay if the agent has one.
    ///
    /// A degraded hybrid agent goes straight to the relay.
    pub async fn invoke_with_fallback(&self, request: &InvocationRequest) -> Result<ChannelOutcome> {
        if self.transport.live().is_some() {
            if !self.health.is_degraded() {
                match self.invoke(request).await {
                    Ok(reply) => {
                        return Ok(ChannelOutcome::Reply {
                            reply,
                            via: Via::Live,
                        })
                    }
                    Err(e) if self.transport.has_relay() => {
                        info!(agent = %self.descriptor.id, job_id = %request.job.id, error = %e, "Falling back to relay");
                    }
                    Err(e) => return Err(e),
                }
            } else if !self.transport.has_relay() {
                return Err(HiveError::Transport {
                    agent: self.descriptor.id.clone(),
                    message: "agent is degraded".into(),
                });
            }
        }
        self.dispatch_relay(request).await
    }

    /// Write the relay instruction for this job attempt, at most once
    pub async fn dispatch_relay(&self, request: &InvocationRequest) -> Result<ChannelOutcome> {
        let agent = &self.descriptor.id;
        let key = (request.job.id, request.attempt);
        if self.instructed.lock().contains(&key) {
            debug!(agent = %agent, job_id = %request.job.id, "Relay instruction already written");
            return Ok(ChannelOutcome::Pending);
        }

        let path = instruction_path(agent, request.job.id, request.attempt);
        if self.relay.exists(&path).await? {
            debug!(agent = %agent, job_id = %request.job.id, path = %path, "Relay instruction already on the relay");
            self.instructed.lock().insert(key);
            return Ok(ChannelOutcome::Pending);
        }
        let document = render_instruction(agent, request)?;
        let created = self.relay.create_file(&path, &document).await?;
        self.instructed.lock().insert(key);

        if created {
            info!(agent = %agent, job_id = %request.job.id, path = %path, "Relay instruction written");
        } else {
            debug!(agent = %agent, job_id = %request.job.id, path = %path, "Relay instruction existed");
        }
        Ok(ChannelOutcome::Pending)
    }

    /// Forget a finished attempt's instruction
    pub fn forget(&self, job: JobId, attempt: u32) {
        self.instructed.lock().remove(&(job, attempt));
    }

    /// One non-blocking look for the job's relay response
    pub async fn poll_relay(&self, job: &Job) -> Result<ChannelOutcome> {
        let agent = &self.descriptor.id;
        let path = response_path(agent, job.id, job.attempt);
        let Some(raw) = self.relay.read_file(&path).await? else {
            return Ok(ChannelOutcome::Pending);
        };
        match parse_reply(agent, &raw) {
            Ok(reply) => Ok(ChannelOutcome::Reply {
                reply,
                via: Via::Relay,
            }),
            Err(e) => {
                warn!(agent = %agent, job_id = %job.id, path = %path, raw = %raw, error = %e, "Malformed relay response");
                Err(e)
            }
        }
    }

    pub async fn health_check(&self) -> bool {
        match self.transport.live() {
            Some(invoker) => invoker.health_check().await,
            None => true,
        }
    }

    /// Probe a degraded agent whose cool-down has elapsed.
    ///
    /// Returns `Some(true)` when the agent recovered.
    pub async fn probe(&self) -> Option<bool> {
        if !self.health.needs_probe() {
            return None;
        }
        let agent = &self.descriptor.id;
        if self.health_check().await {
            self.health.probe_succeeded();
            info!(agent = %agent, "Agent recovered");
            let _ = self.event_tx.send(Event::AgentRecovered {
                agent: agent.clone(),
            });
            Some(true)
        } else {
            self.health.probe_failed();
            debug!(agent = %agent, "Recovery probe failed");
            Some(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentInvoker;
    use crate::config::HealthConfig;
    use crate::relay::MemoryRelay;
    use crate::types::Usage;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl AgentInvoker for Flaky {
        async fn invoke(
            &self,
            request: &InvocationRequest,
        ) -> std::result::Result<AgentReply, InvokeFailure> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(InvokeFailure::transport(
                    &AgentId::from("a"),
                    "connection reset",
                )
                .with_usage(Usage::new(10, 0, 0.01)));
            }
            Ok(AgentReply::completed(format!("done {}", request.job.task.description)))
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            backoff_base_ms: 1,
            backoff_max_ms: 2,
        }
    }

    fn channel(
        method: TransportMethod,
        failures: u32,
        relay: Arc<MemoryRelay>,
        ledger: Arc<CostLedger>,
    ) -> AccessChannel {
        let descriptor = AgentDescriptor::new("a", method).with_max_concurrent(1);
        let invoker: Arc<dyn AgentInvoker> = Arc::new(Flaky {
            failures,
            calls: AtomicU32::new(0),
        });
        let transport = Transport::from_config(&descriptor.id, method, Some(invoker)).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        AccessChannel::new(
            descriptor,
            transport,
            relay,
            ledger,
            HealthTracker::new(HealthConfig::default()),
            fast_retry(),
            1,
            tx,
        )
    }

    #[tokio::test]
    async fn test_retry_then_success_bills_failed_attempts() {
        let ledger = Arc::new(CostLedger::new());
        let ch = channel(TransportMethod::Live, 2, Arc::new(MemoryRelay::new()), ledger.clone());
        let request = InvocationRequest::new(Job::new("analysis", "x"), Vec::new());
        let reply = ch.invoke(&request).await.unwrap();
        assert_eq!(reply.content, "done x");
        assert_eq!(ledger.entries(&AgentId::from("a")).len(), 2);
    }

    #[tokio::test]
    async fn test_live_only_exhaustion_is_an_error() {
        let ch = channel(
            TransportMethod::Live,
            10,
            Arc::new(MemoryRelay::new()),
            Arc::new(CostLedger::new()),
        );
        let request = InvocationRequest::new(Job::new("analysis", "x"), Vec::new());
        let err = ch.invoke_with_fallback(&request).await.unwrap_err();
        assert!(matches!(err, HiveError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_hybrid_falls_back_once() {
        let relay = Arc::new(MemoryRelay::new());
        let ch = channel(TransportMethod::Hybrid, 10, relay.clone(), Arc::new(CostLedger::new()));
        let request = InvocationRequest::new(Job::new("analysis", "x"), Vec::new());

        assert_eq!(ch.invoke_with_fallback(&request).await.unwrap(), ChannelOutcome::Pending);
        assert!(ch.health().is_degraded());
        // degraded now, goes straight to the relay, no new instruction
        assert_eq!(ch.invoke_with_fallback(&request).await.unwrap(), ChannelOutcome::Pending);
        assert_eq!(relay.inbox(&AgentId::from("a")).len(), 1);
    }

    #[tokio::test]
    async fn test_forgotten_attempt_is_not_rewritten() {
        let relay = Arc::new(MemoryRelay::new());
        let ch = channel(TransportMethod::Relay, 0, relay.clone(), Arc::new(CostLedger::new()));
        let job = Job::new("analysis", "x");
        let request = InvocationRequest::new(job.clone(), Vec::new());

        ch.dispatch_relay(&request).await.unwrap();
        ch.forget(job.id, 1);
        assert!(ch.instructed.lock().is_empty());

        let path = instruction_path(&AgentId::from("a"), job.id, 1);
        let before = relay.get(&path).unwrap();
        assert_eq!(ch.dispatch_relay(&request).await.unwrap(), ChannelOutcome::Pending);
        assert_eq!(relay.get(&path).unwrap(), before);
        assert_eq!(relay.inbox(&AgentId::from("a")).len(), 1);
    }

    #[tokio::test]
    async fn test_poll_relay() {
        let relay = Arc::new(MemoryRelay::new());
        let ch = channel(TransportMethod::Hybrid, 0, relay.clone(), Arc::new(CostLedger::new()));
        let job = Job::new("analysis", "x");
        assert_eq!(ch.poll_relay(&job).await.unwrap(), ChannelOutcome::Pending);

        let path = response_path(&AgentId::from("a"), job.id, 1);
        relay.create_file(&path, r#"{"status":"completed","content":"ok"}"#).await.unwrap();
        match ch.poll_relay(&job).await.unwrap() {
            ChannelOutcome::Reply { reply, via } => {
                assert_eq!(reply.content, "ok");
                assert_eq!(via, Via::Relay);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_gate_capacity_and_release() {
        let ch = channel(
            TransportMethod::Live,
            0,
            Arc::new(MemoryRelay::new()),
            Arc::new(CostLedger::new()),
        );
        let first = ch.try_enqueue().unwrap();
        let second = ch.try_enqueue().unwrap();
        assert!(ch.try_enqueue().is_none());
        assert!(ch.is_saturated());

        let permit = first.acquire().await.unwrap();
        assert_eq!(ch.load(), 2);
        drop(permit);
        drop(second);
        assert_eq!(ch.load(), 0);
    }

    #[tokio::test]
    async fn test_try_acquire_without_waiting() {
        let ch = channel(
            TransportMethod::Live,
            0,
            Arc::new(MemoryRelay::new()),
            Arc::new(CostLedger::new()),
        );
        let held = ch.force_enqueue().try_acquire().ok().unwrap();
        let waiting = ch.force_enqueue().try_acquire().err().unwrap();
        assert_eq!(ch.load(), 2);
        drop(held);
        let _permit = waiting.try_acquire().ok().unwrap();
        assert_eq!(ch.load(), 1);
    }

    #[tokio::test]
    async fn test_degraded_live_agent_is_not_routable() {
        let ch = channel(
            TransportMethod::Live,
            10,
            Arc::new(MemoryRelay::new()),
            Arc::new(CostLedger::new()),
        );
        assert!(ch.is_routable());
        let request = InvocationRequest::new(Job::new("analysis", "x"), Vec::new());
        let _ = ch.invoke(&request).await;
        assert!(!ch.is_routable());
    }
}
