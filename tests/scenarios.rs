//! End-to-end behaviour of the hive against scripted agents

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use hivemind::config::{HealthConfig, RetryConfig};
use hivemind::escalation::ExpiryPolicy;
use hivemind::job::is_valid_path;
use hivemind::relay::response_path;
use hivemind::{
    AgentDescriptor, AgentId, AgentInvoker, AgentReply, DispatchOutcome, Hive, HiveConfig,
    HiveError, HiveHandle, InvocationRequest, InvokeFailure, Job, JobId, JobStatus, MemoryRelay,
    RelayStore, Resolution, TransportMethod, Usage,
};

type Reply = std::result::Result<AgentReply, InvokeFailure>;

/// Invoker driven by a closure of (request, call number)
struct Scripted<F> {
    script: F,
    calls: AtomicU32,
    healthy: bool,
}

impl<F> Scripted<F>
where
    F: Fn(&InvocationRequest, u32) -> Reply + Send + Sync + 'static,
{
    fn new(script: F) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicU32::new(0),
            healthy: true,
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> AgentInvoker for Scripted<F>
where
    F: Fn(&InvocationRequest, u32) -> Reply + Send + Sync + 'static,
{
    async fn invoke(&self, request: &InvocationRequest) -> Reply {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(request, n)
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }
}

/// Replies only once released
struct Held {
    release: Arc<Notify>,
}

#[async_trait]
impl AgentInvoker for Held {
    async fn invoke(&self, _request: &InvocationRequest) -> Reply {
        self.release.notified().await;
        Ok(AgentReply::completed("late answer").with_usage(Usage::new(100, 50, 0.2)))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

fn config(agents: Vec<AgentDescriptor>) -> HiveConfig {
    let mut config = HiveConfig::default();
    config.retry = RetryConfig {
        max_retries: 2,
        backoff_base_ms: 1,
        backoff_max_ms: 2,
    };
    config.agents = agents;
    config
}

fn relay_agent(id: &str, task_type: &str, affinity: f64) -> AgentDescriptor {
    AgentDescriptor::new(id, TransportMethod::Relay).with_affinity(task_type, affinity)
}

fn build(config: HiveConfig, relay: &Arc<MemoryRelay>) -> HiveHandle {
    Hive::builder(config).relay(relay.clone()).build().unwrap()
}

#[tokio::test]
async fn routes_to_highest_affinity() {
    let relay = Arc::new(MemoryRelay::new());
    let hive = build(
        config(vec![
            relay_agent("A", "analysis", 0.9),
            relay_agent("B", "analysis", 0.5),
            relay_agent("C", "analysis", 0.0),
        ]),
        &relay,
    );
    let id = hive.submit(Job::new("analysis", "quarterly numbers")).unwrap();

    assert_eq!(hive.dispatch(id).await.unwrap(), DispatchOutcome::Pending);
    let job = hive.store().require(id).unwrap();
    assert_eq!(job.to_agent, Some(AgentId::from("A")));
    assert_eq!(relay.inbox(&AgentId::from("A")).len(), 1);
}

#[tokio::test]
async fn hybrid_falls_back_to_relay_after_retries() {
    let relay = Arc::new(MemoryRelay::new());
    let invoker = Scripted::new(|_, _| Err(InvokeFailure::transport(&AgentId::from("H"), "connection refused")));
    let hive = Hive::builder(config(vec![AgentDescriptor::new("H", TransportMethod::Hybrid)
        .with_affinity("coding", 0.8)]))
    .relay(relay.clone())
    .invoker("H", invoker.clone())
    .build()
    .unwrap();

    let id = hive.submit(Job::new("coding", "fix the build")).unwrap();
    assert_eq!(hive.dispatch(id).await.unwrap(), DispatchOutcome::Pending);
    assert_eq!(invoker.calls(), 3);
    assert_eq!(relay.inbox(&AgentId::from("H")).len(), 1);

    relay
        .create_file(&response_path(&AgentId::from("H"), id, 1), r#"{"status":"completed"}"#)
        .await
        .unwrap();
    assert_eq!(
        hive.recheck_relay(id, Utc::now()).await.unwrap(),
        DispatchOutcome::Finished(JobStatus::Completed)
    );
    let response = hive.store().accepted_response(id).unwrap();
    assert_eq!(response.via, hivemind::Via::Relay);
}

#[tokio::test]
async fn relay_past_deadline_times_out() {
    let relay = Arc::new(MemoryRelay::new());
    let hive = build(config(vec![relay_agent("R", "writing", 0.7)]), &relay);
    let job = Job::new("writing", "x").with_deadline(Utc::now() - chrono::Duration::minutes(1));
    let id = hive.submit(job).unwrap();

    assert_eq!(hive.dispatch(id).await.unwrap(), DispatchOutcome::Pending);
    assert_eq!(
        hive.recheck_relay(id, Utc::now()).await.unwrap(),
        DispatchOutcome::Finished(JobStatus::Failed)
    );
    let job = hive.store().require(id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.status_detail.as_deref(), Some("relay timeout"));
    assert_eq!(hive.channel(&AgentId::from("R")).unwrap().load(), 0);
}

#[tokio::test]
async fn teammate_block_spawns_child_job() {
    let relay = Arc::new(MemoryRelay::new());
    let invoker = Scripted::new(|_, _| {
        Ok(AgentReply::completed(
            "Draft done.\n[[REQUEST_TEAMMATE]]\nagent: B\nrequest: double-check the totals\n[[/REQUEST_TEAMMATE]]\n",
        ))
    });
    let hive = Hive::builder(config(vec![
        AgentDescriptor::new("A", TransportMethod::Live).with_affinity("analysis", 0.9),
        relay_agent("B", "analysis", 0.5),
    ]))
    .relay(relay.clone())
    .invoker("A", invoker)
    .build()
    .unwrap();

    let parent = hive.submit(Job::new("analysis", "draft")).unwrap();
    assert_eq!(
        hive.dispatch(parent).await.unwrap(),
        DispatchOutcome::Finished(JobStatus::Completed)
    );

    let children = hive.store().children(parent);
    assert_eq!(children.len(), 1);
    let child = &children[0];
    assert_eq!(child.status, JobStatus::Pending);
    assert_eq!(child.parent_job, Some(parent));
    assert_eq!(child.to_agent, Some(AgentId::from("B")));
    assert_eq!(child.origin, "A");

    // child runs on the parent's thread and sees its history
    assert_eq!(hive.dispatch(child.id).await.unwrap(), DispatchOutcome::Pending);
    let instruction = relay.get(&relay.inbox(&AgentId::from("B"))[0]).unwrap();
    assert!(instruction.contains("Draft done."));
}

#[tokio::test]
async fn job_over_remaining_budget_is_never_assigned() {
    let relay = Arc::new(MemoryRelay::new());
    let hive = build(
        config(vec![relay_agent("A", "analysis", 0.9).with_daily_budget(10.0)]),
        &relay,
    );
    let agent = AgentId::from("A");
    hive.ledger()
        .record(&agent, hivemind::JobId::new(), Usage::new(0, 0, 8.0), Utc::now());

    let id = hive
        .submit(Job::new("analysis", "big").with_budget(5.0))
        .unwrap();
    assert_eq!(
        hive.dispatch(id).await.unwrap(),
        DispatchOutcome::Finished(JobStatus::Failed)
    );
    let transitions = hive.store().transitions(id);
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].to, JobStatus::Failed);
    assert!(relay.inbox(&agent).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_admission_respects_budget() {
    let relay = Arc::new(MemoryRelay::new());
    let hive = build(
        config(vec![relay_agent("A", "analysis", 0.9)
            .with_daily_budget(10.0)
            .with_max_concurrent(8)]),
        &relay,
    );
    hive.ledger()
        .record(&AgentId::from("A"), hivemind::JobId::new(), Usage::new(0, 0, 4.0), Utc::now());

    let ids: Vec<_> = (0..8)
        .map(|i| {
            hive.submit(Job::new("analysis", format!("job {i}")).with_budget(5.0))
                .unwrap()
        })
        .collect();
    let tasks: Vec<_> = ids
        .iter()
        .map(|&id| {
            let hive = hive.clone();
            tokio::spawn(async move { hive.dispatch(id).await.unwrap() })
        })
        .collect();

    let mut admitted = 0;
    for task in tasks {
        if task.await.unwrap() == DispatchOutcome::Pending {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(relay.inbox(&AgentId::from("A")).len(), 1);
}

#[tokio::test]
async fn relay_instruction_is_written_once() {
    let relay = Arc::new(MemoryRelay::new());
    let invoker = Scripted::new(|_, _| Err(InvokeFailure::transport(&AgentId::from("H"), "down")));
    let hive = Hive::builder(config(vec![AgentDescriptor::new("H", TransportMethod::Hybrid)
        .with_affinity("coding", 0.8)]))
    .relay(relay.clone())
    .invoker("H", invoker)
    .build()
    .unwrap();

    let id = hive.submit(Job::new("coding", "x")).unwrap();
    assert_eq!(hive.dispatch(id).await.unwrap(), DispatchOutcome::Pending);

    // a second fallback for the same job attempt
    let channel = hive.channel(&AgentId::from("H")).unwrap();
    let request = InvocationRequest::new(hive.store().require(id).unwrap(), Vec::new());
    channel.invoke_with_fallback(&request).await.unwrap();
    assert_eq!(
        hive.continue_job(id).await.unwrap(),
        DispatchOutcome::Skipped(JobStatus::InProgress)
    );
    assert_eq!(relay.inbox(&AgentId::from("H")).len(), 1);
}

#[tokio::test]
async fn ledger_totals_are_monotonic_within_a_day() {
    let relay = Arc::new(MemoryRelay::new());
    let invoker = Scripted::new(|_, n| {
        Ok(AgentReply::completed(format!("answer {n}"))
            .with_usage(Usage::new(10, 10, 0.01 * (n + 1) as f64)))
    });
    let hive = Hive::builder(config(vec![AgentDescriptor::new("L", TransportMethod::Live)
        .with_affinity("qa", 1.0)]))
    .relay(relay)
    .invoker("L", invoker)
    .build()
    .unwrap();

    for i in 0..5 {
        let id = hive.submit(Job::new("qa", format!("q{i}"))).unwrap();
        hive.dispatch(id).await.unwrap();
    }
    let entries = hive.ledger().entries(&AgentId::from("L"));
    assert_eq!(entries.len(), 5);
    for pair in entries.windows(2) {
        assert!(pair[1].sequence > pair[0].sequence);
        if pair[1].period_day == pair[0].period_day {
            assert!(pair[1].day_total >= pair[0].day_total);
        }
    }
}

#[tokio::test]
async fn escalation_blocks_completion_until_resolved() {
    let relay = Arc::new(MemoryRelay::new());
    let invoker = Scripted::new(|_, _| {
        Ok(AgentReply::completed(
            "[[NEED_HUMAN]]\nreason: two vendors tie\nquestion: Acme or Globex?\noptions: Acme | Globex\n[[/NEED_HUMAN]]",
        ))
    });
    let hive = Hive::builder(config(vec![AgentDescriptor::new("L", TransportMethod::Live)
        .with_affinity("procurement", 1.0)]))
    .relay(relay)
    .invoker("L", invoker)
    .build()
    .unwrap();

    let id = hive.submit(Job::new("procurement", "pick a vendor")).unwrap();
    assert_eq!(
        hive.dispatch(id).await.unwrap(),
        DispatchOutcome::Finished(JobStatus::Escalated)
    );
    assert_ne!(hive.store().require(id).unwrap().status, JobStatus::Completed);

    let esc = hive.store().open_escalations().pop().unwrap();
    assert_eq!(esc.reason, "two vendors tie");
    let job = hive
        .resolve_escalation(esc.id, "Acme", Resolution::Complete)
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(is_valid_path(&hive.store().transitions(id)));
}

#[tokio::test]
async fn malformed_block_escalates_instead_of_guessing() {
    let relay = Arc::new(MemoryRelay::new());
    let invoker = Scripted::new(|_, _| {
        Ok(AgentReply::completed(
            "[[REQUEST_TEAMMATE]]\nplease ask someone\n[[/REQUEST_TEAMMATE]]",
        ))
    });
    let hive = Hive::builder(config(vec![AgentDescriptor::new("L", TransportMethod::Live)
        .with_affinity("qa", 1.0)]))
    .relay(relay)
    .invoker("L", invoker)
    .build()
    .unwrap();

    let id = hive.submit(Job::new("qa", "x")).unwrap();
    assert_eq!(
        hive.dispatch(id).await.unwrap(),
        DispatchOutcome::Finished(JobStatus::Escalated)
    );
    assert!(hive.store().children(id).is_empty());
    let esc = hive.store().escalations_for(id).pop().unwrap();
    assert_eq!(esc.reason, "malformed request block");
}

#[tokio::test]
async fn cancelled_in_flight_job_ignores_late_response() {
    let relay = Arc::new(MemoryRelay::new());
    let release = Arc::new(Notify::new());
    let hive = Hive::builder(config(vec![AgentDescriptor::new("L", TransportMethod::Live)
        .with_affinity("qa", 1.0)]))
    .relay(relay)
    .invoker(
        "L",
        Arc::new(Held {
            release: release.clone(),
        }),
    )
    .build()
    .unwrap();

    let id = hive.submit(Job::new("qa", "slow")).unwrap();
    let runner = {
        let hive = hive.clone();
        tokio::spawn(async move { hive.dispatch(id).await })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        while hive.store().require(id).unwrap().status != JobStatus::InProgress {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    hive.cancel(id, Some("no longer needed".into())).unwrap();
    release.notify_one();
    assert_eq!(runner.await.unwrap().unwrap(), DispatchOutcome::Ignored);

    let job = hive.store().require(id).unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    let responses = hive.store().responses_for(id);
    assert_eq!(responses.len(), 1);
    assert!(!responses[0].accepted);
    assert!(hive.store().accepted_response(id).is_none());
    // the call still cost money
    assert_eq!(hive.ledger().entries(&AgentId::from("L")).len(), 1);
    assert_eq!(hive.channel(&AgentId::from("L")).unwrap().load(), 0);
    assert!(is_valid_path(&hive.store().transitions(id)));
}

#[tokio::test]
async fn expired_escalation_can_proceed_without_answer() {
    let relay = Arc::new(MemoryRelay::new());
    let invoker = Scripted::new(|request, _| {
        if request.attempt == 1 {
            Ok(AgentReply::completed("[[NEED_HUMAN]]\nquestion: ok?\n[[/NEED_HUMAN]]"))
        } else {
            Ok(AgentReply::completed("proceeded"))
        }
    });
    let mut config = config(vec![AgentDescriptor::new("L", TransportMethod::Live)
        .with_affinity("qa", 1.0)]);
    config.policy.escalation_expiry = ExpiryPolicy::Proceed;
    config.policy.escalation_timeout_secs = 60;
    let hive = Hive::builder(config)
        .relay(relay)
        .invoker("L", invoker)
        .build()
        .unwrap();

    let id = hive.submit(Job::new("qa", "x")).unwrap();
    hive.dispatch(id).await.unwrap();
    assert!(hive.expire_escalations(Utc::now()).unwrap().is_empty());

    let resumed = hive
        .expire_escalations(Utc::now() + chrono::Duration::minutes(5))
        .unwrap();
    assert_eq!(resumed, vec![id]);
    assert_eq!(
        hive.continue_job(id).await.unwrap(),
        DispatchOutcome::Finished(JobStatus::Completed)
    );
    assert_eq!(hive.store().accepted_response(id).unwrap().content, "proceeded");
    assert_eq!(hive.store().require(id).unwrap().attempt, 2);
}

#[tokio::test]
async fn degraded_agent_recovers_after_probe() {
    let relay = Arc::new(MemoryRelay::new());
    let invoker = Scripted::new(|_, n| {
        if n < 3 {
            Err(InvokeFailure::transport(&AgentId::from("L"), "timeout"))
        } else {
            Ok(AgentReply::completed("back"))
        }
    });
    let mut config = config(vec![AgentDescriptor::new("L", TransportMethod::Live)
        .with_affinity("qa", 1.0)]);
    config.health = HealthConfig {
        cooldown_secs: 0,
        ..HealthConfig::default()
    };
    let hive = Hive::builder(config)
        .relay(relay)
        .invoker("L", invoker)
        .build()
        .unwrap();

    let first = hive.submit(Job::new("qa", "x")).unwrap();
    assert_eq!(
        hive.dispatch(first).await.unwrap(),
        DispatchOutcome::Finished(JobStatus::Failed)
    );
    let agent = AgentId::from("L");
    assert!(hive.channel(&agent).unwrap().health().is_degraded());

    // a degraded live-only agent is not eligible
    let second = hive.submit(Job::new("qa", "y")).unwrap();
    assert_eq!(
        hive.dispatch(second).await.unwrap(),
        DispatchOutcome::Finished(JobStatus::Failed)
    );
    assert_eq!(
        hive.store().require(second).unwrap().status_detail.as_deref(),
        Some("no eligible agent")
    );

    assert_eq!(hive.recover_agents().await, vec![agent.clone()]);
    let third = hive.submit(Job::new("qa", "z")).unwrap();
    assert_eq!(
        hive.dispatch(third).await.unwrap(),
        DispatchOutcome::Finished(JobStatus::Completed)
    );
}

#[tokio::test]
async fn store_snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hive.json");
    let relay = Arc::new(MemoryRelay::new());
    let agent = AgentId::from("R");
    let hive = build(config(vec![relay_agent("R", "writing", 0.7)]), &relay);
    hive.ledger()
        .record(&agent, JobId::new(), Usage::new(1_000, 500, 8.0), Utc::now());
    let id = hive.submit(Job::new("writing", "x").with_budget(1.0)).unwrap();
    assert_eq!(hive.dispatch(id).await.unwrap(), DispatchOutcome::Pending);
    hive.save_snapshot(&path).await.unwrap();

    let (store, ledger) = hivemind::JobStore::load_snapshot(&path).await.unwrap();
    let restored = Hive::builder(config(vec![relay_agent("R", "writing", 0.7)]))
        .relay(relay.clone())
        .store(store)
        .ledger(ledger)
        .build()
        .unwrap();
    assert!((restored.ledger().spent_today(&agent, Utc::now()) - 8.0).abs() < 1e-9);
    assert_eq!(restored.reconcile_restored().unwrap(), vec![id]);
    let channel = restored.channel(&agent).unwrap().clone();
    assert_eq!(channel.load(), 1);

    // $8 spent plus the $1 still held by the restored job leaves $1
    let over = restored.submit(Job::new("writing", "y").with_budget(1.5)).unwrap();
    assert_eq!(
        restored.dispatch(over).await.unwrap(),
        DispatchOutcome::Finished(JobStatus::Failed)
    );
    let failed = restored.store().require(over).unwrap();
    assert!(failed.status_detail.unwrap().starts_with("budget exceeded"));
    assert_eq!(relay.inbox(&agent).len(), 1);

    relay
        .create_file(&response_path(&agent, id, 1), r#"{"status":"completed","content":"done"}"#)
        .await
        .unwrap();
    assert_eq!(
        restored.recheck_relay(id, Utc::now()).await.unwrap(),
        DispatchOutcome::Finished(JobStatus::Completed)
    );
    assert_eq!(channel.load(), 0);

    let next = restored.submit(Job::new("writing", "z").with_budget(1.5)).unwrap();
    assert_eq!(restored.dispatch(next).await.unwrap(), DispatchOutcome::Pending);
}

#[tokio::test]
async fn partially_written_relay_reply_keeps_waiting() {
    let relay = Arc::new(MemoryRelay::new());
    let agent = AgentId::from("R");
    let hive = build(config(vec![relay_agent("R", "writing", 0.7)]), &relay);
    let id = hive.submit(Job::new("writing", "x")).unwrap();
    assert_eq!(hive.dispatch(id).await.unwrap(), DispatchOutcome::Pending);

    let path = response_path(&agent, id, 1);
    relay.put(&path, r#"{"status":"comp"#);
    assert_eq!(
        hive.recheck_relay(id, Utc::now()).await.unwrap(),
        DispatchOutcome::Pending
    );
    assert_eq!(hive.store().require(id).unwrap().status, JobStatus::InProgress);

    relay.put(&path, r#"{"status":"completed","content":"done"}"#);
    assert_eq!(
        hive.recheck_relay(id, Utc::now()).await.unwrap(),
        DispatchOutcome::Finished(JobStatus::Completed)
    );
    assert_eq!(hive.store().accepted_response(id).unwrap().content, "done");
}

#[tokio::test]
async fn malformed_relay_reply_fails_once_overdue() {
    let relay = Arc::new(MemoryRelay::new());
    let agent = AgentId::from("R");
    let hive = build(config(vec![relay_agent("R", "writing", 0.7)]), &relay);
    let id = hive.submit(Job::new("writing", "x").with_timeout_secs(60)).unwrap();
    hive.dispatch(id).await.unwrap();

    relay.put(&response_path(&agent, id, 1), "not json at all");
    let later = Utc::now() + chrono::Duration::minutes(5);
    assert_eq!(
        hive.recheck_relay(id, later).await.unwrap(),
        DispatchOutcome::Finished(JobStatus::Failed)
    );
    let job = hive.store().require(id).unwrap();
    assert!(job.status_detail.unwrap().starts_with("Malformed response"));
    assert_eq!(hive.channel(&agent).unwrap().load(), 0);
}

#[tokio::test]
async fn deadline_sweep_keeps_live_slot_until_call_returns() {
    let relay = Arc::new(MemoryRelay::new());
    let release = Arc::new(Notify::new());
    let agent = AgentId::from("L");
    let hive = Hive::builder(config(vec![AgentDescriptor::new("L", TransportMethod::Live)
        .with_affinity("qa", 1.0)]))
    .relay(relay)
    .invoker(
        "L",
        Arc::new(Held {
            release: release.clone(),
        }),
    )
    .build()
    .unwrap();

    let id = hive.submit(Job::new("qa", "slow").with_timeout_secs(60)).unwrap();
    let runner = {
        let hive = hive.clone();
        tokio::spawn(async move { hive.dispatch(id).await })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        while hive.store().require(id).unwrap().status != JobStatus::InProgress {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    let relay_due = hive
        .sweep_deadlines(Utc::now() + chrono::Duration::minutes(5))
        .unwrap();
    assert!(relay_due.is_empty());
    let job = hive.store().require(id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.status_detail.as_deref(), Some("deadline exceeded"));
    // the call is still running against the agent
    let channel = hive.channel(&agent).unwrap().clone();
    assert_eq!(channel.load(), 1);

    release.notify_one();
    assert_eq!(runner.await.unwrap().unwrap(), DispatchOutcome::Ignored);
    assert_eq!(channel.load(), 0);
    assert_eq!(hive.store().require(id).unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn approval_required_before_dispatch() {
    let relay = Arc::new(MemoryRelay::new());
    let hive = build(config(vec![relay_agent("R", "writing", 0.7)]), &relay);
    let id = hive
        .submit(Job::new("writing", "x").requiring_approval())
        .unwrap();
    assert_eq!(
        hive.dispatch(id).await.unwrap(),
        DispatchOutcome::AwaitingApproval
    );
    let err = hive
        .store()
        .transition(id, JobStatus::Assigned, None)
        .unwrap_err();
    assert!(matches!(err, HiveError::ApprovalRequired(_)));
    assert!(relay.paths().is_empty());
}
