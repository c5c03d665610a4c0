//! Main orchestrator - drives the hive from a single control loop
//!
//! The loop owns no job state. It reacts to three things: operations from a
//! [`HiveChannel`], completion notices from the tasks it spawned, and a
//! maintenance tick. Every pending job is driven by its own tokio task, so a
//! slow agent never holds up the loop; relay waits are timers, not workers.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument};

use crate::channel::{ChannelPair, HiveChannel};
use crate::error::Result;
use crate::hive::{DispatchOutcome, HiveBuilder, HiveHandle};
use crate::job::JobStatus;
use crate::protocol::{Event, Op};
use crate::types::JobId;

#[derive(Debug, Clone, Copy)]
enum Drive {
    Dispatch,
    Recheck,
    Continue,
}

enum Wake {
    Done {
        job_id: JobId,
        outcome: Result<DispatchOutcome>,
    },
    RecheckDue(JobId),
    Maintained {
        resumed: Vec<JobId>,
        relay_due: Vec<JobId>,
    },
}

/// The hive's control loop
pub struct Orchestrator {
    hive: HiveHandle,
    op_rx: mpsc::UnboundedReceiver<Op>,
    event_tx: mpsc::UnboundedSender<Event>,
    wake_tx: mpsc::UnboundedSender<Wake>,
    wake_rx: mpsc::UnboundedReceiver<Wake>,
    /// Jobs a spawned task is currently driving
    running: HashSet<JobId>,
    /// Jobs with a relay re-check timer armed
    scheduled: HashSet<JobId>,
    maintaining: bool,
}

impl Orchestrator {
    /// Create an orchestrator for a hive built with `channels.event_tx`
    pub fn new(hive: HiveHandle, channels: ChannelPair) -> Self {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        Self {
            hive,
            op_rx: channels.op_rx,
            event_tx: channels.event_tx,
            wake_tx,
            wake_rx,
            running: HashSet::new(),
            scheduled: HashSet::new(),
            maintaining: false,
        }
    }

    /// Build the hive and return a channel for talking to the loop
    pub fn with_channel(builder: HiveBuilder) -> Result<(Self, HiveChannel)> {
        let (channel, pair) = HiveChannel::new();
        let hive = builder.events(pair.event_tx.clone()).build()?;
        Ok((Self::new(hive, pair), channel))
    }

    pub fn hive(&self) -> &HiveHandle {
        &self.hive
    }

    /// Run until [`Op::Shutdown`] or every channel handle is dropped
    #[instrument(skip(self))]
    pub async fn run(mut self) -> Result<()> {
        info!(agents = self.hive.channels().count(), "Starting hive orchestrator");

        for job_id in self.hive.reconcile_restored()? {
            self.spawn_drive(job_id, Drive::Recheck);
        }
        self.dispatch_ready();

        let period = Duration::from_millis(self.hive.config().policy.maintenance_interval_ms.max(1));
        let mut maintenance = tokio::time::interval(period);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                op = self.op_rx.recv() => match op {
                    Some(Op::Shutdown) | None => break,
                    Some(op) => {
                        if let Err(e) = self.handle_op(op) {
                            error!(error = %e, "Error handling operation");
                            let _ = self.event_tx.send(Event::Error { message: e.to_string() });
                        }
                        self.dispatch_ready();
                    }
                },
                Some(wake) = self.wake_rx.recv() => self.handle_wake(wake),
                _ = maintenance.tick() => self.maintain(),
            }
        }

        info!(running = self.running.len(), "Hive orchestrator stopped");
        Ok(())
    }

    fn handle_op(&mut self, op: Op) -> Result<()> {
        match op {
            Op::CreateJob { job } => {
                self.hive.submit(*job)?;
            }
            Op::ApproveJob { job_id } => {
                self.hive.approve(job_id)?;
            }
            Op::CancelJob { job_id, reason } => {
                self.hive.cancel(job_id, reason)?;
            }
            Op::ResolveEscalation {
                escalation_id,
                answer,
                resolution,
            } => {
                let job = self
                    .hive
                    .resolve_escalation(escalation_id, &answer, resolution)?;
                if job.status == JobStatus::InProgress {
                    self.spawn_drive(job.id, Drive::Continue);
                }
            }
            Op::Shutdown => {}
        }
        Ok(())
    }

    fn handle_wake(&mut self, wake: Wake) {
        match wake {
            Wake::Done { job_id, outcome } => {
                self.running.remove(&job_id);
                match outcome {
                    Ok(DispatchOutcome::Pending) => self.schedule_recheck(job_id),
                    // retried once capacity frees up or on the next tick
                    Ok(DispatchOutcome::Deferred) => {}
                    Ok(outcome) => {
                        debug!(job_id = %job_id, outcome = ?outcome, "Job drive finished");
                        self.dispatch_ready();
                    }
                    Err(e) => {
                        error!(job_id = %job_id, error = %e, "Job drive failed");
                        let _ = self.event_tx.send(Event::Error {
                            message: format!("job {job_id}: {e}"),
                        });
                    }
                }
            }
            Wake::RecheckDue(job_id) => {
                self.scheduled.remove(&job_id);
                self.spawn_drive(job_id, Drive::Recheck);
            }
            Wake::Maintained { resumed, relay_due } => {
                self.maintaining = false;
                for job_id in resumed {
                    self.spawn_drive(job_id, Drive::Continue);
                }
                for job_id in relay_due {
                    self.spawn_drive(job_id, Drive::Recheck);
                }
                self.dispatch_ready();
            }
        }
    }

    /// Spawn a dispatch task for every approved pending job, highest
    /// priority first
    fn dispatch_ready(&mut self) {
        for job in self.hive.store().dispatchable() {
            self.spawn_drive(job.id, Drive::Dispatch);
        }
    }

    fn spawn_drive(&mut self, job_id: JobId, drive: Drive) {
        if !self.running.insert(job_id) {
            return;
        }
        let hive = self.hive.clone();
        let wake_tx = self.wake_tx.clone();
        tokio::spawn(async move {
            let outcome = match drive {
                Drive::Dispatch => hive.dispatch(job_id).await,
                Drive::Recheck => hive.recheck_relay(job_id, Utc::now()).await,
                Drive::Continue => hive.continue_job(job_id).await,
            };
            let _ = wake_tx.send(Wake::Done { job_id, outcome });
        });
    }

    /// Arm one re-check at `min(now + poll_interval, deadline)`
    fn schedule_recheck(&mut self, job_id: JobId) {
        if !self.scheduled.insert(job_id) {
            return;
        }
        let poll = self.hive.config().relay.poll_interval();
        let delay = self
            .hive
            .store()
            .job(job_id)
            .map(|job| {
                (job.effective_deadline() - Utc::now())
                    .to_std()
                    .unwrap_or_default()
                    .min(poll)
            })
            .unwrap_or(poll);

        let wake_tx = self.wake_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = wake_tx.send(Wake::RecheckDue(job_id));
        });
    }

    fn maintain(&mut self) {
        if self.maintaining {
            return;
        }
        self.maintaining = true;
        let hive = self.hive.clone();
        let wake_tx = self.wake_tx.clone();
        tokio::spawn(async move {
            let now = Utc::now();
            let resumed = hive.expire_escalations(now).unwrap_or_else(|e| {
                error!(error = %e, "Escalation sweep failed");
                Vec::new()
            });
            let relay_due = hive.sweep_deadlines(now).unwrap_or_else(|e| {
                error!(error = %e, "Deadline sweep failed");
                Vec::new()
            });
            hive.recover_agents().await;
            let _ = wake_tx.send(Wake::Maintained { resumed, relay_due });
        });
    }
}
