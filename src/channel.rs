//! Client side of the orchestrator loop

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::error::{HiveError, Result};
use crate::escalation::Resolution;
use crate::job::Job;
use crate::protocol::{Event, Op};
use crate::types::{EscalationId, JobId};

/// Orchestrator end of the channel
pub struct ChannelPair {
    pub op_rx: mpsc::UnboundedReceiver<Op>,
    pub event_tx: mpsc::UnboundedSender<Event>,
}

/// Handle for submitting operations and watching events
#[derive(Clone)]
pub struct HiveChannel {
    op_tx: mpsc::UnboundedSender<Op>,
    event_rx: Arc<Mutex<mpsc::UnboundedReceiver<Event>>>,
}

impl HiveChannel {
    /// Returns the client channel and the orchestrator's pair
    pub fn new() -> (Self, ChannelPair) {
        let (op_tx, op_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let channel = Self {
            op_tx,
            event_rx: Arc::new(Mutex::new(event_rx)),
        };
        (channel, ChannelPair { op_rx, event_tx })
    }

    pub fn send(&self, op: Op) -> Result<()> {
        self.op_tx
            .send(op)
            .map_err(|_| HiveError::ChannelClosed("orchestrator stopped".into()))
    }

    pub fn create_job(&self, job: Job) -> Result<JobId> {
        let id = job.id;
        self.send(Op::CreateJob { job: Box::new(job) })?;
        Ok(id)
    }

    pub fn approve_job(&self, job_id: JobId) -> Result<()> {
        self.send(Op::ApproveJob { job_id })
    }

    pub fn cancel_job(&self, job_id: JobId, reason: Option<String>) -> Result<()> {
        self.send(Op::CancelJob { job_id, reason })
    }

    pub fn resolve_escalation(
        &self,
        escalation_id: EscalationId,
        answer: impl Into<String>,
        resolution: Resolution,
    ) -> Result<()> {
        self.send(Op::ResolveEscalation {
            escalation_id,
            answer: answer.into(),
            resolution,
        })
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(Op::Shutdown)
    }

    /// Non-blocking
    pub fn try_recv(&self) -> Option<Event> {
        self.event_rx.try_lock().ok()?.try_recv().ok()
    }

    pub async fn recv(&self) -> Option<Event> {
        self.event_rx.lock().await.recv().await
    }

    pub fn is_closed(&self) -> bool {
        self.op_tx.is_closed()
    }
}
