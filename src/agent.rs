//! Agent invocation boundary
//!
//! Concrete providers implement [`AgentInvoker`]; the core depends on nothing
//! else. Which transport an agent uses is fixed at configuration load as a
//! [`Transport`] variant.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::TransportMethod;
use crate::context::ThreadEntry;
use crate::error::{HiveError, Result};
use crate::job::Job;
use crate::response::AgentReply;
use crate::types::{AgentId, Usage};

/// Everything an agent needs to work on a job attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub job: Job,
    pub attempt: u32,
    /// Most recent thread entries, oldest first
    pub context: Vec<ThreadEntry>,
}

impl InvocationRequest {
    pub fn new(job: Job, context: Vec<ThreadEntry>) -> Self {
        Self {
            attempt: job.attempt,
            job,
            context,
        }
    }
}

/// A failed live call, with whatever it cost before failing
#[derive(Debug)]
pub struct InvokeFailure {
    pub error: HiveError,
    pub usage: Usage,
}

impl InvokeFailure {
    pub fn transport(agent: &AgentId, message: impl Into<String>) -> Self {
        HiveError::Transport {
            agent: agent.clone(),
            message: message.into(),
        }
        .into()
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }
}

impl From<HiveError> for InvokeFailure {
    fn from(error: HiveError) -> Self {
        Self {
            error,
            usage: Usage::default(),
        }
    }
}

/// A live request/response channel to one agent
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, request: &InvocationRequest) -> std::result::Result<AgentReply, InvokeFailure>;

    async fn health_check(&self) -> bool;
}

/// Closed set of ways to reach an agent
#[derive(Clone)]
pub enum Transport {
    Live(Arc<dyn AgentInvoker>),
    Relay,
    /// Live first, relay on failure
    Hybrid(Arc<dyn AgentInvoker>),
}

impl Transport {
    /// Build the variant a descriptor asks for
    pub fn from_config(
        agent: &AgentId,
        method: TransportMethod,
        invoker: Option<Arc<dyn AgentInvoker>>,
    ) -> Result<Self> {
        match (method, invoker) {
            (TransportMethod::Relay, _) => Ok(Transport::Relay),
            (TransportMethod::Live, Some(inv)) => Ok(Transport::Live(inv)),
            (TransportMethod::Hybrid, Some(inv)) => Ok(Transport::Hybrid(inv)),
            (method, None) => Err(HiveError::Config(format!(
                "agent {agent} uses {method:?} transport but no live invoker is registered"
            ))),
        }
    }

    pub fn live(&self) -> Option<&Arc<dyn AgentInvoker>> {
        match self {
            Transport::Live(inv) | Transport::Hybrid(inv) => Some(inv),
            Transport::Relay => None,
        }
    }

    pub fn has_relay(&self) -> bool {
        matches!(self, Transport::Relay | Transport::Hybrid(_))
    }

    pub fn method(&self) -> TransportMethod {
        match self {
            Transport::Live(_) => TransportMethod::Live,
            Transport::Relay => TransportMethod::Relay,
            Transport::Hybrid(_) => TransportMethod::Hybrid,
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transport::{:?}", self.method())
    }
}
