//! # Hivemind
//!
//! Orchestration core for a team of heterogeneous AI agents.
//!
//! Jobs are routed to the agent best suited for them, run over a live
//! request/response channel or an asynchronous file relay, and tracked
//! through a strict lifecycle. Spend is metered per agent against daily and
//! monthly budgets, and anything the agents cannot settle among themselves
//! is escalated to a human.
//!
//! ## Architecture
//!
//! ```text
//!   HiveChannel ──Op──▶ ┌──────────────────────────────────────────────┐
//!               ◀─Event─│               ORCHESTRATOR loop              │
//!                       └──────────────────────┬───────────────────────┘
//!                                              │ spawns one task per job
//!                                              ▼
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   │                               HIVE                               │
//!   │  ┌──────────┐  ┌────────────┐  ┌───────────┐  ┌───────────────┐  │
//!   │  │ JobStore │  │ TaskRouter │  │ CostLedger│  │ ThreadContext │  │
//!   │  └──────────┘  └────────────┘  └───────────┘  └───────────────┘  │
//!   └───────────────┬──────────────────────┬──────────────────────┬────┘
//!                   ▼                      ▼                      ▼
//!           ┌──────────────┐       ┌──────────────┐       ┌──────────────┐
//!           │AccessChannel │       │AccessChannel │       │AccessChannel │
//!           │    (live)    │       │   (hybrid)   │       │   (relay)    │
//!           └──────┬───────┘       └───┬──────┬───┘       └──────┬───────┘
//!                  ▼                   ▼      ▼                  ▼
//!            AgentInvoker        AgentInvoker RelayStore     RelayStore
//! ```
//!
//! ## Key Concepts
//!
//! - **Job**: a unit of requested work with a lifecycle state machine
//! - **Agent**: a worker reached through a live invoker, the relay, or both
//! - **Thread**: the shared history of jobs that hand work to each other
//! - **Escalation**: a blocking question for a human
//! - **Ledger**: append-only record of what every call cost

pub mod access;
pub mod agent;
pub mod channel;
pub mod config;
pub mod context;
pub mod dashboard;
pub mod error;
pub mod escalation;
pub mod health;
pub mod hive;
pub mod job;
pub mod ledger;
pub mod orchestrator;
pub mod protocol;
pub mod relay;
pub mod requests;
pub mod response;
pub mod retry;
pub mod router;
pub mod store;
pub mod types;

pub use access::{AccessChannel, ChannelOutcome};
pub use agent::{AgentInvoker, InvocationRequest, InvokeFailure, Transport};
pub use channel::{ChannelPair, HiveChannel};
pub use config::{AgentDescriptor, HiveConfig, TransportMethod};
pub use dashboard::DashboardSnapshot;
pub use error::{HiveError, Result};
pub use escalation::{Escalation, EscalationStatus, Resolution};
pub use hive::{DispatchOutcome, Hive, HiveBuilder, HiveHandle};
pub use job::{Job, JobStatus};
pub use ledger::{CostLedger, LedgerEntry};
pub use orchestrator::Orchestrator;
pub use protocol::{Event, Op};
pub use relay::{FsRelay, MemoryRelay, RelayStore};
pub use response::{AgentReply, Response, ResponseStatus, Via};
pub use store::JobStore;
pub use types::{AgentId, EscalationId, JobId, Priority, ThreadId, Usage};
