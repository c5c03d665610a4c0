//! Read-only summary of the hive for external viewers

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TransportMethod;
use crate::escalation::Escalation;
use crate::hive::Hive;
use crate::job::JobStatus;
use crate::ledger::LedgerEntry;
use crate::types::AgentId;

const RECENT_LEDGER_ENTRIES: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentView {
    pub agent: AgentId,
    pub name: String,
    pub transport: TransportMethod,
    pub enabled: bool,
    pub degraded: bool,
    pub health_score: f64,
    /// Jobs admitted and not yet finished
    pub load: usize,
    pub spent_today: f64,
    pub spent_this_month: f64,
    pub remaining_today: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub jobs_by_status: BTreeMap<String, usize>,
    pub open_escalations: Vec<Escalation>,
    pub agents: Vec<AgentView>,
    /// Newest last
    pub recent_ledger: Vec<LedgerEntry>,
}

impl DashboardSnapshot {
    pub fn collect(hive: &Hive, now: DateTime<Utc>) -> Self {
        let counts = hive.store().counts_by_status();
        let jobs_by_status = JobStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), counts.get(s).copied().unwrap_or(0)))
            .collect();

        let ledger = hive.ledger();
        let agents = hive
            .channels()
            .map(|ch| {
                let descriptor = ch.descriptor();
                AgentView {
                    agent: descriptor.id.clone(),
                    name: descriptor.display_name().to_string(),
                    transport: ch.method(),
                    enabled: descriptor.enabled,
                    degraded: ch.health().is_degraded(),
                    health_score: ch.health().score(),
                    load: ch.load(),
                    spent_today: ledger.spent_today(&descriptor.id, now),
                    spent_this_month: ledger.spent_this_month(&descriptor.id, now),
                    remaining_today: ledger
                        .remaining_today(&descriptor.id, descriptor.daily_budget_usd, now)
                        .max(0.0),
                }
            })
            .collect();

        let mut recent_ledger = ledger.all_entries();
        let skip = recent_ledger.len().saturating_sub(RECENT_LEDGER_ENTRIES);
        recent_ledger.drain(..skip);

        Self {
            generated_at: now,
            jobs_by_status,
            open_escalations: hive.store().open_escalations(),
            agents,
            recent_ledger,
        }
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs_by_status
            .get(status.as_str())
            .copied()
            .unwrap_or(0)
    }
}
