//! Cost ledger and budget admission
//!
//! Each agent has its own book behind a mutex. Admission checks
//! ([`CostLedger::try_reserve`]) and appends ([`CostLedger::record`]) for an
//! agent take that same lock, so two jobs racing for the last dollars of a
//! daily budget cannot both pass. Entries are append-only; running totals
//! reset when a UTC day or calendar month boundary is crossed.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{HiveError, Result};
use crate::types::{AgentId, JobId, Usage};

/// One billed call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Global append order
    pub sequence: u64,
    pub agent: AgentId,
    pub job_id: JobId,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    /// Agent's spend for `period_day` including this entry
    pub day_total: f64,
    /// Agent's spend for `period_month` including this entry
    pub month_total: f64,
    pub period_day: NaiveDate,
    /// `YYYY-MM`
    pub period_month: String,
    pub recorded_at: DateTime<Utc>,
}

/// Budget ceilings checked at admission
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetLimits {
    pub daily_usd: f64,
    pub monthly_usd: Option<f64>,
}

impl BudgetLimits {
    fn headroom(self) -> f64 {
        self.monthly_usd
            .map_or(self.daily_usd, |monthly| monthly.min(self.daily_usd))
    }
}

/// Spend summary for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpend {
    pub agent: AgentId,
    pub spent_today: f64,
    pub spent_this_month: f64,
    pub reserved: f64,
    pub entries: usize,
}

fn month_key(now: DateTime<Utc>) -> (i32, u32) {
    (now.year(), now.month())
}

#[derive(Debug, Default)]
struct AgentBook {
    entries: Vec<LedgerEntry>,
    day: Option<NaiveDate>,
    month: Option<(i32, u32)>,
    day_total: f64,
    month_total: f64,
    reserved: HashMap<JobId, f64>,
}

impl AgentBook {
    fn roll(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.day != Some(today) {
            self.day = Some(today);
            self.day_total = 0.0;
        }
        let month = month_key(now);
        if self.month != Some(month) {
            self.month = Some(month);
            self.month_total = 0.0;
        }
    }

    fn spent_today(&self, now: DateTime<Utc>) -> f64 {
        if self.day == Some(now.date_naive()) {
            self.day_total
        } else {
            0.0
        }
    }

    fn spent_this_month(&self, now: DateTime<Utc>) -> f64 {
        if self.month == Some(month_key(now)) {
            self.month_total
        } else {
            0.0
        }
    }

    fn reserved_total(&self) -> f64 {
        self.reserved.values().sum()
    }

    fn remaining_today(&self, limit: f64, now: DateTime<Utc>) -> f64 {
        limit - self.spent_today(now) - self.reserved_total()
    }

    fn remaining(&self, limits: BudgetLimits, now: DateTime<Utc>) -> f64 {
        let daily = self.remaining_today(limits.daily_usd, now);
        match limits.monthly_usd {
            Some(monthly) => {
                daily.min(monthly - self.spent_this_month(now) - self.reserved_total())
            }
            None => daily,
        }
    }
}

/// Append-only spend ledger with per-agent admission control
#[derive(Default)]
pub struct CostLedger {
    books: RwLock<BTreeMap<AgentId, Arc<Mutex<AgentBook>>>>,
    sequence: AtomicU64,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from entries written by an earlier process.
    ///
    /// Running totals continue from each agent's latest entry; the sequence
    /// continues after the highest one seen.
    pub fn from_entries(mut entries: Vec<LedgerEntry>) -> Self {
        entries.sort_by_key(|e| e.sequence);
        let next = entries.last().map_or(0, |e| e.sequence + 1);

        let mut books: BTreeMap<AgentId, AgentBook> = BTreeMap::new();
        for entry in entries {
            let book = books.entry(entry.agent.clone()).or_default();
            book.day = Some(entry.period_day);
            book.month = Some(month_key(entry.recorded_at));
            book.day_total = entry.day_total;
            book.month_total = entry.month_total;
            book.entries.push(entry);
        }
        info!(agents = books.len(), next_sequence = next, "Ledger restored");

        Self {
            books: RwLock::new(
                books
                    .into_iter()
                    .map(|(agent, book)| (agent, Arc::new(Mutex::new(book))))
                    .collect(),
            ),
            sequence: AtomicU64::new(next),
        }
    }

    fn book(&self, agent: &AgentId) -> Arc<Mutex<AgentBook>> {
        if let Some(book) = self.books.read().get(agent) {
            return Arc::clone(book);
        }
        Arc::clone(self.books.write().entry(agent.clone()).or_default())
    }

    /// Reserve `amount` of the agent's remaining budget for a job.
    ///
    /// Fails with [`HiveError::BudgetExceeded`] if the remaining daily (or
    /// monthly) budget, net of outstanding reservations, is below `amount`
    /// or already exhausted.
    pub fn try_reserve(
        &self,
        agent: &AgentId,
        job: JobId,
        amount: f64,
        limits: BudgetLimits,
        now: DateTime<Utc>,
    ) -> Result<f64> {
        let book = self.book(agent);
        let mut book = book.lock();
        book.roll(now);
        book.reserved.remove(&job);

        let remaining = book.remaining(limits, now);

        if remaining <= 0.0 || amount > remaining {
            debug!(agent = %agent, job_id = %job, amount, remaining, "Budget reservation refused");
            return Err(HiveError::BudgetExceeded {
                needed: amount,
                remaining: remaining.max(0.0),
            });
        }

        book.reserved.insert(job, amount);
        Ok(remaining - amount)
    }

    /// Hold `amount` for a job admitted by an earlier process, without
    /// checking what is left
    pub fn restore_reservation(&self, agent: &AgentId, job: JobId, amount: f64) {
        if amount > 0.0 {
            self.book(agent).lock().reserved.insert(job, amount);
        }
    }

    /// Drop a job's reservation without billing anything
    pub fn release(&self, agent: &AgentId, job: JobId) {
        let book = self.book(agent);
        book.lock().reserved.remove(&job);
    }

    /// Append a ledger entry for a billed call.
    ///
    /// Zero-cost usage appends nothing. The recorded amount is deducted from
    /// the job's reservation so it is not counted twice.
    pub fn record(
        &self,
        agent: &AgentId,
        job: JobId,
        usage: Usage,
        now: DateTime<Utc>,
    ) -> Option<LedgerEntry> {
        if !usage.is_billable() {
            return None;
        }
        let book = self.book(agent);
        let mut book = book.lock();
        book.roll(now);

        if let Some(reserved) = book.reserved.get_mut(&job) {
            *reserved = (*reserved - usage.cost_usd).max(0.0);
        }
        book.day_total += usage.cost_usd;
        book.month_total += usage.cost_usd;

        let entry = LedgerEntry {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            agent: agent.clone(),
            job_id: job,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost_usd: usage.cost_usd,
            day_total: book.day_total,
            month_total: book.month_total,
            period_day: now.date_naive(),
            period_month: format!("{:04}-{:02}", now.year(), now.month()),
            recorded_at: now,
        };
        book.entries.push(entry.clone());

        info!(
            agent = %agent,
            job_id = %job,
            cost_usd = usage.cost_usd,
            day_total = entry.day_total,
            "Ledger entry recorded"
        );
        Some(entry)
    }

    pub fn entries(&self, agent: &AgentId) -> Vec<LedgerEntry> {
        match self.books.read().get(agent) {
            Some(book) => book.lock().entries.clone(),
            None => Vec::new(),
        }
    }

    /// Every entry across agents in append order
    pub fn all_entries(&self) -> Vec<LedgerEntry> {
        let books: Vec<_> = self.books.read().values().cloned().collect();
        let mut all: Vec<LedgerEntry> = books
            .iter()
            .flat_map(|b| b.lock().entries.clone())
            .collect();
        all.sort_by_key(|e| e.sequence);
        all
    }

    pub fn spent_today(&self, agent: &AgentId, now: DateTime<Utc>) -> f64 {
        match self.books.read().get(agent) {
            Some(book) => book.lock().spent_today(now),
            None => 0.0,
        }
    }

    pub fn spent_this_month(&self, agent: &AgentId, now: DateTime<Utc>) -> f64 {
        match self.books.read().get(agent) {
            Some(book) => book.lock().spent_this_month(now),
            None => 0.0,
        }
    }

    /// Daily budget left after spend and outstanding reservations
    pub fn remaining_today(&self, agent: &AgentId, daily_limit: f64, now: DateTime<Utc>) -> f64 {
        match self.books.read().get(agent) {
            Some(book) => book.lock().remaining_today(daily_limit, now),
            None => daily_limit,
        }
    }

    /// Budget left under both ceilings, net of reservations
    pub fn remaining(&self, agent: &AgentId, limits: BudgetLimits, now: DateTime<Utc>) -> f64 {
        match self.books.read().get(agent) {
            Some(book) => book.lock().remaining(limits, now),
            None => limits.headroom(),
        }
    }

    pub fn totals_by_agent(&self, now: DateTime<Utc>) -> Vec<AgentSpend> {
        self.books
            .read()
            .iter()
            .map(|(agent, book)| {
                let book = book.lock();
                AgentSpend {
                    agent: agent.clone(),
                    spent_today: book.spent_today(now),
                    spent_this_month: book.spent_this_month(now),
                    reserved: book.reserved_total(),
                    entries: book.entries.len(),
                }
            })
            .collect()
    }
}
