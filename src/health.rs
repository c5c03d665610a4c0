//! Rolling health score for an agent's live transport

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::HealthConfig;

#[derive(Debug)]
struct HealthState {
    score: f64,
    degraded_until: Option<Instant>,
}

/// Tracks live-call health; a degraded agent is relay-only until a probe
/// succeeds after the cool-down window
#[derive(Debug)]
pub struct HealthTracker {
    config: HealthConfig,
    state: Mutex<HealthState>,
}

impl HealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HealthState {
                score: 1.0,
                degraded_until: None,
            }),
        }
    }

    fn cooldown(&self) -> Duration {
        Duration::from_secs(self.config.cooldown_secs)
    }

    pub fn score(&self) -> f64 {
        self.state.lock().score
    }

    pub fn is_degraded(&self) -> bool {
        self.state.lock().degraded_until.is_some()
    }

    /// Degraded and the cool-down has elapsed
    pub fn needs_probe(&self) -> bool {
        matches!(self.state.lock().degraded_until, Some(until) if Instant::now() >= until)
    }

    /// Returns `true` if this failure pushed the agent into degraded mode
    pub fn record_failure(&self) -> bool {
        let mut state = self.state.lock();
        state.score = (state.score - self.config.failure_penalty).max(0.0);
        if state.degraded_until.is_none() && state.score < self.config.degraded_threshold {
            state.degraded_until = Some(Instant::now() + self.cooldown());
            return true;
        }
        false
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.score = (state.score + self.config.success_recovery).min(1.0);
    }

    /// Probe passed: back to full health
    pub fn probe_succeeded(&self) {
        let mut state = self.state.lock();
        state.score = 1.0;
        state.degraded_until = None;
    }

    /// Probe failed: wait another cool-down window
    pub fn probe_failed(&self) {
        let mut state = self.state.lock();
        state.degraded_until = Some(Instant::now() + self.cooldown());
    }
}
