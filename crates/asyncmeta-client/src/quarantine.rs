use asyncmeta_common::QuarantineConfig;
use std::time::{Duration, Instant};

/// Quarantine state of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuarantineState {
    /// Connects are attempted normally
    Healthy,
    /// Connects fail fast without reaching the target
    Quarantined,
    /// The quarantine interval elapsed; one trial connect is let through
    HalfOpen,
}

/// Connect-failure and timeout tracking for one target.
#[derive(Debug, Clone)]
pub struct Quarantine {
    state: QuarantineState,
    consecutive_failures: u32,
    /// Operations timed out since the target last answered anything.
    timeout_ops: u32,
    quarantined_at: Option<Instant>,
}

impl Quarantine {
    pub fn new() -> Self {
        Self {
            state: QuarantineState::Healthy,
            consecutive_failures: 0,
            timeout_ops: 0,
            quarantined_at: None,
        }
    }

    pub fn state(&self) -> QuarantineState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn timeout_ops(&self) -> u32 {
        self.timeout_ops
    }

    /// Length of the current quarantine: the base interval, multiplied once
    /// per failed trial connect and capped at the maximum.
    pub fn interval(&self, config: &QuarantineConfig) -> Duration {
        let trials_failed = self
            .consecutive_failures
            .saturating_sub(config.failure_threshold);
        let multiplier = config.backoff_multiplier.powi(trials_failed as i32);
        let backoff_ms = (config.base_interval_ms as f64 * multiplier) as u64;
        Duration::from_millis(backoff_ms.min(config.max_interval_ms))
    }

    /// Whether a connect may be attempted now. Moves an expired quarantine
    /// to [`QuarantineState::HalfOpen`].
    pub fn admit(&mut self, config: &QuarantineConfig, now: Instant) -> bool {
        if !config.is_enabled() {
            return true;
        }
        match self.state {
            QuarantineState::Healthy | QuarantineState::HalfOpen => true,
            QuarantineState::Quarantined => {
                let elapsed = self
                    .quarantined_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or_default();
                if elapsed >= self.interval(config) {
                    self.transition(QuarantineState::HalfOpen, now);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self, now: Instant) {
        self.consecutive_failures = 0;
        self.transition(QuarantineState::Healthy, now);
    }

    /// Records a failed connect. Returns true when this failure put the
    /// target into quarantine.
    pub fn record_failure(&mut self, config: &QuarantineConfig, now: Instant) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if !config.is_enabled() || self.consecutive_failures < config.failure_threshold {
            return false;
        }
        let was_quarantined = self.state == QuarantineState::Quarantined;
        self.transition(QuarantineState::Quarantined, now);
        !was_quarantined
    }

    /// Records an operation that timed out waiting for the target. Returns
    /// true when the target is quarantined afterwards, whether by this
    /// timeout or before it.
    pub fn record_timeout(&mut self, config: &QuarantineConfig, now: Instant) -> bool {
        if !config.is_enabled() {
            return false;
        }
        if self.state == QuarantineState::Quarantined {
            return true;
        }
        self.timeout_ops = self.timeout_ops.saturating_add(1);
        if config.max_timeout_ops > 0 && self.timeout_ops > config.max_timeout_ops {
            self.transition(QuarantineState::Quarantined, now);
            return true;
        }
        false
    }

    /// The target answered. Clears the timeout count and ends a half-open
    /// quarantine.
    pub fn record_response(&mut self, now: Instant) {
        self.timeout_ops = 0;
        if self.state == QuarantineState::HalfOpen {
            self.record_success(now);
        }
    }

    fn transition(&mut self, state: QuarantineState, now: Instant) {
        self.state = state;
        self.quarantined_at = match state {
            QuarantineState::Quarantined => Some(now),
            QuarantineState::Healthy | QuarantineState::HalfOpen => None,
        };
    }
}

impl Default for Quarantine {
    fn default() -> Self {
        Self::new()
    }
}
