use asyncmeta_client::PoolConfig;
use asyncmeta_common::QuarantineConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do when a candidate fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Ignore failed candidates as long as another one answers.
    #[default]
    Continue,
    /// Answer with the first candidate error and abandon the rest.
    /// `NoSuchObject` does not count as an error.
    Stop,
    /// Like `Continue`, but a successful search reports the first
    /// candidate error that is not `NoSuchObject`.
    Report,
}

/// When a write (add, delete, modrdn) sent to several targets succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// The first successful candidate answers the client; the others are
    /// abandoned.
    #[default]
    FirstSuccess,
    /// Every candidate must succeed; the first failure is reported.
    AllMustSucceed,
    /// The registry's primary target answers. Other candidates are sent the
    /// request but their results are only recorded.
    Primary,
}

/// Dispatcher configuration.
///
/// # Example
///
/// ```
/// use asyncmeta_core::{DispatchConfig, OnError, WritePolicy};
///
/// let config = DispatchConfig::default()
///     .with_max_pending_ops(64)
///     .with_on_error(OnError::Stop)
///     .with_write_policy(WritePolicy::AllMustSucceed);
/// assert_eq!(config.max_send_retries, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Operations admitted at once; further operations get `Busy`.
    ///
    /// Default: 128
    pub max_pending_ops: usize,
    pub on_error: OnError,
    pub write_policy: WritePolicy,
    /// Resends on a fresh session after the target went down.
    ///
    /// Default: 1
    pub max_send_retries: u32,
    /// Period of the timeout and idle-session sweep.
    ///
    /// Default: 1000ms
    pub reaper_interval_ms: u64,
    /// Idle sessions are closed after this long; 0 keeps them open.
    pub idle_timeout_ms: u64,
    /// Sessions kept open to each target. Operations are spread over them
    /// in turn.
    ///
    /// Default: 1
    pub sessions_per_target: usize,
    pub quarantine: QuarantineConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_pending_ops: 128,
            on_error: OnError::Continue,
            write_policy: WritePolicy::FirstSuccess,
            max_send_retries: 1,
            reaper_interval_ms: 1000,
            idle_timeout_ms: 0,
            sessions_per_target: 1,
            quarantine: QuarantineConfig::default(),
        }
    }
}

impl DispatchConfig {
    pub fn with_max_pending_ops(mut self, max_pending_ops: usize) -> Self {
        self.max_pending_ops = max_pending_ops;
        self
    }

    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }

    pub fn with_write_policy(mut self, write_policy: WritePolicy) -> Self {
        self.write_policy = write_policy;
        self
    }

    pub fn with_max_send_retries(mut self, max_send_retries: u32) -> Self {
        self.max_send_retries = max_send_retries;
        self
    }

    pub fn with_reaper_interval_ms(mut self, reaper_interval_ms: u64) -> Self {
        self.reaper_interval_ms = reaper_interval_ms;
        self
    }

    pub fn with_idle_timeout_ms(mut self, idle_timeout_ms: u64) -> Self {
        self.idle_timeout_ms = idle_timeout_ms;
        self
    }

    pub fn with_sessions_per_target(mut self, sessions_per_target: usize) -> Self {
        self.sessions_per_target = sessions_per_target;
        self
    }

    pub fn with_quarantine(mut self, quarantine: QuarantineConfig) -> Self {
        self.quarantine = quarantine;
        self
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms.max(1))
    }

    pub(crate) fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            quarantine: self.quarantine.clone(),
            idle_timeout_ms: self.idle_timeout_ms,
            sessions_per_target: self.sessions_per_target,
        }
    }
}
