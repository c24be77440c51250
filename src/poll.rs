//! Bounded stabilization polling.
//!
//! Some remote side effects only become visible after a delay. The poller
//! waits for them synchronously inside one invocation, but under a hard
//! cap: a fixed attempt count with per-attempt delays whose worst-case
//! total stays well under the host's per-invocation wall-clock limit.
//! Anything longer-lived must be expressed as `InProgress` back to the
//! host, never as open-ended in-process sleeping.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::remote::{RemoteFailure, RemoteResponse};

/// Polling parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollConfig {
    /// Maximum fetch attempts within one invocation.
    pub max_attempts: u32,
    /// Per-attempt delay unit; attempt `n` waits `base_delay * n` before
    /// fetching (the first fetch is immediate).
    pub base_delay: Duration,
    /// Fraction of the attempt delay added as uniform random jitter.
    pub jitter_factor: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            jitter_factor: 0.25,
        }
    }
}

impl PollConfig {
    /// Create a config with the default jitter factor.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    /// Disable jitter (deterministic delays, mainly for tests).
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// Delay before the given attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let scaled = base_ms.saturating_mul(u64::from(attempt));
        if self.jitter_factor > 0.0 {
            let span = (scaled as f64 * self.jitter_factor) as u64;
            let jitter = if span > 0 {
                rand::random::<u64>() % span.saturating_add(1)
            } else {
                0
            };
            Duration::from_millis(scaled.saturating_add(jitter))
        } else {
            Duration::from_millis(scaled)
        }
    }

    /// Worst-case total sleep across all attempts. Chains should keep this
    /// comfortably under the host's per-invocation budget.
    pub fn worst_case_total(&self) -> Duration {
        (0..self.max_attempts)
            .map(|attempt| {
                let base_ms = self.base_delay.as_millis() as u64;
                let scaled = base_ms.saturating_mul(u64::from(attempt));
                let span = (scaled as f64 * self.jitter_factor) as u64;
                Duration::from_millis(scaled.saturating_add(span))
            })
            .sum()
    }
}

/// Terminal result of one bounded polling loop.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The side effect is durably visible.
    Done(RemoteResponse),
    /// The remote reported a failed state.
    Failed {
        /// Reason reported by the remote.
        reason: String,
    },
    /// All attempts were used without reaching a terminal condition.
    TimedOut,
}

/// Fixed-attempt, time-capped polling loop.
#[derive(Debug, Clone, Copy)]
pub struct BoundedPoller {
    config: PollConfig,
}

impl BoundedPoller {
    /// Create a poller.
    pub fn new(config: PollConfig) -> Self {
        Self { config }
    }

    /// The poller's configuration.
    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Poll until `is_failed` or `is_done` reports a terminal condition,
    /// or the attempt budget runs out.
    ///
    /// A fetch-level `RemoteFailure` aborts the loop and propagates to the
    /// caller for classification.
    pub async fn poll<F, Fut, D, X>(
        &self,
        mut fetch: F,
        is_done: D,
        is_failed: X,
    ) -> std::result::Result<PollOutcome, RemoteFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<RemoteResponse, RemoteFailure>>,
        D: Fn(&RemoteResponse) -> bool,
        X: Fn(&RemoteResponse) -> Option<String>,
    {
        for attempt in 0..self.config.max_attempts {
            let delay = self.config.delay_for(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let response = fetch().await?;

            if let Some(reason) = is_failed(&response) {
                debug!(attempt, reason = %reason, "poll observed failed state");
                return Ok(PollOutcome::Failed { reason });
            }
            if is_done(&response) {
                debug!(attempt, "poll observed stable state");
                return Ok(PollOutcome::Done(response));
            }
            debug!(attempt, "not yet stable");
        }

        Ok(PollOutcome::TimedOut)
    }
}
