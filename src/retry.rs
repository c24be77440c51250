//! Exponential backoff retry policy keyed by operation kind.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::state::{OperationKind, PhaseKind};

/// Backoff parameters for one operation family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryProfile {
    /// Base delay; the delay for attempt `n` starts at `base * 2^n`.
    pub base: Duration,
    /// Fraction of the exponential delay added as uniform random jitter.
    pub jitter_factor: f64,
    /// Attempts allowed before the failure surfaces as terminal.
    pub max_attempts: u32,
}

impl Default for RetryProfile {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(3),
            jitter_factor: 0.5,
            max_attempts: 3,
        }
    }
}

impl RetryProfile {
    /// Create a profile with the default jitter factor.
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            ..Self::default()
        }
    }

    /// Set the jitter factor.
    pub fn with_jitter_factor(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }
}

/// Retry policy: per-operation backoff profiles, attempt budgets, and
/// per-operation retry suppression.
///
/// Suppression exists for operations whose invoke must never be repeated
/// blindly: retrying a not-yet-observable creation risks a duplicate
/// remote resource. Suppression applies to the invoke phase only;
/// stabilization fetches are read-only and retry normally.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    default_profile: RetryProfile,
    profiles: HashMap<OperationKind, RetryProfile>,
    no_retry: HashSet<OperationKind>,
    use_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        // Slow operation family: longer base, tighter budget.
        profiles.insert(
            OperationKind::Move,
            RetryProfile::new(Duration::from_secs(15), 2),
        );

        let mut no_retry = HashSet::new();
        no_retry.insert(OperationKind::Create);

        Self {
            default_profile: RetryProfile::default(),
            profiles,
            no_retry,
            use_jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create the default policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the default profile.
    #[must_use]
    pub fn with_default_profile(mut self, profile: RetryProfile) -> Self {
        self.default_profile = profile;
        self
    }

    /// Set the profile for one operation kind.
    #[must_use]
    pub fn with_profile(mut self, operation: OperationKind, profile: RetryProfile) -> Self {
        self.profiles.insert(operation, profile);
        self
    }

    /// Suppress invoke-phase retries for an operation kind.
    #[must_use]
    pub fn suppress_retries(mut self, operation: OperationKind) -> Self {
        self.no_retry.insert(operation);
        self
    }

    /// Permit invoke-phase retries for an operation kind.
    #[must_use]
    pub fn permit_retries(mut self, operation: OperationKind) -> Self {
        self.no_retry.remove(&operation);
        self
    }

    /// Disable jitter (deterministic delays, mainly for tests).
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// The profile in effect for an operation kind.
    pub fn profile(&self, operation: OperationKind) -> &RetryProfile {
        self.profiles.get(&operation).unwrap_or(&self.default_profile)
    }

    /// Delay before re-invoking after the given completed attempt count:
    /// `base * 2^attempt` plus uniform jitter up to `jitter_factor` of
    /// that.
    pub fn next_delay(&self, operation: OperationKind, attempt: u32) -> Duration {
        let profile = self.profile(operation);
        let base_ms = profile.base.as_millis() as u64;
        let exponential = base_ms.saturating_mul(2u64.saturating_pow(attempt));

        if self.use_jitter && profile.jitter_factor > 0.0 {
            let span = (exponential as f64 * profile.jitter_factor) as u64;
            let jitter = if span > 0 {
                rand::random::<u64>() % span.saturating_add(1)
            } else {
                0
            };
            Duration::from_millis(exponential.saturating_add(jitter))
        } else {
            Duration::from_millis(exponential)
        }
    }

    /// Whether another attempt is allowed for (operation, phase) given the
    /// attempts already recorded.
    pub fn should_retry(&self, operation: OperationKind, phase: PhaseKind, attempt: u32) -> bool {
        if phase == PhaseKind::Invoke && self.no_retry.contains(&operation) {
            return false;
        }
        attempt < self.profile(operation).max_attempts
    }
}
