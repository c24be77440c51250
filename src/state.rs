//! Progress state carried between invocations.
//!
//! A reconciliation spans many short invocations; `ProgressState` is the
//! only thing that survives the gaps. It is a pure value: the chain
//! consumes the caller's copy and returns a new one inside the `Outcome`,
//! and the host persists it verbatim (see `to_blob`/`from_blob`).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifier for a step within a chain.
///
/// Step ids are declared by the chain author and must be stable across
/// invocations; they key the completion flags in `ProgressState`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    /// Create a step id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StepId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StepId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of remote operation a step performs.
///
/// Retry budgets and backoff profiles are keyed per operation kind so
/// distinct operations within one reconciliation do not share a budget.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum OperationKind {
    Create,
    Read,
    Update,
    Delete,
    List,
    Move,
    Tag,
    Attach,
    Detach,
}

impl OperationKind {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::List => "list",
            Self::Move => "move",
            Self::Tag => "tag",
            Self::Attach => "attach",
            Self::Detach => "detach",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The phase of a step in which a failure occurred.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum PhaseKind {
    /// Existence scan before the side effect.
    Precheck,
    /// The side-effecting remote call itself.
    Invoke,
    /// Polling for the side effect to become durably visible.
    Stabilize,
}

impl PhaseKind {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Precheck => "precheck",
            Self::Invoke => "invoke",
            Self::Stabilize => "stabilize",
        }
    }
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Composite key for retry counters.
///
/// A typed pair rather than a concatenated string, so distinct
/// (operation, phase) pairs can never collide.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RetryKey {
    pub operation: OperationKind,
    pub phase: PhaseKind,
}

impl RetryKey {
    /// Create a retry key.
    pub fn new(operation: OperationKind, phase: PhaseKind) -> Self {
        Self { operation, phase }
    }
}

impl std::fmt::Display for RetryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.operation, self.phase)
    }
}

/// A recorded failure with its observation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Human-readable failure description.
    pub message: String,
    /// When the failure was observed.
    pub at: DateTime<Utc>,
}

/// Serializable snapshot of reconciliation progress.
///
/// Completion flags are set the moment a side effect successfully begins
/// and are never cleared; retry counters only ever grow. A brand-new
/// reconciliation starts from `ProgressState::new()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    /// Steps whose side effect has been issued.
    #[serde(default)]
    completed: HashMap<StepId, bool>,
    /// Retry attempts per (operation, phase).
    #[serde(default, with = "retry_entries")]
    retries: HashMap<RetryKey, u32>,
    /// Opaque identifiers captured by prior steps.
    #[serde(default)]
    identifiers: HashMap<String, String>,
    /// Most recent failure, if any.
    #[serde(default)]
    last_failure: Option<FailureRecord>,
}

impl ProgressState {
    /// Create a fresh, empty progress state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a persisted blob; an absent or empty blob yields a fresh
    /// state (first invocation).
    pub fn from_blob(blob: Option<&[u8]>) -> Result<Self> {
        match blob {
            None => Ok(Self::new()),
            Some(bytes) if bytes.is_empty() => Ok(Self::new()),
            Some(bytes) => serde_json::from_slice(bytes)
                .map_err(|e| Error::state_decode_failed(e.to_string())),
        }
    }

    /// Encode the state for persistence by the host.
    pub fn to_blob(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::state_encode_failed(e.to_string()))
    }

    /// Whether the step's side effect has already been issued.
    pub fn is_completed(&self, id: &StepId) -> bool {
        self.completed.get(id).copied().unwrap_or(false)
    }

    /// Mark a step's side effect as issued. Flags are never cleared.
    pub fn mark_completed(&mut self, id: StepId) {
        self.completed.insert(id, true);
    }

    /// Completed step ids in sorted order.
    pub fn completed_steps(&self) -> Vec<&StepId> {
        self.completed
            .iter()
            .filter(|(_, done)| **done)
            .map(|(id, _)| id)
            .sorted()
            .collect_vec()
    }

    /// Number of completed steps.
    pub fn completed_count(&self) -> usize {
        self.completed.values().filter(|done| **done).count()
    }

    /// Current attempt count for a retry key.
    pub fn attempts(&self, key: RetryKey) -> u32 {
        self.retries.get(&key).copied().unwrap_or(0)
    }

    /// Increment the attempt counter for a retry key, returning the new
    /// count. Counters are never decremented.
    pub fn record_retry(&mut self, key: RetryKey) -> u32 {
        let count = self.attempts(key).saturating_add(1);
        self.retries.insert(key, count);
        count
    }

    /// Look up a captured identifier.
    pub fn identifier(&self, key: &str) -> Option<&str> {
        self.identifiers.get(key).map(String::as_str)
    }

    /// All captured identifiers.
    pub fn identifiers(&self) -> &HashMap<String, String> {
        &self.identifiers
    }

    /// Capture an identifier for later steps.
    pub fn capture(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.identifiers.insert(key.into(), value.into());
    }

    /// Record the most recent failure.
    pub fn set_last_failure(&mut self, message: impl Into<String>) {
        self.last_failure = Some(FailureRecord {
            message: message.into(),
            at: Utc::now(),
        });
    }

    /// The most recent failure, if any.
    pub fn last_failure(&self) -> Option<&FailureRecord> {
        self.last_failure.as_ref()
    }
}

/// JSON maps require string keys, so the typed retry map serializes as an
/// entry list (sorted for stable output).
mod retry_entries {
    use std::collections::HashMap;

    use itertools::Itertools;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::RetryKey;

    pub fn serialize<S: Serializer>(
        map: &HashMap<RetryKey, u32>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let entries = map
            .iter()
            .map(|(key, count)| (*key, *count))
            .sorted_by_key(|(key, _)| *key)
            .collect_vec();
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<RetryKey, u32>, D::Error> {
        let entries = Vec::<(RetryKey, u32)>::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}
