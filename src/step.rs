//! Step composition.
//!
//! A step is one request/response unit of an orchestrated operation:
//! a translate function building the remote request from the desired
//! state, the invoke against the remote service, an optional stabilize
//! spec confirming the side effect is durably visible, and the error
//! handling hooks (duplicate tolerance, existence precheck). Behavior
//! varies through the supplied functions; steps are composed, never
//! subclassed.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::poll::PollConfig;
use crate::remote::{RemoteFailure, RemoteRequest, RemoteResponse};
use crate::state::{OperationKind, StepId};

/// Inputs visible to a step's functions.
#[derive(Debug, Clone)]
pub struct StepInput<M> {
    /// The state the resource should reach.
    pub desired: M,
    /// The state from the prior reconciliation, if any.
    pub previous: Option<M>,
    identifiers: HashMap<String, String>,
}

impl<M> StepInput<M> {
    /// Create a step input.
    pub fn new(desired: M, previous: Option<M>, identifiers: HashMap<String, String>) -> Self {
        Self {
            desired,
            previous,
            identifiers,
        }
    }

    /// A captured identifier, or an error naming the missing key.
    pub fn identifier(&self, key: &str) -> Result<&str> {
        self.identifiers
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| Error::missing_identifier(key))
    }

    /// A captured identifier, if present.
    pub fn identifier_opt(&self, key: &str) -> Option<&str> {
        self.identifiers.get(key).map(String::as_str)
    }

    /// All captured identifiers.
    pub fn identifiers(&self) -> &HashMap<String, String> {
        &self.identifiers
    }
}

pub type TranslateFn<M> =
    Box<dyn Fn(&StepInput<M>) -> Result<RemoteRequest> + Send + Sync>;
pub type TranslateManyFn<M> =
    Box<dyn Fn(&StepInput<M>) -> Result<Vec<RemoteRequest>> + Send + Sync>;
pub type CaptureFn = Box<dyn Fn(&RemoteResponse) -> Vec<(String, String)> + Send + Sync>;
pub type ToleranceFn = Box<dyn Fn(&RemoteFailure) -> bool + Send + Sync>;
pub type DonePredicate = Box<dyn Fn(&RemoteResponse) -> bool + Send + Sync>;
pub type FailedPredicate = Box<dyn Fn(&RemoteResponse) -> Option<String> + Send + Sync>;

/// Stabilization spec: how to confirm a side effect is durably visible.
pub struct Stabilize<M> {
    pub(crate) fetch: TranslateFn<M>,
    pub(crate) is_done: DonePredicate,
    pub(crate) is_failed: FailedPredicate,
    pub(crate) capture: Option<CaptureFn>,
    pub(crate) config: PollConfig,
}

impl<M> Stabilize<M> {
    /// Create a stabilize spec from a fetch-request builder and a done
    /// predicate.
    pub fn new(
        fetch: impl Fn(&StepInput<M>) -> Result<RemoteRequest> + Send + Sync + 'static,
        is_done: impl Fn(&RemoteResponse) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            fetch: Box::new(fetch),
            is_done: Box::new(is_done),
            is_failed: Box::new(|_| None),
            capture: None,
            config: PollConfig::default(),
        }
    }

    /// Treat responses matching this predicate as a remote-side failure,
    /// with the returned reason.
    #[must_use]
    pub fn failing_when(
        mut self,
        is_failed: impl Fn(&RemoteResponse) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.is_failed = Box::new(is_failed);
        self
    }

    /// Capture identifiers from the stabilized response.
    #[must_use]
    pub fn capturing(
        mut self,
        capture: impl Fn(&RemoteResponse) -> Vec<(String, String)> + Send + Sync + 'static,
    ) -> Self {
        self.capture = Some(Box::new(capture));
        self
    }

    /// Set the polling parameters.
    #[must_use]
    pub fn with_config(mut self, config: PollConfig) -> Self {
        self.config = config;
        self
    }
}

/// Existence precheck: scan the remote listing before issuing a side
/// effect, and treat a match as the step being already satisfied.
pub struct Existence<M> {
    pub(crate) matches: Box<dyn Fn(&StepInput<M>, &Value) -> bool + Send + Sync>,
    pub(crate) capture: Option<Box<dyn Fn(&Value) -> Vec<(String, String)> + Send + Sync>>,
}

impl<M> Existence<M> {
    /// Create an existence check from an item predicate.
    pub fn new(
        matches: impl Fn(&StepInput<M>, &Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            matches: Box::new(matches),
            capture: None,
        }
    }

    /// Capture identifiers from the matched item.
    #[must_use]
    pub fn capturing(
        mut self,
        capture: impl Fn(&Value) -> Vec<(String, String)> + Send + Sync + 'static,
    ) -> Self {
        self.capture = Some(Box::new(capture));
        self
    }
}

pub(crate) enum StepBody<M> {
    /// One remote request.
    Remote(TranslateFn<M>),
    /// A fan-out of requests handled individually (e.g. one per target).
    Composite(TranslateManyFn<M>),
}

/// One unit of orchestration.
pub struct Step<M> {
    pub(crate) id: StepId,
    pub(crate) operation: OperationKind,
    pub(crate) body: StepBody<M>,
    pub(crate) stabilize: Option<Stabilize<M>>,
    pub(crate) tolerates: Option<ToleranceFn>,
    pub(crate) precheck: Option<Existence<M>>,
    pub(crate) capture: Option<CaptureFn>,
}

impl<M> Step<M> {
    /// A step issuing a single remote request.
    pub fn remote(
        id: impl Into<StepId>,
        operation: OperationKind,
        translate: impl Fn(&StepInput<M>) -> Result<RemoteRequest> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            operation,
            body: StepBody::Remote(Box::new(translate)),
            stabilize: None,
            tolerates: None,
            precheck: None,
            capture: None,
        }
    }

    /// A step fanning out over several remote requests, each handled
    /// individually.
    pub fn composite(
        id: impl Into<StepId>,
        operation: OperationKind,
        translate: impl Fn(&StepInput<M>) -> Result<Vec<RemoteRequest>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            operation,
            body: StepBody::Composite(Box::new(translate)),
            stabilize: None,
            tolerates: None,
            precheck: None,
            capture: None,
        }
    }

    /// Confirm the side effect through a stabilization poll.
    #[must_use]
    pub fn stabilized_by(mut self, stabilize: Stabilize<M>) -> Self {
        self.stabilize = Some(stabilize);
        self
    }

    /// Treat failures matching this predicate as benign duplicates
    /// (success-with-continue). Runs before any classification and never
    /// consumes retry budget.
    #[must_use]
    pub fn tolerating(
        mut self,
        tolerates: impl Fn(&RemoteFailure) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.tolerates = Some(Box::new(tolerates));
        self
    }

    /// Skip the side effect when the existence check matches.
    #[must_use]
    pub fn skipped_if_exists(mut self, existence: Existence<M>) -> Self {
        self.precheck = Some(existence);
        self
    }

    /// Capture identifiers from the invoke response.
    #[must_use]
    pub fn capturing(
        mut self,
        capture: impl Fn(&RemoteResponse) -> Vec<(String, String)> + Send + Sync + 'static,
    ) -> Self {
        self.capture = Some(Box::new(capture));
        self
    }

    /// The step's id.
    pub fn id(&self) -> &StepId {
        &self.id
    }

    /// The step's operation kind.
    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    /// Whether the step tolerates this failure as a benign duplicate.
    pub(crate) fn is_tolerated(&self, failure: &RemoteFailure) -> bool {
        self.tolerates
            .as_ref()
            .map(|tolerates| tolerates(failure))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone)]
    struct Model {
        name: String,
    }

    fn input() -> StepInput<Model> {
        let mut identifiers = HashMap::new();
        identifiers.insert("resource_id".to_string(), "r-1".to_string());
        StepInput::new(
            Model {
                name: "demo".to_string(),
            },
            None,
            identifiers,
        )
    }

    #[test]
    fn test_identifier_lookup() {
        let input = input();
        assert_eq!(input.identifier("resource_id").ok(), Some("r-1"));
        assert!(input.identifier("missing").is_err());
        assert_eq!(input.identifier_opt("missing"), None);
    }

    #[test]
    fn test_translate_sees_desired_state() {
        let step = Step::remote("create", OperationKind::Create, |input: &StepInput<Model>| {
            Ok(RemoteRequest::new(
                "Create",
                json!({ "name": input.desired.name }),
            ))
        });

        let request = match &step.body {
            StepBody::Remote(translate) => translate(&input()).ok(),
            StepBody::Composite(_) => None,
        };
        assert_eq!(
            request.and_then(|r| r.body.get("name").cloned()),
            Some(json!("demo"))
        );
    }

    #[test]
    fn test_tolerance_defaults_to_none() {
        let step: Step<Model> =
            Step::remote("move", OperationKind::Move, |_| Ok(RemoteRequest::empty("Move")));
        assert!(!step.is_tolerated(&RemoteFailure::new("DuplicateMove", "already there")));

        let step = step.tolerating(|failure| failure.code_contains("DuplicateMove"));
        assert!(step.is_tolerated(&RemoteFailure::new("DuplicateMove", "already there")));
        assert!(!step.is_tolerated(&RemoteFailure::new("AccessDenied", "no")));
    }
}
