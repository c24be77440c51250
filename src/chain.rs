//! The step chain orchestrator.
//!
//! `StepChain::run` executes its steps strictly in declaration order
//! against the remote service, threading a `ProgressState` value through:
//! completed side effects are skipped, retryable failures come back as
//! `InProgress` with a policy-computed delay for the host to honor, and
//! terminal failures carry a classified kind. One call never blocks
//! longer than its stabilization polls allow; every longer wait is
//! returned to the host as a delay.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::classify::Classifier;
use crate::error::{ErrorKind, Result};
use crate::poll::{BoundedPoller, PollOutcome};
use crate::remote::{RemoteFailure, RemoteService};
use crate::retry::RetryPolicy;
use crate::scan::scan_all;
use crate::state::{PhaseKind, ProgressState, RetryKey};
use crate::step::{Step, StepBody, StepInput};

/// Result of one invocation of the orchestrator.
#[derive(Debug, Clone)]
pub enum Outcome<M> {
    /// Reconciliation finished; the model reflects the reached state.
    Success {
        model: M,
        state: ProgressState,
    },
    /// More work remains; re-invoke after `delay` with the returned state.
    InProgress {
        delay: Duration,
        state: ProgressState,
    },
    /// Reconciliation failed terminally.
    Failed {
        kind: ErrorKind,
        message: String,
        state: ProgressState,
    },
}

impl<M> Outcome<M> {
    /// Whether this is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Whether the host should re-invoke.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::InProgress { .. })
    }

    /// Whether this is a terminal failure.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// The progress state to persist.
    pub fn state(&self) -> &ProgressState {
        match self {
            Self::Success { state, .. }
            | Self::InProgress { state, .. }
            | Self::Failed { state, .. } => state,
        }
    }

    /// Consume the outcome, keeping only the progress state.
    pub fn into_state(self) -> ProgressState {
        match self {
            Self::Success { state, .. }
            | Self::InProgress { state, .. }
            | Self::Failed { state, .. } => state,
        }
    }

    /// The re-invocation delay, for `InProgress`.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::InProgress { delay, .. } => Some(*delay),
            _ => None,
        }
    }

    /// The reached model, for `Success`.
    pub fn model(&self) -> Option<&M> {
        match self {
            Self::Success { model, .. } => Some(model),
            _ => None,
        }
    }

    /// The failure kind and message, for `Failed`.
    pub fn error(&self) -> Option<(ErrorKind, &str)> {
        match self {
            Self::Failed { kind, message, .. } => Some((*kind, message.as_str())),
            _ => None,
        }
    }
}

/// How a step left the chain.
enum StepFlow {
    Continue,
    InProgress { delay: Duration },
    Fail { kind: ErrorKind, message: String },
}

type GuardFn<M> = Box<dyn Fn(&M, Option<&M>) -> Result<()> + Send + Sync>;
type FinalizeFn<M> = Box<dyn Fn(&M, &ProgressState) -> M + Send + Sync>;

/// An ordered chain of steps driving one resource toward its desired
/// state across repeated invocations.
pub struct StepChain<M> {
    service: Arc<dyn RemoteService>,
    steps: Vec<Step<M>>,
    guards: Vec<GuardFn<M>>,
    classifier: Classifier,
    retry: RetryPolicy,
    finalize: Option<FinalizeFn<M>>,
}

impl<M: Clone + Send + Sync> StepChain<M> {
    /// Create an empty chain against a remote service.
    pub fn new(service: Arc<dyn RemoteService>) -> Self {
        Self {
            service,
            steps: Vec::new(),
            guards: Vec::new(),
            classifier: Classifier::standard(),
            retry: RetryPolicy::default(),
            finalize: None,
        }
    }

    /// Append a step.
    #[must_use]
    pub fn step(mut self, step: Step<M>) -> Self {
        self.steps.push(step);
        self
    }

    /// Add a precondition checked before any remote call. A rejection is
    /// terminal with the error's outcome kind (e.g. `NotUpdatable` for an
    /// immutable-identifier change).
    #[must_use]
    pub fn guard(
        mut self,
        guard: impl Fn(&M, Option<&M>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.guards.push(Box::new(guard));
        self
    }

    /// Replace the failure classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fold captured identifiers into the model returned on success.
    #[must_use]
    pub fn finalizing(
        mut self,
        finalize: impl Fn(&M, &ProgressState) -> M + Send + Sync + 'static,
    ) -> Self {
        self.finalize = Some(Box::new(finalize));
        self
    }

    /// Run one invocation from a persisted blob.
    ///
    /// An absent or empty blob is the first invocation and yields a fresh
    /// state; a corrupt blob is terminal.
    pub async fn run_blob(
        &self,
        desired: &M,
        previous: Option<&M>,
        blob: Option<&[u8]>,
    ) -> Outcome<M> {
        match ProgressState::from_blob(blob) {
            Ok(state) => self.run(desired, previous, state).await,
            Err(error) => Outcome::Failed {
                kind: error.outcome_kind(),
                message: error.to_string(),
                state: ProgressState::new(),
            },
        }
    }

    /// Run one invocation.
    ///
    /// The caller's state is consumed; the returned `Outcome` carries the
    /// new state for the host to persist. An `InProgress` outcome asks the
    /// host to re-invoke after the given delay with that state.
    pub async fn run(&self, desired: &M, previous: Option<&M>, state: ProgressState) -> Outcome<M> {
        let invocation = Ulid::new();
        let mut state = state;

        info!(
            invocation = %invocation,
            steps = self.steps.len(),
            completed = state.completed_count(),
            "starting invocation"
        );

        for guard in &self.guards {
            if let Err(error) = guard(desired, previous) {
                warn!(invocation = %invocation, error = %error, "guard rejected reconciliation");
                let message = error.to_string();
                state.set_last_failure(message.clone());
                return Outcome::Failed {
                    kind: error.outcome_kind(),
                    message,
                    state,
                };
            }
        }

        for step in &self.steps {
            match self.run_step(step, desired, previous, &mut state).await {
                StepFlow::Continue => {}
                StepFlow::InProgress { delay } => {
                    info!(
                        invocation = %invocation,
                        step = %step.id(),
                        delay_ms = delay.as_millis() as u64,
                        "yielding to host"
                    );
                    return Outcome::InProgress { delay, state };
                }
                StepFlow::Fail { kind, message } => {
                    warn!(
                        invocation = %invocation,
                        step = %step.id(),
                        kind = %kind,
                        "terminal failure"
                    );
                    state.set_last_failure(message.clone());
                    return Outcome::Failed {
                        kind,
                        message,
                        state,
                    };
                }
            }
        }

        let model = match &self.finalize {
            Some(finalize) => finalize(desired, &state),
            None => desired.clone(),
        };

        info!(invocation = %invocation, "reconciliation complete");
        Outcome::Success { model, state }
    }

    /// Execute one step: precheck, invoke (unless already issued), then
    /// stabilize.
    async fn run_step(
        &self,
        step: &Step<M>,
        desired: &M,
        previous: Option<&M>,
        state: &mut ProgressState,
    ) -> StepFlow {
        if !state.is_completed(step.id()) {
            if let Some(existence) = &step.precheck {
                let input = self.input_for(desired, previous, state);
                let service = Arc::clone(&self.service);
                let scanned = scan_all(
                    move |token| {
                        let service = Arc::clone(&service);
                        async move { service.list_page(token.as_deref()).await }
                    },
                    |item| (existence.matches)(&input, item),
                )
                .await;

                match scanned {
                    Ok(Some(item)) => {
                        debug!(step = %step.id(), "already satisfied remotely, skipping invoke");
                        if let Some(capture) = &existence.capture {
                            for (key, value) in capture(&item) {
                                state.capture(key, value);
                            }
                        }
                        state.mark_completed(step.id().clone());
                    }
                    Ok(None) => {}
                    Err(failure) => {
                        return self.failure_flow(step, PhaseKind::Precheck, &failure, state)
                    }
                }
            }
        }

        if state.is_completed(step.id()) {
            debug!(step = %step.id(), "side effect already issued, skipping invoke");
        } else {
            let input = self.input_for(desired, previous, state);
            match &step.body {
                StepBody::Remote(translate) => {
                    let request = match translate(&input) {
                        Ok(request) => request,
                        Err(error) => {
                            return StepFlow::Fail {
                                kind: error.outcome_kind(),
                                message: error.to_string(),
                            }
                        }
                    };

                    debug!(step = %step.id(), action = %request.action, "invoking");
                    match self.service.invoke(request).await {
                        Ok(response) => {
                            state.mark_completed(step.id().clone());
                            if let Some(capture) = &step.capture {
                                for (key, value) in capture(&response) {
                                    state.capture(key, value);
                                }
                            }
                        }
                        Err(failure) if step.is_tolerated(&failure) => {
                            debug!(step = %step.id(), code = %failure.code, "tolerated as duplicate");
                            state.mark_completed(step.id().clone());
                        }
                        Err(failure) => {
                            return self.failure_flow(step, PhaseKind::Invoke, &failure, state)
                        }
                    }
                }
                StepBody::Composite(translate) => {
                    let requests = match translate(&input) {
                        Ok(requests) => requests,
                        Err(error) => {
                            return StepFlow::Fail {
                                kind: error.outcome_kind(),
                                message: error.to_string(),
                            }
                        }
                    };

                    debug!(step = %step.id(), targets = requests.len(), "invoking fan-out");
                    for request in requests {
                        match self.service.invoke(request).await {
                            Ok(_) => {}
                            Err(failure) if step.is_tolerated(&failure) => {
                                debug!(step = %step.id(), code = %failure.code, "tolerated as duplicate");
                            }
                            Err(failure) => {
                                return self.failure_flow(step, PhaseKind::Invoke, &failure, state)
                            }
                        }
                    }
                    state.mark_completed(step.id().clone());
                }
            }
        }

        if let Some(stabilize) = &step.stabilize {
            let input = self.input_for(desired, previous, state);
            let request = match (stabilize.fetch)(&input) {
                Ok(request) => request,
                Err(error) => {
                    return StepFlow::Fail {
                        kind: error.outcome_kind(),
                        message: error.to_string(),
                    }
                }
            };

            let poller = BoundedPoller::new(stabilize.config);
            let service = Arc::clone(&self.service);
            let polled = poller
                .poll(
                    move || {
                        let service = Arc::clone(&service);
                        let request = request.clone();
                        async move { service.invoke(request).await }
                    },
                    |response| (stabilize.is_done)(response),
                    |response| (stabilize.is_failed)(response),
                )
                .await;

            match polled {
                Ok(PollOutcome::Done(response)) => {
                    debug!(step = %step.id(), "stabilized");
                    if let Some(capture) = &stabilize.capture {
                        for (key, value) in capture(&response) {
                            state.capture(key, value);
                        }
                    }
                }
                Ok(PollOutcome::Failed { reason }) => {
                    return StepFlow::Fail {
                        kind: ErrorKind::GeneralServiceException,
                        message: format!("step '{}' failed to stabilize: {reason}", step.id()),
                    }
                }
                Ok(PollOutcome::TimedOut) => {
                    return StepFlow::Fail {
                        kind: ErrorKind::NotStabilized,
                        message: format!(
                            "step '{}' did not stabilize within {} attempts; the remote \
                             operation may still complete out of band and requires manual review",
                            step.id(),
                            stabilize.config.max_attempts
                        ),
                    }
                }
                Err(failure) => {
                    return self.failure_flow(step, PhaseKind::Stabilize, &failure, state)
                }
            }
        }

        StepFlow::Continue
    }

    /// Classify a remote failure and decide between a delayed retry and a
    /// terminal failure, updating the retry counters.
    fn failure_flow(
        &self,
        step: &Step<M>,
        phase: PhaseKind,
        failure: &RemoteFailure,
        state: &mut ProgressState,
    ) -> StepFlow {
        let classification = self.classifier.classify(failure);
        state.set_last_failure(failure.to_string());

        if classification.retryable {
            let key = RetryKey::new(step.operation(), phase);
            let attempt = state.attempts(key);
            if self.retry.should_retry(step.operation(), phase, attempt) {
                let count = state.record_retry(key);
                let delay = self.retry.next_delay(step.operation(), attempt);
                warn!(
                    step = %step.id(),
                    phase = %phase,
                    kind = %classification.kind,
                    attempt = count,
                    delay_ms = delay.as_millis() as u64,
                    "retryable failure, scheduling re-invocation"
                );
                return StepFlow::InProgress { delay };
            }
            warn!(
                step = %step.id(),
                phase = %phase,
                attempts = attempt,
                "retry budget exhausted"
            );
        }

        StepFlow::Fail {
            kind: classification.kind,
            message: failure.to_string(),
        }
    }

    fn input_for(&self, desired: &M, previous: Option<&M>, state: &ProgressState) -> StepInput<M> {
        StepInput::new(
            desired.clone(),
            previous.cloned(),
            state.identifiers().clone(),
        )
    }
}
