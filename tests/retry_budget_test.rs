//! Retry budget behavior: monotonic counters, exhaustion exactly at the
//! configured maximum, per-(operation, phase) independence, and the
//! no-retry-on-create rule.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use helmsman::{
    ErrorKind, OperationKind, Outcome, PhaseKind, ProgressState, RemoteFailure, RemoteRequest,
    RemoteResponse, RetryKey, RetryPolicy, ScriptedService, Step, StepChain, StepInput,
};

#[derive(Debug, Clone, PartialEq)]
struct Unit;

fn move_chain(service: Arc<ScriptedService>, policy: RetryPolicy) -> StepChain<Unit> {
    StepChain::new(service)
        .with_retry_policy(policy)
        .step(Step::remote("move", OperationKind::Move, |_: &StepInput<Unit>| {
            Ok(RemoteRequest::empty("Move"))
        }))
}

fn move_key() -> RetryKey {
    RetryKey::new(OperationKind::Move, PhaseKind::Invoke)
}

#[tokio::test]
async fn test_terminal_classification_freezes_the_counter() {
    let service = Arc::new(ScriptedService::new());
    service.fail("Move", RemoteFailure::new("ConcurrentModificationException", "busy"));
    service.fail("Move", RemoteFailure::new("ConcurrentModificationException", "busy"));
    service.fail("Move", RemoteFailure::new("AccessDeniedException", "no move permission"));

    // Move allows 3 attempts here so the terminal failure arrives before
    // the budget runs out.
    let policy = RetryPolicy::new()
        .with_profile(
            OperationKind::Move,
            helmsman::RetryProfile::new(Duration::from_millis(1), 3),
        )
        .without_jitter();
    let chain = move_chain(Arc::clone(&service), policy);

    let mut state = ProgressState::new();

    // Two retryable conflicts: two InProgress outcomes.
    for expected in 1..=2u32 {
        let outcome = chain.run(&Unit, None, state).await;
        assert!(outcome.is_in_progress());
        state = outcome.into_state();
        assert_eq!(state.attempts(move_key()), expected);
    }

    // Attempt three classifies terminal: Failed, counter untouched.
    let outcome = chain.run(&Unit, None, state).await;
    assert_eq!(
        outcome.error().map(|(kind, _)| kind),
        Some(ErrorKind::AccessDenied)
    );
    assert_eq!(outcome.state().attempts(move_key()), 2);
}

#[tokio::test]
async fn test_budget_exhausts_exactly_at_the_maximum() {
    let service = Arc::new(ScriptedService::new());
    for _ in 0..3 {
        service.fail("Move", RemoteFailure::new("ConcurrentModificationException", "busy"));
    }

    // Default policy: the Move family allows 2 attempts.
    let chain = move_chain(Arc::clone(&service), RetryPolicy::new().without_jitter());

    let mut state = ProgressState::new();

    let outcome = chain.run(&Unit, None, state).await;
    assert!(outcome.is_in_progress());
    state = outcome.into_state();

    let outcome = chain.run(&Unit, None, state).await;
    assert!(outcome.is_in_progress(), "failed before the budget was spent");
    state = outcome.into_state();
    assert_eq!(state.attempts(move_key()), 2);

    let outcome = chain.run(&Unit, None, state).await;
    assert_eq!(
        outcome.error().map(|(kind, _)| kind),
        Some(ErrorKind::ResourceConflict)
    );
    assert_eq!(outcome.state().attempts(move_key()), 2);
}

#[tokio::test]
async fn test_in_progress_delay_uses_the_slow_family_profile() {
    let service = Arc::new(ScriptedService::new());
    service.fail("Move", RemoteFailure::new("ConcurrentModificationException", "busy"));

    // Default policy: Move backs off from a 15s base with 0.5 jitter.
    let chain = move_chain(Arc::clone(&service), RetryPolicy::new());

    let outcome = chain.run(&Unit, None, ProgressState::new()).await;

    let delay = outcome.delay().unwrap_or_default();
    assert!(delay >= Duration::from_secs(15), "delay {delay:?} under base");
    assert!(
        delay <= Duration::from_millis(22_500),
        "delay {delay:?} over base plus jitter"
    );
}

#[tokio::test]
async fn test_distinct_operations_do_not_share_a_budget() {
    let service = Arc::new(ScriptedService::new());
    service.fail("Move", RemoteFailure::new("ConcurrentModificationException", "busy"));
    service.respond("Move", RemoteResponse::empty());
    service.fail("Tag", RemoteFailure::new("ThrottlingException", "slow down"));
    service.respond("Tag", RemoteResponse::empty());

    let policy = RetryPolicy::new()
        .with_default_profile(helmsman::RetryProfile::new(Duration::from_millis(1), 3))
        .with_profile(
            OperationKind::Move,
            helmsman::RetryProfile::new(Duration::from_millis(1), 2),
        )
        .without_jitter();
    let chain = StepChain::new(Arc::clone(&service))
        .with_retry_policy(policy)
        .step(Step::remote("move", OperationKind::Move, |_: &StepInput<Unit>| {
            Ok(RemoteRequest::empty("Move"))
        }))
        .step(Step::remote("tag", OperationKind::Tag, |_: &StepInput<Unit>| {
            Ok(RemoteRequest::empty("Tag"))
        }));

    let mut state = ProgressState::new();
    let mut terminal = None;
    for _ in 0..4 {
        match chain.run(&Unit, None, state).await {
            Outcome::InProgress { state: next, .. } => state = next,
            outcome => {
                terminal = Some(outcome);
                break;
            }
        }
    }

    assert!(terminal.is_some(), "chain never reached a terminal outcome");
    if let Some(outcome) = terminal {
        assert!(outcome.is_success());
        assert_eq!(outcome.state().attempts(move_key()), 1);
        assert_eq!(
            outcome
                .state()
                .attempts(RetryKey::new(OperationKind::Tag, PhaseKind::Invoke)),
            1
        );
    }
}

#[tokio::test]
async fn test_create_invoke_failures_are_terminal_by_default() {
    let service = Arc::new(ScriptedService::new());
    service.fail("Create", RemoteFailure::new("ServiceUnavailable", "try later"));

    let chain = StepChain::new(Arc::clone(&service)).step(Step::remote(
        "create",
        OperationKind::Create,
        |_: &StepInput<Unit>| Ok(RemoteRequest::empty("Create")),
    ));

    // Retrying a not-yet-observable creation risks a duplicate resource,
    // so even a retryable classification surfaces as terminal.
    let outcome = chain.run(&Unit, None, ProgressState::new()).await;
    assert_eq!(
        outcome.error().map(|(kind, _)| kind),
        Some(ErrorKind::ServiceInternalError)
    );
    assert_eq!(
        outcome
            .state()
            .attempts(RetryKey::new(OperationKind::Create, PhaseKind::Invoke)),
        0
    );
}

#[tokio::test]
async fn test_create_retries_when_explicitly_permitted() {
    let service = Arc::new(ScriptedService::new());
    service.fail("Create", RemoteFailure::new("ServiceUnavailable", "try later"));

    let policy = RetryPolicy::new()
        .permit_retries(OperationKind::Create)
        .with_default_profile(helmsman::RetryProfile::new(Duration::from_millis(1), 3))
        .without_jitter();
    let chain = StepChain::new(Arc::clone(&service))
        .with_retry_policy(policy)
        .step(Step::remote(
            "create",
            OperationKind::Create,
            |_: &StepInput<Unit>| Ok(RemoteRequest::empty("Create")),
        ));

    let outcome = chain.run(&Unit, None, ProgressState::new()).await;
    assert!(outcome.is_in_progress());
    assert_eq!(
        outcome
            .state()
            .attempts(RetryKey::new(OperationKind::Create, PhaseKind::Invoke)),
        1
    );
}
