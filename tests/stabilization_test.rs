//! Stabilization behavior: bounded polling inside one invocation, the
//! NotStabilized terminal outcome, and classification of fetch-level
//! failures during the stabilize phase.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use helmsman::{
    ErrorKind, OperationKind, PhaseKind, PollConfig, ProgressState, RemoteFailure, RemoteRequest,
    RemoteResponse, RetryKey, ScriptedService, Stabilize, Step, StepChain, StepInput,
};
use serde_json::json;

#[derive(Debug, Clone, PartialEq)]
struct Unit;

fn create_chain(service: Arc<ScriptedService>) -> StepChain<Unit> {
    StepChain::new(service).step(
        Step::remote("create", OperationKind::Create, |_: &StepInput<Unit>| {
            Ok(RemoteRequest::empty("Create"))
        })
        .capturing(|response| {
            response
                .str_field("request_id")
                .map(|id| ("request_id".to_string(), id.to_string()))
                .into_iter()
                .collect()
        })
        .stabilized_by(
            Stabilize::new(
                |input: &StepInput<Unit>| {
                    Ok(RemoteRequest::new(
                        "DescribeCreateStatus",
                        json!({ "request_id": input.identifier("request_id")? }),
                    ))
                },
                |response| response.str_field("state") == Some("SUCCEEDED"),
            )
            .failing_when(|response| {
                (response.str_field("state") == Some("FAILED")).then(|| {
                    response
                        .str_field("reason")
                        .unwrap_or("creation failed")
                        .to_string()
                })
            })
            .with_config(PollConfig::new(5, Duration::from_millis(1)).without_jitter()),
        ),
    )
}

fn created(service: &ScriptedService) {
    service.respond(
        "Create",
        RemoteResponse::new(json!({ "request_id": "car-1" })),
    );
}

#[tokio::test]
async fn test_exhausted_poll_is_not_stabilized() {
    let service = Arc::new(ScriptedService::new());
    created(&service);
    for _ in 0..5 {
        service.respond(
            "DescribeCreateStatus",
            RemoteResponse::new(json!({ "state": "IN_PROGRESS" })),
        );
    }

    let chain = create_chain(Arc::clone(&service));
    let outcome = chain.run(&Unit, None, ProgressState::new()).await;

    let (kind, message) = match outcome.error() {
        Some((kind, message)) => (kind, message.to_string()),
        None => (ErrorKind::GeneralServiceException, String::new()),
    };
    assert_eq!(kind, ErrorKind::NotStabilized);
    assert!(message.contains("out of band"), "message was: {message}");
    // Exactly the attempt budget, never more.
    assert_eq!(service.call_count("DescribeCreateStatus"), 5);
    // The side effect itself was issued and stays flagged.
    assert!(outcome.state().is_completed(&"create".into()));
}

#[tokio::test]
async fn test_remote_failure_state_is_terminal() {
    let service = Arc::new(ScriptedService::new());
    created(&service);
    service.respond(
        "DescribeCreateStatus",
        RemoteResponse::new(json!({ "state": "FAILED", "reason": "email already in use" })),
    );

    let chain = create_chain(Arc::clone(&service));
    let outcome = chain.run(&Unit, None, ProgressState::new()).await;

    let (kind, message) = match outcome.error() {
        Some((kind, message)) => (kind, message.to_string()),
        None => (ErrorKind::NotStabilized, String::new()),
    };
    assert_eq!(kind, ErrorKind::GeneralServiceException);
    assert!(message.contains("email already in use"), "message was: {message}");
    // Only one poll was needed to observe the failure.
    assert_eq!(service.call_count("DescribeCreateStatus"), 1);
}

#[tokio::test]
async fn test_stabilize_fetch_errors_retry_under_their_own_key() -> helmsman::Result<()> {
    let service = Arc::new(ScriptedService::new());
    created(&service);
    // Invocation one: the describe call itself is throttled.
    service.fail(
        "DescribeCreateStatus",
        RemoteFailure::new("ThrottlingException", "slow down"),
    );
    // Invocation two: stabilized.
    service.respond(
        "DescribeCreateStatus",
        RemoteResponse::new(json!({ "state": "SUCCEEDED" })),
    );

    let chain = create_chain(Arc::clone(&service));

    let outcome = chain.run(&Unit, None, ProgressState::new()).await;
    assert!(outcome.is_in_progress());
    // The create suppression applies to the invoke phase only; the
    // read-only stabilize fetch retries under (create, stabilize).
    let key = RetryKey::new(OperationKind::Create, PhaseKind::Stabilize);
    assert_eq!(outcome.state().attempts(key), 1);

    let blob = outcome.state().to_blob()?;
    let state = ProgressState::from_blob(Some(blob.as_slice()))?;
    let outcome = chain.run(&Unit, None, state).await;

    assert!(outcome.is_success());
    // The creation was never reissued.
    assert_eq!(service.call_count("Create"), 1);
    Ok(())
}
