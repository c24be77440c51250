//! Resumable step-chain reconciliation for eventually-consistent remote
//! resources.
//!
//! A remotely-managed resource whose creation, update, and deletion are
//! themselves asynchronous cannot be reconciled in one sitting. This crate
//! drives such a resource toward its desired state across many short
//! invocations, each of which receives only a serialized snapshot of prior
//! progress and decides what to do next:
//!
//! - **Step chain**: ordered steps with translate/invoke/stabilize phases,
//!   short-circuiting on failure or incompleteness.
//! - **Progress state**: a pure serializable value carrying completion
//!   flags, typed retry counters, and captured identifiers between
//!   invocations.
//! - **Idempotent skip**: a step whose side effect was already issued is
//!   never re-invoked, even if a later step failed.
//! - **Bounded polling**: stabilization waits are capped well under the
//!   host's per-invocation wall-clock budget; longer waits come back as
//!   `InProgress` delays for the host to honor.
//! - **Classified retries**: remote failures are classified once through
//!   an ordered rule table; retryable kinds back off exponentially with
//!   jitter under per-operation budgets, everything else is terminal.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use helmsman::{
//!     OperationKind, ProgressState, RemoteRequest, Stabilize, Step, StepChain,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let service = Arc::new(MyService::connect());
//!
//!     let chain = StepChain::new(service)
//!         .step(
//!             Step::remote("create", OperationKind::Create, |input| {
//!                 Ok(RemoteRequest::new("CreateAccount", serde_json::json!({
//!                     "name": input.desired.name,
//!                 })))
//!             })
//!             .capturing(|response| {
//!                 response.str_field("request_id")
//!                     .map(|id| ("request_id".to_string(), id.to_string()))
//!                     .into_iter()
//!                     .collect()
//!             })
//!             .stabilized_by(Stabilize::new(
//!                 |input| Ok(RemoteRequest::new("DescribeCreateStatus", serde_json::json!({
//!                     "request_id": input.identifier("request_id")?,
//!                 }))),
//!                 |response| response.str_field("state") == Some("SUCCEEDED"),
//!             )),
//!         );
//!
//!     // The host persists outcome.state() and re-invokes while the
//!     // outcome is InProgress, honoring the returned delay.
//!     let outcome = chain.run(&desired, previous.as_ref(), ProgressState::new()).await;
//! }
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod chain;
pub mod classify;
pub mod error;
pub mod poll;
pub mod remote;
pub mod retry;
pub mod scan;
pub mod state;
pub mod step;
pub mod tags;

// Re-export main types
pub use chain::{Outcome, StepChain};
pub use classify::{Classification, Classifier, Rule};
pub use error::{Error, ErrorKind, Result};
pub use poll::{BoundedPoller, PollConfig, PollOutcome};
pub use remote::{
    Page, RemoteFailure, RemoteRequest, RemoteResponse, RemoteService, ScriptedService,
};
pub use retry::{RetryPolicy, RetryProfile};
pub use scan::scan_all;
pub use state::{
    FailureRecord, OperationKind, PhaseKind, ProgressState, RetryKey, StepId,
};
pub use step::{Existence, Stabilize, Step, StepInput};
pub use tags::{diff_tags, TagDelta};
