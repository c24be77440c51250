//! The remote-service collaborator boundary.
//!
//! The engine never talks to a concrete API; it issues opaque
//! [`RemoteRequest`]s through a [`RemoteService`] and interprets the
//! opaque responses/failures it gets back. Field mappings and transport
//! live entirely on the other side of this trait.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// An opaque request to the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    /// Remote action name (e.g. a wire operation).
    pub action: String,
    /// Opaque request body.
    pub body: Value,
}

impl RemoteRequest {
    /// Create a request with a body.
    pub fn new(action: impl Into<String>, body: Value) -> Self {
        Self {
            action: action.into(),
            body,
        }
    }

    /// Create a request with no body.
    pub fn empty(action: impl Into<String>) -> Self {
        Self::new(action, Value::Null)
    }
}

/// An opaque response from the remote service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteResponse {
    /// Opaque response body.
    pub body: Value,
}

impl RemoteResponse {
    /// Create a response with a body.
    pub fn new(body: Value) -> Self {
        Self { body }
    }

    /// Create an empty response.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up a top-level body field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Look up a top-level string field.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Value::as_str)
    }
}

/// A failure reported by the remote service.
///
/// `code` is the remote's failure category string; the classifier matches
/// on it to decide the abstract kind and retryability.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct RemoteFailure {
    /// Remote failure category code.
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

impl RemoteFailure {
    /// Create a remote failure.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Case-insensitive substring match on the failure code.
    pub fn code_contains(&self, needle: &str) -> bool {
        self.code
            .to_ascii_lowercase()
            .contains(&needle.to_ascii_lowercase())
    }
}

/// One page of a paginated listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page<T = Value> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Continuation token; `None` ends the stream.
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    /// Create a page with a continuation token.
    pub fn new(items: Vec<T>, next_token: Option<String>) -> Self {
        Self { items, next_token }
    }

    /// Create a final page (no continuation).
    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, None)
    }
}

/// Synchronous remote-call surface consumed by the engine.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Perform a remote call.
    async fn invoke(&self, request: RemoteRequest)
        -> std::result::Result<RemoteResponse, RemoteFailure>;

    /// Fetch one page of the remote listing.
    async fn list_page(
        &self,
        token: Option<&str>,
    ) -> std::result::Result<Page, RemoteFailure>;
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted in-memory remote service for testing.
///
/// Results are queued per action and consumed in order; every request is
/// recorded so tests can assert exactly which calls were made. An action
/// with no scripted result fails with an `UnscriptedAction` code.
#[derive(Default)]
pub struct ScriptedService {
    results: Mutex<HashMap<String, VecDeque<std::result::Result<RemoteResponse, RemoteFailure>>>>,
    pages: Mutex<Vec<Page>>,
    calls: Mutex<Vec<RemoteRequest>>,
    page_fetches: Mutex<usize>,
}

impl ScriptedService {
    /// Create an empty scripted service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response for an action.
    pub fn respond(&self, action: impl Into<String>, response: RemoteResponse) {
        locked(&self.results)
            .entry(action.into())
            .or_default()
            .push_back(Ok(response));
    }

    /// Queue a failure for an action.
    pub fn fail(&self, action: impl Into<String>, failure: RemoteFailure) {
        locked(&self.results)
            .entry(action.into())
            .or_default()
            .push_back(Err(failure));
    }

    /// Set the listing pages returned by `list_page`, in order.
    ///
    /// Page `i + 1` is served for the token `i.to_string()`; pages should
    /// carry matching `next_token`s.
    pub fn set_pages(&self, pages: Vec<Page>) {
        *locked(&self.pages) = pages;
    }

    /// All recorded requests, in call order.
    pub fn calls(&self) -> Vec<RemoteRequest> {
        locked(&self.calls).clone()
    }

    /// Number of recorded requests for an action.
    pub fn call_count(&self, action: &str) -> usize {
        locked(&self.calls)
            .iter()
            .filter(|call| call.action == action)
            .count()
    }

    /// Number of listing pages fetched.
    pub fn page_fetches(&self) -> usize {
        *locked(&self.page_fetches)
    }
}

#[async_trait]
impl RemoteService for ScriptedService {
    async fn invoke(
        &self,
        request: RemoteRequest,
    ) -> std::result::Result<RemoteResponse, RemoteFailure> {
        let action = request.action.clone();
        locked(&self.calls).push(request);
        locked(&self.results)
            .get_mut(&action)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Err(RemoteFailure::new(
                    "UnscriptedAction",
                    format!("no scripted result for '{action}'"),
                ))
            })
    }

    async fn list_page(
        &self,
        token: Option<&str>,
    ) -> std::result::Result<Page, RemoteFailure> {
        let mut fetches = locked(&self.page_fetches);
        *fetches = fetches.saturating_add(1);
        drop(fetches);

        let index = token.and_then(|t| t.parse::<usize>().ok()).unwrap_or(0);
        Ok(locked(&self.pages)
            .get(index)
            .cloned()
            .unwrap_or_default())
    }
}
