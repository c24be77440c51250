//! Remote-failure classification.
//!
//! Failures are classified exactly once, at the point of failure, by an
//! ordered rule table: the first matching rule decides both the abstract
//! kind and whether a retry is worthwhile. Overlapping rules resolve by
//! table order, so more specific codes must be registered first.
//!
//! Benign duplicates ("already attached", "already detached") are NOT
//! classifier rules; a step's own tolerance predicate intercepts them
//! before classification ever runs.

use crate::error::ErrorKind;
use crate::remote::RemoteFailure;

/// Result of classifying a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Abstract failure kind.
    pub kind: ErrorKind,
    /// Whether re-attempting the operation is expected to eventually
    /// succeed.
    pub retryable: bool,
}

type MatchFn = Box<dyn Fn(&RemoteFailure) -> bool + Send + Sync>;

/// One classification rule.
pub struct Rule {
    matches: MatchFn,
    kind: ErrorKind,
    retryable: bool,
}

impl Rule {
    /// Create a rule from a predicate.
    pub fn new(
        matches: impl Fn(&RemoteFailure) -> bool + Send + Sync + 'static,
        kind: ErrorKind,
        retryable: bool,
    ) -> Self {
        Self {
            matches: Box::new(matches),
            kind,
            retryable,
        }
    }

    /// Create a rule matching any of the given code substrings
    /// (case-insensitive).
    pub fn codes(needles: &[&str], kind: ErrorKind, retryable: bool) -> Self {
        let needles = needles
            .iter()
            .map(|needle| needle.to_string())
            .collect::<Vec<_>>();
        Self::new(
            move |failure| needles.iter().any(|needle| failure.code_contains(needle)),
            kind,
            retryable,
        )
    }
}

/// Ordered-table failure classifier.
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Classifier {
    /// Classifier with no rules; everything falls through to
    /// `GeneralServiceException`.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// The standard table.
    pub fn standard() -> Self {
        Self::empty()
            .rule(Rule::codes(
                &["ConcurrentModification", "Conflict"],
                ErrorKind::ResourceConflict,
                true,
            ))
            .rule(Rule::codes(
                &["Throttl", "TooManyRequests", "RequestLimitExceeded", "SlowDown"],
                ErrorKind::Throttling,
                true,
            ))
            .rule(Rule::codes(
                &["InternalError", "InternalFailure", "ServiceUnavailable"],
                ErrorKind::ServiceInternalError,
                true,
            ))
            .rule(Rule::codes(
                &["NotFound", "NoSuchEntity"],
                ErrorKind::NotFound,
                false,
            ))
            .rule(Rule::codes(
                &["AlreadyExists", "DuplicateResource"],
                ErrorKind::AlreadyExists,
                false,
            ))
            .rule(Rule::codes(
                &["AccessDenied", "Unauthorized", "Forbidden"],
                ErrorKind::AccessDenied,
                false,
            ))
            .rule(Rule::codes(
                &["Validation", "InvalidInput", "InvalidParameter", "Malformed"],
                ErrorKind::InvalidRequest,
                false,
            ))
            .rule(Rule::codes(
                &["LimitExceeded", "QuotaExceeded"],
                ErrorKind::ServiceLimitExceeded,
                false,
            ))
    }

    /// Append a rule (lowest precedence so far).
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Prepend a rule (highest precedence).
    pub fn rule_first(mut self, rule: Rule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    /// Classify a failure: first matching rule wins; no match is a
    /// terminal `GeneralServiceException`.
    pub fn classify(&self, failure: &RemoteFailure) -> Classification {
        self.rules
            .iter()
            .find(|rule| (rule.matches)(failure))
            .map(|rule| Classification {
                kind: rule.kind,
                retryable: rule.retryable,
            })
            .unwrap_or(Classification {
                kind: ErrorKind::GeneralServiceException,
                retryable: false,
            })
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::standard()
    }
}
