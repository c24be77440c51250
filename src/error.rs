//! Error types for the reconciliation engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Abstract outcome kinds for failed reconciliations.
///
/// These are the kinds surfaced to the host through `Outcome::Failed`;
/// whether a kind is worth retrying is decided by the classifier at the
/// point of failure, not by the kind itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The resource (or a referenced entity) does not exist.
    NotFound,
    /// The resource already exists and cannot be created again.
    AlreadyExists,
    /// The caller is not permitted to perform the operation.
    AccessDenied,
    /// Concurrent modification or contention on the remote side.
    ResourceConflict,
    /// A remote quota or limit was exceeded.
    ServiceLimitExceeded,
    /// The request was malformed or violated a business rule.
    InvalidRequest,
    /// A transient remote-service fault.
    ServiceInternalError,
    /// The remote side is rate limiting.
    Throttling,
    /// A side effect was issued but never became durably visible.
    NotStabilized,
    /// An immutable identifier changed between desired and previous state.
    NotUpdatable,
    /// Unclassified remote failure.
    GeneralServiceException,
}

impl ErrorKind {
    /// Stable string form, used in logs and serialized outcomes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::AlreadyExists => "AlreadyExists",
            Self::AccessDenied => "AccessDenied",
            Self::ResourceConflict => "ResourceConflict",
            Self::ServiceLimitExceeded => "ServiceLimitExceeded",
            Self::InvalidRequest => "InvalidRequest",
            Self::ServiceInternalError => "ServiceInternalError",
            Self::Throttling => "Throttling",
            Self::NotStabilized => "NotStabilized",
            Self::NotUpdatable => "NotUpdatable",
            Self::GeneralServiceException => "GeneralServiceException",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Engine-local faults (as opposed to remote failures, which arrive as
/// `RemoteFailure` and go through the classifier).
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The persisted progress blob could not be decoded.
    #[error("failed to decode progress state: {reason}")]
    StateDecodeFailed { reason: String },

    /// The progress state could not be encoded.
    #[error("failed to encode progress state: {reason}")]
    StateEncodeFailed { reason: String },

    /// A step asked for an identifier no prior step captured.
    #[error("identifier '{key}' was not captured by any prior step")]
    MissingIdentifier { key: String },

    /// A step's translate function could not build its request.
    #[error("step '{step}' could not build its request: {reason}")]
    TranslateFailed { step: String, reason: String },

    /// A guard rejected the update before any remote call was made.
    #[error("update rejected: {reason}")]
    NotUpdatable { reason: String },

    /// The chain itself is misconfigured.
    #[error("invalid chain: {reason}")]
    InvalidChain { reason: String },
}

impl Error {
    /// Create a state decode error.
    pub fn state_decode_failed(reason: impl Into<String>) -> Self {
        Self::StateDecodeFailed {
            reason: reason.into(),
        }
    }

    /// Create a state encode error.
    pub fn state_encode_failed(reason: impl Into<String>) -> Self {
        Self::StateEncodeFailed {
            reason: reason.into(),
        }
    }

    /// Create a missing identifier error.
    pub fn missing_identifier(key: impl Into<String>) -> Self {
        Self::MissingIdentifier { key: key.into() }
    }

    /// Create a translate failed error.
    pub fn translate_failed(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TranslateFailed {
            step: step.into(),
            reason: reason.into(),
        }
    }

    /// Create a not-updatable error.
    pub fn not_updatable(reason: impl Into<String>) -> Self {
        Self::NotUpdatable {
            reason: reason.into(),
        }
    }

    /// Create an invalid chain error.
    pub fn invalid_chain(reason: impl Into<String>) -> Self {
        Self::InvalidChain {
            reason: reason.into(),
        }
    }

    /// The outcome kind this fault surfaces as when it terminates a chain.
    pub fn outcome_kind(&self) -> ErrorKind {
        match self {
            Self::NotUpdatable { .. } => ErrorKind::NotUpdatable,
            Self::MissingIdentifier { .. } | Self::TranslateFailed { .. } => {
                ErrorKind::InvalidRequest
            }
            Self::StateDecodeFailed { .. }
            | Self::StateEncodeFailed { .. }
            | Self::InvalidChain { .. } => ErrorKind::GeneralServiceException,
        }
    }
}
