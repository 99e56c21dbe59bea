//! Gateway and session error types.
//!
//! `GatewayError` lives in the core crate so the session controller can
//! classify failures (retryable or not) without string matching.

use thiserror::Error;

/// Errors that can occur when talking to the exam data gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The bearer credential was rejected (HTTP 401/403).
    #[error("authentication failed: {0}")]
    Unauthorized(String),

    /// The attempt or question does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The gateway refused the write because it conflicts with stored state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The result was requested before the attempt was finalized.
    #[error("attempt {0} is not finalized")]
    NotFinalized(String),

    /// The gateway returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    Network(String),

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// No bearer credential could be obtained.
    #[error("credentials unavailable: {0}")]
    Credentials(String),
}

impl GatewayError {
    /// Returns `true` if repeating the same call cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            GatewayError::Unauthorized(_)
                | GatewayError::NotFound(_)
                | GatewayError::Conflict(_)
                | GatewayError::Credentials(_)
        )
    }
}

/// Failures surfaced by the session controller.
///
/// Stale actions (an operation arriving in a state that no longer permits it)
/// are not errors; they come back as [`crate::Outcome::Ignored`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// The attempt could not be fetched. The session never starts.
    #[error("failed to load attempt {attempt_id}: {source}")]
    Load {
        attempt_id: String,
        #[source]
        source: GatewayError,
    },

    /// The gateway returned an attempt that violates its own invariants.
    #[error("attempt {attempt_id} is malformed: {reason}")]
    InvalidAttempt { attempt_id: String, reason: String },

    /// A single answer commit failed. The question stays uncommitted.
    #[error("failed to commit answer for question {question_id} of attempt {attempt_id}: {source}")]
    Commit {
        attempt_id: String,
        question_id: String,
        #[source]
        source: GatewayError,
    },

    /// The finalize call failed. The session stays in `Finalizing`.
    #[error("failed to finalize attempt {attempt_id}: {source}")]
    Finalize {
        attempt_id: String,
        #[source]
        source: GatewayError,
    },

    /// The scored result could not be fetched.
    #[error("failed to fetch result for attempt {attempt_id}: {source}")]
    Result {
        attempt_id: String,
        #[source]
        source: GatewayError,
    },

    /// The caller referenced a question index or option label that does not exist.
    #[error("invalid selection: {0}")]
    InvalidSelection(String),
}

impl SessionError {
    /// The gateway failure behind this error, if any.
    pub fn gateway_error(&self) -> Option<&GatewayError> {
        match self {
            SessionError::Load { source, .. }
            | SessionError::Commit { source, .. }
            | SessionError::Finalize { source, .. }
            | SessionError::Result { source, .. } => Some(source),
            SessionError::InvalidAttempt { .. } | SessionError::InvalidSelection(_) => None,
        }
    }

    /// Returns `true` if the caller may reasonably repeat the operation.
    pub fn is_retryable(&self) -> bool {
        self.gateway_error().is_some_and(|e| !e.is_permanent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_gateway_errors() {
        assert!(GatewayError::Unauthorized("bad token".into()).is_permanent());
        assert!(GatewayError::NotFound("a-1".into()).is_permanent());
        assert!(!GatewayError::Timeout(30).is_permanent());
        assert!(!GatewayError::Network("reset".into()).is_permanent());
        assert!(!GatewayError::Api {
            status: 503,
            message: "unavailable".into()
        }
        .is_permanent());
    }

    #[test]
    fn finalize_failure_is_retryable() {
        let err = SessionError::Finalize {
            attempt_id: "a-1".into(),
            source: GatewayError::Network("connection reset".into()),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("a-1"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn invalid_selection_is_not_retryable() {
        let err = SessionError::InvalidSelection("no option 'e'".into());
        assert!(!err.is_retryable());
        assert!(err.gateway_error().is_none());
    }
}
