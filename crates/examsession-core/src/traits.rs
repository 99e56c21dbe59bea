//! Trait definitions for the exam data gateway and its credentials.
//!
//! The gateway is implemented by the `examsession-gateway` crate (REST and
//! in-memory). Credentials are passed in explicitly rather than read from
//! ambient state, so a session can be exercised against a fake gateway.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::model::{CommitReceipt, ExamAttempt, FinalizeAck, GatewayResult};

// ---------------------------------------------------------------------------
// Exam data gateway
// ---------------------------------------------------------------------------

/// Remote service that owns exam ground truth.
#[async_trait]
pub trait ExamGateway: Send + Sync {
    /// Human-readable gateway name (e.g. "rest").
    fn name(&self) -> &str;

    /// Fetch an attempt. Options carry no correctness flags before finalization.
    async fn get_attempt(&self, attempt_id: &str) -> Result<ExamAttempt, GatewayError>;

    /// Submit one answer and receive the authoritative verdict.
    /// Callers must issue this at most once per question.
    async fn commit_answer(&self, request: &CommitRequest) -> Result<CommitReceipt, GatewayError>;

    /// Close the attempt for answering. Idempotent: repeated calls return the
    /// same acknowledgement.
    async fn finalize_attempt(&self, attempt_id: &str) -> Result<FinalizeAck, GatewayError>;

    /// Fetch the scored breakdown. Only valid after finalize.
    async fn get_result(&self, attempt_id: &str) -> Result<GatewayResult, GatewayError>;
}

/// One answer submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub attempt_id: String,
    pub question_id: String,
    /// Selected option label.
    pub option: String,
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Supplies the bearer credential attached to every gateway call.
///
/// Token refresh belongs to the surrounding auth subsystem; implementations
/// simply hand back whatever credential is current.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String, GatewayError>;
}

/// A fixed bearer token.
///
/// Note: Debug masks the token to keep it out of logs.
#[derive(Clone)]
pub struct StaticCredentials {
    token: String,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("token", &"***")
            .finish()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn bearer_token(&self) -> Result<String, GatewayError> {
        if self.token.is_empty() {
            return Err(GatewayError::Credentials("no bearer token configured".into()));
        }
        Ok(self.token.clone())
    }
}
