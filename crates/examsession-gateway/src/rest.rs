//! REST/JSON exam gateway.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use examsession_core::error::GatewayError;
use examsession_core::model::{CommitReceipt, ExamAttempt, FinalizeAck, GatewayResult};
use examsession_core::traits::{CommitRequest, CredentialProvider, ExamGateway};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Which call a response belongs to. Decides how 409 is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    GetAttempt,
    Commit,
    Finalize,
    Result,
}

/// Exam gateway speaking JSON over HTTP.
///
/// Endpoints, relative to `base_url`:
/// - `GET  /exams/attempts/{id}`
/// - `POST /exams/attempts/{id}/answers`
/// - `POST /exams/attempts/{id}/finalize`
/// - `GET  /exams/attempts/{id}/result`
pub struct RestGateway {
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl RestGateway {
    pub fn new(
        base_url: &str,
        credentials: Arc<dyn CredentialProvider>,
        timeout_secs: Option<u64>,
    ) -> Result<Self, GatewayError> {
        let timeout_secs = timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| GatewayError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            client,
            timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn attempt_url(&self, attempt_id: &str, suffix: &str) -> String {
        format!("{}/exams/attempts/{attempt_id}{suffix}", self.base_url)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        call: Call,
        attempt_id: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, GatewayError> {
        let token = self.credentials.bearer_token().await?;

        let response = request
            .bearer_auth(token)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(self.timeout_secs)
                } else {
                    GatewayError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(call, status, attempt_id, body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("failed to parse response: {e}")))
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(alias = "error", alias = "detail")]
    message: String,
}

#[derive(Serialize)]
struct CommitBody<'a> {
    question_id: &'a str,
    option: &'a str,
}

fn error_message(body: String) -> String {
    serde_json::from_str::<ApiErrorBody>(&body)
        .map(|e| e.message)
        .unwrap_or(body)
}

fn map_status(call: Call, status: u16, attempt_id: &str, body: String) -> GatewayError {
    match status {
        401 | 403 => GatewayError::Unauthorized(error_message(body)),
        404 => GatewayError::NotFound(format!("attempt {attempt_id}")),
        409 | 425 if call == Call::Result => GatewayError::NotFinalized(attempt_id.to_string()),
        409 => GatewayError::Conflict(error_message(body)),
        _ => GatewayError::Api {
            status,
            message: error_message(body),
        },
    }
}

#[async_trait]
impl ExamGateway for RestGateway {
    fn name(&self) -> &str {
        "rest"
    }

    #[instrument(skip(self))]
    async fn get_attempt(&self, attempt_id: &str) -> Result<ExamAttempt, GatewayError> {
        let request = self.client.get(self.attempt_url(attempt_id, ""));
        self.send(Call::GetAttempt, attempt_id, request).await
    }

    #[instrument(skip(self, request), fields(attempt_id = %request.attempt_id, question_id = %request.question_id))]
    async fn commit_answer(&self, request: &CommitRequest) -> Result<CommitReceipt, GatewayError> {
        let body = CommitBody {
            question_id: &request.question_id,
            option: &request.option,
        };
        let http = self
            .client
            .post(self.attempt_url(&request.attempt_id, "/answers"))
            .json(&body);
        self.send(Call::Commit, &request.attempt_id, http).await
    }

    #[instrument(skip(self))]
    async fn finalize_attempt(&self, attempt_id: &str) -> Result<FinalizeAck, GatewayError> {
        let request = self.client.post(self.attempt_url(attempt_id, "/finalize"));
        self.send(Call::Finalize, attempt_id, request).await
    }

    #[instrument(skip(self))]
    async fn get_result(&self, attempt_id: &str) -> Result<GatewayResult, GatewayError> {
        let request = self.client.get(self.attempt_url(attempt_id, "/result"));
        self.send(Call::Result, attempt_id, request).await
    }
}

impl std::fmt::Debug for RestGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestGateway")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}
