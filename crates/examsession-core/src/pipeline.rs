//! Answer commit pipeline.
//!
//! Sends one selection to the gateway and records the verdict. A question is
//! reserved under the session lock before the network call, so at most one
//! commit per question is ever issued, and the verdict is written back in a
//! single step so a record is never half-updated.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::instrument;

use crate::error::SessionError;
use crate::model::{AnswerRecord, CommitReceipt};
use crate::session::{Action, Outcome, SessionState, SessionStatus};
use crate::traits::{CommitRequest, ExamGateway};

/// What a call to [`AnswerCommitPipeline::commit`] achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The gateway accepted the answer; the record now holds its verdict.
    Committed(AnswerRecord),
    /// The question was committed earlier. Nothing was sent.
    AlreadyCommitted(AnswerRecord),
    /// Another commit for this question is awaiting the gateway. Nothing was sent.
    InFlight,
}

impl CommitOutcome {
    /// The stored record, when one exists.
    pub fn record(&self) -> Option<&AnswerRecord> {
        match self {
            CommitOutcome::Committed(record) | CommitOutcome::AlreadyCommitted(record) => {
                Some(record)
            }
            CommitOutcome::InFlight => None,
        }
    }
}

/// Result of reserving a question for commit.
enum Reservation {
    Send { attempt_id: String, question_id: String },
    Done(CommitOutcome),
}

/// Commits answers for one session through the gateway.
pub(crate) struct AnswerCommitPipeline {
    gateway: Arc<dyn ExamGateway>,
}

impl AnswerCommitPipeline {
    pub(crate) fn new(gateway: Arc<dyn ExamGateway>) -> Self {
        Self { gateway }
    }

    /// Commit `option` for the question at `index`.
    #[instrument(skip(self, state))]
    pub(crate) async fn commit(
        &self,
        state: &Mutex<SessionState>,
        index: usize,
        option: &str,
    ) -> Result<Outcome<CommitOutcome>, SessionError> {
        let (attempt_id, question_id) = {
            let mut guard = state.lock().await;
            match guard.reserve(index, option)? {
                Ok(Reservation::Send {
                    attempt_id,
                    question_id,
                }) => (attempt_id, question_id),
                Ok(Reservation::Done(outcome)) => return Ok(Outcome::Applied(outcome)),
                Err(stale) => return Ok(Outcome::Ignored(stale)),
            }
        };

        let request = CommitRequest {
            attempt_id: attempt_id.clone(),
            question_id: question_id.clone(),
            option: option.to_string(),
        };
        let response = self.gateway.commit_answer(&request).await;

        let mut guard = state.lock().await;
        guard.pending.remove(&question_id);

        if guard.abandoned {
            tracing::warn!(
                attempt_id = %attempt_id,
                question_id = %question_id,
                "discarding commit response for abandoned session"
            );
            return Ok(Outcome::Ignored(guard.stale(Action::SelectAnswer)));
        }

        match response {
            Ok(receipt) => {
                let record = guard.record_verdict(index, option, receipt);
                tracing::info!(
                    attempt_id = %attempt_id,
                    question_id = %question_id,
                    verdict = ?record.verdict,
                    "answer committed"
                );
                Ok(Outcome::Applied(CommitOutcome::Committed(record)))
            }
            Err(source) => {
                tracing::warn!(
                    attempt_id = %attempt_id,
                    question_id = %question_id,
                    error = %source,
                    "answer commit failed"
                );
                Err(SessionError::Commit {
                    attempt_id,
                    question_id,
                    source,
                })
            }
        }
    }
}

impl SessionState {
    /// Check every precondition and mark the question as in flight.
    ///
    /// The outer `Result` carries caller mistakes, the inner one stale races.
    fn reserve(
        &mut self,
        index: usize,
        option: &str,
    ) -> Result<Result<Reservation, crate::session::StaleState>, SessionError> {
        if let Err(stale) = self.require(Action::SelectAnswer, SessionStatus::InProgress) {
            return Ok(Err(stale));
        }
        if self.deadline_passed() {
            tracing::debug!("answer selected after the deadline");
            return Ok(Err(self.stale(Action::SelectAnswer)));
        }

        let Some(attempt) = self.attempt.clone() else {
            return Ok(Err(self.stale(Action::SelectAnswer)));
        };
        let question = attempt.questions.get(index).ok_or_else(|| {
            SessionError::InvalidSelection(format!(
                "question index {index} out of range (attempt has {})",
                attempt.questions.len()
            ))
        })?;
        if question.option(option).is_none() {
            return Err(SessionError::InvalidSelection(format!(
                "question '{}' has no option '{option}'",
                question.id
            )));
        }

        let record = &self.answers[index];
        if record.committed {
            tracing::debug!(question_id = %question.id, "question already committed");
            return Ok(Ok(Reservation::Done(CommitOutcome::AlreadyCommitted(
                record.clone(),
            ))));
        }
        if !self.pending.insert(question.id.clone()) {
            return Ok(Ok(Reservation::Done(CommitOutcome::InFlight)));
        }

        Ok(Ok(Reservation::Send {
            attempt_id: attempt.id.clone(),
            question_id: question.id.clone(),
        }))
    }

    fn record_verdict(&mut self, index: usize, option: &str, receipt: CommitReceipt) -> AnswerRecord {
        let question_id = self.answers[index].question_id.clone();
        let record = AnswerRecord::confirmed(question_id, option, receipt);
        self.answers[index] = record.clone();
        record
    }
}
