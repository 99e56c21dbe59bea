//! Exam session controller.
//!
//! Owns the session state machine and serializes every mutation through one
//! lock. Gateway calls happen outside the lock while the session sits in a
//! well-defined intermediate state (`loading`, a pending commit, or
//! `Finalizing`), so a deadline tick or a user action that arrives meanwhile
//! is rejected instead of corrupting state.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{watch, Mutex, OnceCell};
use tracing::instrument;
use uuid::Uuid;

use crate::aggregate::{aggregate, ExamResult};
use crate::clock::{run_deadline, Clock, DeadlineClock};
use crate::error::SessionError;
use crate::model::{ExamAttempt, ExamQuestion, FinalizeAck};
use crate::pipeline::{AnswerCommitPipeline, CommitOutcome};
use crate::session::{
    Action, Direction, EndReason, Outcome, SessionSnapshot, SessionState, SessionStatus,
};
use crate::traits::ExamGateway;

/// Configuration for an exam session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How often the deadline clock publishes the remaining time.
    pub tick_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// What a successful `load` found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The attempt is open; the deadline clock is running.
    InProgress { remaining: Duration },
    /// The gateway reports the attempt as already finalized.
    AlreadyCompleted,
}

/// Handle to one exam session. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct ExamSession {
    inner: Arc<Inner>,
}

struct Inner {
    id: Uuid,
    gateway: Arc<dyn ExamGateway>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    pipeline: AnswerCommitPipeline,
    state: Mutex<SessionState>,
    ticks: Arc<watch::Sender<Duration>>,
    status_tx: watch::Sender<SessionStatus>,
    result: OnceCell<ExamResult>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.stop_ticker();
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
    }
}

impl ExamSession {
    pub fn new(gateway: Arc<dyn ExamGateway>, clock: Arc<dyn Clock>, config: SessionConfig) -> Self {
        let (ticks, _) = watch::channel(Duration::ZERO);
        let (status_tx, _) = watch::channel(SessionStatus::NotStarted);
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                pipeline: AnswerCommitPipeline::new(Arc::clone(&gateway)),
                gateway,
                clock,
                config,
                state: Mutex::new(SessionState::new()),
                ticks: Arc::new(ticks),
                status_tx,
                result: OnceCell::new(),
            }),
        }
    }

    /// Identifier of this controller instance (not the attempt).
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Subscribe to per-tick remaining-time readings.
    pub fn ticks(&self) -> watch::Receiver<Duration> {
        self.inner.ticks.subscribe()
    }

    /// Subscribe to status changes.
    pub fn status_changes(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status_tx.subscribe()
    }

    pub async fn status(&self) -> SessionStatus {
        self.inner.state.lock().await.status
    }

    /// Remaining time, recomputed from the absolute expiry instant.
    pub async fn remaining(&self) -> Option<Duration> {
        self.inner.state.lock().await.remaining()
    }

    pub async fn attempt(&self) -> Option<Arc<ExamAttempt>> {
        self.inner.state.lock().await.attempt.clone()
    }

    /// The question under the cursor, with its index.
    pub async fn current_question(&self) -> Option<(usize, ExamQuestion)> {
        let state = self.inner.state.lock().await;
        let attempt = state.attempt.as_ref()?;
        attempt
            .questions
            .get(state.cursor)
            .map(|q| (state.cursor, q.clone()))
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.state.lock().await;
        SessionSnapshot {
            session_id: self.inner.id,
            attempt_id: state.attempt.as_ref().map(|a| a.id.clone()),
            status: state.status,
            cursor: state.cursor,
            question_count: state.question_count(),
            answers: state.answers.clone(),
            remaining_secs: state.remaining().map(|d| d.as_secs()),
            end_reason: state.end_reason,
            abandoned: state.abandoned,
        }
    }

    /// Fetch the attempt and start the session.
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub async fn load(&self, attempt_id: &str) -> Result<Outcome<LoadOutcome>, SessionError> {
        {
            let mut state = self.inner.state.lock().await;
            if let Err(stale) = state.require(Action::Load, SessionStatus::NotStarted) {
                return Ok(Outcome::Ignored(stale));
            }
            if state.loading {
                return Ok(Outcome::Ignored(state.stale(Action::Load)));
            }
            state.loading = true;
        }

        let fetched = self.inner.gateway.get_attempt(attempt_id).await;

        let mut state = self.inner.state.lock().await;
        state.loading = false;
        if state.abandoned {
            return Ok(Outcome::Ignored(state.stale(Action::Load)));
        }

        let mut attempt = match fetched {
            Ok(attempt) => attempt,
            Err(source) => {
                tracing::warn!(attempt_id, error = %source, "failed to load attempt");
                self.set_status(&mut state, SessionStatus::NotStarted, SessionStatus::FailedToLoad);
                return Err(SessionError::Load {
                    attempt_id: attempt_id.to_string(),
                    source,
                });
            }
        };

        attempt.normalize();
        if let Err(reason) = attempt.validate() {
            tracing::warn!(attempt_id, %reason, "gateway returned a malformed attempt");
            self.set_status(&mut state, SessionStatus::NotStarted, SessionStatus::FailedToLoad);
            return Err(SessionError::InvalidAttempt {
                attempt_id: attempt_id.to_string(),
                reason,
            });
        }

        state.seed_answers(&attempt);
        let attempt = Arc::new(attempt);
        state.attempt = Some(Arc::clone(&attempt));
        let deadline = Arc::new(DeadlineClock::new(
            attempt.expires_at,
            Arc::clone(&self.inner.clock),
        ));
        state.deadline = Some(Arc::clone(&deadline));

        if attempt.is_finalized() {
            self.set_status(&mut state, SessionStatus::NotStarted, SessionStatus::Completed);
            tracing::info!(attempt_id, "attempt already finalized");
            return Ok(Outcome::Applied(LoadOutcome::AlreadyCompleted));
        }

        self.set_status(&mut state, SessionStatus::NotStarted, SessionStatus::InProgress);
        let remaining = deadline.remaining();
        self.inner.ticks.send_replace(remaining);
        self.spawn_ticker(&mut state, deadline);
        tracing::info!(
            attempt_id,
            questions = attempt.questions.len(),
            remaining_secs = remaining.as_secs(),
            committed = state.answers.iter().filter(|a| a.committed).count(),
            "exam session started"
        );

        Ok(Outcome::Applied(LoadOutcome::InProgress { remaining }))
    }

    /// Commit `option` for the question at `index`.
    pub async fn select_answer(
        &self,
        index: usize,
        option: &str,
    ) -> Result<Outcome<CommitOutcome>, SessionError> {
        let outcome = self
            .inner
            .pipeline
            .commit(&self.inner.state, index, option)
            .await?;
        if let Outcome::Ignored(stale) = &outcome {
            tracing::warn!(session_id = %self.inner.id, %stale, "answer selection ignored");
        }
        Ok(outcome)
    }

    /// Move the cursor by one question, bounded to the question range.
    pub async fn advance(&self, direction: Direction) -> Outcome<usize> {
        let mut state = self.inner.state.lock().await;
        if let Err(stale) = state.require(Action::Advance, SessionStatus::InProgress) {
            return Outcome::Ignored(stale);
        }
        let last = state.question_count().saturating_sub(1);
        state.cursor = match direction {
            Direction::Forward => (state.cursor + 1).min(last),
            Direction::Backward => state.cursor.saturating_sub(1),
        };
        Outcome::Applied(state.cursor)
    }

    /// Jump the cursor to `index`, clamped to the question range.
    pub async fn go_to(&self, index: usize) -> Outcome<usize> {
        let mut state = self.inner.state.lock().await;
        if let Err(stale) = state.require(Action::Advance, SessionStatus::InProgress) {
            return Outcome::Ignored(stale);
        }
        state.cursor = index.min(state.question_count().saturating_sub(1));
        Outcome::Applied(state.cursor)
    }

    /// End the exam and finalize it with the gateway.
    ///
    /// Only the first caller moves the session out of `InProgress`; a racing
    /// call (the deadline firing as the candidate clicks "end") is a no-op.
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub async fn end_exam(&self, reason: EndReason) -> Result<Outcome<FinalizeAck>, SessionError> {
        let attempt_id = {
            let mut state = self.inner.state.lock().await;
            if state.abandoned
                || !self.set_status(&mut state, SessionStatus::InProgress, SessionStatus::Finalizing)
            {
                let stale = state.stale(Action::EndExam);
                tracing::debug!(%reason, %stale, "end exam ignored");
                return Ok(Outcome::Ignored(stale));
            }
            state.end_reason = Some(reason);
            state.finalize_in_flight = true;
            state.stop_ticker();
            let attempt_id = state.attempt.as_ref().map(|a| a.id.clone()).unwrap_or_default();
            tracing::info!(attempt_id = %attempt_id, %reason, "ending exam");
            attempt_id
        };

        self.finalize(attempt_id).await.map(Outcome::Applied)
    }

    /// Repeat a failed finalize. Valid only in `Finalizing` with no finalize
    /// call already in flight.
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub async fn retry_finalize(&self) -> Result<Outcome<FinalizeAck>, SessionError> {
        let attempt_id = {
            let mut state = self.inner.state.lock().await;
            if let Err(stale) = state.require(Action::RetryFinalize, SessionStatus::Finalizing) {
                return Ok(Outcome::Ignored(stale));
            }
            if state.finalize_in_flight {
                return Ok(Outcome::Ignored(state.stale(Action::RetryFinalize)));
            }
            state.finalize_in_flight = true;
            state.attempt.as_ref().map(|a| a.id.clone()).unwrap_or_default()
        };

        self.finalize(attempt_id).await.map(Outcome::Applied)
    }

    async fn finalize(&self, attempt_id: String) -> Result<FinalizeAck, SessionError> {
        let response = self.inner.gateway.finalize_attempt(&attempt_id).await;

        let mut state = self.inner.state.lock().await;
        state.finalize_in_flight = false;
        match response {
            Ok(ack) => {
                self.set_status(&mut state, SessionStatus::Finalizing, SessionStatus::Completed);
                state.ack = Some(ack.clone());
                tracing::info!(
                    attempt_id = %attempt_id,
                    finalized_at = %ack.finalized_at,
                    "attempt finalized"
                );
                Ok(ack)
            }
            Err(source) => {
                tracing::warn!(
                    attempt_id = %attempt_id,
                    error = %source,
                    "finalize failed, session stays finalizing"
                );
                Err(SessionError::Finalize { attempt_id, source })
            }
        }
    }

    /// The scored result. Fetched from the gateway once, then memoised.
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub async fn result(&self) -> Result<Outcome<ExamResult>, SessionError> {
        let attempt = {
            let state = self.inner.state.lock().await;
            if state.status != SessionStatus::Completed {
                return Ok(Outcome::Ignored(state.stale(Action::FetchResult)));
            }
            match &state.attempt {
                Some(attempt) => Arc::clone(attempt),
                None => return Ok(Outcome::Ignored(state.stale(Action::FetchResult))),
            }
        };

        let result = self
            .inner
            .result
            .get_or_try_init(|| async {
                let raw = self
                    .inner
                    .gateway
                    .get_result(&attempt.id)
                    .await
                    .map_err(|source| SessionError::Result {
                        attempt_id: attempt.id.clone(),
                        source,
                    })?;
                let result = aggregate(&attempt, &raw);
                tracing::info!(
                    attempt_id = %attempt.id,
                    obtained = %result.obtained_marks,
                    total = %result.total_marks,
                    passed = ?result.passed,
                    "result computed"
                );
                Ok::<_, SessionError>(result)
            })
            .await?;

        Ok(Outcome::Applied(result.clone()))
    }

    /// Tear the session down: stop the deadline clock and discard any commit
    /// response that arrives later. Nothing is cancelled server-side.
    pub async fn abandon(&self) {
        let mut state = self.inner.state.lock().await;
        if state.abandoned {
            return;
        }
        state.abandoned = true;
        state.stop_ticker();
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        tracing::info!(session_id = %self.inner.id, status = %state.status, "session abandoned");
    }

    /// Compare-and-set the status and publish the change.
    fn set_status(&self, state: &mut SessionState, from: SessionStatus, to: SessionStatus) -> bool {
        if !state.transition(from, to) {
            return false;
        }
        self.inner.status_tx.send_replace(to);
        true
    }

    fn spawn_ticker(&self, state: &mut SessionState, deadline: Arc<DeadlineClock>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ticks = Arc::clone(&self.inner.ticks);
        let period = self.inner.config.tick_interval;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            if !run_deadline(deadline, period, ticks, shutdown_rx).await {
                return;
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let session = ExamSession { inner };
            if let Err(e) = session.end_exam(EndReason::DeadlineExpired).await {
                tracing::error!(session_id = %session.id(), error = %e, "auto-submit at deadline failed");
            }
        });

        state.shutdown = Some(shutdown_tx);
        state.ticker = Some(handle);
    }
}

impl std::fmt::Debug for ExamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExamSession")
            .field("id", &self.inner.id)
            .field("gateway", &self.inner.gateway.name())
            .finish()
    }
}
