//! Session state machine.
//!
//! `NotStarted → InProgress → Finalizing → Completed`, with `FailedToLoad`
//! reachable only from `NotStarted` and `Completed` reachable directly from
//! `NotStarted` when the gateway reports an already-finalized attempt. Every
//! transition is a compare-and-set on the status field.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::clock::DeadlineClock;
use crate::model::{AnswerRecord, ExamAttempt, FinalizeAck};

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    InProgress,
    Finalizing,
    Completed,
    FailedToLoad,
}

impl SessionStatus {
    /// Whether `self → next` is an edge of the state machine.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (NotStarted, InProgress)
                | (NotStarted, Completed)
                | (NotStarted, FailedToLoad)
                | (InProgress, Finalizing)
                | (Finalizing, Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::FailedToLoad)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::NotStarted => "not started",
            SessionStatus::InProgress => "in progress",
            SessionStatus::Finalizing => "finalizing",
            SessionStatus::Completed => "completed",
            SessionStatus::FailedToLoad => "failed to load",
        };
        f.write_str(s)
    }
}

/// Why an exam was ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    UserRequested,
    DeadlineExpired,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::UserRequested => write!(f, "user requested"),
            EndReason::DeadlineExpired => write!(f, "deadline expired"),
        }
    }
}

/// Cursor movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Operations that can arrive at a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Load,
    SelectAnswer,
    Advance,
    EndExam,
    RetryFinalize,
    FetchResult,
}

/// An action that arrived in a state that no longer permits it.
///
/// These are expected races (the deadline firing while the candidate clicks),
/// so they are reported as a value rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleState {
    pub action: Action,
    pub status: SessionStatus,
}

impl fmt::Display for StaleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ignored: session is {}", self.action, self.status)
    }
}

/// Result of a state-mutating call: either it took effect or it was a no-op.
#[must_use]
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Applied(T),
    Ignored(StaleState),
}

impl<T> Outcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Outcome::Ignored(_))
    }

    /// The applied value, if any.
    pub fn applied(self) -> Option<T> {
        match self {
            Outcome::Applied(value) => Some(value),
            Outcome::Ignored(_) => None,
        }
    }
}

/// Serializable view of a session at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub attempt_id: Option<String>,
    pub status: SessionStatus,
    pub cursor: usize,
    pub question_count: usize,
    pub answers: Vec<AnswerRecord>,
    pub remaining_secs: Option<u64>,
    pub end_reason: Option<EndReason>,
    pub abandoned: bool,
}

impl SessionSnapshot {
    pub fn committed_count(&self) -> usize {
        self.answers.iter().filter(|a| a.committed).count()
    }
}

/// Mutable session state. Only ever touched under the controller's lock.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) status: SessionStatus,
    pub(crate) attempt: Option<Arc<ExamAttempt>>,
    /// One record per question, in attempt order.
    pub(crate) answers: Vec<AnswerRecord>,
    /// Question ids with a commit call in flight.
    pub(crate) pending: HashSet<String>,
    pub(crate) cursor: usize,
    pub(crate) loading: bool,
    pub(crate) finalize_in_flight: bool,
    pub(crate) abandoned: bool,
    pub(crate) end_reason: Option<EndReason>,
    pub(crate) ack: Option<FinalizeAck>,
    pub(crate) deadline: Option<Arc<DeadlineClock>>,
    pub(crate) shutdown: Option<watch::Sender<bool>>,
    pub(crate) ticker: Option<JoinHandle<()>>,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self {
            status: SessionStatus::NotStarted,
            attempt: None,
            answers: Vec::new(),
            pending: HashSet::new(),
            cursor: 0,
            loading: false,
            finalize_in_flight: false,
            abandoned: false,
            end_reason: None,
            ack: None,
            deadline: None,
            shutdown: None,
            ticker: None,
        }
    }

    /// Compare-and-set on the status. Returns `false` (and changes nothing)
    /// unless the current status is `from` and `from → to` is a legal edge.
    pub(crate) fn transition(&mut self, from: SessionStatus, to: SessionStatus) -> bool {
        if self.status != from || !from.can_transition_to(to) {
            return false;
        }
        self.status = to;
        true
    }

    /// Reject the action unless the session is live and in `required` status.
    pub(crate) fn require(&self, action: Action, required: SessionStatus) -> Result<(), StaleState> {
        if self.abandoned || self.status != required {
            return Err(self.stale(action));
        }
        Ok(())
    }

    pub(crate) fn stale(&self, action: Action) -> StaleState {
        StaleState {
            action,
            status: self.status,
        }
    }

    /// Seed one record per question, replaying answers the gateway already holds.
    pub(crate) fn seed_answers(&mut self, attempt: &ExamAttempt) {
        self.answers = attempt
            .questions
            .iter()
            .map(|q| {
                attempt
                    .answered
                    .iter()
                    .find(|a| a.question_id == q.id)
                    .map(|a| AnswerRecord::confirmed(&q.id, &a.option, a.receipt.clone()))
                    .unwrap_or_else(|| AnswerRecord::empty(&q.id))
            })
            .collect();
    }

    pub(crate) fn question_count(&self) -> usize {
        self.answers.len()
    }

    /// Stop the deadline ticker, if one is running.
    pub(crate) fn stop_ticker(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
    }

    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.deadline.as_ref().map(|d| d.remaining())
    }

    /// Whether the absolute expiry has passed, even if the ticker has not
    /// observed it yet.
    pub(crate) fn deadline_passed(&self) -> bool {
        self.deadline
            .as_ref()
            .is_some_and(|d| d.remaining().is_zero())
    }
}
