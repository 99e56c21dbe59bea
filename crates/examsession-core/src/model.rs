//! Core data model types for exam sessions.
//!
//! These are the payloads exchanged with the exam data gateway (attempts,
//! questions, commit receipts, raw results) and the client-side answer record.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Category of an exam. Only graded exams define a pass/fail cut line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExamType {
    Graded,
    Practice,
}

impl ExamType {
    /// Whether results of this exam type carry a pass/fail verdict.
    pub fn has_cut_line(self) -> bool {
        matches!(self, ExamType::Graded)
    }
}

impl fmt::Display for ExamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExamType::Graded => write!(f, "graded"),
            ExamType::Practice => write!(f, "practice"),
        }
    }
}

impl FromStr for ExamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "graded" | "mock" | "assessment" => Ok(ExamType::Graded),
            "practice" => Ok(ExamType::Practice),
            other => Err(format!("unknown exam type: {other}")),
        }
    }
}

/// Gateway-side lifecycle of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Finalized,
}

/// One selectable option of a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamOption {
    /// Option label (e.g. "a").
    pub label: String,
    /// Display text.
    pub text: String,
    /// Correctness flag, only present once the attempt is finalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
}

/// One question belonging to an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamQuestion {
    /// Question identifier.
    pub id: String,
    /// Position within the attempt (0-based).
    pub order: u32,
    /// Display text.
    pub text: String,
    /// Options in display order.
    pub options: Vec<ExamOption>,
    /// Marks awarded for a correct answer.
    pub marks: Decimal,
    /// Penalty subtracted for an incorrect answer.
    #[serde(default)]
    pub negative_marks: Decimal,
    /// Suggested time for this question. Informational only.
    #[serde(default)]
    pub time_hint_secs: Option<u32>,
}

impl ExamQuestion {
    /// Look up an option by label.
    pub fn option(&self, label: &str) -> Option<&ExamOption> {
        self.options.iter().find(|o| o.label == label)
    }

    /// Label of the correct option, if correctness flags are present.
    pub fn correct_option(&self) -> Option<&str> {
        self.options
            .iter()
            .find(|o| o.is_correct == Some(true))
            .map(|o| o.label.as_str())
    }
}

/// One candidate's instance of an exam, as returned by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamAttempt {
    /// Attempt identifier.
    pub id: String,
    /// Exam category.
    pub exam_type: ExamType,
    /// Human-readable exam title.
    #[serde(default)]
    pub title: String,
    /// Questions in attempt order.
    pub questions: Vec<ExamQuestion>,
    /// Declared question count.
    pub total_questions: usize,
    /// Pass threshold, for exam types that define one.
    #[serde(default)]
    pub cut_marks: Option<Decimal>,
    /// Attempt duration in seconds.
    pub duration_secs: u64,
    /// Absolute start instant.
    pub started_at: DateTime<Utc>,
    /// Absolute expiry instant (`started_at + duration_secs`).
    pub expires_at: DateTime<Utc>,
    /// Gateway-side status.
    pub status: AttemptStatus,
    /// Answers the gateway has already accepted for this attempt.
    #[serde(default)]
    pub answered: Vec<ConfirmedAnswer>,
}

impl ExamAttempt {
    /// Sum of the marks of every question.
    pub fn total_marks(&self) -> Decimal {
        self.questions.iter().map(|q| q.marks).sum()
    }

    /// Index of the question with the given id.
    pub fn question_index(&self, question_id: &str) -> Option<usize> {
        self.questions.iter().position(|q| q.id == question_id)
    }

    pub fn is_finalized(&self) -> bool {
        self.status == AttemptStatus::Finalized
    }

    /// Put the payload into its canonical client form: questions sorted by
    /// order index and, for unfinalized attempts, correctness flags removed.
    pub fn normalize(&mut self) {
        self.questions.sort_by_key(|q| q.order);
        if !self.is_finalized() {
            for option in self.questions.iter_mut().flat_map(|q| q.options.iter_mut()) {
                option.is_correct = None;
            }
        }
    }

    /// Check the invariants the gateway is expected to uphold.
    pub fn validate(&self) -> Result<(), String> {
        let expected_expiry = i64::try_from(self.duration_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|duration| self.started_at.checked_add_signed(duration))
            .ok_or_else(|| format!("duration of {}s is out of range", self.duration_secs))?;
        if self.expires_at != expected_expiry {
            return Err(format!(
                "expiry {} does not equal start {} + {}s",
                self.expires_at, self.started_at, self.duration_secs
            ));
        }

        if self.questions.len() != self.total_questions {
            return Err(format!(
                "declared {} questions but payload has {}",
                self.total_questions,
                self.questions.len()
            ));
        }

        let mut ids = HashSet::new();
        for question in &self.questions {
            if !ids.insert(question.id.as_str()) {
                return Err(format!("duplicate question id '{}'", question.id));
            }
            if question.options.is_empty() {
                return Err(format!("question '{}' has no options", question.id));
            }
            let mut labels = HashSet::new();
            for option in &question.options {
                if !labels.insert(option.label.as_str()) {
                    return Err(format!(
                        "question '{}' has duplicate option '{}'",
                        question.id, option.label
                    ));
                }
            }
        }

        for answer in &self.answered {
            let Some(index) = self.question_index(&answer.question_id) else {
                return Err(format!(
                    "answer recorded for unknown question '{}'",
                    answer.question_id
                ));
            };
            if self.questions[index].option(&answer.option).is_none() {
                return Err(format!(
                    "answer for question '{}' uses unknown option '{}'",
                    answer.question_id, answer.option
                ));
            }
        }

        Ok(())
    }
}

/// Authoritative verdict for a committed answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Correct,
    Incorrect,
}

impl From<bool> for Verdict {
    fn from(is_correct: bool) -> Self {
        if is_correct {
            Verdict::Correct
        } else {
            Verdict::Incorrect
        }
    }
}

/// What the gateway returns for an accepted answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub is_correct: bool,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub correct_option: Option<String>,
}

/// An answer the gateway accepted earlier, replayed when an attempt is reloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedAnswer {
    pub question_id: String,
    pub option: String,
    #[serde(flatten)]
    pub receipt: CommitReceipt,
}

/// Client-side record of what the candidate chose for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: String,
    /// Selected option label; `None` means unanswered.
    pub selected: Option<String>,
    /// Whether the gateway has accepted the selection.
    pub committed: bool,
    #[serde(default)]
    pub verdict: Option<Verdict>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub correct_option: Option<String>,
}

impl AnswerRecord {
    pub fn empty(question_id: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            selected: None,
            committed: false,
            verdict: None,
            explanation: None,
            correct_option: None,
        }
    }

    /// Build a committed record in one step, so a verdict is either fully
    /// recorded or not at all.
    pub fn confirmed(question_id: impl Into<String>, option: &str, receipt: CommitReceipt) -> Self {
        Self {
            question_id: question_id.into(),
            selected: Some(option.to_string()),
            committed: true,
            verdict: Some(receipt.is_correct.into()),
            explanation: receipt.explanation,
            correct_option: receipt.correct_option,
        }
    }
}

/// Acknowledgement of a finalize call. Repeated finalize calls return the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeAck {
    pub attempt_id: String,
    pub finalized_at: DateTime<Utc>,
}

/// Scored outcome of one question as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOutcome {
    pub question_id: String,
    #[serde(default)]
    pub selected: Option<String>,
    #[serde(default)]
    pub correct_option: Option<String>,
    #[serde(default)]
    pub is_correct: Option<bool>,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// Raw result payload from the gateway. Totals may be omitted, in which case
/// they are computed from the per-question outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayResult {
    pub attempt_id: String,
    #[serde(default)]
    pub obtained_marks: Option<Decimal>,
    #[serde(default)]
    pub total_marks: Option<Decimal>,
    #[serde(default)]
    pub cut_marks: Option<Decimal>,
    #[serde(default)]
    pub questions: Vec<QuestionOutcome>,
}
