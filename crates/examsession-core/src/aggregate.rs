//! Result aggregation: turns the gateway's raw result into the scored summary.
//!
//! Marks are kept as exact decimals. Only the percentage is rounded, to one
//! decimal place, for presentation.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::model::{ExamAttempt, ExamType, GatewayResult, QuestionOutcome};

/// How one question was scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Correct,
    Incorrect,
    Unanswered,
}

/// Per-question review detail, in attempt order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub question_id: String,
    pub order: u32,
    pub text: String,
    pub selected: Option<String>,
    pub correct_option: Option<String>,
    pub status: ReviewStatus,
    /// Marks gained (positive) or lost to negative marking.
    pub marks_awarded: Decimal,
    pub explanation: Option<String>,
}

/// The finalized scoring summary of an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamResult {
    pub attempt_id: String,
    pub exam_type: ExamType,
    #[serde(default)]
    pub title: String,
    pub obtained_marks: Decimal,
    pub total_marks: Decimal,
    /// `obtained / total * 100`, rounded to one decimal place.
    pub percentage: Decimal,
    pub correct: usize,
    pub incorrect: usize,
    pub unanswered: usize,
    pub cut_marks: Option<Decimal>,
    /// Absent for exam types without a cut line.
    pub passed: Option<bool>,
    pub review: Vec<ReviewItem>,
    pub computed_at: DateTime<Utc>,
}

/// `round(obtained / total * 100, 1)`, or zero when `total` is zero or the
/// ratio does not fit in a `Decimal`.
///
/// Midpoints round away from zero.
pub fn percentage(obtained: Decimal, total: Decimal) -> Decimal {
    obtained
        .checked_div(total)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .map(|pct| pct.round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero))
        .unwrap_or(Decimal::ZERO)
}

/// Pass/fail verdict: `obtained >= cut` for exam types with a cut line.
pub fn pass_verdict(exam_type: ExamType, cut_marks: Option<Decimal>, obtained: Decimal) -> Option<bool> {
    if !exam_type.has_cut_line() {
        return None;
    }
    cut_marks.map(|cut| obtained >= cut)
}

/// Build the scored summary for `attempt` from the gateway's raw result.
///
/// Review items follow the attempt's question order regardless of the order
/// the gateway reports them in. Totals the gateway omits are computed from
/// the per-question outcomes: `+marks` when correct, `-negative_marks` when
/// incorrect, nothing when unanswered.
pub fn aggregate(attempt: &ExamAttempt, raw: &GatewayResult) -> ExamResult {
    let outcomes: HashMap<&str, &QuestionOutcome> = raw
        .questions
        .iter()
        .map(|o| (o.question_id.as_str(), o))
        .collect();

    let mut review = Vec::with_capacity(attempt.questions.len());
    let (mut correct, mut incorrect, mut unanswered) = (0usize, 0usize, 0usize);

    for question in &attempt.questions {
        let outcome = outcomes.get(question.id.as_str()).copied();
        let selected = outcome.and_then(|o| o.selected.clone());
        let correct_option = outcome
            .and_then(|o| o.correct_option.clone())
            .or_else(|| question.correct_option().map(str::to_string));

        let status = match &selected {
            None => ReviewStatus::Unanswered,
            Some(choice) => {
                let is_correct = outcome
                    .and_then(|o| o.is_correct)
                    .unwrap_or_else(|| correct_option.as_deref() == Some(choice.as_str()));
                if is_correct {
                    ReviewStatus::Correct
                } else {
                    ReviewStatus::Incorrect
                }
            }
        };

        let marks_awarded = match status {
            ReviewStatus::Correct => {
                correct += 1;
                question.marks
            }
            ReviewStatus::Incorrect => {
                incorrect += 1;
                -question.negative_marks
            }
            ReviewStatus::Unanswered => {
                unanswered += 1;
                Decimal::ZERO
            }
        };

        review.push(ReviewItem {
            question_id: question.id.clone(),
            order: question.order,
            text: question.text.clone(),
            selected,
            correct_option,
            status,
            marks_awarded,
            explanation: outcome.and_then(|o| o.explanation.clone()),
        });
    }

    let obtained_marks = raw
        .obtained_marks
        .unwrap_or_else(|| review.iter().map(|r| r.marks_awarded).sum());
    let total_marks = raw.total_marks.unwrap_or_else(|| attempt.total_marks());
    let cut_marks = attempt.cut_marks.or(raw.cut_marks);

    ExamResult {
        attempt_id: attempt.id.clone(),
        exam_type: attempt.exam_type,
        title: attempt.title.clone(),
        obtained_marks,
        total_marks,
        percentage: percentage(obtained_marks, total_marks),
        correct,
        incorrect,
        unanswered,
        cut_marks,
        passed: pass_verdict(attempt.exam_type, cut_marks, obtained_marks),
        review,
        computed_at: Utc::now(),
    }
}

impl ExamResult {
    /// Save the result as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize result")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write result to {}", path.display()))?;
        Ok(())
    }

    /// Load a result from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read result from {}", path.display()))?;
        serde_json::from_str(&content).context("failed to parse result JSON")
    }

    /// Human-readable pass/fail label.
    pub fn verdict_label(&self) -> &'static str {
        match self.passed {
            Some(true) => "PASS",
            Some(false) => "FAIL",
            None => "n/a",
        }
    }

    /// Format the result as markdown.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        let title = if self.title.is_empty() {
            self.attempt_id.as_str()
        } else {
            self.title.as_str()
        };
        md.push_str(&format!("## {title}\n\n"));
        md.push_str(&format!(
            "**Score:** {} / {} ({}%)\n\n",
            self.obtained_marks.normalize(),
            self.total_marks.normalize(),
            self.percentage
        ));
        md.push_str(&format!(
            "**Correct:** {} | **Incorrect:** {} | **Unanswered:** {}\n\n",
            self.correct, self.incorrect, self.unanswered
        ));
        if let Some(cut) = self.cut_marks.filter(|_| self.passed.is_some()) {
            md.push_str(&format!(
                "**Cut marks:** {} | **Verdict:** {}\n\n",
                cut.normalize(),
                self.verdict_label()
            ));
        }

        md.push_str("| # | Question | Selected | Correct | Marks |\n");
        md.push_str("|---|----------|----------|---------|-------|\n");
        for item in &self.review {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                item.order + 1,
                item.text.replace('|', "\\|"),
                item.selected.as_deref().unwrap_or("-"),
                item.correct_option.as_deref().unwrap_or("?"),
                item.marks_awarded.normalize(),
            ));
        }

        md
    }
}
