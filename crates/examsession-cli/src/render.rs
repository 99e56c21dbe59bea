//! Result rendering shared by `take` and `result`.

use std::str::FromStr;

use anyhow::Result;
use comfy_table::{Cell, Color, Table};

use examsession_core::aggregate::{ExamResult, ReviewStatus};

/// Output format for a finalized result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Markdown,
    Html,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "html" => Ok(OutputFormat::Html),
            other => anyhow::bail!("unknown format '{other}' (expected text, json, markdown or html)"),
        }
    }
}

pub fn render(result: &ExamResult, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Text => render_text(result),
        OutputFormat::Json => serde_json::to_string_pretty(result)?,
        OutputFormat::Markdown => result.to_markdown(),
        OutputFormat::Html => examsession_report::generate_html(result),
    })
}

fn render_text(result: &ExamResult) -> String {
    let mut out = String::new();
    let title = if result.title.is_empty() {
        result.attempt_id.as_str()
    } else {
        result.title.as_str()
    };

    out.push_str(&format!("{title}\n"));
    out.push_str(&format!(
        "Score: {} / {} ({}%)\n",
        result.obtained_marks.normalize(),
        result.total_marks.normalize(),
        result.percentage
    ));
    out.push_str(&format!(
        "Correct: {}  Incorrect: {}  Unanswered: {}\n",
        result.correct, result.incorrect, result.unanswered
    ));
    if let (Some(cut), Some(_)) = (result.cut_marks, result.passed) {
        out.push_str(&format!(
            "Cut marks: {}  Verdict: {}\n",
            cut.normalize(),
            result.verdict_label()
        ));
    }
    out.push('\n');
    out.push_str(&review_table(result).to_string());
    out.push('\n');
    out
}

fn review_table(result: &ExamResult) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["#", "Question", "Selected", "Correct", "Marks"]);

    for item in &result.review {
        let marks = Cell::new(item.marks_awarded.normalize());
        let marks = match item.status {
            ReviewStatus::Correct => marks.fg(Color::Green),
            ReviewStatus::Incorrect => marks.fg(Color::Red),
            ReviewStatus::Unanswered => marks,
        };
        table.add_row(vec![
            Cell::new(item.order + 1),
            Cell::new(&item.text),
            Cell::new(item.selected.as_deref().unwrap_or("-")),
            Cell::new(item.correct_option.as_deref().unwrap_or("?")),
            marks,
        ]);
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use examsession_core::aggregate::ReviewItem;
    use examsession_core::model::ExamType;
    use rust_decimal::Decimal;

    fn result() -> ExamResult {
        ExamResult {
            attempt_id: "att-1".into(),
            exam_type: ExamType::Graded,
            title: String::new(),
            obtained_marks: Decimal::from(4),
            total_marks: Decimal::from(8),
            percentage: Decimal::new(500, 1),
            correct: 1,
            incorrect: 0,
            unanswered: 1,
            cut_marks: Some(Decimal::from(4)),
            passed: Some(true),
            review: vec![ReviewItem {
                question_id: "q1".into(),
                order: 0,
                text: "Pick a".into(),
                selected: Some("a".into()),
                correct_option: Some("a".into()),
                status: ReviewStatus::Correct,
                marks_awarded: Decimal::from(4),
                explanation: None,
            }],
            computed_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn parse_formats() {
        assert_eq!("md".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert_eq!("HTML".parse::<OutputFormat>().unwrap(), OutputFormat::Html);
        assert!("sarif".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn text_falls_back_to_attempt_id() {
        let text = render(&result(), OutputFormat::Text).unwrap();
        assert!(text.starts_with("att-1\n"));
        assert!(text.contains("Score: 4 / 8 (50.0%)"));
        assert!(text.contains("Verdict: PASS"));
        assert!(text.contains("Pick a"));
    }
}
