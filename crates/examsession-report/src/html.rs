//! HTML review sheet generator.
//!
//! Produces a self-contained HTML file with all CSS/JS inlined.

use anyhow::{Context, Result};
use std::path::Path;

use examsession_core::aggregate::{ExamResult, ReviewStatus};

/// Escape a string for safe HTML insertion.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Generate an HTML review sheet from a finalized result.
pub fn generate_html(result: &ExamResult) -> String {
    let title = if result.title.is_empty() {
        result.attempt_id.as_str()
    } else {
        result.title.as_str()
    };
    let mut html = String::new();

    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("<meta charset=\"utf-8\">\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    html.push_str(&format!(
        "<title>Exam result: {}</title>\n",
        html_escape(title)
    ));
    html.push_str("<style>\n");
    html.push_str(CSS);
    html.push_str("</style>\n");
    html.push_str("</head>\n<body>\n");

    // Header
    html.push_str("<header>\n");
    html.push_str(&format!("<h1>{}</h1>\n", html_escape(title)));
    html.push_str(&format!(
        "<p class=\"meta\">Attempt: <strong>{}</strong> | {} exam | {} questions | {}</p>\n",
        html_escape(&result.attempt_id),
        result.exam_type,
        result.review.len(),
        result.computed_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    html.push_str("</header>\n");

    // Summary
    html.push_str("<section class=\"dashboard\">\n");
    html.push_str("<h2>Summary</h2>\n");
    html.push_str("<table class=\"summary\">\n");
    html.push_str("<thead><tr><th>Score</th><th>Percentage</th><th>Correct</th><th>Incorrect</th><th>Unanswered</th><th>Cut marks</th><th>Verdict</th></tr></thead>\n");
    html.push_str("<tbody>\n");
    let verdict_class = match result.passed {
        Some(true) => "pass",
        Some(false) => "fail",
        None => "",
    };
    html.push_str(&format!(
        "<tr><td>{} / {}</td><td>{}%</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td class=\"{}\">{}</td></tr>\n",
        result.obtained_marks.normalize(),
        result.total_marks.normalize(),
        result.percentage,
        result.correct,
        result.incorrect,
        result.unanswered,
        result
            .cut_marks
            .map(|c| c.normalize().to_string())
            .unwrap_or_else(|| "-".to_string()),
        verdict_class,
        result.verdict_label(),
    ));
    html.push_str("</tbody></table>\n");

    if !result.review.is_empty() {
        html.push_str(&generate_bar_chart(result));
    }
    html.push_str("</section>\n");

    // Per-question review
    html.push_str("<section class=\"results\">\n");
    html.push_str("<h2>Review</h2>\n");
    html.push_str("<table class=\"results-table\" id=\"review\">\n");
    html.push_str("<thead><tr><th onclick=\"sortTable(0)\">#</th><th onclick=\"sortTable(1)\">Question</th><th onclick=\"sortTable(2)\">Selected</th><th onclick=\"sortTable(3)\">Correct</th><th onclick=\"sortTable(4)\">Marks</th></tr></thead>\n");
    html.push_str("<tbody>\n");

    for item in &result.review {
        let class = status_class(item.status);
        let explanation = item
            .explanation
            .as_deref()
            .map(|e| {
                format!(
                    "<details><summary>Explanation</summary>{}</details>",
                    html_escape(e)
                )
            })
            .unwrap_or_default();

        html.push_str(&format!(
            "<tr class=\"{}\"><td>{}</td><td>{}{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            class,
            item.order + 1,
            html_escape(&item.text),
            explanation,
            html_escape(item.selected.as_deref().unwrap_or("-")),
            html_escape(item.correct_option.as_deref().unwrap_or("?")),
            item.marks_awarded.normalize(),
        ));
    }

    html.push_str("</tbody></table>\n");
    html.push_str("</section>\n");

    // Raw JSON
    html.push_str("<section class=\"raw-data\">\n");
    html.push_str("<details>\n<summary>Raw JSON Data</summary>\n");
    html.push_str("<pre><code>");
    html.push_str(
        &serde_json::to_string_pretty(result)
            .unwrap_or_default()
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;"),
    );
    html.push_str("</code></pre>\n");
    html.push_str("</details>\n</section>\n");

    html.push_str("<script>\n");
    html.push_str(JS);
    html.push_str("</script>\n");

    html.push_str("</body>\n</html>");
    html
}

/// Write an HTML review sheet to a file.
pub fn write_html_report(result: &ExamResult, path: &Path) -> Result<()> {
    let html = generate_html(result);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, html)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    Ok(())
}

fn status_class(status: ReviewStatus) -> &'static str {
    match status {
        ReviewStatus::Correct => "pass",
        ReviewStatus::Incorrect => "fail",
        ReviewStatus::Unanswered => "skip",
    }
}

/// Horizontal bars for the correct / incorrect / unanswered split.
fn generate_bar_chart(result: &ExamResult) -> String {
    let bar_height = 30;
    let max_width = 400;
    let padding = 10;
    let label_width = 120;

    let total = result.review.len().max(1);
    let rows = [
        ("Correct", result.correct, "#22c55e"),
        ("Incorrect", result.incorrect, "#ef4444"),
        ("Unanswered", result.unanswered, "#9ca3af"),
    ];

    let total_height = rows.len() * (bar_height + padding) + padding;

    let mut svg = format!(
        "<svg width=\"{}\" height=\"{}\" xmlns=\"http://www.w3.org/2000/svg\">\n",
        label_width + max_width + 60,
        total_height
    );

    for (i, (label, count, color)) in rows.iter().enumerate() {
        let y = i * (bar_height + padding) + padding;
        let width = count * max_width / total;

        svg.push_str(&format!(
            "  <text x=\"{}\" y=\"{}\" font-size=\"14\" fill=\"currentColor\" text-anchor=\"end\" dominant-baseline=\"middle\">{}</text>\n",
            label_width - 10,
            y + bar_height / 2,
            label
        ));
        svg.push_str(&format!(
            "  <rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" fill=\"{}\" rx=\"4\"/>\n",
            label_width, y, width, bar_height, color
        ));
        svg.push_str(&format!(
            "  <text x=\"{}\" y=\"{}\" font-size=\"12\" fill=\"currentColor\" dominant-baseline=\"middle\">{}</text>\n",
            label_width + width + 8,
            y + bar_height / 2,
            count
        ));
    }

    svg.push_str("</svg>\n");
    svg
}

const CSS: &str = r#"
:root { --bg: #fff; --fg: #1a1a1a; --border: #e5e7eb; --pass: #dcfce7; --fail: #fde2e2; --skip: #f3f4f6; }
@media (prefers-color-scheme: dark) {
  :root { --bg: #111827; --fg: #f9fafb; --border: #374151; --pass: #064e3b; --fail: #7f1d1d; --skip: #1f2937; }
}
body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif; margin: 0; padding: 2rem; background: var(--bg); color: var(--fg); }
h1, h2 { margin-top: 2rem; }
.meta { color: #6b7280; }
table { border-collapse: collapse; width: 100%; margin: 1rem 0; }
th, td { border: 1px solid var(--border); padding: 0.5rem 1rem; text-align: left; vertical-align: top; }
th { background: var(--border); cursor: pointer; }
.pass { background: var(--pass); }
.fail { background: var(--fail); }
.skip { background: var(--skip); }
pre { overflow-x: auto; padding: 1rem; background: var(--border); border-radius: 8px; }
code { font-family: 'JetBrains Mono', 'Fira Code', monospace; font-size: 0.85rem; }
details { margin: 0.5rem 0; }
summary { cursor: pointer; font-weight: bold; }
svg { margin: 1rem 0; }
"#;

const JS: &str = r#"
function sortTable(col) {
  const table = document.getElementById('review');
  const tbody = table.querySelector('tbody');
  const rows = Array.from(tbody.querySelectorAll('tr'));
  const asc = table.dataset.sortCol == col && table.dataset.sortDir == 'asc' ? false : true;
  rows.sort((a, b) => {
    const va = a.cells[col].textContent;
    const vb = b.cells[col].textContent;
    const na = parseFloat(va), nb = parseFloat(vb);
    const cmp = !isNaN(na) && !isNaN(nb) ? na - nb : va.localeCompare(vb);
    return asc ? cmp : -cmp;
  });
  table.dataset.sortCol = col;
  table.dataset.sortDir = asc ? 'asc' : 'desc';
  rows.forEach(r => tbody.appendChild(r));
}
"#;
