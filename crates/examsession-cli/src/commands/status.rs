//! The `examsession status` command.
//!
//! Read-only: the attempt is fetched but no session is started, so checking
//! an attempt never finalizes it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use examsession_core::model::{AttemptStatus, ExamType};
use examsession_core::{DeadlineClock, SystemClock};
use examsession_gateway::{create_gateway, load_config_from};

#[derive(Debug, Serialize)]
struct AttemptStatusReport {
    attempt_id: String,
    title: String,
    exam_type: ExamType,
    status: AttemptStatus,
    question_count: usize,
    answered: usize,
    expires_at: DateTime<Utc>,
    remaining_secs: u64,
}

pub async fn execute(attempt_id: String, json: bool, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let gateway = create_gateway(&config.gateway)?;

    let attempt = gateway
        .get_attempt(&attempt_id)
        .await
        .with_context(|| format!("failed to load attempt {attempt_id}"))?;
    let remaining = DeadlineClock::new(attempt.expires_at, Arc::new(SystemClock)).remaining();

    let report = AttemptStatusReport {
        attempt_id: attempt.id.clone(),
        title: attempt.title.clone(),
        exam_type: attempt.exam_type,
        status: attempt.status,
        question_count: attempt.questions.len(),
        answered: attempt.answered.len(),
        expires_at: attempt.expires_at,
        remaining_secs: if attempt.is_finalized() {
            0
        } else {
            remaining.as_secs()
        },
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let state = match report.status {
        AttemptStatus::InProgress if report.remaining_secs == 0 => "expired, awaiting submit",
        AttemptStatus::InProgress => "in progress",
        AttemptStatus::Finalized => "finalized",
    };
    println!("Attempt:   {}", report.attempt_id);
    if !report.title.is_empty() {
        println!("Title:     {}", report.title);
    }
    println!("Type:      {}", report.exam_type);
    println!("Status:    {state}");
    println!(
        "Answered:  {} / {}",
        report.answered, report.question_count
    );
    println!(
        "Remaining: {}:{:02}",
        report.remaining_secs / 60,
        report.remaining_secs % 60
    );

    Ok(())
}
