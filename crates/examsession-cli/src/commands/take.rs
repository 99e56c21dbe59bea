//! The `examsession take` command.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use examsession_core::model::{ExamQuestion, Verdict};
use examsession_core::{
    CommitOutcome, Direction, EndReason, ExamSession, LoadOutcome, Outcome, SessionStatus,
    SystemClock,
};
use examsession_gateway::{create_gateway, load_config_from};

use crate::render::{render, OutputFormat};

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    /// Answer question `question` (1-based) with `option`.
    Answer { question: usize, option: String },
    Next,
    Prev,
    Goto(usize),
    Show,
    Status,
    End,
    Retry,
    Help,
    Quit,
}

fn parse_input(line: &str) -> Result<Input, String> {
    let mut parts = line.split_whitespace();
    let Some(head) = parts.next() else {
        return Ok(Input::Show);
    };
    let rest: Vec<&str> = parts.collect();

    let input = match (head.to_lowercase().as_str(), rest.as_slice()) {
        ("next" | "n", []) => Input::Next,
        ("prev" | "p", []) => Input::Prev,
        ("goto" | "g", [n]) => Input::Goto(parse_question_number(n)?),
        ("show" | "s", []) => Input::Show,
        ("status", []) => Input::Status,
        ("end" | "submit", []) => Input::End,
        ("retry", []) => Input::Retry,
        ("help" | "?", []) => Input::Help,
        ("quit" | "q", []) => Input::Quit,
        (n, [option]) if n.chars().all(|c| c.is_ascii_digit()) => Input::Answer {
            question: parse_question_number(n)?,
            option: (*option).to_string(),
        },
        _ => return Err(format!("unrecognised input '{line}', type 'help' for commands")),
    };
    Ok(input)
}

fn parse_question_number(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(format!("'{s}' is not a question number")),
    }
}

fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

pub async fn execute(
    attempt_id: String,
    save: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let gateway = create_gateway(&config.gateway)?;
    let gateway_name = gateway.name().to_string();
    let session = ExamSession::new(gateway, Arc::new(SystemClock), config.session_config());
    tracing::debug!(attempt_id = %attempt_id, gateway = gateway_name, "starting session");

    match session.load(&attempt_id).await? {
        Outcome::Applied(LoadOutcome::InProgress { remaining }) => {
            let attempt = session
                .attempt()
                .await
                .context("attempt missing after load")?;
            let title = if attempt.title.is_empty() {
                attempt.id.as_str()
            } else {
                attempt.title.as_str()
            };
            println!(
                "{title}: {} questions, {} remaining",
                attempt.questions.len(),
                format_remaining(remaining)
            );
            println!("Type 'help' for commands.\n");
            show_current(&session).await;
        }
        Outcome::Applied(LoadOutcome::AlreadyCompleted) => {
            println!("Attempt {attempt_id} is already finalized.");
        }
        Outcome::Ignored(stale) => anyhow::bail!("could not start session: {stale}"),
    }

    if !drive(&session).await? {
        return Ok(());
    }

    let result = session
        .result()
        .await?
        .applied()
        .context("session finished without a result")?;
    println!("\n{}", render(&result, OutputFormat::Text)?);

    if let Some(path) = save {
        result.save_json(&path)?;
        println!("Result saved to: {}", path.display());
    }

    Ok(())
}

/// Race user input against the deadline. Returns `true` once the session is
/// completed, `false` if the user left without submitting.
async fn drive(session: &ExamSession) -> Result<bool> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticks = session.ticks();
    let mut status = session.status_changes();
    let mut announced: Option<u64> = None;

    loop {
        if session.status().await == SessionStatus::Completed {
            return Ok(true);
        }

        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read input")? else {
                    if session.status().await == SessionStatus::Completed {
                        return Ok(true);
                    }
                    println!("Input closed, leaving the exam without submitting.");
                    session.abandon().await;
                    return Ok(false);
                };
                if !handle_line(session, &line).await? {
                    session.abandon().await;
                    return Ok(false);
                }
            }
            Ok(()) = status.changed() => {
                if *status.borrow_and_update() == SessionStatus::Finalizing {
                    println!("Submitting...");
                }
            }
            Ok(()) = ticks.changed() => {
                let secs = ticks.borrow_and_update().as_secs();
                if announced != Some(secs) && (secs % 60 == 0 || secs <= 10) {
                    announced = Some(secs);
                    if secs == 0 {
                        println!("Time is up.");
                    } else {
                        println!("[{} remaining]", format_remaining(Duration::from_secs(secs)));
                    }
                }
            }
        }
    }
}

/// Apply one line of input. Returns `false` when the user quits.
async fn handle_line(session: &ExamSession, line: &str) -> Result<bool> {
    let input = match parse_input(line) {
        Ok(input) => input,
        Err(message) => {
            println!("{message}");
            return Ok(true);
        }
    };

    match input {
        Input::Answer { question, option } => answer(session, question, &option).await,
        Input::Next => {
            if session.advance(Direction::Forward).await.is_applied() {
                show_current(session).await;
            }
        }
        Input::Prev => {
            if session.advance(Direction::Backward).await.is_applied() {
                show_current(session).await;
            }
        }
        Input::Goto(n) => {
            if session.go_to(n - 1).await.is_applied() {
                show_current(session).await;
            }
        }
        Input::Show => show_current(session).await,
        Input::Status => {
            println!("{}", serde_json::to_string_pretty(&session.snapshot().await)?);
        }
        Input::End => match session.end_exam(EndReason::UserRequested).await {
            Ok(Outcome::Applied(ack)) => {
                println!("Exam submitted at {}.", ack.finalized_at.format("%H:%M:%S UTC"));
            }
            Ok(Outcome::Ignored(stale)) => println!("Ignored: {stale}"),
            Err(e) => println!("Submit failed: {e}. Type 'retry' to try again."),
        },
        Input::Retry => match session.retry_finalize().await {
            Ok(Outcome::Applied(_)) => println!("Exam submitted."),
            Ok(Outcome::Ignored(stale)) => println!("Nothing to retry: {stale}"),
            Err(e) => println!("Submit failed again: {e}"),
        },
        Input::Help => print_help(),
        Input::Quit => return Ok(false),
    }

    Ok(true)
}

/// The question's own label for `typed`. An exact match wins, otherwise
/// labels are compared ignoring case.
fn resolve_label<'a>(question: &'a ExamQuestion, typed: &str) -> Option<&'a str> {
    question
        .option(typed)
        .or_else(|| {
            question
                .options
                .iter()
                .find(|o| o.label.eq_ignore_ascii_case(typed))
        })
        .map(|o| o.label.as_str())
}

async fn answer(session: &ExamSession, question: usize, option: &str) {
    let attempt = session.attempt().await;
    let label = attempt
        .as_deref()
        .and_then(|a| a.questions.get(question - 1))
        .and_then(|q| resolve_label(q, option))
        .unwrap_or(option);

    match session.select_answer(question - 1, label).await {
        Ok(Outcome::Applied(CommitOutcome::Committed(record))) => {
            match record.verdict {
                Some(Verdict::Correct) => println!("Q{question}: correct"),
                _ => println!(
                    "Q{question}: incorrect (answer: {})",
                    record.correct_option.as_deref().unwrap_or("?")
                ),
            }
            if let Some(explanation) = &record.explanation {
                println!("  {explanation}");
            }
        }
        Ok(Outcome::Applied(CommitOutcome::AlreadyCommitted(record))) => println!(
            "Q{question} was already answered with '{}'.",
            record.selected.as_deref().unwrap_or("?")
        ),
        Ok(Outcome::Applied(CommitOutcome::InFlight)) => {
            println!("Q{question} is still being submitted.")
        }
        Ok(Outcome::Ignored(stale)) => println!("Ignored: {stale}"),
        Err(e) if e.is_retryable() => println!("Could not submit: {e}. Try the same answer again."),
        Err(e) => println!("{e}"),
    }
}

async fn show_current(session: &ExamSession) {
    let Some((index, question)) = session.current_question().await else {
        return;
    };
    let snapshot = session.snapshot().await;

    println!(
        "Question {}/{}: {}",
        index + 1,
        snapshot.question_count,
        question.text
    );
    for option in &question.options {
        println!("  {}) {}", option.label, option.text);
    }
    if let Some(selected) = snapshot
        .answers
        .get(index)
        .and_then(|a| a.selected.as_deref())
    {
        println!("  answered: {selected}");
    }
}

fn print_help() {
    println!("Commands:");
    println!("  <n> <option>   answer question n (e.g. '2 b')");
    println!("  next | prev    move between questions");
    println!("  goto <n>       jump to question n");
    println!("  show           show the current question");
    println!("  status         print the session snapshot as JSON");
    println!("  end            submit the exam");
    println!("  retry          retry a failed submit");
    println!("  quit           leave without submitting");
}
