//! In-memory exam gateway for tests and offline demos.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use examsession_core::clock::{Clock, SystemClock};
use examsession_core::error::GatewayError;
use examsession_core::model::{
    AttemptStatus, CommitReceipt, ConfirmedAnswer, ExamAttempt, ExamOption, ExamQuestion,
    ExamType, FinalizeAck, GatewayResult, QuestionOutcome,
};
use examsession_core::traits::{CommitRequest, ExamGateway};

/// Attempt id served by [`MockGateway::demo`].
pub const DEMO_ATTEMPT_ID: &str = "demo";

/// Server-side record of one attempt.
struct StoredAttempt {
    /// The attempt with correctness flags intact.
    attempt: ExamAttempt,
    answers: Vec<ConfirmedAnswer>,
    ack: Option<FinalizeAck>,
}

/// A mock exam gateway that keeps ground truth in memory.
///
/// Behaves like a well-behaved server: a second commit for the same question
/// or any commit after finalize is a `Conflict`, finalize is idempotent, and
/// results are only served once the attempt is finalized. Failures and latency
/// can be injected to exercise the session controller.
pub struct MockGateway {
    attempts: Mutex<HashMap<String, StoredAttempt>>,
    explanations: HashMap<String, String>,
    clock: Arc<dyn Clock>,
    latency: Option<Duration>,
    get_attempt_calls: AtomicU32,
    commit_calls: AtomicU32,
    finalize_calls: AtomicU32,
    result_calls: AtomicU32,
    /// Commit calls per question id.
    commits_by_question: Mutex<HashMap<String, u32>>,
    fail_commits: AtomicU32,
    fail_finalizes: AtomicU32,
    fail_load: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
            explanations: HashMap::new(),
            clock: Arc::new(SystemClock),
            latency: None,
            get_attempt_calls: AtomicU32::new(0),
            commit_calls: AtomicU32::new(0),
            finalize_calls: AtomicU32::new(0),
            result_calls: AtomicU32::new(0),
            commits_by_question: Mutex::new(HashMap::new()),
            fail_commits: AtomicU32::new(0),
            fail_finalizes: AtomicU32::new(0),
            fail_load: AtomicBool::new(false),
        }
    }

    /// A gateway holding one graded demo attempt with id [`DEMO_ATTEMPT_ID`].
    pub fn demo(started_at: DateTime<Utc>, duration: Duration) -> Self {
        Self::new().with_attempt(demo_attempt(DEMO_ATTEMPT_ID, started_at, duration))
    }

    /// Register an attempt. Options must carry their correctness flags.
    pub fn with_attempt(self, attempt: ExamAttempt) -> Self {
        self.insert_attempt(attempt);
        self
    }

    /// Stamp finalize acknowledgements with this clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Explanation returned when `question_id` is committed.
    pub fn with_explanation(mut self, question_id: &str, explanation: &str) -> Self {
        self.explanations
            .insert(question_id.to_string(), explanation.to_string());
        self
    }

    pub fn insert_attempt(&self, attempt: ExamAttempt) {
        let answers = attempt.answered.clone();
        let ack = attempt.is_finalized().then(|| FinalizeAck {
            attempt_id: attempt.id.clone(),
            finalized_at: attempt.expires_at,
        });
        self.store().insert(
            attempt.id.clone(),
            StoredAttempt {
                attempt,
                answers,
                ack,
            },
        );
    }

    /// Record an answer as if it had been committed by an earlier session.
    pub fn preanswer(&self, attempt_id: &str, question_id: &str, option: &str) {
        let mut store = self.store();
        if let Some(stored) = store.get_mut(attempt_id) {
            let receipt = stored.receipt_for(question_id, option, &self.explanations);
            stored.answers.push(ConfirmedAnswer {
                question_id: question_id.to_string(),
                option: option.to_string(),
                receipt,
            });
        }
    }

    /// Fail the next `n` commit calls with a network error.
    pub fn fail_next_commits(&self, n: u32) {
        self.fail_commits.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` finalize calls with a 503.
    pub fn fail_next_finalizes(&self, n: u32) {
        self.fail_finalizes.store(n, Ordering::SeqCst);
    }

    /// Make every `get_attempt` call fail.
    pub fn fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn get_attempt_calls(&self) -> u32 {
        self.get_attempt_calls.load(Ordering::SeqCst)
    }

    pub fn commit_calls(&self) -> u32 {
        self.commit_calls.load(Ordering::SeqCst)
    }

    /// Commit calls received for one question, including failed ones.
    pub fn commit_calls_for(&self, question_id: &str) -> u32 {
        self.commits_by_question
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(question_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn finalize_calls(&self) -> u32 {
        self.finalize_calls.load(Ordering::SeqCst)
    }

    pub fn result_calls(&self) -> u32 {
        self.result_calls.load(Ordering::SeqCst)
    }

    /// Whether the gateway holds a finalized attempt with this id.
    pub fn is_finalized(&self, attempt_id: &str) -> bool {
        self.store()
            .get(attempt_id)
            .is_some_and(|s| s.ack.is_some())
    }

    fn store(&self) -> MutexGuard<'_, HashMap<String, StoredAttempt>> {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Consume one injected failure, if any are left.
    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl StoredAttempt {
    fn receipt_for(
        &self,
        question_id: &str,
        option: &str,
        explanations: &HashMap<String, String>,
    ) -> CommitReceipt {
        let correct = self
            .attempt
            .questions
            .iter()
            .find(|q| q.id == question_id)
            .and_then(|q| q.correct_option())
            .map(str::to_string);
        CommitReceipt {
            is_correct: correct.as_deref() == Some(option),
            explanation: explanations.get(question_id).cloned(),
            correct_option: correct,
        }
    }

    /// The attempt as a client sees it.
    fn client_view(&self) -> ExamAttempt {
        let mut view = self.attempt.clone();
        view.answered = self.answers.clone();
        if self.ack.is_some() {
            view.status = AttemptStatus::Finalized;
        } else {
            for option in view.questions.iter_mut().flat_map(|q| q.options.iter_mut()) {
                option.is_correct = None;
            }
        }
        view
    }
}

#[async_trait]
impl ExamGateway for MockGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn get_attempt(&self, attempt_id: &str) -> Result<ExamAttempt, GatewayError> {
        self.get_attempt_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        if self.fail_load.load(Ordering::SeqCst) {
            return Err(GatewayError::Network("connection refused".into()));
        }
        self.store()
            .get(attempt_id)
            .map(StoredAttempt::client_view)
            .ok_or_else(|| GatewayError::NotFound(format!("attempt {attempt_id}")))
    }

    async fn commit_answer(&self, request: &CommitRequest) -> Result<CommitReceipt, GatewayError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .commits_by_question
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(request.question_id.clone())
            .or_insert(0) += 1;
        self.delay().await;

        if Self::take_failure(&self.fail_commits) {
            return Err(GatewayError::Network("connection reset by peer".into()));
        }

        let mut store = self.store();
        let stored = store
            .get_mut(&request.attempt_id)
            .ok_or_else(|| GatewayError::NotFound(format!("attempt {}", request.attempt_id)))?;
        if stored.ack.is_some() {
            return Err(GatewayError::Conflict(format!(
                "attempt {} is finalized",
                request.attempt_id
            )));
        }
        if stored
            .answers
            .iter()
            .any(|a| a.question_id == request.question_id)
        {
            return Err(GatewayError::Conflict(format!(
                "question {} already answered",
                request.question_id
            )));
        }
        let question = stored
            .attempt
            .questions
            .iter()
            .find(|q| q.id == request.question_id)
            .ok_or_else(|| GatewayError::NotFound(format!("question {}", request.question_id)))?;
        if question.option(&request.option).is_none() {
            return Err(GatewayError::Api {
                status: 422,
                message: format!("unknown option '{}'", request.option),
            });
        }

        let receipt = stored.receipt_for(&request.question_id, &request.option, &self.explanations);
        stored.answers.push(ConfirmedAnswer {
            question_id: request.question_id.clone(),
            option: request.option.clone(),
            receipt: receipt.clone(),
        });
        Ok(receipt)
    }

    async fn finalize_attempt(&self, attempt_id: &str) -> Result<FinalizeAck, GatewayError> {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        if Self::take_failure(&self.fail_finalizes) {
            return Err(GatewayError::Api {
                status: 503,
                message: "service unavailable".into(),
            });
        }

        let now = self.clock.now();
        let mut store = self.store();
        let stored = store
            .get_mut(attempt_id)
            .ok_or_else(|| GatewayError::NotFound(format!("attempt {attempt_id}")))?;
        let ack = stored.ack.get_or_insert_with(|| FinalizeAck {
            attempt_id: attempt_id.to_string(),
            finalized_at: now,
        });
        Ok(ack.clone())
    }

    async fn get_result(&self, attempt_id: &str) -> Result<GatewayResult, GatewayError> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let store = self.store();
        let stored = store
            .get(attempt_id)
            .ok_or_else(|| GatewayError::NotFound(format!("attempt {attempt_id}")))?;
        if stored.ack.is_none() {
            return Err(GatewayError::NotFinalized(attempt_id.to_string()));
        }

        let questions = stored
            .attempt
            .questions
            .iter()
            .map(|q| {
                let answer = stored.answers.iter().find(|a| a.question_id == q.id);
                QuestionOutcome {
                    question_id: q.id.clone(),
                    selected: answer.map(|a| a.option.clone()),
                    correct_option: q.correct_option().map(str::to_string),
                    is_correct: answer.map(|a| a.receipt.is_correct),
                    explanation: self.explanations.get(&q.id).cloned(),
                }
            })
            .collect();

        // Totals are left for the client to compute.
        Ok(GatewayResult {
            attempt_id: attempt_id.to_string(),
            obtained_marks: None,
            total_marks: None,
            cut_marks: stored.attempt.cut_marks,
            questions,
        })
    }
}

/// Build an attempt whose option "a" is always correct.
///
/// Each question is worth one mark. Useful for tests; `demo` uses a richer set.
pub fn simple_attempt(
    id: &str,
    exam_type: ExamType,
    questions: usize,
    started_at: DateTime<Utc>,
    duration: Duration,
) -> ExamAttempt {
    let questions = (0..questions)
        .map(|i| ExamQuestion {
            id: format!("q{}", i + 1),
            order: i as u32,
            text: format!("Question {}", i + 1),
            options: ["a", "b", "c", "d"]
                .iter()
                .map(|label| ExamOption {
                    label: (*label).to_string(),
                    text: format!("Option {}", label.to_uppercase()),
                    is_correct: Some(*label == "a"),
                })
                .collect(),
            marks: Decimal::ONE,
            negative_marks: Decimal::ZERO,
            time_hint_secs: None,
        })
        .collect::<Vec<_>>();
    let count = questions.len();
    let cut_marks = exam_type
        .has_cut_line()
        .then(|| Decimal::from(count as u64) / Decimal::from(2));

    attempt_shell(id, exam_type, "Sample exam", questions, cut_marks, started_at, duration)
}

fn demo_question(
    order: u32,
    text: &str,
    options: [&str; 4],
    correct: usize,
    marks: i64,
) -> ExamQuestion {
    ExamQuestion {
        id: format!("q{}", order + 1),
        order,
        text: text.to_string(),
        options: options
            .iter()
            .zip(["a", "b", "c", "d"])
            .enumerate()
            .map(|(i, (text, label))| ExamOption {
                label: label.to_string(),
                text: (*text).to_string(),
                is_correct: Some(i == correct),
            })
            .collect(),
        marks: Decimal::from(marks),
        negative_marks: Decimal::new(25, 2) * Decimal::from(marks),
        time_hint_secs: Some(60),
    }
}

fn demo_attempt(id: &str, started_at: DateTime<Utc>, duration: Duration) -> ExamAttempt {
    let questions = vec![
        demo_question(
            0,
            "What is the SI unit of force?",
            ["Newton", "Joule", "Watt", "Pascal"],
            0,
            4,
        ),
        demo_question(
            1,
            "Which gas makes up most of Earth's atmosphere?",
            ["Oxygen", "Nitrogen", "Argon", "Carbon dioxide"],
            1,
            4,
        ),
        demo_question(2, "What is 12 x 12?", ["124", "132", "144", "154"], 2, 4),
        demo_question(
            3,
            "Which organelle produces most of a cell's ATP?",
            ["Ribosome", "Nucleus", "Golgi body", "Mitochondrion"],
            3,
            4,
        ),
        demo_question(
            4,
            "What is the chemical symbol for sodium?",
            ["Na", "So", "Sd", "S"],
            0,
            4,
        ),
    ];

    attempt_shell(
        id,
        ExamType::Graded,
        "General Science (demo)",
        questions,
        Some(Decimal::from(10)),
        started_at,
        duration,
    )
}

fn attempt_shell(
    id: &str,
    exam_type: ExamType,
    title: &str,
    questions: Vec<ExamQuestion>,
    cut_marks: Option<Decimal>,
    started_at: DateTime<Utc>,
    duration: Duration,
) -> ExamAttempt {
    let duration_secs = duration.as_secs();
    ExamAttempt {
        id: id.to_string(),
        exam_type,
        title: title.to_string(),
        total_questions: questions.len(),
        questions,
        cut_marks,
        duration_secs,
        started_at,
        expires_at: i64::try_from(duration_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|d| started_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC),
        status: AttemptStatus::InProgress,
        answered: Vec::new(),
    }
}
