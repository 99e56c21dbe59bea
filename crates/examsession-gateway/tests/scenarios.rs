//! End-to-end session scenarios against the in-memory gateway.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;

use examsession_core::model::{AttemptStatus, ExamType};
use examsession_core::{
    Action, CommitOutcome, Direction, EndReason, ExamGateway, ExamSession, LoadOutcome, ManualClock,
    Outcome, ReviewStatus, SessionConfig, SessionError, SessionStatus,
};
use examsession_gateway::mock::simple_attempt;
use examsession_gateway::MockGateway;

const ATTEMPT: &str = "att-1";

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

struct Harness {
    gateway: Arc<MockGateway>,
    clock: Arc<ManualClock>,
    session: ExamSession,
}

fn harness_with(gateway: MockGateway, clock: Arc<ManualClock>) -> Harness {
    let gateway = Arc::new(gateway.with_clock(clock.clone()));
    let session = ExamSession::new(gateway.clone(), clock.clone(), SessionConfig::default());
    Harness {
        gateway,
        clock,
        session,
    }
}

fn harness(questions: usize, exam_type: ExamType) -> Harness {
    let clock = Arc::new(ManualClock::new(start()));
    let gateway = MockGateway::new().with_attempt(simple_attempt(
        ATTEMPT,
        exam_type,
        questions,
        start(),
        Duration::from_secs(300),
    ));
    harness_with(gateway, clock)
}

async fn wait_for_status(session: &ExamSession, status: SessionStatus) {
    let mut changes = session.status_changes();
    tokio::time::timeout(Duration::from_secs(30), changes.wait_for(|s| *s == status))
        .await
        .expect("timed out waiting for status")
        .expect("status channel closed");
}

async fn load(h: &Harness) -> Duration {
    match h.session.load(ATTEMPT).await.unwrap() {
        Outcome::Applied(LoadOutcome::InProgress { remaining }) => remaining,
        other => panic!("unexpected load outcome: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn deadline_auto_finalizes_with_partial_answers() {
    let h = harness(5, ExamType::Graded);
    assert_eq!(load(&h).await, Duration::from_secs(300));

    for index in 0..3 {
        let outcome = h.session.select_answer(index, "a").await.unwrap();
        assert!(matches!(outcome, Outcome::Applied(CommitOutcome::Committed(_))));
    }

    h.clock.advance(Duration::from_secs(300));
    wait_for_status(&h.session, SessionStatus::Completed).await;

    let snapshot = h.session.snapshot().await;
    assert_eq!(snapshot.end_reason, Some(EndReason::DeadlineExpired));
    assert_eq!(snapshot.remaining_secs, Some(0));
    assert_eq!(h.gateway.finalize_calls(), 1);

    let result = h.session.result().await.unwrap().applied().unwrap();
    assert_eq!((result.correct, result.incorrect, result.unanswered), (3, 0, 2));
    assert_eq!(result.percentage, Decimal::from(60));
    assert_eq!(result.passed, Some(true));
    let statuses: Vec<_> = result.review.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            ReviewStatus::Correct,
            ReviewStatus::Correct,
            ReviewStatus::Correct,
            ReviewStatus::Unanswered,
            ReviewStatus::Unanswered,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn recommit_keeps_first_verdict() {
    let h = harness(5, ExamType::Practice);
    load(&h).await;

    let first = h.session.select_answer(1, "c").await.unwrap();
    let Outcome::Applied(CommitOutcome::Committed(record)) = first else {
        panic!("expected commit, got {first:?}");
    };
    assert_eq!(record.correct_option.as_deref(), Some("a"));

    let second = h.session.select_answer(1, "a").await.unwrap();
    let Outcome::Applied(CommitOutcome::AlreadyCommitted(stored)) = second else {
        panic!("expected AlreadyCommitted, got {second:?}");
    };
    assert_eq!(stored, record);
    assert_eq!(stored.selected.as_deref(), Some("c"));
    assert_eq!(h.gateway.commit_calls_for("q2"), 1);
}

#[tokio::test(start_paused = true)]
async fn end_exam_racing_the_deadline_finalizes_once() {
    let clock = Arc::new(ManualClock::new(start()));
    let gateway = MockGateway::new()
        .with_attempt(simple_attempt(ATTEMPT, ExamType::Graded, 5, start(), Duration::from_secs(300)))
        .with_latency(Duration::from_millis(200));
    let h = harness_with(gateway, clock);
    load(&h).await;

    h.clock.advance(Duration::from_millis(299_800));
    let user = {
        let session = h.session.clone();
        tokio::spawn(async move { session.end_exam(EndReason::UserRequested).await })
    };
    h.clock.advance(Duration::from_millis(200));
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(user.await.unwrap().is_ok());
    wait_for_status(&h.session, SessionStatus::Completed).await;
    assert_eq!(h.gateway.finalize_calls(), 1);

    let first = h.session.result().await.unwrap().applied().unwrap();
    let second = h.session.result().await.unwrap().applied().unwrap();
    assert_eq!(first, second);
    assert_eq!(h.gateway.result_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_end_exam_is_applied_exactly_once() {
    let h = harness(3, ExamType::Graded);
    load(&h).await;

    let (a, b) = tokio::join!(
        h.session.end_exam(EndReason::UserRequested),
        h.session.end_exam(EndReason::DeadlineExpired),
    );
    let applied = [a.unwrap(), b.unwrap()]
        .iter()
        .filter(|o| o.is_applied())
        .count();
    assert_eq!(applied, 1);
    assert_eq!(h.gateway.finalize_calls(), 1);
    assert_eq!(h.session.status().await, SessionStatus::Completed);
    assert_eq!(
        h.session.snapshot().await.end_reason,
        Some(EndReason::UserRequested)
    );
}

#[tokio::test(start_paused = true)]
async fn transient_commit_failure_can_be_retried() {
    let h = harness(5, ExamType::Graded);
    load(&h).await;
    h.gateway.fail_next_commits(1);

    let err = h.session.select_answer(2, "a").await.unwrap_err();
    assert!(matches!(err, SessionError::Commit { ref question_id, .. } if question_id == "q3"));
    assert!(err.is_retryable());
    assert!(!h.session.snapshot().await.answers[2].committed);

    let retry = h.session.select_answer(2, "a").await.unwrap();
    assert!(matches!(retry, Outcome::Applied(CommitOutcome::Committed(_))));
    assert_eq!(h.gateway.commit_calls_for("q3"), 2);

    let attempt = h.gateway.get_attempt(ATTEMPT).await.unwrap();
    assert_eq!(
        attempt.answered.iter().filter(|a| a.question_id == "q3").count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn reload_mid_attempt_uses_absolute_expiry() {
    let h = harness(5, ExamType::Graded);
    h.gateway.preanswer(ATTEMPT, "q1", "a");
    h.clock.advance(Duration::from_secs(150));

    assert_eq!(load(&h).await, Duration::from_secs(150));
    assert_eq!(h.session.remaining().await, Some(Duration::from_secs(150)));

    let snapshot = h.session.snapshot().await;
    assert_eq!(snapshot.committed_count(), 1);

    let outcome = h.session.select_answer(0, "b").await.unwrap();
    assert!(matches!(
        outcome,
        Outcome::Applied(CommitOutcome::AlreadyCommitted(_))
    ));
    assert_eq!(h.gateway.commit_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn duplicate_selections_issue_one_commit() {
    let clock = Arc::new(ManualClock::new(start()));
    let gateway = MockGateway::new()
        .with_attempt(simple_attempt(ATTEMPT, ExamType::Graded, 2, start(), Duration::from_secs(300)))
        .with_latency(Duration::from_millis(50));
    let h = harness_with(gateway, clock);
    load(&h).await;

    let outcomes = join_all((0..10).map(|_| h.session.select_answer(0, "a"))).await;
    let committed = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(Outcome::Applied(CommitOutcome::Committed(_)))))
        .count();
    let in_flight = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(Outcome::Applied(CommitOutcome::InFlight))))
        .count();
    assert_eq!(committed, 1);
    assert_eq!(in_flight, 9);
    assert_eq!(h.gateway.commit_calls_for("q1"), 1);
}

#[tokio::test(start_paused = true)]
async fn remaining_never_increases_and_ends_at_zero() {
    let h = harness(2, ExamType::Practice);
    load(&h).await;
    let ticks = h.session.ticks();

    let mut seen = vec![*ticks.borrow()];
    for step in [40u64, 60, 0, 100] {
        h.clock.advance(Duration::from_secs(step));
        tokio::time::sleep(Duration::from_secs(1)).await;
        seen.push(*ticks.borrow());
    }
    // Wall clock stepping backwards must not add time.
    h.clock.set(start());
    tokio::time::sleep(Duration::from_secs(1)).await;
    seen.push(*ticks.borrow());

    h.clock.advance(Duration::from_secs(1000));
    wait_for_status(&h.session, SessionStatus::Completed).await;
    seen.push(*ticks.borrow());

    assert!(seen.windows(2).all(|w| w[0] >= w[1]), "ticks: {seen:?}");
    assert_eq!(seen.last(), Some(&Duration::ZERO));
    assert_eq!(h.gateway.finalize_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn expired_attempt_finalizes_on_load() {
    let h = harness(3, ExamType::Graded);
    h.clock.advance(Duration::from_secs(400));

    assert_eq!(load(&h).await, Duration::ZERO);
    wait_for_status(&h.session, SessionStatus::Completed).await;

    assert_eq!(
        h.session.snapshot().await.end_reason,
        Some(EndReason::DeadlineExpired)
    );
    assert_eq!(h.gateway.finalize_calls(), 1);
    let result = h.session.result().await.unwrap().applied().unwrap();
    assert_eq!(result.unanswered, 3);
    assert_eq!(result.passed, Some(false));
}

#[tokio::test(start_paused = true)]
async fn failed_finalize_waits_for_retry() {
    let h = harness(3, ExamType::Graded);
    load(&h).await;
    h.gateway.fail_next_finalizes(1);

    let err = h.session.end_exam(EndReason::UserRequested).await.unwrap_err();
    assert!(matches!(err, SessionError::Finalize { .. }));
    assert!(err.is_retryable());
    assert_eq!(h.session.status().await, SessionStatus::Finalizing);

    // Nothing else moves the session while it waits.
    assert!(h.session.result().await.unwrap().is_ignored());
    assert!(h.session.select_answer(0, "a").await.unwrap().is_ignored());
    assert!(h
        .session
        .end_exam(EndReason::DeadlineExpired)
        .await
        .unwrap()
        .is_ignored());

    let ack = h.session.retry_finalize().await.unwrap().applied().unwrap();
    assert_eq!(ack.attempt_id, ATTEMPT);
    assert_eq!(h.session.status().await, SessionStatus::Completed);
    assert_eq!(h.gateway.finalize_calls(), 2);
    assert!(h.session.retry_finalize().await.unwrap().is_ignored());
}

#[tokio::test(start_paused = true)]
async fn load_failure_never_starts_the_session() {
    let h = harness(3, ExamType::Graded);
    h.gateway.fail_load(true);

    let err = h.session.load(ATTEMPT).await.unwrap_err();
    assert!(matches!(err, SessionError::Load { .. }));
    assert_eq!(h.session.status().await, SessionStatus::FailedToLoad);
    assert_eq!(h.session.remaining().await, None);

    h.gateway.fail_load(false);
    assert!(h.session.load(ATTEMPT).await.unwrap().is_ignored());
    assert!(h.session.select_answer(0, "a").await.unwrap().is_ignored());
    assert_eq!(h.gateway.get_attempt_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_attempt_is_a_load_failure() {
    let h = harness(3, ExamType::Graded);
    let err = h.session.load("missing").await.unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(h.session.status().await, SessionStatus::FailedToLoad);
}

#[tokio::test(start_paused = true)]
async fn finalized_attempt_loads_as_completed() {
    let clock = Arc::new(ManualClock::new(start()));
    let mut attempt = simple_attempt(ATTEMPT, ExamType::Graded, 2, start(), Duration::from_secs(300));
    attempt.status = AttemptStatus::Finalized;
    let h = harness_with(MockGateway::new().with_attempt(attempt), clock);
    h.gateway.preanswer(ATTEMPT, "q1", "a");

    let outcome = h.session.load(ATTEMPT).await.unwrap();
    assert_eq!(outcome, Outcome::Applied(LoadOutcome::AlreadyCompleted));
    assert_eq!(h.session.status().await, SessionStatus::Completed);

    let result = h.session.result().await.unwrap().applied().unwrap();
    assert_eq!((result.correct, result.unanswered), (1, 1));
    assert_eq!(h.gateway.finalize_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn actions_after_completion_are_ignored() {
    let h = harness(3, ExamType::Practice);
    load(&h).await;
    h.session
        .end_exam(EndReason::UserRequested)
        .await
        .unwrap()
        .applied()
        .unwrap();

    assert!(h.session.select_answer(0, "a").await.unwrap().is_ignored());
    assert!(h.session.advance(Direction::Forward).await.is_ignored());
    assert!(h.session.go_to(1).await.is_ignored());
    let Outcome::Ignored(stale) = h.session.end_exam(EndReason::DeadlineExpired).await.unwrap() else {
        panic!("second end_exam should be ignored");
    };
    assert_eq!(stale.status, SessionStatus::Completed);
    assert_eq!(h.gateway.commit_calls(), 0);

    let result = h.session.result().await.unwrap().applied().unwrap();
    assert_eq!(result.passed, None);
}

#[tokio::test(start_paused = true)]
async fn abandon_discards_late_commit_response() {
    let clock = Arc::new(ManualClock::new(start()));
    let gateway = MockGateway::new()
        .with_attempt(simple_attempt(ATTEMPT, ExamType::Graded, 2, start(), Duration::from_secs(300)))
        .with_latency(Duration::from_millis(100));
    let h = harness_with(gateway, clock);
    load(&h).await;

    let pending = {
        let session = h.session.clone();
        tokio::spawn(async move { session.select_answer(0, "a").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.session.abandon().await;

    let outcome = pending.await.unwrap().unwrap();
    assert!(outcome.is_ignored());
    let snapshot = h.session.snapshot().await;
    assert!(snapshot.abandoned);
    assert!(!snapshot.answers[0].committed);
    assert_eq!(h.gateway.commit_calls(), 1);

    // The deadline no longer fires once abandoned.
    h.clock.advance(Duration::from_secs(600));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.session.status().await, SessionStatus::InProgress);
    assert_eq!(h.gateway.finalize_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn cursor_is_bounded() {
    let h = harness(3, ExamType::Practice);
    load(&h).await;

    assert_eq!(h.session.advance(Direction::Backward).await, Outcome::Applied(0));
    assert_eq!(h.session.advance(Direction::Forward).await, Outcome::Applied(1));
    assert_eq!(h.session.go_to(99).await, Outcome::Applied(2));
    assert_eq!(h.session.advance(Direction::Forward).await, Outcome::Applied(2));

    let (index, question) = h.session.current_question().await.unwrap();
    assert_eq!(index, 2);
    assert_eq!(question.id, "q3");
}

#[tokio::test(start_paused = true)]
async fn invalid_selection_is_rejected() {
    let h = harness(2, ExamType::Practice);
    load(&h).await;

    assert!(matches!(
        h.session.select_answer(0, "z").await,
        Err(SessionError::InvalidSelection(_))
    ));
    assert!(matches!(
        h.session.select_answer(5, "a").await,
        Err(SessionError::InvalidSelection(_))
    ));
    assert_eq!(h.gateway.commit_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn commit_after_deadline_is_not_sent() {
    let h = harness(3, ExamType::Graded);
    load(&h).await;
    assert!(h.session.select_answer(0, "a").await.unwrap().is_applied());

    // The ticker has not observed expiry yet; the commit must still be refused.
    h.clock.advance(Duration::from_secs(400));
    assert_eq!(h.session.remaining().await, Some(Duration::ZERO));
    let late = h.session.select_answer(1, "a").await.unwrap();
    let Outcome::Ignored(stale) = late else {
        panic!("expected late commit to be ignored, got {late:?}");
    };
    assert_eq!(stale.action, Action::SelectAnswer);
    assert_eq!(h.gateway.commit_calls(), 1);

    wait_for_status(&h.session, SessionStatus::Completed).await;
    let result = h.session.result().await.unwrap().applied().unwrap();
    assert_eq!((result.correct, result.unanswered), (1, 2));
}

#[tokio::test(start_paused = true)]
async fn commit_right_after_loading_an_expired_attempt_is_not_sent() {
    let h = harness(2, ExamType::Practice);
    h.clock.advance(Duration::from_secs(301));
    assert_eq!(load(&h).await, Duration::ZERO);

    assert!(h.session.select_answer(0, "a").await.unwrap().is_ignored());
    wait_for_status(&h.session, SessionStatus::Completed).await;
    assert_eq!(h.gateway.commit_calls(), 0);
    assert_eq!(h.gateway.finalize_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn commit_in_flight_when_exam_ends_keeps_its_verdict() {
    let clock = Arc::new(ManualClock::new(start()));
    let gateway = MockGateway::new()
        .with_attempt(simple_attempt(ATTEMPT, ExamType::Graded, 2, start(), Duration::from_secs(300)))
        .with_latency(Duration::from_secs(1));
    let h = harness_with(gateway, clock);
    load(&h).await;

    let pending = {
        let session = h.session.clone();
        tokio::spawn(async move { session.select_answer(0, "a").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    h.session
        .end_exam(EndReason::UserRequested)
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert!(h.session.select_answer(1, "a").await.unwrap().is_ignored());

    let outcome = pending.await.unwrap().unwrap();
    let Outcome::Applied(CommitOutcome::Committed(record)) = outcome else {
        panic!("expected in-flight commit to be recorded, got {outcome:?}");
    };
    assert_eq!(record.selected.as_deref(), Some("a"));
    assert_eq!(h.gateway.commit_calls(), 1);
    assert_eq!(h.gateway.finalize_calls(), 1);

    let snapshot = h.session.snapshot().await;
    assert_eq!(snapshot.status, SessionStatus::Completed);
    assert_eq!(snapshot.end_reason, Some(EndReason::UserRequested));
    assert!(snapshot.answers[0].committed);
    assert!(!snapshot.answers[1].committed);

    let result = h.session.result().await.unwrap().applied().unwrap();
    assert_eq!((result.correct, result.unanswered), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn out_of_range_duration_fails_to_load() {
    let clock = Arc::new(ManualClock::new(start()));
    let mut attempt = simple_attempt(ATTEMPT, ExamType::Graded, 2, start(), Duration::from_secs(300));
    attempt.duration_secs = 10_000_000_000_000_000;
    let h = harness_with(MockGateway::new().with_attempt(attempt), clock);

    let err = h.session.load(ATTEMPT).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidAttempt { .. }), "got {err:?}");
    assert!(err.to_string().contains("out of range"));
    assert_eq!(h.session.status().await, SessionStatus::FailedToLoad);
}
