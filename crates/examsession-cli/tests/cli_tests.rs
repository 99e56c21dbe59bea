//! CLI integration tests using assert_cmd.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn examsession() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("examsession").unwrap();
    cmd.env_remove("EXAMSESSION_GATEWAY_URL")
        .env_remove("EXAMSESSION_TOKEN");
    cmd
}

fn write_config(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("examsession.toml");
    std::fs::write(&path, body).unwrap();
    path
}

fn mock_config(dir: &Path) -> PathBuf {
    write_config(dir, "[gateway]\ntype = \"mock\"\nduration_secs = 600\n")
}

fn rest_config(dir: &Path, server: &MockServer) -> PathBuf {
    write_config(
        dir,
        &format!(
            "[gateway]\ntype = \"rest\"\nbase_url = \"{}\"\ntoken = \"cli-token\"\ntimeout_secs = 5\n",
            server.uri()
        ),
    )
}

#[test]
fn init_creates_config() {
    let dir = TempDir::new().unwrap();

    examsession()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created examsession.toml"));

    let content = std::fs::read_to_string(dir.path().join("examsession.toml")).unwrap();
    assert!(content.contains("type = \"mock\""));
}

#[test]
fn init_skips_existing() {
    let dir = TempDir::new().unwrap();

    examsession()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();

    examsession()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

#[test]
fn take_demo_exam_to_completion() {
    let dir = TempDir::new().unwrap();
    let config = mock_config(dir.path());
    let saved = dir.path().join("result.json");

    examsession()
        .arg("take")
        .arg("--attempt")
        .arg("demo")
        .arg("--config")
        .arg(&config)
        .arg("--save")
        .arg(&saved)
        .write_stdin("1 A\n2 b\n2 c\n5 a\nend\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Q1: correct"))
        .stdout(predicate::str::contains("Q2 was already answered with 'b'"))
        .stdout(predicate::str::contains("Exam submitted"))
        .stdout(predicate::str::contains("Score: 12 / 20"))
        .stdout(predicate::str::contains("Verdict: PASS"));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&saved).unwrap()).unwrap();
    assert_eq!(json["correct"], 3);
    assert_eq!(json["unanswered"], 2);
}

#[test]
fn take_reports_invalid_option_and_continues() {
    let dir = TempDir::new().unwrap();
    let config = mock_config(dir.path());

    examsession()
        .arg("take")
        .arg("--attempt")
        .arg("demo")
        .arg("--config")
        .arg(&config)
        .write_stdin("1 z\nhello\nend\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("has no option 'z'"))
        .stdout(predicate::str::contains("unrecognised input"))
        .stdout(predicate::str::contains("Unanswered: 5"));
}

#[test]
fn take_leaves_without_submitting_on_eof() {
    let dir = TempDir::new().unwrap();
    let config = mock_config(dir.path());

    examsession()
        .arg("take")
        .arg("--attempt")
        .arg("demo")
        .arg("--config")
        .arg(&config)
        .write_stdin("1 a\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("without submitting"))
        .stdout(predicate::str::contains("Score:").not());
}

#[test]
fn take_unknown_attempt_fails() {
    let dir = TempDir::new().unwrap();
    let config = mock_config(dir.path());

    examsession()
        .arg("take")
        .arg("--attempt")
        .arg("nope")
        .arg("--config")
        .arg(&config)
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"))
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn missing_config_file_fails() {
    examsession()
        .arg("status")
        .arg("--attempt")
        .arg("demo")
        .arg("--config")
        .arg("no_such_config.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file not found"));
}

#[test]
fn result_of_unfinished_attempt_fails() {
    let dir = TempDir::new().unwrap();
    let config = mock_config(dir.path());

    examsession()
        .arg("result")
        .arg("--attempt")
        .arg("demo")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("still in progress"));
}

#[test]
fn result_rejects_unknown_format() {
    examsession()
        .arg("result")
        .arg("--attempt")
        .arg("demo")
        .arg("--format")
        .arg("sarif")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown format"));
}

fn finalized_attempt() -> serde_json::Value {
    serde_json::json!({
        "id": "att-9",
        "exam_type": "graded",
        "title": "Chemistry",
        "questions": [
            {
                "id": "q2", "order": 1, "text": "Noble gas?",
                "options": [
                    {"label": "a", "text": "Oxygen", "is_correct": false},
                    {"label": "b", "text": "Neon", "is_correct": true}
                ],
                "marks": "2", "negative_marks": "0.5"
            },
            {
                "id": "q1", "order": 0, "text": "Symbol for sodium?",
                "options": [
                    {"label": "a", "text": "Na", "is_correct": true},
                    {"label": "b", "text": "So", "is_correct": false}
                ],
                "marks": "2", "negative_marks": "0.5"
            }
        ],
        "total_questions": 2,
        "cut_marks": "2",
        "duration_secs": 600,
        "started_at": "2026-03-01T09:00:00Z",
        "expires_at": "2026-03-01T09:10:00Z",
        "status": "finalized"
    })
}

async fn result_server() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/exams/attempts/att-9"))
        .and(header("authorization", "Bearer cli-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(finalized_attempt()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/exams/attempts/att-9/result"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "attempt_id": "att-9",
            "questions": [
                {"question_id": "q2", "selected": "a", "correct_option": "b", "is_correct": false},
                {"question_id": "q1", "selected": "a", "correct_option": "a", "is_correct": true}
            ]
        })))
        .mount(&server)
        .await;

    server
}

#[tokio::test(flavor = "multi_thread")]
async fn result_from_rest_gateway() {
    let server = result_server().await;
    let dir = TempDir::new().unwrap();
    let config = rest_config(dir.path(), &server);

    tokio::task::spawn_blocking(move || {
        examsession()
            .arg("result")
            .arg("--attempt")
            .arg("att-9")
            .arg("--config")
            .arg(&config)
            .assert()
            .success()
            .stdout(predicate::str::contains("Chemistry"))
            .stdout(predicate::str::contains("Score: 1.5 / 4 (37.5%)"))
            .stdout(predicate::str::contains("Verdict: FAIL"));
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn result_json_and_html_output() {
    let server = result_server().await;
    let dir = TempDir::new().unwrap();
    let config = rest_config(dir.path(), &server);
    let html_path = dir.path().join("out").join("result.html");

    let json_config = config.clone();
    let stdout = tokio::task::spawn_blocking(move || {
        examsession()
            .arg("result")
            .arg("--attempt")
            .arg("att-9")
            .arg("--format")
            .arg("json")
            .arg("--config")
            .arg(&json_config)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone()
    })
    .await
    .unwrap();

    let json: serde_json::Value = serde_json::from_slice(&stdout).unwrap();
    assert_eq!(json["percentage"], "37.5");
    assert_eq!(json["passed"], false);
    assert_eq!(json["review"][0]["question_id"], "q1");

    let html_out = html_path.clone();
    tokio::task::spawn_blocking(move || {
        examsession()
            .arg("result")
            .arg("--attempt")
            .arg("att-9")
            .arg("--format")
            .arg("html")
            .arg("--output")
            .arg(&html_out)
            .arg("--config")
            .arg(&config)
            .assert()
            .success();
    })
    .await
    .unwrap();

    let html = std::fs::read_to_string(&html_path).unwrap();
    assert!(html.contains("<html"));
    assert!(html.contains("Symbol for sodium?"));
}

#[tokio::test(flavor = "multi_thread")]
async fn status_json_reports_progress() {
    let server = MockServer::start().await;
    let mut attempt = finalized_attempt();
    attempt["status"] = "in_progress".into();
    attempt["started_at"] = "2099-01-01T00:00:00Z".into();
    attempt["expires_at"] = "2099-01-01T00:10:00Z".into();
    attempt["answered"] = serde_json::json!([
        {"question_id": "q1", "option": "a", "is_correct": true}
    ]);

    Mock::given(method("GET"))
        .and(path("/exams/attempts/att-9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(attempt))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = rest_config(dir.path(), &server);

    let stdout = tokio::task::spawn_blocking(move || {
        examsession()
            .arg("status")
            .arg("--attempt")
            .arg("att-9")
            .arg("--json")
            .arg("--config")
            .arg(&config)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone()
    })
    .await
    .unwrap();

    let json: serde_json::Value = serde_json::from_slice(&stdout).unwrap();
    assert_eq!(json["status"], "in_progress");
    assert_eq!(json["answered"], 1);
    assert_eq!(json["question_count"], 2);
    assert!(json["remaining_secs"].as_u64().unwrap() > 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn unauthorized_gateway_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = rest_config(dir.path(), &server);

    tokio::task::spawn_blocking(move || {
        examsession()
            .arg("status")
            .arg("--attempt")
            .arg("att-9")
            .arg("--config")
            .arg(&config)
            .assert()
            .failure()
            .stderr(predicate::str::contains("authentication failed"));
    })
    .await
    .unwrap();
}

#[test]
fn help_output() {
    examsession()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Timed exam session client"));
}

#[test]
fn version_output() {
    examsession()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("examsession"));
}
