//! CLI integration tests using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn skilltrack() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("skilltrack").unwrap()
}

fn noop_config(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("skilltrack.toml");
    std::fs::write(&path, "[issuer]\ntype = \"noop\"\n").unwrap();
    path
}

#[test]
fn validate_quiz_file() {
    skilltrack()
        .arg("validate")
        .arg("--path")
        .arg("../../definitions/quizzes/rust-basics.toml")
        .assert()
        .success()
        .stdout(predicate::str::contains("Quiz: Rust Basics (4 questions, 8 points)"))
        .stdout(predicate::str::contains("All definitions valid."));
}

#[test]
fn validate_training_file() {
    skilltrack()
        .arg("validate")
        .arg("--path")
        .arg("../../definitions/trainings/rust-fundamentals.toml")
        .assert()
        .success()
        .stdout(predicate::str::contains("Training: Rust Fundamentals (3 modules)"));
}

#[test]
fn validate_directory() {
    skilltrack()
        .arg("validate")
        .arg("--path")
        .arg("../../definitions")
        .assert()
        .success()
        .stdout(predicate::str::contains("Rust Basics"))
        .stdout(predicate::str::contains("Security Awareness"))
        .stdout(predicate::str::contains("New Hire Onboarding"))
        .stdout(predicate::str::contains("Rust Fundamentals"))
        .stdout(predicate::str::contains("All definitions valid."));
}

#[test]
fn validate_nonexistent_file() {
    skilltrack()
        .arg("validate")
        .arg("--path")
        .arg("nonexistent.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn validate_reports_warnings() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("broken.toml"),
        r#"
[quiz]
id = "broken"
title = "Broken"

[[questions]]
id = "q1"
text = "Nothing is correct"

[[questions.options]]
id = "a"
text = "A"
"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("course.toml"),
        r#"
[training]
id = "course"
title = "Course"

[[modules]]
id = "check"
material_type = "quiz"
quiz_id = "missing-quiz"
"#,
    )
    .unwrap();

    skilltrack()
        .arg("validate")
        .arg("--path")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("[q1] WARNING: no option is marked correct"))
        .stdout(predicate::str::contains("quiz missing-quiz is not defined"))
        .stdout(predicate::str::contains("2 warning(s) found."));
}

#[test]
fn validate_empty_directory_fails() {
    let dir = TempDir::new().unwrap();
    skilltrack()
        .arg("validate")
        .arg("--path")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("no quiz or training definitions"));
}

fn write_answers(dir: &TempDir, json: &str) -> std::path::PathBuf {
    let path = dir.path().join("answers.json");
    std::fs::write(&path, json).unwrap();
    path
}

#[test]
fn grade_table_output() {
    let dir = TempDir::new().unwrap();
    let answers = write_answers(
        &dir,
        r#"{"ownership": "moved", "borrowing": ["many-shared"], "option": "true", "errors": "bang"}"#,
    );

    skilltrack()
        .arg("grade")
        .arg("--quiz")
        .arg("../../definitions/quizzes/rust-basics.toml")
        .arg("--answers")
        .arg(&answers)
        .assert()
        .success()
        .stdout(predicate::str::contains("Quiz: Rust Basics"))
        .stdout(predicate::str::contains("Score: 38% (3/8 points), FAILED"));
}

#[test]
fn grade_json_output() {
    let dir = TempDir::new().unwrap();
    let answers = write_answers(
        &dir,
        r#"{"ownership": "moved", "borrowing": ["one-mut", "many-shared"], "option": ["true"], "errors": "question-mark"}"#,
    );

    let output = skilltrack()
        .arg("grade")
        .arg("--quiz")
        .arg("../../definitions/quizzes/rust-basics.toml")
        .arg("--answers")
        .arg(&answers)
        .arg("--format")
        .arg("json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["score_percent"], 100);
    assert_eq!(result["passed"], true);
    assert_eq!(result["questions"].as_array().unwrap().len(), 4);
}

#[test]
fn grade_rejects_unknown_option() {
    let dir = TempDir::new().unwrap();
    let answers = write_answers(&dir, r#"{"ownership": "borrowed"}"#);

    skilltrack()
        .arg("grade")
        .arg("--quiz")
        .arg("../../definitions/quizzes/rust-basics.toml")
        .arg("--answers")
        .arg(&answers)
        .assert()
        .failure()
        .stderr(predicate::str::contains("option borrowed is not part of question ownership"));
}

#[test]
fn grade_rejects_unknown_format() {
    let dir = TempDir::new().unwrap();
    let answers = write_answers(&dir, "{}");

    skilltrack()
        .arg("grade")
        .arg("--quiz")
        .arg("../../definitions/quizzes/rust-basics.toml")
        .arg("--answers")
        .arg(&answers)
        .arg("--format")
        .arg("xml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown format"));
}

#[test]
fn simulate_completes_training() {
    let dir = TempDir::new().unwrap();
    let config = noop_config(&dir);

    skilltrack()
        .arg("simulate")
        .arg("--training")
        .arg("../../definitions/trainings/new-hire-onboarding.toml")
        .arg("--quizzes")
        .arg("../../definitions/quizzes")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("issuer: noop"))
        .stdout(predicate::str::contains("security-check: quiz scored 100%"))
        .stdout(predicate::str::contains("Status: completed"))
        .stdout(predicate::str::contains("Certificate: noop-"));
}

#[test]
fn simulate_fails_on_missing_quiz() {
    let dir = TempDir::new().unwrap();
    let config = noop_config(&dir);
    let quizzes = dir.path().join("quizzes");
    std::fs::create_dir(&quizzes).unwrap();

    skilltrack()
        .arg("simulate")
        .arg("--training")
        .arg("../../definitions/trainings/rust-fundamentals.toml")
        .arg("--quizzes")
        .arg(&quizzes)
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("rust-basics"));
}

#[test]
fn init_creates_valid_definitions() {
    let dir = TempDir::new().unwrap();

    skilltrack()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created skilltrack.toml"));

    assert!(dir.path().join("skilltrack.toml").exists());
    assert!(dir.path().join("definitions/quizzes/example.toml").exists());
    assert!(dir.path().join("definitions/trainings/example.toml").exists());

    skilltrack()
        .current_dir(dir.path())
        .arg("validate")
        .arg("--path")
        .arg("definitions")
        .assert()
        .success()
        .stdout(predicate::str::contains("All definitions valid."));

    skilltrack()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists, skipping."));
}

#[test]
fn help_lists_commands() {
    skilltrack()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("grade"))
        .stdout(predicate::str::contains("simulate"));
}
