//! The `skilltrack grade` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use comfy_table::{Cell, Table};

use skilltrack_core::model::Quiz;
use skilltrack_core::normalizer::{normalize, AnswerSheet, RawAnswers};
use skilltrack_core::parser::parse_quiz;
use skilltrack_core::scoring::{grade_attempt, AttemptResult};

pub fn execute(quiz_path: PathBuf, answers_path: PathBuf, format: String) -> Result<()> {
    let quiz = parse_quiz(&quiz_path)?;

    let content = std::fs::read_to_string(&answers_path)
        .with_context(|| format!("failed to read answers: {}", answers_path.display()))?;
    let raw: RawAnswers = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse answers: {}", answers_path.display()))?;

    let sheet = normalize(&quiz, &raw)?;
    let result = grade_attempt(&quiz, &sheet)?;

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        "table" => print_table(&quiz, &sheet, &result),
        other => anyhow::bail!("unknown format: {other} (expected table or json)"),
    }

    Ok(())
}

fn print_table(quiz: &Quiz, sheet: &AnswerSheet, result: &AttemptResult) {
    println!("\nQuiz: {}", quiz.title);

    let mut table = Table::new();
    table.set_header(vec!["Question", "Selected", "Correct", "Points"]);

    for grade in &result.questions {
        let selected = sheet.selected(&grade.question_id);
        let selected = if selected.is_empty() {
            "-".to_string()
        } else {
            selected.iter().cloned().collect::<Vec<_>>().join(", ")
        };
        table.add_row(vec![
            Cell::new(&grade.question_id),
            Cell::new(selected),
            Cell::new(if grade.is_correct { "yes" } else { "no" }),
            Cell::new(format!("{}/{}", grade.earned_points, grade.possible_points)),
        ]);
    }

    println!("{table}");
    println!(
        "\nScore: {}% ({}/{} points), {} (passing score {}%)",
        result.score_percent,
        result.earned_points,
        result.total_points,
        if result.passed { "PASSED" } else { "FAILED" },
        result.passing_score_percent
    );
}
