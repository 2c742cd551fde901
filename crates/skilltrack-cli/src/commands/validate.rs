//! The `skilltrack validate` command.

use std::path::PathBuf;

use anyhow::Result;

use skilltrack_core::parser::{self, ValidationWarning};

pub fn execute(path: PathBuf) -> Result<()> {
    let definitions = if path.is_dir() {
        parser::load_definitions_dir(&path)?
    } else {
        parser::load_definitions_file(&path)?
    };

    if definitions.is_empty() {
        anyhow::bail!("no quiz or training definitions found in {}", path.display());
    }

    let mut total_warnings = 0;

    for quiz in &definitions.quizzes {
        println!(
            "Quiz: {} ({} questions, {} points)",
            quiz.title,
            quiz.questions.len(),
            quiz.total_points()
        );
        total_warnings += print_warnings(&parser::validate_quiz(quiz));
    }

    for training in &definitions.trainings {
        println!(
            "Training: {} ({} modules)",
            training.title,
            training.modules.len()
        );
        let mut warnings = parser::validate_training(training);

        // Only a directory holds the quizzes a training points at.
        if path.is_dir() {
            for module in &training.modules {
                if let Some(quiz_id) = module.quiz_id.as_deref().filter(|_| module.is_quiz()) {
                    if definitions.quiz(quiz_id).is_none() {
                        warnings.push(ValidationWarning {
                            definition_id: training.id.clone(),
                            item_id: Some(module.id.clone()),
                            message: format!("quiz {quiz_id} is not defined"),
                        });
                    }
                }
            }
        }
        total_warnings += print_warnings(&warnings);
    }

    if total_warnings == 0 {
        println!("All definitions valid.");
    } else {
        println!("\n{total_warnings} warning(s) found.");
    }

    Ok(())
}

fn print_warnings(warnings: &[ValidationWarning]) -> usize {
    for w in warnings {
        let prefix = w
            .item_id
            .as_ref()
            .map(|id| format!("  [{id}]"))
            .unwrap_or_else(|| "  ".to_string());
        println!("{prefix} WARNING: {}", w.message);
    }
    warnings.len()
}
