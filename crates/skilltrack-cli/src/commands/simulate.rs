//! The `skilltrack simulate` command.
//!
//! Runs one learner through a training on an in-memory engine: every plain
//! module is started and completed, every quiz is answered with its key.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use comfy_table::{Cell, Table};
use uuid::Uuid;

use skilltrack_core::clock::SystemClock;
use skilltrack_core::engine::{Stores, TrainingEngine};
use skilltrack_core::memory::InMemoryDefinitions;
use skilltrack_core::model::Quiz;
use skilltrack_core::normalizer::{RawAnswers, RawSelection};
use skilltrack_core::parser;
use skilltrack_core::records::{CertificateState, TrainingAssignment};

pub async fn execute(
    training_path: PathBuf,
    quizzes_path: PathBuf,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = skilltrack_issuers::load_config_from(config_path.as_deref())?;
    let issuer = skilltrack_issuers::create_issuer(&config.issuer)?;

    let training = parser::parse_training(&training_path)?;
    let quizzes = parser::load_definitions_dir(&quizzes_path)?.quizzes;

    let definitions = Arc::new(InMemoryDefinitions::new());
    for quiz in quizzes {
        let quiz_id = quiz.id.clone();
        definitions
            .publish(quiz)
            .with_context(|| format!("quiz {quiz_id} cannot be published"))?;
    }
    definitions.add_training(training.clone());

    let mut settings = config.engine;
    settings.schedule_timeouts = false;
    let engine = TrainingEngine::new(
        definitions,
        Stores::in_memory(),
        issuer.clone(),
        Arc::new(SystemClock),
        settings,
    );

    println!(
        "Simulating: {} ({} modules, issuer: {})",
        training.title,
        training.modules.len(),
        issuer.name()
    );

    let learner_id = Uuid::new_v4();
    let assignment = engine.assign_training(learner_id, &training.id, None).await?;

    for module in training.ordered_modules() {
        let quiz_assignment_id = assignment
            .module(&module.id)
            .and_then(|progress| progress.quiz_assignment_id);

        match quiz_assignment_id {
            Some(quiz_assignment_id) => {
                let started = engine.start_attempt(quiz_assignment_id).await?;
                let answers = answer_key(&started.attempt.quiz);
                let outcome = engine
                    .submit_attempt(started.attempt.id, &answers)
                    .await?;
                println!(
                    "  {}: quiz scored {}%",
                    module.id, outcome.result.score_percent
                );
            }
            None => {
                engine.start_module(assignment.id, &module.id).await?;
                engine.complete_module(assignment.id, &module.id).await?;
                println!("  {}: {} completed", module.id, module.material_type);
            }
        }
    }

    engine.settle_certificates().await;
    let finished = engine.training_assignment(assignment.id).await?;
    print_summary(&finished);
    Ok(())
}

/// Select exactly the correct options of every question.
fn answer_key(quiz: &Quiz) -> RawAnswers {
    quiz.questions
        .iter()
        .map(|q| {
            let correct = q
                .options
                .iter()
                .filter(|o| o.is_correct)
                .map(|o| o.id.clone())
                .collect();
            (q.id.clone(), RawSelection::Many(correct))
        })
        .collect()
}

fn print_summary(assignment: &TrainingAssignment) {
    let mut table = Table::new();
    table.set_header(vec!["Module", "Type", "Mandatory", "Status"]);

    for module in &assignment.modules {
        table.add_row(vec![
            Cell::new(&module.module_id),
            Cell::new(module.material_type),
            Cell::new(if module.is_mandatory { "yes" } else { "no" }),
            Cell::new(module.status),
        ]);
    }

    println!("\n{table}");
    println!(
        "\nStatus: {} ({} modules completed)",
        assignment.status, assignment.completed_module_count
    );
    match &assignment.certificate {
        CertificateState::Issued { certificate_id, .. } => {
            println!("Certificate: {certificate_id}");
        }
        CertificateState::Pending { .. } => println!("Certificate: pending"),
        CertificateState::NotRequested => println!("Certificate: none"),
    }
}
