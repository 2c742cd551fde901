//! TOML definition parser.
//!
//! Loads quizzes and trainings from TOML files and directories, and checks
//! them for authoring mistakes.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::model::{
    AnswerOption, MaterialType, Question, QuestionType, Quiz, QuizState, Training, TrainingModule,
};

/// Intermediate TOML structure for quiz files.
#[derive(Debug, Deserialize)]
struct TomlQuizFile {
    quiz: TomlQuizHeader,
    #[serde(default)]
    questions: Vec<TomlQuestion>,
}

#[derive(Debug, Deserialize)]
struct TomlQuizHeader {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default = "default_passing_score")]
    passing_score_percent: u8,
    #[serde(default = "default_duration")]
    duration_minutes: u32,
    #[serde(default)]
    max_attempts: Option<u32>,
    #[serde(default)]
    shuffle_questions: bool,
    #[serde(default)]
    state: QuizState,
}

fn default_passing_score() -> u8 {
    70
}

fn default_duration() -> u32 {
    30
}

#[derive(Debug, Deserialize)]
struct TomlQuestion {
    id: String,
    #[serde(default)]
    text: String,
    #[serde(rename = "type", default = "default_question_type")]
    question_type: String,
    #[serde(default = "default_points")]
    points: u32,
    #[serde(default)]
    options: Vec<TomlOption>,
}

fn default_question_type() -> String {
    "single_choice".to_string()
}

fn default_points() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct TomlOption {
    id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    correct: bool,
}

/// Intermediate TOML structure for training files.
#[derive(Debug, Deserialize)]
struct TomlTrainingFile {
    training: TomlTrainingHeader,
    #[serde(default)]
    modules: Vec<TomlModule>,
}

#[derive(Debug, Deserialize)]
struct TomlTrainingHeader {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct TomlModule {
    id: String,
    #[serde(default)]
    title: String,
    material_type: MaterialType,
    #[serde(default)]
    order_index: Option<u32>,
    #[serde(default = "default_true")]
    mandatory: bool,
    #[serde(default)]
    quiz_id: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Parse a single quiz file.
pub fn parse_quiz(path: &Path) -> Result<Quiz> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read quiz file: {}", path.display()))?;

    parse_quiz_str(&content, path)
}

/// Parse a quiz from a TOML string (useful for testing).
pub fn parse_quiz_str(content: &str, source_path: &Path) -> Result<Quiz> {
    let parsed: TomlQuizFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let questions = parsed
        .questions
        .into_iter()
        .map(|q| {
            let question_type: QuestionType = q
                .question_type
                .parse()
                .map_err(|e: String| anyhow::anyhow!("question {}: {}", q.id, e))?;
            Ok(Question {
                id: q.id,
                text: q.text,
                question_type,
                points: q.points,
                options: q
                    .options
                    .into_iter()
                    .map(|o| AnswerOption {
                        id: o.id,
                        text: o.text,
                        is_correct: o.correct,
                    })
                    .collect(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Quiz {
        id: parsed.quiz.id,
        title: parsed.quiz.title,
        questions,
        passing_score_percent: parsed.quiz.passing_score_percent,
        duration_minutes: parsed.quiz.duration_minutes,
        max_attempts: parsed.quiz.max_attempts,
        shuffle_questions: parsed.quiz.shuffle_questions,
        state: parsed.quiz.state,
    })
}

/// Parse a single training file.
pub fn parse_training(path: &Path) -> Result<Training> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read training file: {}", path.display()))?;

    parse_training_str(&content, path)
}

/// Parse a training from a TOML string.
///
/// Modules without an explicit `order_index` are numbered by their position
/// in the file, starting at 1.
pub fn parse_training_str(content: &str, source_path: &Path) -> Result<Training> {
    let parsed: TomlTrainingFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let modules = parsed
        .modules
        .into_iter()
        .zip(1u32..)
        .map(|(m, position)| TrainingModule {
            id: m.id,
            title: m.title,
            material_type: m.material_type,
            order_index: m.order_index.unwrap_or(position),
            is_mandatory: m.mandatory,
            quiz_id: m.quiz_id,
        })
        .collect();

    Ok(Training {
        id: parsed.training.id,
        title: parsed.training.title,
        description: parsed.training.description,
        modules,
    })
}

/// Everything found under a definitions directory.
#[derive(Debug, Clone, Default)]
pub struct Definitions {
    pub quizzes: Vec<Quiz>,
    pub trainings: Vec<Training>,
}

impl Definitions {
    pub fn quiz(&self, quiz_id: &str) -> Option<&Quiz> {
        self.quizzes.iter().find(|q| q.id == quiz_id)
    }

    pub fn is_empty(&self) -> bool {
        self.quizzes.is_empty() && self.trainings.is_empty()
    }

    pub fn extend(&mut self, other: Definitions) {
        self.quizzes.extend(other.quizzes);
        self.trainings.extend(other.trainings);
    }
}

/// Recursively load every `.toml` quiz and training file from a directory.
///
/// A file is a quiz if it has a `[quiz]` table and a training if it has a
/// `[training]` table. Anything else, and anything that fails to parse, is
/// skipped with a warning.
pub fn load_definitions_dir(dir: &Path) -> Result<Definitions> {
    let mut definitions = Definitions::default();
    load_into(dir, &mut definitions)?;
    Ok(definitions)
}

fn load_into(dir: &Path, definitions: &mut Definitions) -> Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            load_into(&path, definitions)?;
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match load_definitions_file(&path) {
                Ok(found) => definitions.extend(found),
                Err(e) => tracing::warn!("skipping {}: {:#}", path.display(), e),
            }
        }
    }

    Ok(())
}

/// Load a single definition file, whichever kind it is.
pub fn load_definitions_file(path: &Path) -> Result<Definitions> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read definition file: {}", path.display()))?;
    let table: toml::Table = toml::from_str(&content)
        .with_context(|| format!("failed to parse TOML: {}", path.display()))?;

    let mut definitions = Definitions::default();
    if table.contains_key("quiz") {
        definitions.quizzes.push(parse_quiz_str(&content, path)?);
    } else if table.contains_key("training") {
        definitions.trainings.push(parse_training_str(&content, path)?);
    } else {
        anyhow::bail!(
            "{} is neither a [quiz] nor a [training] definition",
            path.display()
        );
    }
    Ok(definitions)
}

/// A warning from definition validation.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// The quiz or training the warning belongs to.
    pub definition_id: String,
    /// The question or module id (if applicable).
    pub item_id: Option<String>,
    pub message: String,
}

impl ValidationWarning {
    fn new(definition_id: &str, item_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            definition_id: definition_id.to_string(),
            item_id: item_id.map(str::to_string),
            message: message.into(),
        }
    }
}

/// Validate a quiz for authoring mistakes.
///
/// Everything reported here either makes the quiz impossible to publish or
/// is very likely unintended.
pub fn validate_quiz(quiz: &Quiz) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let warn = |item: Option<&str>, message: String| ValidationWarning::new(&quiz.id, item, message);

    // Check for duplicate question IDs
    let mut seen = HashSet::new();
    for question in &quiz.questions {
        if !seen.insert(question.id.as_str()) {
            warnings.push(warn(
                Some(&question.id),
                format!("duplicate question ID: {}", question.id),
            ));
        }
    }

    for question in &quiz.questions {
        let mut options = HashSet::new();
        for option in &question.options {
            if !options.insert(option.id.as_str()) {
                warnings.push(warn(
                    Some(&question.id),
                    format!("duplicate option ID: {}", option.id),
                ));
            }
        }

        let correct = question.options.iter().filter(|o| o.is_correct).count();
        if correct == 0 {
            warnings.push(warn(Some(&question.id), "no option is marked correct".into()));
        } else if question.question_type.is_single_answer() && correct > 1 {
            warnings.push(warn(
                Some(&question.id),
                format!(
                    "{} question has {correct} correct options",
                    question.question_type
                ),
            ));
        }

        if question.question_type == QuestionType::TrueFalse && question.options.len() != 2 {
            warnings.push(warn(
                Some(&question.id),
                format!(
                    "true_false question has {} options",
                    question.options.len()
                ),
            ));
        }
    }

    if quiz.total_points() == 0 {
        warnings.push(warn(None, "quiz has no points to award".into()));
    }
    if quiz.passing_score_percent > 100 {
        warnings.push(warn(
            None,
            format!(
                "passing_score_percent {} is above 100",
                quiz.passing_score_percent
            ),
        ));
    }
    if quiz.duration_minutes == 0 {
        warnings.push(warn(None, "duration_minutes is 0".into()));
    }
    if quiz.max_attempts == Some(0) {
        warnings.push(warn(None, "max_attempts is 0; nobody can take this quiz".into()));
    }

    warnings
}

/// Validate a training for authoring mistakes.
pub fn validate_training(training: &Training) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let warn =
        |item: Option<&str>, message: String| ValidationWarning::new(&training.id, item, message);

    let mut seen_ids = HashSet::new();
    let mut seen_order = HashSet::new();
    for module in &training.modules {
        if !seen_ids.insert(module.id.as_str()) {
            warnings.push(warn(
                Some(&module.id),
                format!("duplicate module ID: {}", module.id),
            ));
        }
        if !seen_order.insert(module.order_index) {
            warnings.push(warn(
                Some(&module.id),
                format!("duplicate order_index: {}", module.order_index),
            ));
        }

        match (module.is_quiz(), &module.quiz_id) {
            (true, None) => {
                warnings.push(warn(Some(&module.id), "quiz module has no quiz_id".into()));
            }
            (false, Some(quiz_id)) => warnings.push(warn(
                Some(&module.id),
                format!(
                    "{} module carries quiz_id {quiz_id}, which is ignored",
                    module.material_type
                ),
            )),
            _ => {}
        }
    }

    if training.modules.is_empty() {
        warnings.push(warn(None, "training has no modules".into()));
    } else if !training.modules.iter().any(|m| m.is_mandatory) {
        warnings.push(warn(
            None,
            "no module is mandatory; every module will be required".into(),
        ));
    }

    warnings
}
