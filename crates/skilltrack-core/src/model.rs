//! Quiz and training definitions.
//!
//! These are the authored, read-only types: quizzes with their answer keys
//! and trainings with their ordered modules. Runtime state (attempts,
//! assignments, module progress) lives in [`crate::records`].

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// How a question's options are meant to be selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    MultipleChoice,
    TrueFalse,
}

impl QuestionType {
    /// Single-answer questions take exactly one correct option.
    pub fn is_single_answer(self) -> bool {
        matches!(self, QuestionType::SingleChoice | QuestionType::TrueFalse)
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionType::SingleChoice => write!(f, "single_choice"),
            QuestionType::MultipleChoice => write!(f, "multiple_choice"),
            QuestionType::TrueFalse => write!(f, "true_false"),
        }
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "single_choice" | "single" => Ok(QuestionType::SingleChoice),
            "multiple_choice" | "multi" | "multiple" => Ok(QuestionType::MultipleChoice),
            "true_false" | "bool" | "boolean" => Ok(QuestionType::TrueFalse),
            other => Err(format!("unknown question type: {other}")),
        }
    }
}

/// One selectable answer of a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub id: String,
    pub text: String,
    /// Whether selecting this option is part of the correct answer.
    #[serde(default)]
    pub is_correct: bool,
}

/// A single quiz question together with its answer key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    /// Weight of the question. Defaults to 1.
    #[serde(default = "default_points")]
    pub points: u32,
    pub options: Vec<AnswerOption>,
}

impl Question {
    /// Ids of every option flagged correct.
    pub fn correct_set(&self) -> BTreeSet<&str> {
        self.options
            .iter()
            .filter(|o| o.is_correct)
            .map(|o| o.id.as_str())
            .collect()
    }

    pub fn has_option(&self, option_id: &str) -> bool {
        self.options.iter().any(|o| o.id == option_id)
    }
}

fn default_points() -> u32 {
    1
}

/// Publication state of a quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizState {
    #[default]
    Draft,
    Published,
}

/// A gradeable quiz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub questions: Vec<Question>,
    /// Minimum score, in percent, for an attempt to pass.
    pub passing_score_percent: u8,
    pub duration_minutes: u32,
    /// `None` means unlimited attempts.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub shuffle_questions: bool,
    #[serde(default)]
    pub state: QuizState,
}

impl Quiz {
    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    /// Sum of every question's points.
    pub fn total_points(&self) -> u64 {
        self.questions.iter().map(|q| u64::from(q.points)).sum()
    }

    pub fn is_published(&self) -> bool {
        self.state == QuizState::Published
    }

    /// Check the invariants grading relies on.
    ///
    /// Fails with [`EngineError::InvalidQuiz`] when the quiz has no points to
    /// award, ids repeat within the quiz or a question, or a question's
    /// answer key is empty (or holds several keys for a single-answer type).
    pub fn check_gradeable(&self) -> EngineResult<()> {
        if self.total_points() == 0 {
            return Err(EngineError::invalid_quiz(
                &self.id,
                "quiz has no scored questions",
            ));
        }
        if self.passing_score_percent > 100 {
            return Err(EngineError::invalid_quiz(
                &self.id,
                format!(
                    "passing score {}% is above 100%",
                    self.passing_score_percent
                ),
            ));
        }
        if self.duration_minutes == 0 {
            return Err(EngineError::invalid_quiz(&self.id, "duration must be positive"));
        }
        if self.max_attempts == Some(0) {
            return Err(EngineError::invalid_quiz(
                &self.id,
                "max_attempts must be positive",
            ));
        }
        let mut question_ids = BTreeSet::new();
        for question in &self.questions {
            if !question_ids.insert(question.id.as_str()) {
                return Err(EngineError::invalid_quiz(
                    &self.id,
                    format!("duplicate question id {}", question.id),
                ));
            }
            let mut option_ids = BTreeSet::new();
            if let Some(option) = question
                .options
                .iter()
                .find(|option| !option_ids.insert(option.id.as_str()))
            {
                return Err(EngineError::invalid_quiz(
                    &self.id,
                    format!("question {} repeats option id {}", question.id, option.id),
                ));
            }

            let correct = question.correct_set().len();
            if correct == 0 {
                return Err(EngineError::invalid_quiz(
                    &self.id,
                    format!("question {} has no correct option", question.id),
                ));
            }
            if question.question_type.is_single_answer() && correct != 1 {
                return Err(EngineError::invalid_quiz(
                    &self.id,
                    format!(
                        "{} question {} has {correct} correct options",
                        question.question_type, question.id
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Kind of learning material a module presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialType {
    Video,
    Document,
    Link,
    Quiz,
    Assignment,
}

impl fmt::Display for MaterialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaterialType::Video => write!(f, "video"),
            MaterialType::Document => write!(f, "document"),
            MaterialType::Link => write!(f, "link"),
            MaterialType::Quiz => write!(f, "quiz"),
            MaterialType::Assignment => write!(f, "assignment"),
        }
    }
}

/// One step of a training.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingModule {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub material_type: MaterialType,
    /// Display order within the training. Not a prerequisite gate.
    pub order_index: u32,
    #[serde(default)]
    pub is_mandatory: bool,
    /// Backing quiz; only meaningful for [`MaterialType::Quiz`].
    #[serde(default)]
    pub quiz_id: Option<String>,
}

impl TrainingModule {
    pub fn is_quiz(&self) -> bool {
        self.material_type == MaterialType::Quiz
    }
}

/// A training: an ordered set of modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Training {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub modules: Vec<TrainingModule>,
}

impl Training {
    pub fn module(&self, module_id: &str) -> Option<&TrainingModule> {
        self.modules.iter().find(|m| m.id == module_id)
    }

    /// Modules sorted by `order_index`.
    pub fn ordered_modules(&self) -> Vec<&TrainingModule> {
        let mut modules: Vec<&TrainingModule> = self.modules.iter().collect();
        modules.sort_by_key(|m| m.order_index);
        modules
    }
}
