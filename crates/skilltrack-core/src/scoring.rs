//! Scoring engine.
//!
//! Grading is all-or-nothing per question: the selected set must equal the
//! set of correct options exactly. Subsets, supersets and blanks earn zero
//! points. There is no partial credit.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::model::{Question, Quiz};
use crate::normalizer::AnswerSheet;

/// Outcome of grading one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionGrade {
    pub question_id: String,
    pub is_correct: bool,
    pub earned_points: u32,
    pub possible_points: u32,
}

/// Outcome of grading a whole attempt. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptResult {
    pub earned_points: u64,
    pub total_points: u64,
    /// `round(100 * earned / total)`, half rounding up.
    pub score_percent: u8,
    pub passing_score_percent: u8,
    pub passed: bool,
    /// One entry per quiz question, in quiz order.
    pub questions: Vec<QuestionGrade>,
}

impl AttemptResult {
    pub fn correct_count(&self) -> usize {
        self.questions.iter().filter(|q| q.is_correct).count()
    }
}

/// Grade a single question against its answer key.
pub fn grade_question(question: &Question, selected: &BTreeSet<String>) -> QuestionGrade {
    let correct = question.correct_set();
    let is_correct = !correct.is_empty()
        && selected.len() == correct.len()
        && selected.iter().all(|id| correct.contains(id.as_str()));

    QuestionGrade {
        question_id: question.id.clone(),
        is_correct,
        earned_points: if is_correct { question.points } else { 0 },
        possible_points: question.points,
    }
}

/// Grade every question of `quiz` against `answers`.
///
/// The quiz invariants are re-checked first, so an ungradeable quiz fails
/// with [`crate::error::EngineError::InvalidQuiz`] instead of producing a
/// meaningless score. Pure: the same inputs always yield the same result.
pub fn grade_attempt(quiz: &Quiz, answers: &AnswerSheet) -> EngineResult<AttemptResult> {
    quiz.check_gradeable()?;

    let questions: Vec<QuestionGrade> = quiz
        .questions
        .iter()
        .map(|q| grade_question(q, answers.selected(&q.id)))
        .collect();

    let total_points = quiz.total_points();
    let earned_points: u64 = questions.iter().map(|g| u64::from(g.earned_points)).sum();
    let score_percent = percent_rounded(earned_points, total_points);

    Ok(AttemptResult {
        earned_points,
        total_points,
        score_percent,
        passing_score_percent: quiz.passing_score_percent,
        passed: score_percent >= quiz.passing_score_percent,
        questions,
    })
}

/// Integer percentage with half-up rounding. `total` must be non-zero.
fn percent_rounded(earned: u64, total: u64) -> u8 {
    let percent = (200 * earned + total) / (2 * total);
    percent.min(100) as u8
}
