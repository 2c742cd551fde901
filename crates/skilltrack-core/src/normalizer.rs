//! Answer normalization.
//!
//! Learners submit either a single option id or a list of ids per question.
//! The normalizer turns that into one canonical set of option ids per
//! question, rejecting references to questions or options the quiz does not
//! have.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::model::Quiz;

/// A learner's raw selection for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawSelection {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for RawSelection {
    fn from(id: &str) -> Self {
        RawSelection::One(id.to_string())
    }
}

impl From<Vec<&str>> for RawSelection {
    fn from(ids: Vec<&str>) -> Self {
        RawSelection::Many(ids.into_iter().map(String::from).collect())
    }
}

/// Raw selections keyed by question id.
pub type RawAnswers = BTreeMap<String, RawSelection>;

static NO_SELECTION: BTreeSet<String> = BTreeSet::new();

/// Canonical answers: question id to the set of selected option ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerSheet(BTreeMap<String, BTreeSet<String>>);

impl AnswerSheet {
    /// Selected option ids for a question; empty when unanswered.
    pub fn selected(&self, question_id: &str) -> &BTreeSet<String> {
        self.0.get(question_id).unwrap_or(&NO_SELECTION)
    }

    /// Number of questions with at least one selected option.
    pub fn answered_count(&self) -> usize {
        self.0.values().filter(|s| !s.is_empty()).count()
    }

    /// Overwrite this sheet's entries with every entry of `newer`.
    pub fn merge(&mut self, newer: AnswerSheet) {
        self.0.extend(newer.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.0.iter()
    }
}

/// Normalize only the questions present in `raw`.
///
/// Used for autosaving partial progress. Rejects the whole input with
/// [`EngineError::InvalidAnswer`] on the first unknown question or option.
pub fn normalize_partial(quiz: &Quiz, raw: &RawAnswers) -> EngineResult<AnswerSheet> {
    let mut sheet = BTreeMap::new();

    for (question_id, selection) in raw {
        let question = quiz.question(question_id).ok_or_else(|| {
            EngineError::InvalidAnswer(format!(
                "question {question_id} is not part of quiz {}",
                quiz.id
            ))
        })?;

        let selected: BTreeSet<String> = match selection {
            RawSelection::One(id) => BTreeSet::from([id.clone()]),
            RawSelection::Many(ids) => ids.iter().cloned().collect(),
        };

        if let Some(unknown) = selected.iter().find(|id| !question.has_option(id)) {
            return Err(EngineError::InvalidAnswer(format!(
                "option {unknown} is not part of question {question_id}"
            )));
        }

        sheet.insert(question_id.clone(), selected);
    }

    Ok(AnswerSheet(sheet))
}

/// Normalize a full submission: every quiz question gets an entry, empty
/// when the learner left it unanswered.
pub fn normalize(quiz: &Quiz, raw: &RawAnswers) -> EngineResult<AnswerSheet> {
    Ok(complete_sheet(quiz, normalize_partial(quiz, raw)?))
}

/// Fill in empty entries for questions missing from an already-normalized
/// sheet.
pub fn complete_sheet(quiz: &Quiz, mut sheet: AnswerSheet) -> AnswerSheet {
    for question in &quiz.questions {
        sheet.0.entry(question.id.clone()).or_default();
    }
    sheet
}
