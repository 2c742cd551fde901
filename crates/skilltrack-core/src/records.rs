//! Runtime records: attempts, quiz assignments and training assignments.
//!
//! These are the mutable, persisted side of the engine. Every record is
//! stored behind a [`crate::traits::Repository`] with a version number so
//! concurrent writers are detected instead of silently overwriting each
//! other.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AttemptLimitReason, EngineError, EngineResult};
use crate::model::{MaterialType, Quiz, Training};
use crate::normalizer::AnswerSheet;
use crate::scoring::AttemptResult;

// ---------------------------------------------------------------------------
// Quiz attempts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Submitted,
}

/// What closed an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    Manual,
    Timeout,
}

/// One timed pass at a quiz.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAttempt {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub learner_id: Uuid,
    /// The quiz exactly as it was when the attempt started.
    pub quiz: Quiz,
    pub started_at: DateTime<Utc>,
    /// Copied from the quiz at start so later edits cannot move the deadline.
    pub duration_minutes: u32,
    /// Presentation order of question ids.
    pub question_order: Vec<String>,
    /// Answers recorded so far (autosave) or submitted.
    #[serde(default)]
    pub answers: AnswerSheet,
    pub status: AttemptStatus,
    #[serde(default)]
    pub result: Option<AttemptResult>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub submission: Option<SubmissionKind>,
}

impl QuizAttempt {
    pub fn deadline(&self) -> DateTime<Utc> {
        self.started_at + Duration::minutes(i64::from(self.duration_minutes))
    }

    /// Time left before the deadline, never negative.
    ///
    /// Derived from the stored start time so a reloaded session sees the
    /// same countdown as the one it lost.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.deadline() - now).max(Duration::zero())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline()
    }

    pub fn is_submitted(&self) -> bool {
        self.status == AttemptStatus::Submitted
    }
}

// ---------------------------------------------------------------------------
// Quiz assignments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizAssignmentStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for QuizAssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuizAssignmentStatus::NotStarted => write!(f, "not_started"),
            QuizAssignmentStatus::InProgress => write!(f, "in_progress"),
            QuizAssignmentStatus::Completed => write!(f, "completed"),
            QuizAssignmentStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Ties a quiz assignment to the training module it backs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleLink {
    pub training_assignment_id: Uuid,
    pub module_id: String,
}

/// Graded attempt as remembered by its assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub attempt_id: Uuid,
    pub score_percent: u8,
    pub passed: bool,
}

/// A learner's assignment to one quiz, standalone or backing a module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAssignment {
    pub id: Uuid,
    pub learner_id: Uuid,
    pub quiz_id: String,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    pub attempts_used: u32,
    pub best_score: u8,
    pub passed: bool,
    pub status: QuizAssignmentStatus,
    /// The attempt currently in progress, if any.
    #[serde(default)]
    pub active_attempt: Option<Uuid>,
    #[serde(default)]
    pub history: Vec<AttemptSummary>,
    #[serde(default)]
    pub module: Option<ModuleLink>,
}

impl QuizAssignment {
    pub fn new(learner_id: Uuid, quiz_id: &str, due_date: Option<DateTime<Utc>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            learner_id,
            quiz_id: quiz_id.to_string(),
            due_date,
            attempts_used: 0,
            best_score: 0,
            passed: false,
            status: QuizAssignmentStatus::NotStarted,
            active_attempt: None,
            history: Vec::new(),
            module: None,
        }
    }

    pub fn linked_to(mut self, link: ModuleLink) -> Self {
        self.module = Some(link);
        self
    }

    /// Fail with [`EngineError::AttemptLimitExceeded`] unless a new attempt
    /// may start.
    pub fn check_can_start(&self, max_attempts: Option<u32>) -> EngineResult<()> {
        if let Some(attempt_id) = self.active_attempt {
            return Err(EngineError::AttemptLimitExceeded {
                assignment_id: self.id,
                reason: AttemptLimitReason::AlreadyInProgress { attempt_id },
            });
        }
        if let Some(max) = max_attempts {
            if self.attempts_used >= max {
                return Err(EngineError::AttemptLimitExceeded {
                    assignment_id: self.id,
                    reason: AttemptLimitReason::Exhausted {
                        used: self.attempts_used,
                        max,
                    },
                });
            }
        }
        Ok(())
    }

    /// Mark `attempt_id` as the in-progress attempt.
    pub fn begin_attempt(&mut self, attempt_id: Uuid) {
        self.active_attempt = Some(attempt_id);
        if self.status == QuizAssignmentStatus::NotStarted {
            self.status = QuizAssignmentStatus::InProgress;
        }
    }

    /// Fold a graded attempt into the assignment.
    ///
    /// Returns `false` without touching anything when the attempt was
    /// already recorded, so replaying a submission never counts twice.
    pub fn record_result(
        &mut self,
        attempt_id: Uuid,
        result: &AttemptResult,
        max_attempts: Option<u32>,
    ) -> bool {
        if self.history.iter().any(|h| h.attempt_id == attempt_id) {
            return false;
        }

        self.attempts_used += 1;
        self.best_score = self.best_score.max(result.score_percent);
        self.passed |= result.passed;
        self.history.push(AttemptSummary {
            attempt_id,
            score_percent: result.score_percent,
            passed: result.passed,
        });
        if self.active_attempt == Some(attempt_id) {
            self.active_attempt = None;
        }

        self.status = if self.passed {
            QuizAssignmentStatus::Completed
        } else if max_attempts.is_some_and(|max| self.attempts_used >= max) {
            QuizAssignmentStatus::Failed
        } else {
            QuizAssignmentStatus::InProgress
        };
        true
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status != QuizAssignmentStatus::Completed && self.due_date.is_some_and(|due| now > due)
    }
}

// ---------------------------------------------------------------------------
// Training assignments
// ---------------------------------------------------------------------------

/// Progress through a module or a whole training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressStatus::NotStarted => write!(f, "not_started"),
            ProgressStatus::InProgress => write!(f, "in_progress"),
            ProgressStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Progress of one module within a training assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleProgress {
    pub id: Uuid,
    pub module_id: String,
    pub material_type: MaterialType,
    pub is_mandatory: bool,
    pub status: ProgressStatus,
    /// Linked quiz assignment for QUIZ modules.
    #[serde(default)]
    pub quiz_assignment_id: Option<Uuid>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ModuleProgress {
    pub fn is_quiz(&self) -> bool {
        self.material_type == MaterialType::Quiz
    }
}

/// Certificate bookkeeping for a training assignment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CertificateState {
    #[default]
    NotRequested,
    /// Requested on the completion edge, not yet confirmed by the issuer.
    Pending { requested_at: DateTime<Utc> },
    Issued {
        certificate_id: String,
        issued_at: DateTime<Utc>,
    },
}

/// A learner's assignment to a training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingAssignment {
    pub id: Uuid,
    pub learner_id: Uuid,
    pub training_id: String,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    pub status: ProgressStatus,
    /// One row per module, in display order.
    pub modules: Vec<ModuleProgress>,
    pub completed_module_count: usize,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub certificate: CertificateState,
}

impl TrainingAssignment {
    /// A fresh assignment with every module NOT_STARTED.
    pub fn new(learner_id: Uuid, training: &Training, due_date: Option<DateTime<Utc>>) -> Self {
        let modules = training
            .ordered_modules()
            .into_iter()
            .map(|m| ModuleProgress {
                id: Uuid::new_v4(),
                module_id: m.id.clone(),
                material_type: m.material_type,
                is_mandatory: m.is_mandatory,
                status: ProgressStatus::NotStarted,
                quiz_assignment_id: None,
                completed_at: None,
            })
            .collect();

        Self {
            id: Uuid::new_v4(),
            learner_id,
            training_id: training.id.clone(),
            due_date,
            status: ProgressStatus::NotStarted,
            modules,
            completed_module_count: 0,
            completed_at: None,
            certificate: CertificateState::NotRequested,
        }
    }

    pub fn module(&self, module_id: &str) -> Option<&ModuleProgress> {
        self.modules.iter().find(|m| m.module_id == module_id)
    }

    pub fn module_mut(&mut self, module_id: &str) -> EngineResult<&mut ModuleProgress> {
        let assignment_id = self.id;
        self.modules
            .iter_mut()
            .find(|m| m.module_id == module_id)
            .ok_or_else(|| {
                EngineError::not_found("module", format!("{module_id} in assignment {assignment_id}"))
            })
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status != ProgressStatus::Completed && self.due_date.is_some_and(|due| now > due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::QuestionGrade;

    fn result(score: u8, passed: bool) -> AttemptResult {
        AttemptResult {
            earned_points: u64::from(score),
            total_points: 100,
            score_percent: score,
            passing_score_percent: 70,
            passed,
            questions: vec![QuestionGrade {
                question_id: "q1".into(),
                is_correct: passed,
                earned_points: u32::from(score),
                possible_points: 100,
            }],
        }
    }

    #[test]
    fn recording_the_same_attempt_twice_counts_once() {
        let mut assignment = QuizAssignment::new(Uuid::new_v4(), "quiz", None);
        let attempt = Uuid::new_v4();
        assignment.begin_attempt(attempt);
        assert!(assignment.record_result(attempt, &result(40, false), Some(3)));
        assert!(!assignment.record_result(attempt, &result(40, false), Some(3)));
        assert_eq!(assignment.attempts_used, 1);
        assert_eq!(assignment.active_attempt, None);
        assert_eq!(assignment.status, QuizAssignmentStatus::InProgress);
    }

    #[test]
    fn best_score_never_decreases() {
        let mut assignment = QuizAssignment::new(Uuid::new_v4(), "quiz", None);
        for score in [50, 80, 30] {
            assignment.record_result(Uuid::new_v4(), &result(score, score >= 70), None);
        }
        assert_eq!(assignment.best_score, 80);
        assert!(assignment.passed);
        assert_eq!(assignment.status, QuizAssignmentStatus::Completed);
    }

    #[test]
    fn exhausting_attempts_without_pass_fails() {
        let mut assignment = QuizAssignment::new(Uuid::new_v4(), "quiz", None);
        assignment.record_result(Uuid::new_v4(), &result(10, false), Some(2));
        assert_eq!(assignment.status, QuizAssignmentStatus::InProgress);
        assignment.record_result(Uuid::new_v4(), &result(20, false), Some(2));
        assert_eq!(assignment.status, QuizAssignmentStatus::Failed);

        let err = assignment.check_can_start(Some(2)).unwrap_err();
        assert!(matches!(
            err,
            EngineError::AttemptLimitExceeded {
                reason: AttemptLimitReason::Exhausted { used: 2, max: 2 },
                ..
            }
        ));
    }

    #[test]
    fn active_attempt_blocks_a_second_start() {
        let mut assignment = QuizAssignment::new(Uuid::new_v4(), "quiz", None);
        let attempt = Uuid::new_v4();
        assignment.begin_attempt(attempt);
        let err = assignment.check_can_start(None).unwrap_err();
        assert!(err.to_string().contains("still in progress"));
    }

    #[test]
    fn time_remaining_is_derived_and_clamped() {
        let started_at = Utc::now();
        let attempt = QuizAttempt {
            id: Uuid::new_v4(),
            assignment_id: Uuid::new_v4(),
            learner_id: Uuid::new_v4(),
            quiz: crate::model::fixtures::quiz(vec![], 50),
            started_at,
            duration_minutes: 2,
            question_order: vec![],
            answers: AnswerSheet::default(),
            status: AttemptStatus::InProgress,
            result: None,
            submitted_at: None,
            submission: None,
        };
        assert_eq!(
            attempt.time_remaining(started_at + Duration::seconds(30)),
            Duration::seconds(90)
        );
        assert_eq!(
            attempt.time_remaining(started_at + Duration::minutes(5)),
            Duration::zero()
        );
        assert!(attempt.is_expired(started_at + Duration::minutes(2)));
    }

    #[test]
    fn overdue_ignores_completed_assignments() {
        let now = Utc::now();
        let mut assignment =
            QuizAssignment::new(Uuid::new_v4(), "quiz", Some(now - Duration::days(1)));
        assert!(assignment.is_overdue(now));
        assignment.status = QuizAssignmentStatus::Completed;
        assert!(!assignment.is_overdue(now));
    }
}
