//! Attempt lifecycle controller.
//!
//! An attempt is IN_PROGRESS from `start` until exactly one submission wins
//! the compare-and-set on its stored version. Manual submits, timeout
//! auto-submits and the overdue sweep all race through the same
//! [`AttemptController::close`] path; the losers observe SUBMITTED and get
//! the stored result back.
//!
//! The countdown is never stored. Time remaining is always
//! `started_at + duration - now`, read from the injected clock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use tokio::task::{AbortHandle, JoinHandle};
use uuid::Uuid;

use crate::clock::Clock;
use crate::engine::EngineSettings;
use crate::error::{EngineError, EngineResult};
use crate::model::Quiz;
use crate::normalizer::{complete_sheet, normalize_partial, RawAnswers};
use crate::progress::ProgressService;
use crate::records::{AttemptStatus, QuizAssignment, QuizAttempt, SubmissionKind};
use crate::scoring::{grade_attempt, AttemptResult};
use crate::traits::{DefinitionStore, Repository, Versioned};

/// Outcome of a submission request.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub attempt_id: Uuid,
    pub result: AttemptResult,
    pub kind: SubmissionKind,
    /// `false` when the attempt had already been submitted and the stored
    /// result was returned.
    pub newly_submitted: bool,
}

/// How an attempt is being closed.
enum Closing<'a> {
    Manual(&'a RawAnswers),
    Timeout,
}

/// Handle to a scheduled auto-submit.
pub struct TimeoutHandle {
    attempt_id: Uuid,
    handle: JoinHandle<EngineResult<Option<SubmitOutcome>>>,
}

impl TimeoutHandle {
    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Wait for the timer to fire. `None` if it was cancelled or failed.
    pub async fn join(self) -> Option<SubmitOutcome> {
        match self.handle.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::warn!(attempt_id = %self.attempt_id, "auto-submit failed: {e}");
                None
            }
            Err(_) => None,
        }
    }
}

/// Owns the state machine of quiz attempts.
pub struct AttemptController {
    definitions: Arc<dyn DefinitionStore>,
    attempts: Arc<dyn Repository<QuizAttempt>>,
    assignments: Arc<dyn Repository<QuizAssignment>>,
    progress: Arc<ProgressService>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    timers: Mutex<HashMap<Uuid, AbortHandle>>,
}

impl AttemptController {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        attempts: Arc<dyn Repository<QuizAttempt>>,
        assignments: Arc<dyn Repository<QuizAssignment>>,
        progress: Arc<ProgressService>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            definitions,
            attempts,
            assignments,
            progress,
            clock,
            settings,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Start a new attempt on a quiz assignment.
    ///
    /// Fails with [`EngineError::AttemptLimitExceeded`] when attempts are
    /// used up or another attempt is still running; nothing is written in
    /// that case.
    pub async fn start(&self, assignment_id: Uuid) -> EngineResult<QuizAttempt> {
        let mut last_conflict = None;

        for retry in 0..=self.settings.max_cas_retries {
            let stored = self.assignments.get(assignment_id).await?;
            let mut assignment = stored.value;

            let quiz = self.definitions.quiz(&assignment.quiz_id).await?;
            if !quiz.is_published() {
                return Err(EngineError::InvalidQuiz {
                    quiz_id: quiz.id.clone(),
                    reason: "quiz is not published".into(),
                });
            }
            quiz.check_gradeable()?;
            assignment.check_can_start(quiz.max_attempts)?;

            let attempt_id = Uuid::new_v4();
            assignment.begin_attempt(attempt_id);
            let link = assignment.module.clone();
            let learner_id = assignment.learner_id;

            match self.assignments.update(stored.version, assignment).await {
                Ok(_) => {
                    let now = self.clock.now();
                    let attempt = QuizAttempt {
                        id: attempt_id,
                        assignment_id,
                        learner_id,
                        question_order: question_order(&quiz, attempt_id),
                        quiz: (*quiz).clone(),
                        started_at: now,
                        duration_minutes: quiz.duration_minutes,
                        answers: Default::default(),
                        status: AttemptStatus::InProgress,
                        result: None,
                        submitted_at: None,
                        submission: None,
                    };
                    let attempt = self.attempts.insert(attempt).await?.value;
                    tracing::info!(
                        %attempt_id,
                        %assignment_id,
                        quiz_id = %attempt.quiz.id,
                        deadline = %attempt.deadline(),
                        "attempt started"
                    );

                    if let Some(link) = link {
                        if let Err(e) = self
                            .progress
                            .start_module(link.training_assignment_id, &link.module_id)
                            .await
                        {
                            tracing::warn!(
                                %attempt_id,
                                module_id = %link.module_id,
                                "could not mark quiz module started: {e}"
                            );
                        }
                    }
                    return Ok(attempt);
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(%assignment_id, retry, "attempt start conflicted: {e}");
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_conflict.unwrap_or_else(|| EngineError::Storage("start never attempted".into())))
    }

    /// Autosave answers while the attempt is running.
    pub async fn record_answers(
        &self,
        attempt_id: Uuid,
        raw: &RawAnswers,
    ) -> EngineResult<QuizAttempt> {
        let mut last_conflict = None;

        for _ in 0..=self.settings.max_cas_retries {
            let stored = self.attempts.get(attempt_id).await?;
            let mut attempt = stored.value;
            if attempt.is_submitted() || self.is_past_deadline(&attempt, self.clock.now()) {
                return Err(EngineError::InvalidTransition {
                    entity: "quiz attempt",
                    id: attempt_id.to_string(),
                    reason: "answers can only be recorded while the attempt is running".into(),
                });
            }

            let sheet = normalize_partial(&attempt.quiz, raw)?;
            attempt.answers.merge(sheet);

            match self.attempts.update(stored.version, attempt).await {
                Ok(saved) => return Ok(saved.value),
                Err(e) if e.is_retryable() => last_conflict = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_conflict.unwrap_or_else(|| EngineError::Storage("autosave never attempted".into())))
    }

    pub async fn attempt(&self, attempt_id: Uuid) -> EngineResult<QuizAttempt> {
        Ok(self.attempts.get(attempt_id).await?.value)
    }

    /// Remaining time on the countdown; zero once the deadline has passed or
    /// the attempt is submitted.
    pub async fn time_remaining(&self, attempt_id: Uuid) -> EngineResult<chrono::Duration> {
        let attempt = self.attempts.get(attempt_id).await?.value;
        if attempt.is_submitted() {
            return Ok(chrono::Duration::zero());
        }
        Ok(attempt.time_remaining(self.clock.now()))
    }

    /// Learner submits the attempt.
    ///
    /// Idempotent: submitting an already-submitted attempt returns the
    /// stored result. A submit that arrives after the deadline is graded as
    /// the timeout submission, using only the answers recorded in time.
    pub async fn submit(&self, attempt_id: Uuid, raw: &RawAnswers) -> EngineResult<SubmitOutcome> {
        let outcome = self.close(attempt_id, Closing::Manual(raw)).await?;
        self.cancel_timer(attempt_id);
        Ok(outcome)
    }

    /// Force submission if the attempt's deadline has passed.
    ///
    /// Returns `None` while time remains.
    pub async fn auto_submit_on_timeout(
        &self,
        attempt_id: Uuid,
    ) -> EngineResult<Option<SubmitOutcome>> {
        let attempt = self.attempts.get(attempt_id).await?.value;
        if !attempt.is_submitted() && !self.is_past_deadline(&attempt, self.clock.now()) {
            return Ok(None);
        }
        self.close(attempt_id, Closing::Timeout).await.map(Some)
    }

    /// Auto-submit every running attempt whose deadline has passed.
    ///
    /// Recovers attempts whose timer did not survive a restart.
    pub async fn expire_overdue(&self) -> EngineResult<Vec<SubmitOutcome>> {
        let now = self.clock.now();
        let overdue: Vec<Uuid> = self
            .attempts
            .list()
            .await?
            .into_iter()
            .filter(|a| !a.value.is_submitted() && self.is_past_deadline(&a.value, now))
            .map(|a| a.value.id)
            .collect();

        let results = futures::future::join_all(
            overdue
                .iter()
                .map(|id| self.close(*id, Closing::Timeout)),
        )
        .await;

        let mut outcomes = Vec::with_capacity(results.len());
        for result in results {
            outcomes.push(result?);
        }
        if !outcomes.is_empty() {
            tracing::info!(count = outcomes.len(), "expired overdue attempts");
        }
        Ok(outcomes)
    }

    /// Schedule the auto-submit for `attempt` at its deadline.
    ///
    /// The timer sleeps until the clock says the deadline has passed, then
    /// goes through [`Self::auto_submit_on_timeout`]. Cancelled by a manual
    /// submit; firing after a submit won the race is a harmless no-op.
    pub fn schedule_timeout(self: &Arc<Self>, attempt: &QuizAttempt) -> TimeoutHandle {
        let controller = Arc::clone(self);
        let attempt_id = attempt.id;
        let deadline = self.effective_deadline(attempt);

        let handle = tokio::spawn(async move {
            loop {
                let remaining = (deadline - controller.clock.now())
                    .to_std()
                    .unwrap_or_default();
                if remaining.is_zero() {
                    break;
                }
                tokio::time::sleep(remaining).await;
            }
            controller.forget_timer(attempt_id);
            controller.auto_submit_on_timeout(attempt_id).await
        });

        self.timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(attempt_id, handle.abort_handle());
        tracing::debug!(%attempt_id, %deadline, "auto-submit scheduled");

        TimeoutHandle { attempt_id, handle }
    }

    fn effective_deadline(&self, attempt: &QuizAttempt) -> DateTime<Utc> {
        let grace = chrono::Duration::from_std(self.settings.auto_submit_grace)
            .unwrap_or_else(|_| chrono::Duration::zero());
        attempt.deadline() + grace
    }

    fn is_past_deadline(&self, attempt: &QuizAttempt, now: DateTime<Utc>) -> bool {
        now >= self.effective_deadline(attempt)
    }

    fn cancel_timer(&self, attempt_id: Uuid) {
        let timer = self
            .timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&attempt_id);
        if let Some(timer) = timer {
            timer.abort();
            tracing::debug!(%attempt_id, "auto-submit cancelled");
        }
    }

    fn forget_timer(&self, attempt_id: Uuid) {
        self.timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&attempt_id);
    }

    /// The single submission path. The versioned write on the attempt is the
    /// check-and-set: whoever loses reloads, sees SUBMITTED, and returns the
    /// winner's result.
    async fn close(&self, attempt_id: Uuid, closing: Closing<'_>) -> EngineResult<SubmitOutcome> {
        let mut last_conflict = None;

        for retry in 0..=self.settings.max_cas_retries {
            let stored = self.attempts.get(attempt_id).await?;
            if stored.value.is_submitted() {
                return self.reconcile(stored.value, false).await;
            }

            let Versioned {
                version,
                value: mut attempt,
            } = stored;
            let now = self.clock.now();

            let kind = match &closing {
                Closing::Manual(raw) if !self.is_past_deadline(&attempt, now) => {
                    let supplied = normalize_partial(&attempt.quiz, raw)?;
                    attempt.answers.merge(supplied);
                    SubmissionKind::Manual
                }
                _ => SubmissionKind::Timeout,
            };

            let answers = complete_sheet(&attempt.quiz, std::mem::take(&mut attempt.answers));
            let result = grade_attempt(&attempt.quiz, &answers)?;

            attempt.answers = answers;
            attempt.status = AttemptStatus::Submitted;
            attempt.result = Some(result);
            attempt.submitted_at = Some(now);
            attempt.submission = Some(kind);

            match self.attempts.update(version, attempt).await {
                Ok(saved) => return self.reconcile(saved.value, true).await,
                Err(e) if e.is_retryable() => {
                    tracing::debug!(%attempt_id, retry, "submission raced: {e}");
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_conflict.unwrap_or_else(|| EngineError::Storage("submit never attempted".into())))
    }

    /// Propagate a submitted attempt to its assignment and, for module
    /// quizzes, to the training. Safe to repeat: the assignment ignores
    /// attempts it has already counted and module completion is terminal.
    async fn reconcile(
        &self,
        attempt: QuizAttempt,
        newly_submitted: bool,
    ) -> EngineResult<SubmitOutcome> {
        let result = attempt.result.clone().ok_or_else(|| {
            EngineError::Storage(format!("submitted attempt {} has no result", attempt.id))
        })?;
        let kind = attempt.submission.unwrap_or(SubmissionKind::Manual);

        let link = self.record_on_assignment(&attempt, &result).await?;
        if let Some(link) = link {
            self.progress
                .complete_via_quiz(link.training_assignment_id, &link.module_id, &result)
                .await?;
        }

        if newly_submitted {
            tracing::info!(
                attempt_id = %attempt.id,
                assignment_id = %attempt.assignment_id,
                score = result.score_percent,
                passed = result.passed,
                kind = ?kind,
                "attempt submitted"
            );
        }

        Ok(SubmitOutcome {
            attempt_id: attempt.id,
            result,
            kind,
            newly_submitted,
        })
    }

    async fn record_on_assignment(
        &self,
        attempt: &QuizAttempt,
        result: &AttemptResult,
    ) -> EngineResult<Option<crate::records::ModuleLink>> {
        let mut last_conflict = None;

        for _ in 0..=self.settings.max_cas_retries {
            let stored = self.assignments.get(attempt.assignment_id).await?;
            let mut assignment = stored.value;
            if !assignment.record_result(attempt.id, result, attempt.quiz.max_attempts) {
                return Ok(assignment.module);
            }
            let link = assignment.module.clone();
            match self.assignments.update(stored.version, assignment).await {
                Ok(saved) => {
                    tracing::debug!(
                        assignment_id = %saved.value.id,
                        attempts_used = saved.value.attempts_used,
                        best_score = saved.value.best_score,
                        status = %saved.value.status,
                        "quiz assignment updated"
                    );
                    return Ok(link);
                }
                Err(e) if e.is_retryable() => last_conflict = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_conflict
            .unwrap_or_else(|| EngineError::Storage("assignment update never attempted".into())))
    }
}

/// Presentation order for an attempt. Shuffled quizzes get a permutation
/// seeded from the attempt id, so a reload shows the same order.
fn question_order(quiz: &Quiz, attempt_id: Uuid) -> Vec<String> {
    let mut order: Vec<String> = quiz.questions.iter().map(|q| q.id.clone()).collect();
    if quiz.shuffle_questions {
        let mut rng = StdRng::seed_from_u64(attempt_id.as_u128() as u64);
        order.shuffle(&mut rng);
    }
    order
}
