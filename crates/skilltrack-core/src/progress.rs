//! Module progress service.
//!
//! Applies tracker transitions to a training assignment and runs the
//! completion cascade in the same versioned write, so a module update and
//! the status it implies are stored together or not at all. Conflicting
//! writers are retried from a fresh read. Certificate dispatch is scheduled
//! on a background task after the write and never delays the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::cascade::{self, CascadeOutcome};
use crate::certificates::CertificateOutbox;
use crate::clock::Clock;
use crate::engine::EngineSettings;
use crate::error::{EngineError, EngineResult};
use crate::records::TrainingAssignment;
use crate::scoring::AttemptResult;
use crate::traits::Repository;
use crate::tracker;

/// Result of a progress mutation.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// The assignment as stored after the mutation.
    pub assignment: TrainingAssignment,
    /// Whether the module row itself changed.
    pub module_changed: bool,
    pub cascade: CascadeOutcome,
    /// This update crossed the completion edge and a certificate dispatch
    /// was scheduled. The stored certificate is pending until it finishes.
    pub certificate_pending: bool,
}

/// Owns module transitions for training assignments.
pub struct ProgressService {
    assignments: Arc<dyn Repository<TrainingAssignment>>,
    outbox: Arc<CertificateOutbox>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl ProgressService {
    pub fn new(
        assignments: Arc<dyn Repository<TrainingAssignment>>,
        outbox: Arc<CertificateOutbox>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            assignments,
            outbox,
            clock,
            settings,
        }
    }

    /// Learner opens a module.
    pub async fn start_module(
        &self,
        assignment_id: Uuid,
        module_id: &str,
    ) -> EngineResult<ProgressUpdate> {
        self.mutate(assignment_id, |assignment, _| {
            Ok(tracker::start(assignment.module_mut(module_id)?))
        })
        .await
    }

    /// Learner marks a non-QUIZ module as done.
    pub async fn complete_module(
        &self,
        assignment_id: Uuid,
        module_id: &str,
    ) -> EngineResult<ProgressUpdate> {
        self.mutate(assignment_id, |assignment, now| {
            tracker::complete(assignment.module_mut(module_id)?, now)
        })
        .await
    }

    /// Apply a submitted attempt to the QUIZ module it backs.
    pub async fn complete_via_quiz(
        &self,
        assignment_id: Uuid,
        module_id: &str,
        result: &AttemptResult,
    ) -> EngineResult<ProgressUpdate> {
        self.mutate(assignment_id, |assignment, now| {
            tracker::complete_via_quiz(assignment.module_mut(module_id)?, result, now)
        })
        .await
    }

    /// Re-run the cascade without touching any module.
    pub async fn recompute(&self, assignment_id: Uuid) -> EngineResult<ProgressUpdate> {
        self.mutate(assignment_id, |_, _| Ok(false)).await
    }

    async fn mutate<F>(&self, assignment_id: Uuid, apply: F) -> EngineResult<ProgressUpdate>
    where
        F: Fn(&mut TrainingAssignment, DateTime<Utc>) -> EngineResult<bool>,
    {
        let mut last_conflict = None;

        for attempt in 0..=self.settings.max_cas_retries {
            let stored = self.assignments.get(assignment_id).await?;
            let mut assignment = stored.value;
            let now = self.clock.now();

            let module_changed = apply(&mut assignment, now)?;
            let outcome = cascade::recompute(&mut assignment, now);

            if !module_changed && !outcome.changed() {
                return Ok(ProgressUpdate {
                    assignment,
                    module_changed,
                    cascade: outcome,
                    certificate_pending: false,
                });
            }

            match self.assignments.update(stored.version, assignment).await {
                Ok(saved) => {
                    if outcome.entered_completed() {
                        tracing::info!(
                            %assignment_id,
                            completed_modules = outcome.completed_module_count,
                            "training assignment completed"
                        );
                    }
                    if outcome.certificate_requested {
                        self.outbox.spawn_dispatch(assignment_id);
                    }
                    return Ok(ProgressUpdate {
                        assignment: saved.value,
                        module_changed,
                        cascade: outcome,
                        certificate_pending: outcome.certificate_requested,
                    });
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(%assignment_id, attempt, "progress write conflicted: {e}");
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_conflict
            .unwrap_or_else(|| EngineError::Storage("progress update never attempted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificates::DispatchOutcome;
    use crate::clock::SystemClock;
    use crate::memory::{InMemoryIssuer, InMemoryRepository};
    use crate::model::{MaterialType, Training, TrainingModule};
    use crate::records::{CertificateState, ProgressStatus};
    use std::time::Duration;

    struct Harness {
        service: ProgressService,
        outbox: Arc<CertificateOutbox>,
        issuer: Arc<InMemoryIssuer>,
        repo: Arc<InMemoryRepository<TrainingAssignment>>,
        assignment_id: Uuid,
    }

    fn module(id: &str, material_type: MaterialType, is_mandatory: bool) -> TrainingModule {
        TrainingModule {
            id: id.into(),
            title: String::new(),
            material_type,
            order_index: 0,
            is_mandatory,
            quiz_id: (material_type == MaterialType::Quiz).then(|| "quiz".to_string()),
        }
    }

    async fn harness(modules: Vec<TrainingModule>) -> Harness {
        let training = Training {
            id: "t".into(),
            title: String::new(),
            description: String::new(),
            modules,
        };
        let settings = EngineSettings {
            certificate_retry_delay: Duration::ZERO,
            certificate_max_retries: 0,
            ..EngineSettings::default()
        };
        let repo = Arc::new(InMemoryRepository::<TrainingAssignment>::new());
        let issuer = Arc::new(InMemoryIssuer::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let outbox = Arc::new(CertificateOutbox::new(
            issuer.clone(),
            repo.clone(),
            clock.clone(),
            settings.clone(),
        ));
        let assignment = TrainingAssignment::new(Uuid::new_v4(), &training, None);
        let assignment_id = assignment.id;
        repo.insert(assignment).await.unwrap();
        Harness {
            service: ProgressService::new(repo.clone(), outbox.clone(), clock, settings),
            outbox,
            issuer,
            repo,
            assignment_id,
        }
    }

    fn passed() -> AttemptResult {
        AttemptResult {
            earned_points: 1,
            total_points: 1,
            score_percent: 100,
            passing_score_percent: 50,
            passed: true,
            questions: vec![],
        }
    }

    #[tokio::test]
    async fn completing_the_last_mandatory_module_issues_once() {
        let h = harness(vec![module("m1", MaterialType::Video, true)]).await;
        h.service.start_module(h.assignment_id, "m1").await.unwrap();
        let update = h.service.complete_module(h.assignment_id, "m1").await.unwrap();

        assert_eq!(update.assignment.status, ProgressStatus::Completed);
        assert!(update.certificate_pending);
        assert!(matches!(
            update.assignment.certificate,
            CertificateState::Pending { .. }
        ));

        let settled = h.outbox.settle().await;
        assert!(matches!(settled.as_slice(), [(_, DispatchOutcome::Issued(_))]));
        assert!(matches!(
            h.repo.get(h.assignment_id).await.unwrap().value.certificate,
            CertificateState::Issued { .. }
        ));

        let again = h.service.complete_module(h.assignment_id, "m1").await.unwrap();
        assert!(!again.module_changed);
        assert!(!again.certificate_pending);
        h.service.recompute(h.assignment_id).await.unwrap();
        h.outbox.settle().await;
        assert_eq!(h.issuer.call_count(), 1);
    }

    #[tokio::test]
    async fn no_op_updates_do_not_bump_the_version() {
        let h = harness(vec![module("m1", MaterialType::Video, true)]).await;
        h.service.start_module(h.assignment_id, "m1").await.unwrap();
        let version = h.repo.get(h.assignment_id).await.unwrap().version;
        h.service.start_module(h.assignment_id, "m1").await.unwrap();
        assert_eq!(h.repo.get(h.assignment_id).await.unwrap().version, version);
    }

    #[tokio::test]
    async fn issuer_failure_keeps_completion() {
        let h = harness(vec![module("m1", MaterialType::Video, true)]).await;
        h.issuer.fail_next(1);
        h.service.start_module(h.assignment_id, "m1").await.unwrap();
        let update = h.service.complete_module(h.assignment_id, "m1").await.unwrap();
        assert!(update.certificate_pending);

        let settled = h.outbox.settle().await;
        assert!(matches!(settled.as_slice(), [(_, DispatchOutcome::Deferred { .. })]));
        let stored = h.repo.get(h.assignment_id).await.unwrap().value;
        assert_eq!(stored.status, ProgressStatus::Completed);
        assert_eq!(stored.module("m1").unwrap().status, ProgressStatus::Completed);
        assert!(matches!(stored.certificate, CertificateState::Pending { .. }));
    }

    #[tokio::test]
    async fn quiz_module_completes_only_via_attempt() {
        let h = harness(vec![module("quiz-step", MaterialType::Quiz, true)]).await;
        let err = h
            .service
            .complete_module(h.assignment_id, "quiz-step")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));

        let update = h
            .service
            .complete_via_quiz(h.assignment_id, "quiz-step", &passed())
            .await
            .unwrap();
        assert_eq!(update.assignment.status, ProgressStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_module_is_not_found() {
        let h = harness(vec![module("m1", MaterialType::Video, true)]).await;
        let err = h.service.start_module(h.assignment_id, "nope").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn concurrent_updates_converge() {
        let h = harness(vec![
            module("m1", MaterialType::Video, true),
            module("m2", MaterialType::Document, true),
        ])
        .await;
        h.service.start_module(h.assignment_id, "m1").await.unwrap();
        h.service.start_module(h.assignment_id, "m2").await.unwrap();

        let (a, b) = tokio::join!(
            h.service.complete_module(h.assignment_id, "m1"),
            h.service.complete_module(h.assignment_id, "m2"),
        );
        a.unwrap();
        b.unwrap();
        h.outbox.settle().await;

        let stored = h.repo.get(h.assignment_id).await.unwrap().value;
        assert_eq!(stored.completed_module_count, 2);
        assert_eq!(stored.status, ProgressStatus::Completed);
        assert_eq!(h.issuer.call_count(), 1);
    }
}
