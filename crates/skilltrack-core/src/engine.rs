//! Engine facade.
//!
//! [`TrainingEngine`] wires the attempt controller, the progress service and
//! the certificate outbox over one set of stores, and exposes the operations
//! a host calls: assign, start, submit, module transitions and certificate
//! retries. [`EngineSettings`] holds the tunables shared by all of them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attempt::{AttemptController, SubmitOutcome, TimeoutHandle};
use crate::certificates::{CertificateOutbox, DispatchOutcome};
use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::memory::InMemoryRepository;
use crate::normalizer::RawAnswers;
use crate::progress::{ProgressService, ProgressUpdate};
use crate::records::{ModuleLink, QuizAssignment, QuizAttempt, TrainingAssignment};
use crate::traits::{CertificateIssuer, DefinitionStore, Repository};

/// Configuration for the training engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// How many times a conflicting versioned write is retried from a fresh
    /// read before `ConcurrentUpdate` is surfaced.
    pub max_cas_retries: u32,
    /// Retries per certificate dispatch after the first call fails.
    pub certificate_max_retries: u32,
    /// Initial delay between certificate retries; doubles each time, capped
    /// at 60 seconds.
    #[serde(with = "duration_secs")]
    pub certificate_retry_delay: Duration,
    /// Extra allowance after the deadline before an attempt counts as timed
    /// out.
    #[serde(with = "duration_secs")]
    pub auto_submit_grace: Duration,
    /// Spawn a timer task per attempt that auto-submits at the deadline.
    /// When off, only [`TrainingEngine::expire_overdue`] closes overdue
    /// attempts.
    pub schedule_timeouts: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_cas_retries: 5,
            certificate_max_retries: 3,
            certificate_retry_delay: Duration::from_secs(1),
            auto_submit_grace: Duration::ZERO,
            schedule_timeouts: true,
        }
    }
}

/// Durations are written as fractional seconds in config files.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// The three runtime repositories.
#[derive(Clone)]
pub struct Stores {
    pub attempts: Arc<dyn Repository<QuizAttempt>>,
    pub quiz_assignments: Arc<dyn Repository<QuizAssignment>>,
    pub training_assignments: Arc<dyn Repository<TrainingAssignment>>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            attempts: Arc::new(InMemoryRepository::<QuizAttempt>::new()),
            quiz_assignments: Arc::new(InMemoryRepository::<QuizAssignment>::new()),
            training_assignments: Arc::new(InMemoryRepository::<TrainingAssignment>::new()),
        }
    }
}

/// A freshly started attempt and, when timers are enabled, its auto-submit.
pub struct StartedAttempt {
    pub attempt: QuizAttempt,
    pub timeout: Option<TimeoutHandle>,
}

/// Entry point that wires the attempt controller, the progress service and
/// the certificate outbox over one set of stores.
pub struct TrainingEngine {
    definitions: Arc<dyn DefinitionStore>,
    stores: Stores,
    attempts: Arc<AttemptController>,
    progress: Arc<ProgressService>,
    outbox: Arc<CertificateOutbox>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl TrainingEngine {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        stores: Stores,
        issuer: Arc<dyn CertificateIssuer>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let outbox = Arc::new(CertificateOutbox::new(
            issuer,
            stores.training_assignments.clone(),
            clock.clone(),
            settings.clone(),
        ));
        let progress = Arc::new(ProgressService::new(
            stores.training_assignments.clone(),
            outbox.clone(),
            clock.clone(),
            settings.clone(),
        ));
        let attempts = Arc::new(AttemptController::new(
            definitions.clone(),
            stores.attempts.clone(),
            stores.quiz_assignments.clone(),
            progress.clone(),
            clock.clone(),
            settings.clone(),
        ));
        Self {
            definitions,
            stores,
            attempts,
            progress,
            outbox,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // -----------------------------------------------------------------------
    // Assignments
    // -----------------------------------------------------------------------

    /// Assign a training to a learner.
    ///
    /// Every module gets a NOT_STARTED progress row; every QUIZ module also
    /// gets its own quiz assignment, whose passing attempt completes the
    /// module.
    pub async fn assign_training(
        &self,
        learner_id: Uuid,
        training_id: &str,
        due_date: Option<DateTime<Utc>>,
    ) -> EngineResult<TrainingAssignment> {
        let training = self.definitions.training(training_id).await?;

        let mut assignment = TrainingAssignment::new(learner_id, &training, due_date);
        let mut linked = Vec::new();
        for module in training.ordered_modules().into_iter().filter(|m| m.is_quiz()) {
            let quiz_id = module.quiz_id.as_deref().ok_or_else(|| EngineError::InvalidTransition {
                entity: "module",
                id: module.id.clone(),
                reason: "quiz module has no quiz_id".into(),
            })?;
            // Fail early on dangling references.
            self.definitions.quiz(quiz_id).await?;

            let quiz_assignment = QuizAssignment::new(learner_id, quiz_id, due_date).linked_to(
                ModuleLink {
                    training_assignment_id: assignment.id,
                    module_id: module.id.clone(),
                },
            );
            assignment.module_mut(&module.id)?.quiz_assignment_id = Some(quiz_assignment.id);
            linked.push(quiz_assignment);
        }

        let stored = self.stores.training_assignments.insert(assignment).await?;
        for quiz_assignment in linked {
            self.stores.quiz_assignments.insert(quiz_assignment).await?;
        }
        tracing::info!(
            assignment_id = %stored.value.id,
            %learner_id,
            training_id,
            modules = stored.value.modules.len(),
            "training assigned"
        );
        Ok(stored.value)
    }

    /// Assign a standalone quiz to a learner.
    pub async fn assign_quiz(
        &self,
        learner_id: Uuid,
        quiz_id: &str,
        due_date: Option<DateTime<Utc>>,
    ) -> EngineResult<QuizAssignment> {
        self.definitions.quiz(quiz_id).await?;
        let stored = self
            .stores
            .quiz_assignments
            .insert(QuizAssignment::new(learner_id, quiz_id, due_date))
            .await?;
        tracing::info!(assignment_id = %stored.value.id, %learner_id, quiz_id, "quiz assigned");
        Ok(stored.value)
    }

    pub async fn quiz_assignment(&self, id: Uuid) -> EngineResult<QuizAssignment> {
        Ok(self.stores.quiz_assignments.get(id).await?.value)
    }

    pub async fn training_assignment(&self, id: Uuid) -> EngineResult<TrainingAssignment> {
        Ok(self.stores.training_assignments.get(id).await?.value)
    }

    // -----------------------------------------------------------------------
    // Attempts
    // -----------------------------------------------------------------------

    /// Start an attempt and, unless disabled, schedule its auto-submit.
    pub async fn start_attempt(&self, quiz_assignment_id: Uuid) -> EngineResult<StartedAttempt> {
        let attempt = self.attempts.start(quiz_assignment_id).await?;
        let timeout = self
            .settings
            .schedule_timeouts
            .then(|| self.attempts.schedule_timeout(&attempt));
        Ok(StartedAttempt { attempt, timeout })
    }

    pub async fn record_answers(
        &self,
        attempt_id: Uuid,
        answers: &RawAnswers,
    ) -> EngineResult<QuizAttempt> {
        self.attempts.record_answers(attempt_id, answers).await
    }

    pub async fn submit_attempt(
        &self,
        attempt_id: Uuid,
        answers: &RawAnswers,
    ) -> EngineResult<SubmitOutcome> {
        self.attempts.submit(attempt_id, answers).await
    }

    pub async fn auto_submit_on_timeout(
        &self,
        attempt_id: Uuid,
    ) -> EngineResult<Option<SubmitOutcome>> {
        self.attempts.auto_submit_on_timeout(attempt_id).await
    }

    pub async fn time_remaining(&self, attempt_id: Uuid) -> EngineResult<chrono::Duration> {
        self.attempts.time_remaining(attempt_id).await
    }

    pub async fn attempt(&self, attempt_id: Uuid) -> EngineResult<QuizAttempt> {
        self.attempts.attempt(attempt_id).await
    }

    /// Close every running attempt whose deadline has passed.
    pub async fn expire_overdue(&self) -> EngineResult<Vec<SubmitOutcome>> {
        self.attempts.expire_overdue().await
    }

    // -----------------------------------------------------------------------
    // Modules and certificates
    // -----------------------------------------------------------------------

    pub async fn start_module(
        &self,
        training_assignment_id: Uuid,
        module_id: &str,
    ) -> EngineResult<ProgressUpdate> {
        self.progress.start_module(training_assignment_id, module_id).await
    }

    pub async fn complete_module(
        &self,
        training_assignment_id: Uuid,
        module_id: &str,
    ) -> EngineResult<ProgressUpdate> {
        self.progress
            .complete_module(training_assignment_id, module_id)
            .await
    }

    /// Re-run the completion cascade for one assignment.
    pub async fn recompute(&self, training_assignment_id: Uuid) -> EngineResult<ProgressUpdate> {
        self.progress.recompute(training_assignment_id).await
    }

    /// Re-drive certificates that are still pending after earlier failures.
    pub async fn retry_certificates(&self) -> EngineResult<Vec<(Uuid, DispatchOutcome)>> {
        self.outbox.retry_pending().await
    }

    /// Wait for certificate dispatches scheduled by completed trainings.
    pub async fn settle_certificates(&self) -> Vec<(Uuid, DispatchOutcome)> {
        self.outbox.settle().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::memory::{InMemoryDefinitions, InMemoryIssuer};
    use crate::model::fixtures::{quiz, single};
    use crate::model::{MaterialType, Training, TrainingModule};
    use crate::records::ProgressStatus;

    fn module(id: &str, order_index: u32, quiz_id: Option<&str>) -> TrainingModule {
        TrainingModule {
            id: id.into(),
            title: id.into(),
            material_type: if quiz_id.is_some() {
                MaterialType::Quiz
            } else {
                MaterialType::Document
            },
            order_index,
            is_mandatory: true,
            quiz_id: quiz_id.map(str::to_string),
        }
    }

    fn engine(definitions: InMemoryDefinitions) -> TrainingEngine {
        TrainingEngine::new(
            Arc::new(definitions),
            Stores::in_memory(),
            Arc::new(InMemoryIssuer::new()),
            Arc::new(SystemClock),
            EngineSettings {
                schedule_timeouts: false,
                ..EngineSettings::default()
            },
        )
    }

    #[test]
    fn default_settings() {
        let settings = EngineSettings::default();
        assert_eq!(settings.max_cas_retries, 5);
        assert_eq!(settings.certificate_max_retries, 3);
        assert_eq!(settings.certificate_retry_delay, Duration::from_secs(1));
        assert_eq!(settings.auto_submit_grace, Duration::ZERO);
        assert!(settings.schedule_timeouts);
    }

    #[test]
    fn settings_parse_from_toml_with_defaults() {
        let settings: EngineSettings =
            toml::from_str("max_cas_retries = 2\nauto_submit_grace = 1.5\n").unwrap();
        assert_eq!(settings.max_cas_retries, 2);
        assert_eq!(settings.auto_submit_grace, Duration::from_millis(1500));
        assert_eq!(settings.certificate_max_retries, 3);
    }

    #[tokio::test]
    async fn assigning_a_training_links_quiz_modules() {
        let definitions = InMemoryDefinitions::new();
        definitions
            .publish(quiz(vec![single("q1", 1, "a", &["a", "b"])], 50))
            .unwrap();
        definitions.add_training(Training {
            id: "onboarding".into(),
            title: "Onboarding".into(),
            description: String::new(),
            modules: vec![module("read", 1, None), module("check", 2, Some("quiz"))],
        });
        let engine = engine(definitions);

        let assignment = engine
            .assign_training(Uuid::new_v4(), "onboarding", None)
            .await
            .unwrap();
        assert_eq!(assignment.status, ProgressStatus::NotStarted);
        assert!(assignment.module("read").unwrap().quiz_assignment_id.is_none());

        let linked = assignment.module("check").unwrap().quiz_assignment_id.unwrap();
        let quiz_assignment = engine.quiz_assignment(linked).await.unwrap();
        assert_eq!(quiz_assignment.quiz_id, "quiz");
        assert_eq!(
            quiz_assignment.module,
            Some(ModuleLink {
                training_assignment_id: assignment.id,
                module_id: "check".into(),
            })
        );
    }

    #[tokio::test]
    async fn dangling_quiz_reference_is_rejected() {
        let definitions = InMemoryDefinitions::new();
        definitions.add_training(Training {
            id: "broken".into(),
            title: String::new(),
            description: String::new(),
            modules: vec![module("check", 1, Some("missing"))],
        });
        let err = engine(definitions)
            .assign_training(Uuid::new_v4(), "broken", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "quiz", .. }));
    }

    #[tokio::test]
    async fn unknown_quiz_cannot_be_assigned() {
        let err = engine(InMemoryDefinitions::new())
            .assign_quiz(Uuid::new_v4(), "nope", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }
}
