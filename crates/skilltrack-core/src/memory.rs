//! In-memory implementations of the boundary traits.
//!
//! Used by tests, the CLI simulator and embedders that keep state in
//! process. Each repository guards its map with a single mutex; versions
//! are checked and bumped under that lock, so `update` is a true
//! compare-and-set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{EngineError, EngineResult};
use crate::model::{Quiz, QuizState, Training};
use crate::traits::{
    CertificateId, CertificateIssuer, CertificateRequest, DefinitionStore, Record, Repository,
    Versioned,
};
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// A versioned record store held in memory.
pub struct InMemoryRepository<T> {
    records: Mutex<HashMap<Uuid, Versioned<T>>>,
}

impl<T> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<T: Record> Repository<T> for InMemoryRepository<T> {
    async fn get(&self, id: Uuid) -> EngineResult<Versioned<T>> {
        lock(&self.records)
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(T::ENTITY, id))
    }

    async fn insert(&self, value: T) -> EngineResult<Versioned<T>> {
        let mut records = lock(&self.records);
        let id = value.id();
        if records.contains_key(&id) {
            return Err(EngineError::Storage(format!(
                "{} {id} already exists",
                T::ENTITY
            )));
        }
        let stored = Versioned { version: 1, value };
        records.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update(&self, expected_version: u64, value: T) -> EngineResult<Versioned<T>> {
        let mut records = lock(&self.records);
        let id = value.id();
        let current = records
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found(T::ENTITY, id))?;
        if current.version != expected_version {
            return Err(EngineError::ConcurrentUpdate {
                entity: T::ENTITY,
                id,
                expected: expected_version,
                found: current.version,
            });
        }
        current.version += 1;
        current.value = value;
        Ok(current.clone())
    }

    async fn list(&self) -> EngineResult<Vec<Versioned<T>>> {
        Ok(lock(&self.records).values().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// Published quizzes (every revision kept) and trainings.
#[derive(Default)]
pub struct InMemoryDefinitions {
    quizzes: Mutex<HashMap<String, Vec<Arc<Quiz>>>>,
    trainings: Mutex<HashMap<String, Arc<Training>>>,
}

impl InMemoryDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and publish a new immutable revision of `quiz`.
    ///
    /// Earlier revisions stay untouched, so attempts holding them keep
    /// grading against what they started with.
    pub fn publish(&self, mut quiz: Quiz) -> EngineResult<Arc<Quiz>> {
        quiz.check_gradeable()?;
        quiz.state = QuizState::Published;
        let quiz = Arc::new(quiz);
        lock(&self.quizzes)
            .entry(quiz.id.clone())
            .or_default()
            .push(Arc::clone(&quiz));
        tracing::debug!(quiz_id = %quiz.id, "published quiz revision");
        Ok(quiz)
    }

    /// Store a draft; drafts are visible but cannot be attempted.
    pub fn save_draft(&self, mut quiz: Quiz) -> Arc<Quiz> {
        quiz.state = QuizState::Draft;
        let quiz = Arc::new(quiz);
        lock(&self.quizzes)
            .entry(quiz.id.clone())
            .or_default()
            .push(Arc::clone(&quiz));
        quiz
    }

    pub fn revisions(&self, quiz_id: &str) -> usize {
        lock(&self.quizzes).get(quiz_id).map_or(0, Vec::len)
    }

    pub fn add_training(&self, training: Training) -> Arc<Training> {
        let training = Arc::new(training);
        lock(&self.trainings).insert(training.id.clone(), Arc::clone(&training));
        training
    }
}

#[async_trait]
impl DefinitionStore for InMemoryDefinitions {
    /// The latest published revision, or the latest draft when nothing has
    /// been published yet.
    async fn quiz(&self, quiz_id: &str) -> EngineResult<Arc<Quiz>> {
        lock(&self.quizzes)
            .get(quiz_id)
            .and_then(|revisions| {
                revisions
                    .iter()
                    .rev()
                    .find(|quiz| quiz.is_published())
                    .or_else(|| revisions.last())
                    .cloned()
            })
            .ok_or_else(|| EngineError::not_found("quiz", quiz_id))
    }

    async fn training(&self, training_id: &str) -> EngineResult<Arc<Training>> {
        lock(&self.trainings)
            .get(training_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("training", training_id))
    }
}

// ---------------------------------------------------------------------------
// Issuer
// ---------------------------------------------------------------------------

/// An issuer that hands out sequential certificate ids and records every
/// call. Can be told to fail a number of upcoming calls.
#[derive(Default)]
pub struct InMemoryIssuer {
    issued: Mutex<Vec<CertificateRequest>>,
    call_count: AtomicU32,
    failures_remaining: AtomicU32,
}

impl InMemoryIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls to `issue`.
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Number of `issue` calls, failed ones included.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Requests that produced a certificate.
    pub fn issued(&self) -> Vec<CertificateRequest> {
        lock(&self.issued).clone()
    }
}

#[async_trait]
impl CertificateIssuer for InMemoryIssuer {
    fn name(&self) -> &str {
        "memory"
    }

    async fn issue(&self, request: &CertificateRequest) -> anyhow::Result<CertificateId> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            anyhow::bail!(
                "issuer unavailable for assignment {}",
                request.training_assignment_id
            );
        }

        let mut issued = lock(&self.issued);
        issued.push(request.clone());
        Ok(CertificateId(format!("CERT-{:05}", issued.len())))
    }
}
