//! Boundary contracts: persistence, definition lookup and certificate
//! issuance.
//!
//! The engine never talks to a database or an HTTP service directly. It
//! goes through these traits, implemented in-memory by [`crate::memory`]
//! and over HTTP by the `skilltrack-issuers` crate.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::model::{Quiz, Training};
use crate::records::{QuizAssignment, QuizAttempt, TrainingAssignment};

// ---------------------------------------------------------------------------
// Versioned persistence
// ---------------------------------------------------------------------------

/// A stored record together with its optimistic-concurrency version.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// A record type that can live in a [`Repository`].
pub trait Record: Clone + Send + Sync + 'static {
    /// Human-readable entity name used in errors and logs.
    const ENTITY: &'static str;

    fn id(&self) -> Uuid;
}

impl Record for QuizAttempt {
    const ENTITY: &'static str = "quiz attempt";

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Record for QuizAssignment {
    const ENTITY: &'static str = "quiz assignment";

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Record for TrainingAssignment {
    const ENTITY: &'static str = "training assignment";

    fn id(&self) -> Uuid {
        self.id
    }
}

/// CRUD by id with optimistic concurrency.
///
/// `update` succeeds only if the stored version still equals
/// `expected_version`; otherwise it fails with
/// [`crate::error::EngineError::ConcurrentUpdate`] and nothing is written.
#[async_trait]
pub trait Repository<T: Record>: Send + Sync {
    async fn get(&self, id: Uuid) -> EngineResult<Versioned<T>>;

    /// Store a new record at version 1. Fails if the id already exists.
    async fn insert(&self, value: T) -> EngineResult<Versioned<T>>;

    async fn update(&self, expected_version: u64, value: T) -> EngineResult<Versioned<T>>;

    async fn list(&self) -> EngineResult<Vec<Versioned<T>>>;
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// Read-only access to published quiz and training definitions.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Latest published revision of a quiz. A quiz that was never published
    /// yields its latest draft.
    async fn quiz(&self, quiz_id: &str) -> EngineResult<Arc<Quiz>>;

    async fn training(&self, training_id: &str) -> EngineResult<Arc<Training>>;
}

// ---------------------------------------------------------------------------
// Certificate issuance
// ---------------------------------------------------------------------------

/// Identifier returned by a certificate issuer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CertificateId(pub String);

impl fmt::Display for CertificateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything an issuer needs to produce a certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRequest {
    pub training_assignment_id: Uuid,
    pub learner_id: Uuid,
    pub training_id: String,
    pub completed_at: DateTime<Utc>,
}

/// External service that issues completion certificates.
///
/// Treated as at-least-once: the engine de-duplicates on its own state and
/// never relies on the issuer being idempotent.
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    /// Human-readable issuer name (e.g. "http").
    fn name(&self) -> &str;

    async fn issue(&self, request: &CertificateRequest) -> anyhow::Result<CertificateId>;
}
