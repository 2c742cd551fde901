//! Engine error types.
//!
//! Every fallible engine operation returns [`EngineError`]. The variants map
//! one-to-one onto the failure classes callers have to distinguish: bad
//! learner input, bad quiz definitions, exhausted attempts, illegal state
//! transitions and optimistic-concurrency conflicts.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Result alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors produced by the assessment and progression engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A submission referenced an unknown question or option, or was
    /// otherwise malformed. The whole submission is rejected.
    #[error("invalid answer: {0}")]
    InvalidAnswer(String),

    /// The quiz cannot be graded (zero total points, a question without a
    /// correct option, an unpublished quiz, ...).
    #[error("invalid quiz {quiz_id}: {reason}")]
    InvalidQuiz { quiz_id: String, reason: String },

    /// No attempt may be started for the assignment right now.
    #[error("attempt limit exceeded for assignment {assignment_id}: {reason}")]
    AttemptLimitExceeded {
        assignment_id: Uuid,
        reason: AttemptLimitReason,
    },

    /// A state transition that the state machine does not allow.
    #[error("invalid transition for {entity} {id}: {reason}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        reason: String,
    },

    /// A versioned write lost the race against another writer.
    #[error("concurrent update on {entity} {id}: expected version {expected}, found {found}")]
    ConcurrentUpdate {
        entity: &'static str,
        id: Uuid,
        expected: u64,
        found: u64,
    },

    /// The referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The persistence layer failed for a reason unrelated to versioning.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Why an attempt could not be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptLimitReason {
    /// `attempts_used` has reached the quiz's `max_attempts`.
    Exhausted { used: u32, max: u32 },
    /// Another attempt for the same assignment is still in progress.
    AlreadyInProgress { attempt_id: Uuid },
}

impl fmt::Display for AttemptLimitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptLimitReason::Exhausted { used, max } => {
                write!(f, "{used} of {max} attempts used")
            }
            AttemptLimitReason::AlreadyInProgress { attempt_id } => {
                write!(f, "attempt {attempt_id} is still in progress")
            }
        }
    }
}

impl EngineError {
    pub(crate) fn invalid_quiz(quiz_id: &str, reason: impl Into<String>) -> Self {
        EngineError::InvalidQuiz {
            quiz_id: quiz_id.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns `true` if re-running the operation may succeed.
    ///
    /// Only optimistic-concurrency conflicts qualify: the caller reloads the
    /// record and recomputes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrentUpdate { .. })
    }

    /// Returns `true` for errors that are a normal outcome for the caller and
    /// leave all state untouched.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidAnswer(_)
                | EngineError::AttemptLimitExceeded { .. }
                | EngineError::ConcurrentUpdate { .. }
        )
    }
}

/// Errors that can occur when calling a certificate issuer.
///
/// Defined here so the certificate outbox can downcast issuer failures and
/// stop retrying the permanent ones.
#[derive(Debug, Error)]
pub enum IssuerError {
    /// The issuer refused the request itself (validation, unknown learner).
    #[error("certificate request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Authentication failed (missing or invalid token).
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    NetworkError(String),

    /// The issuer returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },
}

impl IssuerError {
    /// Returns `true` if this error is permanent and should not be retried.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            IssuerError::Rejected { .. } | IssuerError::AuthenticationFailed(_)
        )
    }
}
