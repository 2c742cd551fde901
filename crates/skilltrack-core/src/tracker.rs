//! Module progress state machine.
//!
//! `NOT_STARTED -> IN_PROGRESS -> COMPLETED`, forward only. COMPLETED is
//! terminal. QUIZ modules never complete by direct learner action; they
//! complete through [`complete_via_quiz`] when an attempt passes.
//!
//! Every function returns whether the row changed, so callers can skip
//! writes for no-ops.

use chrono::{DateTime, Utc};

use crate::error::{EngineError, EngineResult};
use crate::records::{ModuleProgress, ProgressStatus};
use crate::scoring::AttemptResult;

/// Learner opens a module.
pub fn start(progress: &mut ModuleProgress) -> bool {
    if progress.status != ProgressStatus::NotStarted {
        return false;
    }
    progress.status = ProgressStatus::InProgress;
    tracing::debug!(module_id = %progress.module_id, "module started");
    true
}

/// Learner marks a non-QUIZ module as done.
pub fn complete(progress: &mut ModuleProgress, now: DateTime<Utc>) -> EngineResult<bool> {
    if progress.is_quiz() {
        return Err(EngineError::InvalidTransition {
            entity: "module",
            id: progress.module_id.clone(),
            reason: "quiz modules complete only through a passing attempt".into(),
        });
    }
    match progress.status {
        ProgressStatus::Completed => Ok(false),
        ProgressStatus::NotStarted => Err(EngineError::InvalidTransition {
            entity: "module",
            id: progress.module_id.clone(),
            reason: "module must be started before it can be completed".into(),
        }),
        ProgressStatus::InProgress => {
            mark_completed(progress, now);
            Ok(true)
        }
    }
}

/// Apply a graded attempt to the QUIZ module it backs.
///
/// Completes the module iff the attempt passed. A failed attempt leaves the
/// module where it was.
pub fn complete_via_quiz(
    progress: &mut ModuleProgress,
    result: &AttemptResult,
    now: DateTime<Utc>,
) -> EngineResult<bool> {
    if !progress.is_quiz() {
        return Err(EngineError::InvalidTransition {
            entity: "module",
            id: progress.module_id.clone(),
            reason: format!("{} module is not backed by a quiz", progress.material_type),
        });
    }
    if !result.passed || progress.status == ProgressStatus::Completed {
        return Ok(false);
    }
    mark_completed(progress, now);
    Ok(true)
}

fn mark_completed(progress: &mut ModuleProgress, now: DateTime<Utc>) {
    progress.status = ProgressStatus::Completed;
    progress.completed_at = Some(now);
    tracing::debug!(module_id = %progress.module_id, "module completed");
}
