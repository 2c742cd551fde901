//! Completion cascade.
//!
//! Recomputes a training assignment's status from its module rows. The
//! assignment is COMPLETED once every mandatory module is; optional modules
//! never block it. Entering COMPLETED is the edge that requests a
//! certificate, and it can only be crossed once per assignment.

use chrono::{DateTime, Utc};

use crate::records::{CertificateState, ModuleProgress, ProgressStatus, TrainingAssignment};

/// What a recomputation changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeOutcome {
    pub previous: ProgressStatus,
    pub status: ProgressStatus,
    pub completed_module_count: usize,
    /// Set only on the recomputation that crossed into COMPLETED with no
    /// certificate requested yet.
    pub certificate_requested: bool,
    changed: bool,
}

impl CascadeOutcome {
    pub fn entered_completed(&self) -> bool {
        self.previous != ProgressStatus::Completed && self.status == ProgressStatus::Completed
    }

    /// Whether any field of the assignment was modified.
    pub fn changed(&self) -> bool {
        self.changed
    }
}

/// Assignment status implied by a set of module rows.
///
/// When a training marks no module as mandatory, every module is required.
/// A training without modules never leaves NOT_STARTED.
pub fn derive_status(modules: &[ModuleProgress]) -> ProgressStatus {
    let any_mandatory = modules.iter().any(|m| m.is_mandatory);
    let mut required = modules
        .iter()
        .filter(|m| m.is_mandatory || !any_mandatory)
        .peekable();

    if required.peek().is_some() && required.all(|m| m.status == ProgressStatus::Completed) {
        ProgressStatus::Completed
    } else if modules.iter().any(|m| m.status != ProgressStatus::NotStarted) {
        ProgressStatus::InProgress
    } else {
        ProgressStatus::NotStarted
    }
}

/// Recompute derived fields of `assignment` in place.
///
/// Idempotent: running it again on an unchanged assignment reports no
/// change and never requests a second certificate.
pub fn recompute(assignment: &mut TrainingAssignment, now: DateTime<Utc>) -> CascadeOutcome {
    let previous = assignment.status;
    let completed_module_count = assignment
        .modules
        .iter()
        .filter(|m| m.status == ProgressStatus::Completed)
        .count();

    // Module rows only move forward, so a completed assignment stays completed.
    let status = if previous == ProgressStatus::Completed {
        ProgressStatus::Completed
    } else {
        derive_status(&assignment.modules)
    };

    let mut changed =
        status != previous || completed_module_count != assignment.completed_module_count;
    assignment.status = status;
    assignment.completed_module_count = completed_module_count;

    let mut certificate_requested = false;
    if status == ProgressStatus::Completed {
        if assignment.completed_at.is_none() {
            assignment.completed_at = Some(now);
            changed = true;
        }
        if assignment.certificate == CertificateState::NotRequested {
            assignment.certificate = CertificateState::Pending { requested_at: now };
            certificate_requested = true;
            changed = true;
        }
    }

    if status != previous {
        tracing::debug!(
            assignment_id = %assignment.id,
            from = %previous,
            to = %status,
            completed = completed_module_count,
            "training assignment status changed"
        );
    }

    CascadeOutcome {
        previous,
        status,
        completed_module_count,
        certificate_requested,
        changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MaterialType, Training, TrainingModule};
    use uuid::Uuid;

    fn module(id: &str, order_index: u32, is_mandatory: bool) -> TrainingModule {
        TrainingModule {
            id: id.into(),
            title: String::new(),
            material_type: MaterialType::Video,
            order_index,
            is_mandatory,
            quiz_id: None,
        }
    }

    fn assignment(modules: Vec<TrainingModule>) -> TrainingAssignment {
        let training = Training {
            id: "t".into(),
            title: String::new(),
            description: String::new(),
            modules,
        };
        TrainingAssignment::new(Uuid::new_v4(), &training, None)
    }

    fn set(assignment: &mut TrainingAssignment, module_id: &str, status: ProgressStatus) {
        assignment.module_mut(module_id).unwrap().status = status;
    }

    #[test]
    fn untouched_assignment_is_not_started() {
        let mut a = assignment(vec![module("m1", 1, true), module("m2", 2, false)]);
        let outcome = recompute(&mut a, Utc::now());
        assert_eq!(outcome.status, ProgressStatus::NotStarted);
        assert!(!outcome.changed());
    }

    #[test]
    fn optional_progress_alone_is_in_progress() {
        let mut a = assignment(vec![module("m1", 1, true), module("m2", 2, false)]);
        set(&mut a, "m2", ProgressStatus::Completed);
        let outcome = recompute(&mut a, Utc::now());
        assert_eq!(outcome.status, ProgressStatus::InProgress);
        assert_eq!(outcome.completed_module_count, 1);
        assert!(!outcome.certificate_requested);
    }

    #[test]
    fn mandatory_modules_complete_the_assignment() {
        let mut a = assignment(vec![
            module("m1", 1, true),
            module("m2", 2, true),
            module("m3", 3, false),
        ]);
        set(&mut a, "m1", ProgressStatus::Completed);
        set(&mut a, "m2", ProgressStatus::Completed);
        let outcome = recompute(&mut a, Utc::now());
        assert_eq!(outcome.status, ProgressStatus::Completed);
        assert!(outcome.entered_completed());
        assert!(outcome.certificate_requested);
        assert!(matches!(a.certificate, CertificateState::Pending { .. }));
        assert!(a.completed_at.is_some());
    }

    #[test]
    fn recomputing_after_completion_is_edge_triggered() {
        let mut a = assignment(vec![module("m1", 1, true)]);
        set(&mut a, "m1", ProgressStatus::Completed);
        assert!(recompute(&mut a, Utc::now()).certificate_requested);

        let again = recompute(&mut a, Utc::now());
        assert!(!again.certificate_requested);
        assert!(!again.entered_completed());
        assert!(!again.changed());
    }

    #[test]
    fn no_mandatory_modules_requires_all() {
        let mut a = assignment(vec![module("m1", 1, false), module("m2", 2, false)]);
        set(&mut a, "m1", ProgressStatus::Completed);
        assert_eq!(recompute(&mut a, Utc::now()).status, ProgressStatus::InProgress);
        set(&mut a, "m2", ProgressStatus::Completed);
        assert_eq!(recompute(&mut a, Utc::now()).status, ProgressStatus::Completed);
    }

    #[test]
    fn empty_training_stays_not_started() {
        let mut a = assignment(vec![]);
        assert_eq!(recompute(&mut a, Utc::now()).status, ProgressStatus::NotStarted);
    }
}
