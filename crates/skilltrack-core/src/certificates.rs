//! Certificate outbox.
//!
//! The completion cascade only records that a certificate is owed
//! ([`CertificateState::Pending`]). The outbox turns that into an issuer
//! call outside any assignment write, retries it with backoff, and records
//! the returned id. A failing issuer never touches the assignment's status
//! or module rows; the request simply stays pending until a later
//! [`CertificateOutbox::retry_pending`].
//!
//! Progress writes hand the dispatch to a background task
//! ([`CertificateOutbox::spawn_dispatch`]) so issuer latency never reaches
//! the learner's request. [`CertificateOutbox::settle`] waits for those
//! tasks.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use uuid::Uuid;

use crate::clock::Clock;
use crate::engine::EngineSettings;
use crate::error::{EngineError, EngineResult, IssuerError};
use crate::records::{CertificateState, TrainingAssignment};
use crate::traits::{CertificateId, CertificateIssuer, CertificateRequest, Repository};

/// Result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The issuer produced a certificate on this dispatch.
    Issued(CertificateId),
    /// A certificate had been issued before; the issuer was not called.
    AlreadyIssued(CertificateId),
    /// The assignment is not owed a certificate.
    NotRequested,
    /// Another dispatch for the same assignment is running.
    InFlight,
    /// Every retry failed; the request stays pending.
    Deferred { error: String },
}

/// Removes the claim on an assignment when the dispatch ends, however it
/// ends.
struct Claim<'a> {
    in_flight: &'a Mutex<HashSet<Uuid>>,
    assignment_id: Uuid,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.assignment_id);
    }
}

/// Dispatches owed certificates to the issuer.
pub struct CertificateOutbox {
    issuer: Arc<dyn CertificateIssuer>,
    assignments: Arc<dyn Repository<TrainingAssignment>>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    in_flight: Mutex<HashSet<Uuid>>,
    background: Mutex<JoinSet<(Uuid, DispatchOutcome)>>,
}

impl CertificateOutbox {
    pub fn new(
        issuer: Arc<dyn CertificateIssuer>,
        assignments: Arc<dyn Repository<TrainingAssignment>>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            issuer,
            assignments,
            clock,
            settings,
            in_flight: Mutex::new(HashSet::new()),
            background: Mutex::new(JoinSet::new()),
        }
    }

    fn claim(&self, assignment_id: Uuid) -> Option<Claim<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !in_flight.insert(assignment_id) {
            return None;
        }
        Some(Claim {
            in_flight: &self.in_flight,
            assignment_id,
        })
    }

    /// Issue the certificate owed to `assignment_id`, if any.
    pub async fn dispatch(&self, assignment_id: Uuid) -> EngineResult<DispatchOutcome> {
        let Some(_claim) = self.claim(assignment_id) else {
            tracing::debug!(%assignment_id, "certificate dispatch already in flight");
            return Ok(DispatchOutcome::InFlight);
        };

        let assignment = self.assignments.get(assignment_id).await?.value;
        let completed_at = match &assignment.certificate {
            CertificateState::NotRequested => return Ok(DispatchOutcome::NotRequested),
            CertificateState::Issued { certificate_id, .. } => {
                return Ok(DispatchOutcome::AlreadyIssued(CertificateId(
                    certificate_id.clone(),
                )))
            }
            CertificateState::Pending { requested_at } => {
                assignment.completed_at.unwrap_or(*requested_at)
            }
        };

        let request = CertificateRequest {
            training_assignment_id: assignment.id,
            learner_id: assignment.learner_id,
            training_id: assignment.training_id.clone(),
            completed_at,
        };

        // Retry with exponential backoff
        let mut last_error = None;
        let mut retry_delay = self.settings.certificate_retry_delay;
        for retry in 0..=self.settings.certificate_max_retries {
            if retry > 0 {
                tokio::time::sleep(retry_delay).await;
                retry_delay = (retry_delay * 2).min(Duration::from_secs(60));
            }
            match self.issuer.issue(&request).await {
                Ok(certificate_id) => {
                    self.record_issued(assignment_id, &certificate_id).await?;
                    tracing::info!(
                        %assignment_id,
                        certificate_id = %certificate_id,
                        issuer = self.issuer.name(),
                        "certificate issued"
                    );
                    return Ok(DispatchOutcome::Issued(certificate_id));
                }
                Err(e) => {
                    tracing::warn!(%assignment_id, retry, "certificate issuance failed: {e:#}");
                    let permanent = e
                        .downcast_ref::<IssuerError>()
                        .is_some_and(IssuerError::is_permanent);
                    last_error = Some(e);
                    if permanent {
                        break;
                    }
                }
            }
        }

        let error = last_error
            .map(|e| format!("{e:#}"))
            .unwrap_or_else(|| "unknown error".to_string());
        tracing::error!(%assignment_id, "certificate left pending: {error}");
        Ok(DispatchOutcome::Deferred { error })
    }

    /// Run [`Self::dispatch`] on a background task and return at once.
    ///
    /// Must be called from within a tokio runtime. A task lost to shutdown
    /// leaves the request pending for [`Self::retry_pending`].
    pub fn spawn_dispatch(self: &Arc<Self>, assignment_id: Uuid) {
        let outbox = Arc::clone(self);
        let mut background = self.background.lock().unwrap_or_else(|e| e.into_inner());
        // Reap finished tasks; their outcomes were already logged.
        while background.try_join_next().is_some() {}
        background.spawn(async move {
            let outcome = match outbox.dispatch(assignment_id).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(%assignment_id, "certificate dispatch failed: {e}");
                    DispatchOutcome::Deferred {
                        error: e.to_string(),
                    }
                }
            };
            (assignment_id, outcome)
        });
        tracing::debug!(%assignment_id, "certificate dispatch scheduled");
    }

    /// Wait until no background dispatch is running.
    ///
    /// Returns the outcomes of tasks not yet reaped by a later
    /// [`Self::spawn_dispatch`].
    pub async fn settle(&self) -> Vec<(Uuid, DispatchOutcome)> {
        let mut outcomes = Vec::new();
        loop {
            let mut running = {
                let mut background = self.background.lock().unwrap_or_else(|e| e.into_inner());
                std::mem::take(&mut *background)
            };
            if running.is_empty() {
                return outcomes;
            }
            while let Some(joined) = running.join_next().await {
                match joined {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => tracing::warn!("certificate dispatch task ended abnormally: {e}"),
                }
            }
        }
    }

    /// Re-drive every assignment whose certificate is still pending.
    pub async fn retry_pending(&self) -> EngineResult<Vec<(Uuid, DispatchOutcome)>> {
        let pending: Vec<Uuid> = self
            .assignments
            .list()
            .await?
            .into_iter()
            .filter(|a| matches!(a.value.certificate, CertificateState::Pending { .. }))
            .map(|a| a.value.id)
            .collect();

        let mut outcomes = Vec::with_capacity(pending.len());
        for assignment_id in pending {
            outcomes.push((assignment_id, self.dispatch(assignment_id).await?));
        }
        Ok(outcomes)
    }

    async fn record_issued(
        &self,
        assignment_id: Uuid,
        certificate_id: &CertificateId,
    ) -> EngineResult<()> {
        let mut last_conflict = None;
        for _ in 0..=self.settings.max_cas_retries {
            let stored = self.assignments.get(assignment_id).await?;
            let mut assignment = stored.value;
            if matches!(assignment.certificate, CertificateState::Issued { .. }) {
                return Ok(());
            }
            assignment.certificate = CertificateState::Issued {
                certificate_id: certificate_id.0.clone(),
                issued_at: self.clock.now(),
            };
            match self.assignments.update(stored.version, assignment).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(%assignment_id, "retrying certificate write: {e}");
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_conflict
            .unwrap_or_else(|| EngineError::not_found("training assignment", assignment_id)))
    }
}
