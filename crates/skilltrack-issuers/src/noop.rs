//! Issuer that issues nothing.
//!
//! Every request succeeds with an id derived from the training assignment,
//! so repeated calls for the same completion return the same id. Used for
//! local simulation and deployments without a certificate service.

use async_trait::async_trait;

use skilltrack_core::traits::{CertificateId, CertificateIssuer, CertificateRequest};

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIssuer;

#[async_trait]
impl CertificateIssuer for NoopIssuer {
    fn name(&self) -> &str {
        "noop"
    }

    async fn issue(&self, request: &CertificateRequest) -> anyhow::Result<CertificateId> {
        tracing::debug!(
            assignment_id = %request.training_assignment_id,
            "no-op issuer acknowledged certificate request"
        );
        Ok(CertificateId(format!(
            "noop-{}",
            request.training_assignment_id.simple()
        )))
    }
}
