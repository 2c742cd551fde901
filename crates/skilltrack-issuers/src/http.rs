//! REST certificate issuer.
//!
//! Sends `POST {base_url}/certificates` with the completion details and
//! reads the certificate id from the response. The training assignment id
//! doubles as the `Idempotency-Key`, so a retried request for the same
//! completion can be de-duplicated on the issuer's side too.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use skilltrack_core::error::IssuerError;
use skilltrack_core::traits::{CertificateId, CertificateIssuer, CertificateRequest};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Certificate issuer backed by an HTTP API.
pub struct HttpIssuer {
    base_url: String,
    token: Option<String>,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl HttpIssuer {
    pub fn new(base_url: &str, token: Option<String>, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {e}"))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            timeout_secs,
            client,
        })
    }
}

#[derive(Serialize)]
struct IssueBody<'a> {
    training_assignment_id: String,
    learner_id: String,
    training_id: &'a str,
    completed_at: String,
}

#[derive(Deserialize)]
struct IssueResponse {
    #[serde(alias = "id")]
    certificate_id: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

fn error_message(body: String) -> String {
    serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body)
}

#[async_trait]
impl CertificateIssuer for HttpIssuer {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self, request), fields(assignment_id = %request.training_assignment_id))]
    async fn issue(&self, request: &CertificateRequest) -> anyhow::Result<CertificateId> {
        let body = IssueBody {
            training_assignment_id: request.training_assignment_id.to_string(),
            learner_id: request.learner_id.to_string(),
            training_id: &request.training_id,
            completed_at: request.completed_at.to_rfc3339(),
        };

        let mut builder = self
            .client
            .post(format!("{}/certificates", self.base_url))
            .header("content-type", "application/json")
            .header(
                "idempotency-key",
                request.training_assignment_id.to_string(),
            )
            .json(&body);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                IssuerError::Timeout(self.timeout_secs)
            } else {
                IssuerError::NetworkError(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(IssuerError::AuthenticationFailed(error_message(body)).into());
        }
        if status == 400 || status == 404 || status == 422 {
            let body = response.text().await.unwrap_or_default();
            return Err(IssuerError::Rejected {
                status,
                message: error_message(body),
            }
            .into());
        }
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(IssuerError::ApiError {
                status,
                message: error_message(body),
            }
            .into());
        }

        let issued: IssueResponse = response.json().await.map_err(|e| IssuerError::ApiError {
            status,
            message: format!("failed to parse response: {e}"),
        })?;

        tracing::debug!(certificate_id = %issued.certificate_id, "issuer accepted request");
        Ok(CertificateId(issued.certificate_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CertificateRequest {
        CertificateRequest {
            training_assignment_id: Uuid::new_v4(),
            learner_id: Uuid::new_v4(),
            training_id: "onboarding".into(),
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn successful_issue() {
        let server = MockServer::start().await;
        let request = request();

        Mock::given(method("POST"))
            .and(path("/certificates"))
            .and(header("authorization", "Bearer test-token"))
            .and(header(
                "idempotency-key",
                request.training_assignment_id.to_string().as_str(),
            ))
            .and(body_partial_json(serde_json::json!({
                "training_id": "onboarding"
            })))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(serde_json::json!({"certificate_id": "CERT-42"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let issuer = HttpIssuer::new(&server.uri(), Some("test-token".into()), 5).unwrap();
        let id = issuer.issue(&request).await.unwrap();
        assert_eq!(id, CertificateId("CERT-42".into()));
    }

    #[tokio::test]
    async fn id_alias_is_accepted() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/certificates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "c-1"})))
            .mount(&server)
            .await;

        let issuer = HttpIssuer::new(&format!("{}/", server.uri()), None, 5).unwrap();
        assert_eq!(issuer.issue(&request()).await.unwrap().0, "c-1");
    }

    #[tokio::test]
    async fn authentication_failure_is_permanent() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/certificates"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let issuer = HttpIssuer::new(&server.uri(), Some("bad".into()), 5).unwrap();
        let err = issuer.issue(&request()).await.unwrap_err();
        let issuer_err = err.downcast_ref::<IssuerError>().unwrap();
        assert!(issuer_err.is_permanent());
        assert!(err.to_string().contains("authentication"));
    }

    #[tokio::test]
    async fn validation_error_message_is_extracted() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/certificates"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "error": {"message": "unknown learner"}
            })))
            .mount(&server)
            .await;

        let issuer = HttpIssuer::new(&server.uri(), None, 5).unwrap();
        let err = issuer.issue(&request()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IssuerError>(),
            Some(IssuerError::Rejected { status: 422, message }) if message == "unknown learner"
        ));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/certificates"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let issuer = HttpIssuer::new(&server.uri(), None, 5).unwrap();
        let err = issuer.issue(&request()).await.unwrap_err();
        let issuer_err = err.downcast_ref::<IssuerError>().unwrap();
        assert!(!issuer_err.is_permanent());
        assert!(err.to_string().contains("HTTP 503"));
    }
}
