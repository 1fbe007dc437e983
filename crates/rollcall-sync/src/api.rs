//! API client contract used by the replay driver
//!
//! The driver only needs a generic delivery capability that distinguishes
//! transient failures (retry with backoff, preserve ordering) from definite
//! rejections (skip and continue). The REST client's request/response shapes
//! live outside the engine.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

use crate::error::Error;
use crate::models::{HttpMethod, PendingAction};

const DELIVERY_TIMEOUT_SECS: u64 = 30;

/// Why a delivery attempt failed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Network-level or retryable failure; the queue halts and backs off
    #[error("Transient delivery failure: {0}")]
    Transient(String),

    /// The server definitively rejected the action; it is skipped this pass
    /// and retried only up to the attempt cap
    #[error("Server rejected delivery ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl From<DeliveryError> for Error {
    fn from(error: DeliveryError) -> Self {
        match error {
            DeliveryError::Transient(message) => Self::NetworkTransient(message),
            DeliveryError::Rejected { status, message } => {
                Self::ServerRejected(format!("HTTP {status}: {message}"))
            }
        }
    }
}

/// Generic delivery capability required by the driver
pub trait ApiClient: Send + Sync {
    /// Deliver one queued action. Resolves on 2xx acknowledgement; any other
    /// outcome is a `DeliveryError`. The action's idempotency token travels
    /// with the request so a duplicate delivery is a server-side no-op.
    fn deliver(
        &self,
        action: &PendingAction,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}

/// reqwest-backed implementation of [`ApiClient`]
#[derive(Clone)]
pub struct HttpApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpApiClient {
    /// Create a client targeting the given API base URL
    pub fn new(base_url: impl Into<String>) -> Result<Self, DeliveryError> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DELIVERY_TIMEOUT_SECS))
            .build()
            .map_err(|error| DeliveryError::Transient(error.to_string()))?;

        Ok(Self { base_url, client })
    }

    fn url_for(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

impl ApiClient for HttpApiClient {
    async fn deliver(&self, action: &PendingAction) -> Result<(), DeliveryError> {
        let url = self.url_for(&action.endpoint);
        let request = match action.method {
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Put => self.client.put(&url),
            HttpMethod::Patch => self.client.patch(&url),
            HttpMethod::Delete => self.client.delete(&url),
        };

        let response = request
            .header("Idempotency-Key", &action.idempotency_key)
            .json(&action.payload)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

fn classify_request_error(error: reqwest::Error) -> DeliveryError {
    // Anything that never produced a response is transient by definition
    DeliveryError::Transient(error.to_string())
}

/// Map a non-2xx response onto the transient/rejected split.
///
/// Timeouts, rate limits, and server errors are worth retrying in order;
/// every other client error is a rejection the server will never accept as-is.
fn classify_status(status: StatusCode, body: &str) -> DeliveryError {
    let message = if body.trim().is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        body.trim().to_string()
    };

    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        DeliveryError::Transient(message)
    } else {
        DeliveryError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

fn normalize_base_url(raw: String) -> Result<String, DeliveryError> {
    let trimmed = raw.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.trim_end_matches('/').to_string())
    } else {
        Err(DeliveryError::Rejected {
            status: 0,
            message: "API base URL must include http:// or https://".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("https://api.example.com/".to_string()).unwrap(),
            "https://api.example.com"
        );
        assert!(normalize_base_url("api.example.com".to_string()).is_err());
        assert!(normalize_base_url(String::new()).is_err());
    }

    #[test]
    fn test_url_join() {
        let client = HttpApiClient::new("https://api.example.com/").unwrap();
        assert_eq!(
            client.url_for("/api/v1/attendance/clock-in"),
            "https://api.example.com/api/v1/attendance/clock-in"
        );
        assert_eq!(
            client.url_for("api/v1/records"),
            "https://api.example.com/api/v1/records"
        );
    }

    #[test]
    fn test_classify_status_transient() {
        for code in [500, 502, 503, 408, 429] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(
                matches!(classify_status(status, ""), DeliveryError::Transient(_)),
                "{code} should be transient"
            );
        }
    }

    #[test]
    fn test_classify_status_rejected() {
        for code in [400, 401, 403, 404, 409, 422] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(
                matches!(
                    classify_status(status, "no"),
                    DeliveryError::Rejected { status, .. } if status == code
                ),
                "{code} should be a rejection"
            );
        }
    }

    #[test]
    fn test_classify_status_keeps_body_message() {
        let error = classify_status(StatusCode::CONFLICT, "already clocked in");
        assert_eq!(
            error,
            DeliveryError::Rejected {
                status: 409,
                message: "already clocked in".to_string()
            }
        );
    }
}
