//! Bind-code exchange with the control plane.
//!
//! A short code typed by the operator is traded for the agent's device
//! identifier. The exchange is a single blocking HTTP call; callers on the
//! async side run it through `spawn_blocking`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::endpoint::{EndpointError, Origin};
use crate::session::StoreError;

const BIND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum BindError {
    #[error("bind code is empty")]
    EmptyCode,
    /// The control plane answered and said no. Holds its explanation.
    #[error("{0}")]
    Rejected(String),
    #[error("could not reach the control plane: {0}")]
    Network(String),
    #[error("unexpected response from the control plane: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Something that can exchange a bind code for a device id
pub trait Binder: Send + Sync {
    fn bind(&self, code: &str) -> Result<String, BindError>;
}

#[derive(Serialize)]
struct BindRequest<'a> {
    bind_code: &'a str,
}

#[derive(Deserialize)]
struct BindResponse {
    #[serde(default)]
    device_id: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// `POST /api/device/bind` against the origin's host
pub struct HttpBinder {
    endpoint: Url,
    agent: ureq::Agent,
}

impl HttpBinder {
    pub fn new(origin: &Origin, control_port: u16) -> Result<Self, EndpointError> {
        Ok(Self::with_endpoint(origin.bind_endpoint(control_port)?))
    }

    pub fn with_endpoint(endpoint: Url) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(BIND_TIMEOUT).build();
        Self { endpoint, agent }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl Binder for HttpBinder {
    fn bind(&self, code: &str) -> Result<String, BindError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(BindError::EmptyCode);
        }
        debug!(endpoint = %self.endpoint, "exchanging bind code");

        let response = self
            .agent
            .post(self.endpoint.as_str())
            .set("Content-Type", "application/json")
            .send_json(BindRequest { bind_code: code });

        match response {
            Ok(response) => {
                let body: BindResponse = response
                    .into_json()
                    .map_err(|e| BindError::InvalidResponse(e.to_string()))?;
                match body.device_id.filter(|id| !id.trim().is_empty()) {
                    Some(device_id) => {
                        info!(%device_id, "bind accepted");
                        Ok(device_id)
                    }
                    None => Err(BindError::Rejected(
                        "bind response did not include a device id".to_string(),
                    )),
                }
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                info!(status, "bind rejected");
                Err(BindError::Rejected(rejection_message(status, &body)))
            }
            Err(ureq::Error::Transport(transport)) => Err(BindError::Network(transport.to_string())),
        }
    }
}

/// Operator-facing text for a failed bind: the JSON `error` field, else the
/// plain-text body, else the status code
fn rejection_message(status: u16, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if !parsed.error.trim().is_empty() {
            return parsed.error;
        }
    }
    let text = body.trim();
    if text.is_empty() {
        format!("bind failed (HTTP {})", status)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_prefers_json_error() {
        assert_eq!(
            rejection_message(400, r#"{"error":"invalid or expired bind code"}"#),
            "invalid or expired bind code"
        );
    }

    #[test]
    fn rejection_falls_back_to_plain_text() {
        assert_eq!(
            rejection_message(404, "invalid or expired bind code\n"),
            "invalid or expired bind code"
        );
    }

    #[test]
    fn rejection_with_empty_body_names_status() {
        assert_eq!(rejection_message(502, ""), "bind failed (HTTP 502)");
    }

    #[test]
    fn empty_code_is_refused_locally() {
        let binder = HttpBinder::with_endpoint(Url::parse("http://127.0.0.1:9/api/device/bind").unwrap());
        assert!(matches!(binder.bind("   "), Err(BindError::EmptyCode)));
    }

    #[test]
    fn endpoint_comes_from_origin() {
        let origin = Origin::parse("http://10.0.0.2:3000").unwrap();
        let binder = HttpBinder::new(&origin, 8080).unwrap();
        assert_eq!(binder.endpoint().as_str(), "http://10.0.0.2:8080/api/device/bind");
    }
}
