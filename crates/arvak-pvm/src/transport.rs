//! RPC transport to a QVM-NG service.
//!
//! [`Transport`] is the seam between the session/job lifecycle and the wire.
//! [`HttpTransport`] POSTs each request as JSON to the service endpoint; tests
//! substitute an in-process implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::PvmConfig;
use crate::protocol::Request;

/// Errors raised while carrying a request to the service and back.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The service could not be reached at all.
    #[error("connection failed: {0}")]
    Unreachable(String),

    /// The service was reached but did not answer in time.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The service answered with an error status.
    #[error("service error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// Any other HTTP-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Raw body of a successful reply.
///
/// Most methods answer with JSON; `version` answers with plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply(String);

impl Reply {
    pub fn new(body: impl Into<String>) -> Self {
        Self(body.into())
    }

    /// The body as text.
    pub fn text(&self) -> &str {
        &self.0
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.0)
    }
}

/// Carries one RPC request to the service.
///
/// Implementations are shared by every session and job created from the same
/// connection, and must tolerate concurrent independent calls.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable location of the service, used in error messages.
    fn endpoint(&self) -> &str;

    /// Send `request` and wait for the reply.
    async fn send(&self, request: &Request) -> Result<Reply, TransportError>;
}

/// Error body returned by QVM-NG on failure.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Extract a readable message from an error reply body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            status: Some(status),
            error_type,
        }) => match error_type {
            Some(kind) => format!("{kind}: {status}"),
            None => status,
        },
        _ => body.trim().to_string(),
    }
}

/// JSON-over-HTTP transport.
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Create a transport for `endpoint` with default timeouts.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_timeouts(endpoint, Duration::from_secs(60), Duration::from_secs(10))
    }

    /// Create a transport with explicit request and connect timeouts.
    pub fn with_timeouts(
        endpoint: impl Into<String>,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    /// Create a transport from a loaded configuration.
    pub fn from_config(config: &PvmConfig) -> Result<Self, TransportError> {
        Self::with_timeouts(
            &config.endpoint,
            Duration::from_secs(config.timeout_seconds),
            Duration::from_secs(config.connect_timeout_seconds),
        )
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[instrument(skip(self, request), fields(method = request.method()))]
    async fn send(&self, request: &Request) -> Result<Reply, TransportError> {
        debug!("POST {}", self.endpoint);

        let resp = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    TransportError::Unreachable(e.to_string())
                } else if e.is_timeout() {
                    TransportError::Timeout(e.to_string())
                } else {
                    TransportError::Http(e)
                }
            })?;

        let status = resp.status();
        let body = resp.text().await?;

        if status.is_success() {
            Ok(Reply(body))
        } else {
            Err(TransportError::Remote {
                status: status.as_u16(),
                message: error_message(&body),
            })
        }
    }
}
