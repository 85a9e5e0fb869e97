//! Outbound delivery transport port

use std::time::Duration;

use async_trait::async_trait;
use domain::entities::HttpMethod;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

/// A fully built outbound request
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// HTTP method
    pub method: HttpMethod,
    /// Target URL
    pub url: String,
    /// Request headers, in insertion order
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

/// The target's answer
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: String,
}

impl DeliveryResponse {
    /// Whether the status is 2xx
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Transport-level failures: the request never produced an HTTP status
///
/// Every variant is an infrastructure failure: retryable and counted by
/// the circuit breaker.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The configured timeout elapsed
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// TCP/TLS connection failed
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Name resolution failed
    #[error("DNS resolution failed: {0}")]
    Dns(String),

    /// The request could not be built (bad URL, bad header)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Anything else the client reported
    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether the failure is a malformed request rather than the network
    ///
    /// Malformed requests are configuration errors: terminal, and they do
    /// not feed the breaker.
    #[must_use]
    pub const fn is_invalid_request(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }
}

/// Port for issuing outbound HTTP deliveries
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Execute one request
    async fn execute(
        &self,
        request: &DeliveryRequest,
    ) -> Result<DeliveryResponse, TransportError>;
}
