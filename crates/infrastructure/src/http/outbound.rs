//! Reqwest-backed delivery transport
//!
//! Executes the requests the delivery pipeline builds, with per-delivery
//! timeout override and a fixed connect timeout. Client failures that never
//! produced an HTTP status are classified into the transport error taxonomy
//! (timeout / connect / request-build), which the pipeline maps onto the
//! infrastructure-vs-validation split.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use tracing::{debug, instrument};

use application::ports::{DeliveryRequest, DeliveryResponse, DeliveryTransport, TransportError};
use domain::entities::HttpMethod;

/// Configuration for the outbound client
#[derive(Debug, Clone)]
pub struct OutboundClientConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Fallback request timeout when a delivery sets none
    pub default_timeout: Duration,
    /// User agent string
    pub user_agent: String,
}

impl Default for OutboundClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            default_timeout: Duration::from_secs(30),
            user_agent: format!("RelayGate/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Delivery transport over a shared reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build the transport
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client cannot be built.
    pub fn new(config: &OutboundClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.default_timeout)
            .user_agent(&config.user_agent)
            .build()?;
        Ok(Self { client })
    }

    fn method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }

    fn headers(pairs: &[(String, String)]) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::with_capacity(pairs.len());
        for (name, value) in pairs {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidRequest(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::InvalidRequest(format!("header {name}: {e}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    fn classify(err: &reqwest::Error, timeout: Duration) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(timeout)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_builder() || err.is_request() {
            TransportError::InvalidRequest(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

#[async_trait]
impl DeliveryTransport for ReqwestTransport {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn execute(
        &self,
        request: &DeliveryRequest,
    ) -> Result<DeliveryResponse, TransportError> {
        let headers = Self::headers(&request.headers)?;

        let mut builder = self
            .client
            .request(Self::method(request.method), &request.url)
            .headers(headers)
            .timeout(request.timeout);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Self::classify(&e, request.timeout))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Self::classify(&e, request.timeout))?;

        debug!(status, body_len = body.len(), "Outbound request completed");
        Ok(DeliveryResponse { status, body })
    }
}
