//! HTTP client for webhook delivery.
//!
//! Wraps `reqwest` with the per-attempt timeout, fixed identification
//! headers, and error categorization the retry state machine depends on.
//! Connections are pooled across deliveries to the same host.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::{
    error::{DeliveryError, Result},
    DELIVERY_ID_HEADER, EVENT_TYPE_HEADER, SIGNATURE_HEADER,
};

/// Configuration for the delivery HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// User agent identifying the dispatcher.
    pub user_agent: String,
    /// Maximum redirects to follow.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: crate::USER_AGENT.to_string(),
            max_redirects: 3,
            verify_tls: true,
        }
    }
}

/// Wire-level context for one delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Delivery this attempt belongs to, sent in the delivery-id header.
    pub delivery_id: tasklane_core::DeliveryId,
    /// Wire name of the event, sent in the event-type header.
    pub event_type: String,
    /// Destination URL.
    pub url: String,
    /// Finalized envelope bytes; identical on every attempt of a delivery.
    pub body: Bytes,
    /// Precomputed signature header value, when the subscription signs.
    pub signature: Option<String>,
    /// 1-based attempt number, used for tracing only.
    pub attempt_number: u32,
}

/// Response from a delivery attempt that reached the endpoint.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body, truncated to a bounded size.
    pub body: String,
    /// Wall-clock duration of the request.
    pub duration: Duration,
    /// Whether the status was 2xx.
    pub is_success: bool,
}

/// HTTP client shared by all delivery workers.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a delivery client from configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the underlying HTTP client cannot be
    /// built with the given settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a delivery client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the client cannot be built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// POSTs one delivery attempt to the endpoint.
    ///
    /// Any HTTP response, success or not, resolves to `Ok(DeliveryResponse)`;
    /// the caller classifies the status. Only transport-level problems become
    /// errors:
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::Timeout`] when the per-attempt timeout elapses
    /// - [`DeliveryError::Network`] for connection and transport failures
    pub async fn deliver(&self, request: DeliveryRequest) -> Result<DeliveryResponse> {
        let span = info_span!(
            "webhook_delivery",
            delivery_id = %request.delivery_id,
            url = %request.url,
            attempt = request.attempt_number
        );

        async move {
            let start = std::time::Instant::now();

            let mut http_request = self
                .client
                .post(&request.url)
                .header("content-type", "application/json")
                .header(EVENT_TYPE_HEADER, &request.event_type)
                .header(DELIVERY_ID_HEADER, request.delivery_id.to_string())
                .body(request.body.clone());

            if let Some(signature) = &request.signature {
                http_request = http_request.header(SIGNATURE_HEADER, signature);
            }

            let response = match http_request.send().await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(
                        duration_ms = start.elapsed().as_millis(),
                        error = %e,
                        "delivery request failed before a response"
                    );
                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let duration = start.elapsed();
            let status_code = response.status().as_u16();
            let is_success = response.status().is_success();

            tracing::debug!(
                status = status_code,
                duration_ms = duration.as_millis(),
                "received endpoint response"
            );

            let body = read_truncated_body(response).await;

            Ok(DeliveryResponse { status_code, body, duration, is_success })
        }
        .instrument(span)
        .await
    }
}

/// Largest response body slice retained for error reporting.
const MAX_CAPTURED_BODY: usize = 4 * 1024;

/// Reads the response body, keeping only a bounded prefix.
async fn read_truncated_body(response: reqwest::Response) -> String {
    match response.bytes().await {
        Ok(bytes) if bytes.len() > MAX_CAPTURED_BODY => {
            let prefix = String::from_utf8_lossy(&bytes[..MAX_CAPTURED_BODY]);
            format!("{prefix}... (truncated)")
        },
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => format!("[failed to read response body: {e}]"),
    }
}
