//! Mock webhook receivers for delivery testing.
//!
//! Thin wrapper over `wiremock` that speaks in delivery outcomes instead of
//! raw response templates. Mocks mounted earlier take precedence, so
//! fail-then-recover sequences are expressed by mounting bounded failure
//! mocks ahead of the steady-state response.

use std::time::Duration;

use http::StatusCode;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, Request, ResponseTemplate,
};

/// A mock third-party endpoint receiving webhook POSTs.
pub struct ReceiverMock {
    server: MockServer,
}

impl ReceiverMock {
    /// Starts a mock receiver on a random local port.
    pub async fn start() -> Self {
        Self { server: MockServer::start().await }
    }

    /// Base URL of the receiver.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Full URL for a path on this receiver.
    pub fn endpoint_url(&self, endpoint_path: &str) -> String {
        format!("{}{endpoint_path}", self.server.uri())
    }

    /// Responds 200 to every POST on the path.
    pub async fn respond_ok(&self, endpoint_path: &str) {
        self.respond_status(endpoint_path, StatusCode::OK).await;
    }

    /// Responds with a fixed status to every POST on the path.
    pub async fn respond_status(&self, endpoint_path: &str, status: StatusCode) {
        Mock::given(method("POST"))
            .and(path(endpoint_path))
            .respond_with(ResponseTemplate::new(status.as_u16()))
            .mount(&self.server)
            .await;
    }

    /// Fails the first `failures` POSTs with the given status, then responds
    /// 200.
    pub async fn respond_ok_after_failures(
        &self,
        endpoint_path: &str,
        failures: u64,
        status: StatusCode,
    ) {
        Mock::given(method("POST"))
            .and(path(endpoint_path))
            .respond_with(ResponseTemplate::new(status.as_u16()))
            .up_to_n_times(failures)
            .mount(&self.server)
            .await;
        self.respond_ok(endpoint_path).await;
    }

    /// Responds 200 after a fixed delay, for timeout scenarios.
    pub async fn respond_ok_after_delay(&self, endpoint_path: &str, delay: Duration) {
        Mock::given(method("POST"))
            .and(path(endpoint_path))
            .respond_with(ResponseTemplate::new(StatusCode::OK.as_u16()).set_delay(delay))
            .mount(&self.server)
            .await;
    }

    /// Every request received, in arrival order.
    pub async fn received(&self) -> Vec<Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    /// Requests received on one path, in arrival order.
    pub async fn received_on(&self, endpoint_path: &str) -> Vec<Request> {
        self.received()
            .await
            .into_iter()
            .filter(|request| request.url.path() == endpoint_path)
            .collect()
    }

    /// Asserts the total number of requests received.
    pub async fn assert_request_count(&self, expected: usize) {
        let received = self.received().await;
        assert_eq!(
            received.len(),
            expected,
            "expected {expected} requests, received {}",
            received.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receiver_starts_with_local_url() {
        let receiver = ReceiverMock::start().await;
        assert!(receiver.url().starts_with("http://"));
        assert_eq!(receiver.received().await.len(), 0);
    }

    #[tokio::test]
    async fn failure_sequence_recovers() {
        let receiver = ReceiverMock::start().await;
        receiver
            .respond_ok_after_failures("/hooks", 2, StatusCode::INTERNAL_SERVER_ERROR)
            .await;

        let client = reqwest::Client::new();
        let url = receiver.endpoint_url("/hooks");
        let post = |client: reqwest::Client, url: String| async move {
            client.post(&url).send().await.map(|r| r.status().as_u16()).unwrap_or(0)
        };

        assert_eq!(post(client.clone(), url.clone()).await, 500);
        assert_eq!(post(client.clone(), url.clone()).await, 500);
        assert_eq!(post(client, url).await, 200);
    }
}
