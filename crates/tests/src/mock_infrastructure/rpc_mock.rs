//! Mock JSON-RPC upstream built on mockito.
//!
//! Provides gateway-specific helpers: plain results, JSON-RPC error bodies,
//! raw HTTP statuses and hit-count expectations for cache-coalescing and
//! selection tests.

use mockito::{Mock, Server, ServerGuard};
use serde_json::{json, Value};

/// Builder for a mock upstream node.
pub struct RpcMockBuilder {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

impl RpcMockBuilder {
    pub async fn new() -> Self {
        Self { server: Server::new_async().await, mocks: Vec::new() }
    }

    /// Base URL of the mock node.
    #[must_use]
    pub fn url(&self) -> String {
        self.server.url()
    }

    /// Responds to any POST with a successful JSON-RPC result.
    pub async fn mock_result(&mut self, result: &Value) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"jsonrpc": "2.0", "id": 1, "result": result}).to_string())
            .create_async()
            .await;
        self.mocks.push(mock);
        self
    }

    /// Same as [`mock_result`](Self::mock_result) but asserts the exact
    /// number of upstream hits.
    pub async fn mock_result_expect(&mut self, result: &Value, hits: usize) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"jsonrpc": "2.0", "id": 1, "result": result}).to_string())
            .expect(hits)
            .create_async()
            .await;
        self.mocks.push(mock);
        self
    }

    /// Responds with a JSON-RPC error body (HTTP 200).
    pub async fn mock_rpc_error(&mut self, code: i64, message: &str) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"jsonrpc": "2.0", "id": 1, "error": {"code": code, "message": message}})
                    .to_string(),
            )
            .create_async()
            .await;
        self.mocks.push(mock);
        self
    }

    /// Responds with a raw HTTP status and body.
    pub async fn mock_status(&mut self, status: usize, body: &str) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .with_status(status)
            .with_body(body.to_string())
            .create_async()
            .await;
        self.mocks.push(mock);
        self
    }

    /// Responds with an arbitrary raw body (used for batch and oversized
    /// replies).
    pub async fn mock_raw(&mut self, status: usize, content_type: &str, body: String) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .with_status(status)
            .with_header("content-type", content_type)
            .with_body(body)
            .create_async()
            .await;
        self.mocks.push(mock);
        self
    }

    /// Asserts all registered hit-count expectations.
    pub async fn assert_expectations(&self) {
        for mock in &self.mocks {
            mock.assert_async().await;
        }
    }
}
