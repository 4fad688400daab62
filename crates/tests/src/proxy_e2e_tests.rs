//! End-to-end JSON-RPC proxy tests: the real router in front of mock
//! upstream nodes.

use crate::mock_infrastructure::rpc_mock::RpcMockBuilder;
use axum::body::Body;
use chaingate_core::proxy::ProxyEngine;
use chaingate_core::store::{GatewayStore, MemoryStore};
use chaingate_core::types::{ConfigEntry, Protocol, ReadyUpstream, SecretKey};
use http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use server::router::{gateway_router, GatewayState};
use std::sync::Arc;
use tower::ServiceExt;

const ACCESS_KEY: &str = "0123456789abcdef0123456789abcdef";

async fn state_with_ready(rows: Vec<ReadyUpstream>) -> GatewayState {
    let store = Arc::new(MemoryStore::new());
    store
        .put_secret_key(SecretKey {
            access_key: ACCESS_KEY.to_string(),
            secret_key: "s".repeat(64),
            group: "core".to_string(),
            service: "wallet".to_string(),
            ..SecretKey::default()
        })
        .await
        .unwrap();
    for row in rows {
        store.put_ready_upstream(row).await.unwrap();
    }
    let store: Arc<dyn GatewayStore> = store;
    GatewayState { engine: Arc::new(ProxyEngine::new(store.clone()).unwrap()), store }
}

fn ready(chain_id: &str, source: &str, rpc: &str) -> ReadyUpstream {
    ReadyUpstream {
        chain_id: chain_id.to_string(),
        source: source.to_string(),
        rpc: rpc.to_string(),
        protocol: Protocol::Jsonrpc,
        created_at: 0,
    }
}

fn post_rpc(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_post_forwards_and_tags_response() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_result(&json!("0x10d4f")).await;

    let state = state_with_ready(vec![ready("56", "chainlist", &node.url())]).await;
    let app = gateway_router(state);

    let response = app
        .oneshot(post_rpc(
            &format!("/v1/56/{ACCESS_KEY}"),
            r#"{"jsonrpc":"2.0","id":1,"method":"eth_blockNumber","params":[]}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-cgv2-version").unwrap(), "v2.1");
    assert_eq!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["result"], "0x10d4f");
}

#[tokio::test]
async fn test_v2_route_with_chain_query() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_result(&json!("0x38")).await;

    let state = state_with_ready(vec![ready("56", "chainlist", &node.url())]).await;
    let app = gateway_router(state);

    let response = app
        .oneshot(post_rpc(
            &format!("/v2/{ACCESS_KEY}?chainId=56"),
            r#"{"jsonrpc":"2.0","id":7,"method":"eth_chainId","params":[]}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["result"], "0x38");
}

#[tokio::test]
async fn test_fanout_recovers_from_erroring_upstream() {
    // One node answers with a retryable JSON-RPC error, the other succeeds.
    // Whatever order the shuffle picks, the client must see the success.
    let mut failing = RpcMockBuilder::new().await;
    failing.mock_rpc_error(-32000, "overloaded").await;
    let mut healthy = RpcMockBuilder::new().await;
    healthy.mock_result(&json!("0x10d4f")).await;

    let state = state_with_ready(vec![ready(
        "56",
        "chainlist",
        &format!("{},{}", failing.url(), healthy.url()),
    )])
    .await;
    let app = gateway_router(state);

    let response = app
        .oneshot(post_rpc(
            &format!("/v1/56/{ACCESS_KEY}"),
            r#"{"jsonrpc":"2.0","id":1,"method":"eth_blockNumber","params":[]}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["result"], "0x10d4f", "fan-out must land on the healthy node");
}

#[tokio::test]
async fn test_batch_body_passes_through() {
    let batch = json!([
        {"jsonrpc": "2.0", "id": 1, "result": 1},
        {"jsonrpc": "2.0", "id": 2, "error": {"code": -32601, "message": "m"}}
    ]);
    let mut node = RpcMockBuilder::new().await;
    node.mock_raw(200, "application/json", batch.to_string()).await;

    let state = state_with_ready(vec![ready("56", "chainlist", &node.url())]).await;
    let app = gateway_router(state);

    let response = app
        .oneshot(post_rpc(
            &format!("/v1/56/{ACCESS_KEY}"),
            r#"[{"id":1,"method":"eth_chainId"},{"id":2,"method":"eth_foo"}]"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value.as_array().unwrap().len(), 2);
    assert_eq!(value[1]["error"]["code"], -32601);
}

#[tokio::test]
async fn test_tx_method_routed_to_paid_source() {
    // Global route rule sends eth_sendRawTransaction on chain 56 to paid.
    let mut paid_node = RpcMockBuilder::new().await;
    paid_node.mock_result_expect(&json!("0xtxhash"), 1).await;
    let mut free_node = RpcMockBuilder::new().await;
    free_node.mock_result_expect(&json!("0xother"), 0).await;

    let state = state_with_ready(vec![
        ready("56", "paid", &paid_node.url()),
        ready("56", "chainlist", &free_node.url()),
    ])
    .await;
    state
        .store
        .put_config(ConfigEntry {
            module: "upstream".to_string(),
            key: "route_rules".to_string(),
            value: json!({
                "eth_sendRawTransaction": {"source": "paid", "chainIds": "1,56,97"}
            })
            .to_string(),
        })
        .await
        .unwrap();
    let app = gateway_router(state);

    let response = app
        .oneshot(post_rpc(
            &format!("/v1/56/{ACCESS_KEY}"),
            r#"{"jsonrpc":"2.0","id":1,"method":"eth_sendRawTransaction","params":["0xdead"]}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    paid_node.assert_expectations().await;
    free_node.assert_expectations().await;
}

#[tokio::test]
async fn test_unknown_source_is_rejected_before_fanout() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_result(&json!("0x1")).await;

    let state = state_with_ready(vec![ready("56", "chainlist", &node.url())]).await;
    let app = gateway_router(state);

    let response = app
        .oneshot(post_rpc(
            &format!("/v2/{ACCESS_KEY}?chainId=56&source=custom%2Fmissing"),
            r#"{"jsonrpc":"2.0","id":1,"method":"eth_chainId","params":[]}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.as_ref(), b"source not support, no available nodes");
}

#[tokio::test]
async fn test_large_response_streams_through() {
    // 6 MiB body exceeds the buffering threshold; it must arrive intact.
    let oversized = "x".repeat(6 * 1024 * 1024);
    let mut node = RpcMockBuilder::new().await;
    node.mock_raw(200, "application/octet-stream", oversized.clone()).await;

    let state = state_with_ready(vec![ready("56", "chainlist", &node.url())]).await;
    let app = gateway_router(state);

    let response = app
        .oneshot(post_rpc(
            &format!("/v1/56/{ACCESS_KEY}"),
            r#"{"jsonrpc":"2.0","id":1,"method":"eth_getLogs","params":[{}]}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.len(), oversized.len(), "streamed body must arrive complete");
}

#[tokio::test]
async fn test_upstream_http_error_status_forwarded() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_status(429, "rate limited").await;

    let state = state_with_ready(vec![ready("56", "chainlist", &node.url())]).await;
    let app = gateway_router(state);

    let response = app
        .oneshot(post_rpc(
            &format!("/v1/56/{ACCESS_KEY}"),
            r#"{"jsonrpc":"2.0","id":1,"method":"eth_chainId","params":[]}"#,
        ))
        .await
        .unwrap();

    assert_eq!(
        response.status(),
        StatusCode::TOO_MANY_REQUESTS,
        "final upstream status is forwarded after the fan-out is exhausted"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.as_ref(), b"rate limited");
}
