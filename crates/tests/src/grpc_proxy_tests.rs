//! End-to-end tests for the transparent gRPC proxy over HTTP/2 cleartext.

use crate::mock_infrastructure::grpc_mock::GrpcMockServer;
use bytes::Bytes;
use chaingate_core::grpc::channel::{boxed_body, decode_frame, encode_frame, ChannelError, GrpcChannel};
use chaingate_core::grpc::GrpcProxy;
use chaingate_core::store::{GatewayStore, MemoryStore};
use chaingate_core::types::{Protocol, ReadyUpstream, SecretKey};
use http_body_util::BodyExt;
use std::{sync::Arc, time::Duration};

const ACCESS_KEY: &str = "fedcba9876543210fedcba9876543210";

async fn store_with_secret() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .put_secret_key(SecretKey {
            access_key: ACCESS_KEY.to_string(),
            secret_key: "s".repeat(64),
            group: "core".to_string(),
            service: "indexer".to_string(),
            ..SecretKey::default()
        })
        .await
        .unwrap();
    store
}

/// Serves the proxy on an ephemeral port and returns a channel to it.
async fn serve_proxy(proxy: Arc<GrpcProxy>) -> GrpcChannel {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = proxy.router();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    GrpcChannel::connect(&addr.to_string()).unwrap()
}

#[tokio::test]
async fn test_health_check_serves_without_auth() {
    let store = store_with_secret().await;
    let proxy = Arc::new(GrpcProxy::new(store as Arc<dyn GatewayStore>, Duration::from_secs(300)));
    let channel = serve_proxy(proxy).await;

    let reply = channel.unary("/grpc.health.v1.Health/Check", &[]).await.unwrap();
    // HealthCheckResponse { status: SERVING } == field 1, varint 1
    assert_eq!(reply.as_ref(), &[0x08, 0x01]);
}

#[tokio::test]
async fn test_health_list_is_unimplemented() {
    let store = store_with_secret().await;
    let proxy = Arc::new(GrpcProxy::new(store as Arc<dyn GatewayStore>, Duration::from_secs(300)));
    let channel = serve_proxy(proxy).await;

    let result = channel.unary("/grpc.health.v1.Health/List", &[]).await;
    match result {
        Err(ChannelError::Status { code, .. }) => assert_eq!(code, 12),
        other => panic!("expected UNIMPLEMENTED, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_access_key_is_unauthenticated() {
    let store = store_with_secret().await;
    let proxy = Arc::new(GrpcProxy::new(store as Arc<dyn GatewayStore>, Duration::from_secs(300)));
    let channel = serve_proxy(proxy).await;

    let result = channel.unary("/protocol.Wallet/GetNowBlock", &[]).await;
    match result {
        Err(ChannelError::Status { code, .. }) => assert_eq!(code, 16),
        other => panic!("expected UNAUTHENTICATED, got {other:?}"),
    }
}

async fn call_with_headers(
    channel: &GrpcChannel,
    path: &str,
    headers: &[(&str, &str)],
) -> (http::StatusCode, http::HeaderMap, Bytes, Option<http::HeaderMap>) {
    let mut builder = http::Request::builder()
        .method(http::Method::POST)
        .uri(path)
        .header(http::header::CONTENT_TYPE, "application/grpc")
        .header(http::header::TE, "trailers");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder
        .body(boxed_body(http_body_util::Full::new(Bytes::from(encode_frame(&[])))))
        .unwrap();

    let response = channel.forward(request).await.unwrap();
    let (parts, body) = response.into_parts();
    let collected = body.collect().await.unwrap();
    let trailers = collected.trailers().cloned();
    (parts.status, parts.headers, collected.to_bytes(), trailers)
}

#[tokio::test]
async fn test_empty_chain_id_is_invalid_argument() {
    let store = store_with_secret().await;
    let proxy = Arc::new(GrpcProxy::new(store as Arc<dyn GatewayStore>, Duration::from_secs(300)));
    let channel = serve_proxy(proxy).await;

    let (_, headers, _, _) = call_with_headers(
        &channel,
        "/protocol.Wallet/GetNowBlock",
        &[("accesskey", ACCESS_KEY)],
    )
    .await;

    assert_eq!(headers.get("grpc-status").unwrap(), "3");
}

#[tokio::test]
async fn test_unknown_chain_is_unavailable() {
    let store = store_with_secret().await;
    let proxy = Arc::new(GrpcProxy::new(store as Arc<dyn GatewayStore>, Duration::from_secs(300)));
    let channel = serve_proxy(proxy).await;

    let (_, headers, _, _) = call_with_headers(
        &channel,
        "/protocol.Wallet/GetNowBlock",
        &[("accesskey", ACCESS_KEY), ("chainid", "999")],
    )
    .await;

    assert_eq!(headers.get("grpc-status").unwrap(), "14");
}

#[tokio::test]
async fn test_forwarding_roundtrip_through_proxy() {
    // message bytes for "field 1 = 42"
    let upstream = GrpcMockServer::start(vec![0x08, 0x2a]).await;

    let store = store_with_secret().await;
    store
        .put_ready_upstream(ReadyUpstream {
            chain_id: "728126428".to_string(),
            source: "custom/grpc".to_string(),
            rpc: upstream.target(),
            protocol: Protocol::Grpc,
            created_at: 0,
        })
        .await
        .unwrap();

    let proxy =
        Arc::new(GrpcProxy::new(store.clone() as Arc<dyn GatewayStore>, Duration::from_secs(300)));
    proxy.refresh_upstreams().await;
    let channel = serve_proxy(proxy).await;

    // network alias resolves to the tron mainnet chain id
    let (status, headers, body, trailers) = call_with_headers(
        &channel,
        "/protocol.Wallet/GetNowBlock",
        &[("accesskey", ACCESS_KEY), ("network", "tron-mainnet")],
    )
    .await;

    assert_eq!(status, http::StatusCode::OK);
    assert!(
        headers.get("grpc-status").is_none(),
        "forwarded reply carries its status in trailers, not headers"
    );
    let message = decode_frame(&body).unwrap();
    assert_eq!(message.as_ref(), &[0x08, 0x2a], "reply message must pass through unchanged");
    let trailers = trailers.expect("trailers expected");
    assert_eq!(trailers.get("grpc-status").unwrap(), "0");
}

#[tokio::test]
async fn test_refresh_tracks_store_changes() {
    let first = GrpcMockServer::start(vec![0x08, 0x01]).await;
    let second = GrpcMockServer::start(vec![0x08, 0x02]).await;

    let store = store_with_secret().await;
    store
        .put_ready_upstream(ReadyUpstream {
            chain_id: "chihuahua-1".to_string(),
            source: "custom/grpc".to_string(),
            rpc: first.target(),
            protocol: Protocol::Grpc,
            created_at: 0,
        })
        .await
        .unwrap();

    let proxy =
        Arc::new(GrpcProxy::new(store.clone() as Arc<dyn GatewayStore>, Duration::from_secs(300)));
    proxy.refresh_upstreams().await;

    // Swap the pool to the second node and refresh again.
    store
        .put_ready_upstream(ReadyUpstream {
            chain_id: "chihuahua-1".to_string(),
            source: "custom/grpc".to_string(),
            rpc: second.target(),
            protocol: Protocol::Grpc,
            created_at: 1,
        })
        .await
        .unwrap();
    proxy.refresh_upstreams().await;

    let channel = serve_proxy(proxy).await;
    let (_, _, body, _) = call_with_headers(
        &channel,
        "/cosmos.bank.v1beta1.Query/TotalSupply",
        &[("accesskey", ACCESS_KEY), ("chainid", "chihuahua-1")],
    )
    .await;

    let message = decode_frame(&body).unwrap();
    assert_eq!(message.as_ref(), &[0x08, 0x02], "calls must land on the refreshed endpoint");
}
