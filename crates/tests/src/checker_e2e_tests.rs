//! Checker scenarios against live mock upstream nodes.

use crate::mock_infrastructure::rpc_mock::RpcMockBuilder;
use chaingate_core::checker::{
    cache::ResponseCache, CheckRule, CheckStrategy, CheckerSet, HealthCheckCondition,
    HealthCheckEngine, Matcher,
};
use chaingate_core::registry::UpstreamRegistry;
use chaingate_core::store::{GatewayStore, MemoryStore};
use chaingate_core::types::{Protocol, Upstream};
use serde_json::json;
use std::{sync::Arc, time::Duration};

fn matcher(match_type: &str, key: &str, value: &str) -> Matcher {
    Matcher { match_type: match_type.to_string(), key: key.to_string(), value: value.to_string() }
}

fn condition(
    strategy: CheckStrategy,
    payload: &str,
    matchers: Vec<Matcher>,
) -> HealthCheckCondition {
    HealthCheckCondition {
        ignore: Vec::new(),
        check_strategy: strategy,
        payload: payload.to_string(),
        matchers,
    }
}

const CHAIN_ID_PAYLOAD: &str = r#"{"jsonrpc":"2.0","method":"eth_chainId","params":[],"id":1}"#;
const BLOCK_PAYLOAD: &str = r#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":1}"#;

#[tokio::test]
async fn test_value_match_against_live_nodes() {
    let mut right_chain = RpcMockBuilder::new().await;
    right_chain.mock_result(&json!("0x38")).await;
    let mut wrong_chain = RpcMockBuilder::new().await;
    wrong_chain.mock_result(&json!("0x1")).await;

    let set = CheckerSet::new(Duration::from_secs(60)).unwrap();
    let cache = Arc::new(ResponseCache::new());
    let mut cond = condition(
        CheckStrategy::ValueMatch,
        CHAIN_ID_PAYLOAD,
        vec![matcher("=", "result", "0x38")],
    );
    let urls = vec![right_chain.url(), wrong_chain.url()];

    let ret = set.check("56", &urls, &mut cond, &cache).await.unwrap();

    assert_eq!(ret.get(&right_chain.url()), Some(&true));
    assert_eq!(ret.get(&wrong_chain.url()), Some(&false));
}

#[tokio::test]
async fn test_block_height_tolerance_over_http() {
    let mut node_100 = RpcMockBuilder::new().await;
    node_100.mock_result(&json!("0x64")).await;
    let mut node_98 = RpcMockBuilder::new().await;
    node_98.mock_result(&json!("0x62")).await;

    let set = CheckerSet::new(Duration::from_secs(60)).unwrap();
    let cache = Arc::new(ResponseCache::new());
    let mut cond = condition(
        CheckStrategy::BlockHeight,
        BLOCK_PAYLOAD,
        vec![matcher("<=", "result", "0x2")],
    );
    let urls = vec![node_100.url(), node_98.url()];

    let ret = set.check("1", &urls, &mut cond, &cache).await.unwrap();

    assert_eq!(ret.get(&node_100.url()), Some(&true));
    assert_eq!(ret.get(&node_98.url()), Some(&true), "lag 2 passes a <= 2 tolerance");
}

#[tokio::test]
async fn test_simple_checker_over_http() {
    let mut healthy = RpcMockBuilder::new().await;
    healthy.mock_result(&json!("Geth/v1.13")).await;
    let mut broken = RpcMockBuilder::new().await;
    broken.mock_status(500, "boom").await;
    let mut erroring = RpcMockBuilder::new().await;
    erroring.mock_rpc_error(-32000, "behind").await;

    let set = CheckerSet::new(Duration::from_secs(60)).unwrap();
    let cache = Arc::new(ResponseCache::new());
    let mut cond = condition(CheckStrategy::Simple, CHAIN_ID_PAYLOAD, Vec::new());
    let urls = vec![healthy.url(), broken.url(), erroring.url()];

    let ret = set.check("1", &urls, &mut cond, &cache).await.unwrap();

    assert_eq!(ret.get(&healthy.url()), Some(&true));
    assert_eq!(ret.get(&broken.url()), Some(&false));
    assert_eq!(ret.get(&erroring.url()), Some(&false), "an rpc error body is not healthy");
}

#[tokio::test]
async fn test_identical_probes_coalesce_through_cache() {
    // Two conditions share the same payload; the node must be hit once.
    let mut node = RpcMockBuilder::new().await;
    node.mock_result_expect(&json!("0x38"), 1).await;

    let set = CheckerSet::new(Duration::from_secs(60)).unwrap();
    let cache = Arc::new(ResponseCache::new());
    let mut conditions = vec![
        condition(CheckStrategy::Simple, CHAIN_ID_PAYLOAD, Vec::new()),
        condition(
            CheckStrategy::ValueMatch,
            CHAIN_ID_PAYLOAD,
            vec![matcher("=", "result", "0x38")],
        ),
    ];

    let ret = set
        .check_conditions("56", vec![node.url()], &mut conditions, &cache)
        .await
        .unwrap();

    assert_eq!(ret.get(&node.url()), Some(&true));
    node.assert_expectations().await;
}

#[tokio::test]
async fn test_full_tick_promotes_healthy_subset() {
    let mut fresh = RpcMockBuilder::new().await;
    fresh.mock_result(&json!("0x64")).await;
    let mut stale = RpcMockBuilder::new().await;
    stale.mock_result(&json!("0x32")).await; // 50 blocks, far behind

    let store = Arc::new(MemoryStore::new());
    store
        .put_upstream(Upstream {
            chain_id: "1".to_string(),
            source: "chainlist".to_string(),
            rpc: format!("{},{}", fresh.url(), stale.url()),
            protocol: Protocol::Jsonrpc,
            ready: false,
        })
        .await
        .unwrap();
    store
        .save_check_rule(CheckRule {
            chain_id: "1".to_string(),
            source: "chainlist".to_string(),
            protocol: Protocol::Jsonrpc,
            rules: vec![condition(
                CheckStrategy::BlockHeight,
                BLOCK_PAYLOAD,
                vec![matcher("<=", "result", "0x2")],
            )],
            disabled: false,
        })
        .await
        .unwrap();

    let registry = Arc::new(UpstreamRegistry::new(store.clone() as Arc<dyn GatewayStore>));
    let engine = Arc::new(
        HealthCheckEngine::new(
            store.clone() as Arc<dyn GatewayStore>,
            registry,
            Duration::from_secs(60),
            Duration::from_secs(60),
        )
        .unwrap(),
    );

    engine.run_tick().await;

    let ready = store.list_ready_upstreams_by_chain_id("1", None).await.unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].rpc, fresh.url(), "only the fresh node survives the lag check");
    assert_eq!(ready[0].source, "chainlist");
}

#[tokio::test]
async fn test_tick_publish_skipped_when_unchanged() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_result(&json!("Geth/v1.13")).await;

    let store = Arc::new(MemoryStore::new());
    store
        .put_upstream(Upstream {
            chain_id: "1".to_string(),
            source: "manual".to_string(),
            rpc: node.url(),
            protocol: Protocol::Jsonrpc,
            ready: false,
        })
        .await
        .unwrap();
    store
        .save_check_rule(CheckRule {
            chain_id: "1".to_string(),
            source: "manual".to_string(),
            protocol: Protocol::Jsonrpc,
            rules: vec![condition(CheckStrategy::Simple, CHAIN_ID_PAYLOAD, Vec::new())],
            disabled: false,
        })
        .await
        .unwrap();

    let registry = Arc::new(UpstreamRegistry::new(store.clone() as Arc<dyn GatewayStore>));
    let engine = Arc::new(
        HealthCheckEngine::new(
            store.clone() as Arc<dyn GatewayStore>,
            registry,
            Duration::from_secs(60),
            Duration::from_secs(60),
        )
        .unwrap(),
    );

    engine.run_tick().await;
    let first = store.list_ready_upstreams_by_chain_id("1", None).await.unwrap();
    assert_eq!(first.len(), 1);
    let first_created = first[0].created_at;

    engine.run_tick().await;
    let second = store.list_ready_upstreams_by_chain_id("1", None).await.unwrap();
    assert_eq!(
        second[0].created_at, first_created,
        "identical result set must not be rewritten"
    );
}
