//! Integration tests for the Rollback Engine's fork-point walk, using a
//! real Postgres instance and a `wiremock` stand-in for the Access Node's
//! REST API.

mod common;

use std::sync::Arc;

use chrono::Utc;
use common::fixtures::chain_fixtures;
use common::TestDb;
use flow_indexer::indexer::RollbackEngine;
use flow_indexer::node_pool::{AccessNodeClient, NodePool};
use flow_indexer::ports::RawStore;
use flow_indexer::types::{Height, RollbackOutcome};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Stub an Access Node `/v1/blocks?height=N` response returning a block
/// whose id is `block_id` and whose parent is `parent_id`.
async fn stub_block(server: &MockServer, height: u64, block_id: &str, parent_id: &str) {
    let body = json!([{
        "header": {
            "id": block_id,
            "parent_id": parent_id,
            "height": height.to_string(),
            "timestamp": Utc::now().to_rfc3339(),
        },
        "payload": { "collection_guarantees": [] },
        "execution_result": null,
    }]);

    Mock::given(method("GET"))
        .and(path("/v1/blocks"))
        .and(query_param("height", height.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn node_pool(base_url: &str) -> Arc<NodePool> {
    let client = Arc::new(AccessNodeClient::new(base_url.to_string(), Height::ZERO).unwrap());
    Arc::new(NodePool::new(vec![client], Vec::new(), 100, 200))
}

#[tokio::test]
async fn consistent_chain_requires_no_rollback() {
    let db = TestDb::new().await;
    let server = MockServer::start().await;

    let block = chain_fixtures::block(10);
    db.store.insert_block(&block, &[], &[], None, &[], &[]).await.unwrap();
    stub_block(&server, 10, &block.id.to_hex(), &block.parent_id.to_hex()).await;

    let store = Arc::new(db.store);
    let engine = RollbackEngine::new(node_pool(&server.uri()), store.clone(), store.clone(), store.clone(), store.clone(), 50);
    let outcome = engine.recover(Height::new(10)).await.unwrap();

    assert_eq!(outcome, RollbackOutcome::NoOpConsistent);
}

#[tokio::test]
async fn diverged_tip_rolls_back_to_common_ancestor() {
    let db = TestDb::new().await;
    let server = MockServer::start().await;

    // Local chain: 8, 9, 10 all consistent with each other.
    for height in [8u64, 9, 10] {
        let block = chain_fixtures::block(height);
        db.store.insert_block(&block, &[], &[], None, &[], &[]).await.unwrap();
    }

    // The observed chain agrees at 9 but diverges at 10: a different id,
    // with a parent that still points at the locally stored block 9.
    let block_9 = chain_fixtures::block(9);
    stub_block(&server, 9, &block_9.id.to_hex(), &block_9.parent_id.to_hex()).await;

    let forked_id = chain_fixtures::forked_block_id(10);
    stub_block(&server, 10, &forked_id.to_hex(), &block_9.id.to_hex()).await;

    let store = Arc::new(db.store);
    let engine = RollbackEngine::new(node_pool(&server.uri()), store.clone(), store.clone(), store.clone(), store.clone(), 50);
    let outcome = engine.recover(Height::new(10)).await.unwrap();

    assert_eq!(outcome, RollbackOutcome::RolledBack);
    assert_eq!(store.highest_ingested_height().await.unwrap(), Height::new(9));
}

#[tokio::test]
async fn divergence_beyond_max_depth_is_rejected() {
    let db = TestDb::new().await;
    let server = MockServer::start().await;

    let block = chain_fixtures::block(10);
    db.store.insert_block(&block, &[], &[], None, &[], &[]).await.unwrap();

    // Every height the walk can reach within the shallow max_depth reports
    // a mismatched id, so no common ancestor is ever found.
    for height in 9..=10 {
        let forked_id = chain_fixtures::forked_block_id(height);
        stub_block(&server, height, &forked_id.to_hex(), &forked_id.to_hex()).await;
    }

    let store = Arc::new(db.store);
    let engine = RollbackEngine::new(node_pool(&server.uri()), store.clone(), store.clone(), store.clone(), store.clone(), 1);
    let result = engine.recover(Height::new(10)).await;

    assert!(result.is_err());
}
