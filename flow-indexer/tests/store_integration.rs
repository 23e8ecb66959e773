//! Integration tests for `PostgresStore` against a real Postgres instance.
//!
//! Covers the Checkpoint, Lease, Error Log, and Raw Store ports: the
//! surface every ingester and deriver depends on directly.

mod common;

use common::fixtures::chain_fixtures;
use common::TestDb;
use flow_indexer::ports::{CheckpointStore, ErrorLogStore, LeaseStore, RawStore};
use flow_indexer::types::{ErrorEntry, Height};
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════════════
// CHECKPOINT STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn checkpoint_round_trips_through_postgres() {
    let db = TestDb::new().await;

    assert!(db.store.get("forward_ingester").await.unwrap().is_none());

    db.store.set("forward_ingester", Height::new(100)).await.unwrap();
    let checkpoint = db.store.get("forward_ingester").await.unwrap().unwrap();
    assert_eq!(checkpoint.height, Height::new(100));

    db.store.set("forward_ingester", Height::new(150)).await.unwrap();
    let checkpoint = db.store.get("forward_ingester").await.unwrap().unwrap();
    assert_eq!(checkpoint.height, Height::new(150));
}

#[tokio::test]
async fn list_returns_every_named_checkpoint() {
    let db = TestDb::new().await;

    db.store.set("forward_ingester", Height::new(100)).await.unwrap();
    db.store.set("live_deriver", Height::new(90)).await.unwrap();

    let checkpoints = db.store.list().await.unwrap();
    assert_eq!(checkpoints.len(), 2);
    assert!(checkpoints.iter().any(|c| c.name == "forward_ingester"));
    assert!(checkpoints.iter().any(|c| c.name == "live_deriver"));
}

// ═══════════════════════════════════════════════════════════════════════════════
// LEASE STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn lease_acquire_blocks_a_second_concurrent_holder() {
    let db = TestDb::new().await;

    let lease = db
        .store
        .acquire("nft_reconciliation", "collection:1", "worker-a", chrono::Duration::minutes(5))
        .await
        .unwrap()
        .expect("lease should be free");

    let blocked = db
        .store
        .acquire("nft_reconciliation", "collection:1", "worker-b", chrono::Duration::minutes(5))
        .await
        .unwrap();
    assert!(blocked.is_none());

    db.store.release(lease.id).await.unwrap();

    let reacquired = db
        .store
        .acquire("nft_reconciliation", "collection:1", "worker-b", chrono::Duration::minutes(5))
        .await
        .unwrap();
    assert!(reacquired.is_some());
}

#[tokio::test]
async fn reap_expired_surfaces_leases_past_their_ttl() {
    let db = TestDb::new().await;

    db.store
        .acquire("nft_reconciliation", "collection:2", "worker-a", chrono::Duration::milliseconds(1))
        .await
        .unwrap()
        .expect("lease should be free");

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let expired = db.store.reap_expired("nft_reconciliation", chrono::Utc::now(), 10).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].item_key, "collection:2");
}

#[tokio::test]
async fn mark_dead_letter_is_terminal() {
    let db = TestDb::new().await;

    let lease = db
        .store
        .acquire("nft_reconciliation", "collection:3", "worker-a", chrono::Duration::minutes(5))
        .await
        .unwrap()
        .expect("lease should be free");

    db.store.mark_dead_letter(lease.id).await.unwrap();

    // A dead-lettered lease does not block re-acquisition; the Async Worker
    // is responsible for checking attempt count before re-running it.
    let reacquired = db
        .store
        .acquire("nft_reconciliation", "collection:3", "worker-b", chrono::Duration::minutes(5))
        .await
        .unwrap();
    assert!(reacquired.is_some());
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR LOG STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn error_log_lists_most_recent_entries_first() {
    let db = TestDb::new().await;
    let now = chrono::Utc::now();

    for i in 0..3u32 {
        db.store
            .record(&ErrorEntry {
                id: Uuid::new_v4(),
                source: "live_deriver".to_string(),
                from_height: Height::new(u64::from(i)),
                to_height: Height::new(u64::from(i)),
                message: format!("failure {i}"),
                attempt: 1,
                created_at: now + chrono::Duration::seconds(i64::from(i)),
                last_attempt_at: now,
            })
            .await
            .unwrap();
    }

    let entries = db.store.list_for_source("live_deriver", 10).await.unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].message, "failure 2");
}

// ═══════════════════════════════════════════════════════════════════════════════
// RAW STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn insert_block_persists_transactions_and_events() {
    let db = TestDb::new().await;

    let block = chain_fixtures::block(10);
    let tx = chain_fixtures::transaction(&block, 0);
    let event = chain_fixtures::token_deposited_event(&tx, 0, flow_indexer::types::FlowAddress::new([0x02; 8]), "100.0");

    db.store.insert_block(&block, &[tx.clone()], &[event], None, &[], &[]).await.unwrap();

    let stored = db.store.get_block(Height::new(10)).await.unwrap().expect("block should exist");
    assert_eq!(stored.id, block.id);

    let events = db.store.get_events_in_range(Height::new(10), Height::new(10)).await.unwrap();
    assert_eq!(events.len(), 1);

    let transactions = db.store.get_transactions_in_range(Height::new(10), Height::new(10)).await.unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].id, tx.id);
}

#[tokio::test]
async fn highest_and_lowest_ingested_height_track_inserted_blocks() {
    let db = TestDb::new().await;

    assert_eq!(db.store.highest_ingested_height().await.unwrap(), Height::ZERO);
    assert!(db.store.lowest_ingested_height().await.unwrap().is_none());

    for height in [10u64, 11, 12] {
        let block = chain_fixtures::block(height);
        db.store.insert_block(&block, &[], &[], None, &[], &[]).await.unwrap();
    }

    assert_eq!(db.store.highest_ingested_height().await.unwrap(), Height::new(12));
    assert_eq!(db.store.lowest_ingested_height().await.unwrap(), Some(Height::new(10)));
}

#[tokio::test]
async fn find_height_gaps_reports_missing_heights() {
    let db = TestDb::new().await;

    for height in [10u64, 11, 14, 15] {
        let block = chain_fixtures::block(height);
        db.store.insert_block(&block, &[], &[], None, &[], &[]).await.unwrap();
    }

    let gaps = db.store.find_height_gaps(Height::new(10), Height::new(15)).await.unwrap();
    assert_eq!(gaps, vec![(Height::new(12), Height::new(13))]);
}

#[tokio::test]
async fn block_id_at_height_matches_inserted_id() {
    let db = TestDb::new().await;
    let block = chain_fixtures::block(20);

    db.store.insert_block(&block, &[], &[], None, &[], &[]).await.unwrap();

    let entry = db.store.block_id_at_height(Height::new(20)).await.unwrap().expect("entry should exist");
    assert_eq!(entry.block_id, block.id);
}

#[tokio::test]
async fn delete_above_height_removes_diverged_blocks() {
    let db = TestDb::new().await;

    for height in [10u64, 11, 12] {
        let block = chain_fixtures::block(height);
        db.store.insert_block(&block, &[], &[], None, &[], &[]).await.unwrap();
    }

    let deleted = db.store.delete_above_height(Height::new(10)).await.unwrap();
    assert!(deleted > 0);
    assert_eq!(db.store.highest_ingested_height().await.unwrap(), Height::new(10));
}
