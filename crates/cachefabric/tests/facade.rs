//! Facade semantics over the in-process memory provider: L1 interaction,
//! unchanged-write dedup, lock protocol, pipeline, destroy.

use cachefabric::{CacheFabric, CacheValue, CallOpts, FabricConfig, FabricError, PipelineResult, ProviderId, ValueKind};
use serde_json::json;
use std::time::Duration;

fn memory_fabric() -> CacheFabric {
    CacheFabric::new(FabricConfig::default())
}

#[tokio::test]
async fn round_trip_typed_json() {
    let fabric = memory_fabric();
    fabric
        .set("k1", CacheValue::Json(json!({"a": 1})), Some(300))
        .await
        .unwrap();

    let got = fabric.get("k1", ValueKind::Json).await.unwrap();
    assert_eq!(got, Some(CacheValue::Json(json!({"a": 1}))));
}

#[tokio::test]
async fn second_read_is_served_from_l1() {
    let fabric = memory_fabric();
    fabric.set("hot", "v".into(), Some(300)).await.unwrap();

    // the write populated L1, so this read never reaches the provider
    let _ = fabric.get("hot", ValueKind::Text).await.unwrap();
    assert_eq!(fabric.stats().l1_hits, 1);
    assert_eq!(fabric.stats().l2_hits, 0);
}

#[tokio::test]
async fn skip_cache_bypasses_l1() {
    let fabric = memory_fabric();
    fabric.set("k", "v".into(), Some(300)).await.unwrap();

    let opts = CallOpts {
        skip_cache: true,
        ..CallOpts::default()
    };
    let got = fabric.get_with("k", ValueKind::Text, &opts).await.unwrap();
    assert_eq!(got, Some(CacheValue::Text("v".to_string())));
    assert_eq!(fabric.stats().l1_hits, 0);
    assert_eq!(fabric.stats().l2_hits, 1);
}

#[tokio::test]
async fn missing_key_is_none_not_error() {
    let fabric = memory_fabric();
    assert_eq!(fabric.get("ghost", ValueKind::Text).await.unwrap(), None);
    assert_eq!(fabric.stats().misses, 1);
}

#[tokio::test]
async fn unchanged_write_is_short_circuited() {
    let fabric = memory_fabric();
    fabric
        .set("k", CacheValue::Json(json!({"a": 1})), Some(300))
        .await
        .unwrap();
    fabric
        .set("k", CacheValue::Json(json!({"a": 1})), Some(300))
        .await
        .unwrap();

    assert_eq!(fabric.stats().unchanged_writes, 1);

    // a different value writes through
    fabric
        .set("k", CacheValue::Json(json!({"a": 2})), Some(300))
        .await
        .unwrap();
    assert_eq!(fabric.stats().unchanged_writes, 1);
}

#[tokio::test]
async fn delete_evicts_l1_and_provider() {
    let fabric = memory_fabric();
    fabric.set("k", "v".into(), Some(300)).await.unwrap();
    fabric.delete("k").await.unwrap();

    assert_eq!(fabric.get("k", ValueKind::Text).await.unwrap(), None);
    // the miss went to the provider, not L1
    assert_eq!(fabric.stats().l1_hits, 0);
}

#[tokio::test]
async fn bulk_set_populates_l1_for_every_pair() {
    let fabric = memory_fabric();
    let results = fabric
        .bulk_set(vec![
            cachefabric::BulkPair {
                key: "a".into(),
                value: "1".into(),
                ttl_secs: Some(300),
            },
            cachefabric::BulkPair {
                key: "b".into(),
                value: "2".into(),
                ttl_secs: None,
            },
        ])
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.ok));

    let _ = fabric.get("a", ValueKind::Text).await.unwrap();
    let _ = fabric.get("b", ValueKind::Text).await.unwrap();
    assert_eq!(fabric.stats().l1_hits, 2);
}

#[tokio::test]
async fn list_keys_bypasses_l1() {
    let fabric = memory_fabric();
    fabric.set("p:1", "a".into(), Some(300)).await.unwrap();
    fabric.set("p:2", "b".into(), Some(300)).await.unwrap();
    fabric.set("q:1", "c".into(), Some(300)).await.unwrap();

    let keys = fabric.list_keys("p:", 0).await.unwrap();
    assert_eq!(keys, vec!["p:1".to_string(), "p:2".to_string()]);
}

#[tokio::test]
async fn incr_counts_through_the_provider() {
    let fabric = memory_fabric();
    assert_eq!(fabric.incr("counter").await.unwrap(), 1);
    assert_eq!(fabric.incr("counter").await.unwrap(), 2);
}

#[tokio::test]
async fn lock_round_trip_and_loser_unlock() {
    let fabric = memory_fabric();

    assert!(fabric.lock("x", 30).await.unwrap());
    // the holder's token is already in place
    assert!(!fabric.lock("x", 30).await.unwrap());

    assert!(fabric.unlock("x").await.unwrap());
    // releasing again: we no longer hold it
    assert!(!fabric.unlock("x").await.unwrap());

    // never-held key
    assert!(!fabric.unlock("other").await.unwrap());
}

#[tokio::test]
async fn pipeline_results_match_submission_order() {
    let fabric = memory_fabric();
    let results = fabric
        .pipeline()
        .set("a", "1".into(), None)
        .get("a")
        .del("a")
        .exec()
        .await
        .unwrap();

    assert_eq!(
        results,
        vec![
            PipelineResult::Ok,
            PipelineResult::Value(Some(CacheValue::Text("1".to_string()))),
            PipelineResult::Int(1),
        ]
    );
}

#[tokio::test]
async fn destroy_is_terminal_and_idempotent() {
    let fabric = memory_fabric();
    fabric.set("k", "v".into(), Some(300)).await.unwrap();

    fabric.destroy().await;
    fabric.destroy().await;

    assert!(matches!(
        fabric.get("k", ValueKind::Text).await,
        Err(FabricError::Terminal)
    ));
    assert!(matches!(
        fabric.set("k", "v".into(), None).await,
        Err(FabricError::Terminal)
    ));
    assert!(matches!(fabric.delete("k").await, Err(FabricError::Terminal)));
    assert!(matches!(fabric.lock("k", 30).await, Err(FabricError::Terminal)));
}

#[tokio::test]
async fn memory_is_selected_without_credentials() {
    let fabric = memory_fabric();
    fabric.initialize().await.unwrap();
    let info = fabric.connection_info().await.unwrap();
    assert_eq!(info.provider, ProviderId::Memory);
    assert!(info.connected);
}

#[tokio::test]
async fn l1_ttl_is_capped_by_the_write_ttl() {
    let mut config = FabricConfig::default();
    config.l1_ttl = Duration::from_secs(60);
    let fabric = CacheFabric::new(config);

    // 1-second write TTL caps the L1 entry at 1 second too
    fabric.set("short", "v".into(), Some(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    // gone from L1 and gone from the provider
    assert_eq!(fabric.get("short", ValueKind::Text).await.unwrap(), None);
}
