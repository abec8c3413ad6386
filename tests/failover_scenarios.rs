//! End-to-end failover scenarios through the facade, with real HTTP
//! adapters pointed at mock servers.

use cachefabric::{
    CacheFabric, CacheValue, CallOpts, FabricConfig, FailoverConfig, ProviderId, RemoteKvConfig,
    RestKvConfig, ValueKind,
};
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const VALUES: &str = "/accounts/acct/storage/kv/namespaces/ns/values";

fn fabric(remote: &MockServer, rest: Option<&MockServer>, recovery: Duration) -> CacheFabric {
    let mut config = FabricConfig::default();
    config.remote_kv = Some(RemoteKvConfig {
        base_url: remote.uri(),
        account_id: "acct".to_string(),
        namespace_id: "ns".to_string(),
        api_token: "tok".to_string(),
    });
    config.rest_kv = rest.map(|server| RestKvConfig {
        base_url: server.uri(),
        api_token: "tok".to_string(),
    });

    let failover = FailoverConfig::builder()
        .backoff_base(Duration::ZERO)
        .backoff_jitter_max(Duration::ZERO)
        .recovery_interval(recovery)
        .recovery_interval_quota(recovery)
        .name("scenario")
        .build();
    CacheFabric::with_failover(config, failover)
}

#[tokio::test]
async fn two_throttles_demote_to_rest_and_the_call_succeeds() {
    let remote = MockServer::start().await;
    let rest = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{VALUES}/k9")))
        .respond_with(ResponseTemplate::new(429).set_body_string("quota busy"))
        .mount(&remote)
        .await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_json(json!(["GET", "k9"])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "v"})))
        .mount(&rest)
        .await;

    let fabric = fabric(&remote, Some(&rest), Duration::from_secs(3600));
    let got = fabric.get("k9", ValueKind::Text).await.unwrap();

    assert_eq!(got, Some(CacheValue::Text("v".to_string())));
    let snapshot = fabric.failover_snapshot();
    assert!(snapshot.is_failover);
    assert_eq!(snapshot.active, ProviderId::HttpRestKv);
    assert_eq!(snapshot.failure_count, 0);
    // exactly two throttled calls hit the primary
    assert_eq!(remote.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn auth_failure_demotes_on_the_first_call() {
    let remote = MockServer::start().await;
    let rest = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{VALUES}/k")))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .mount(&remote)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "v"})))
        .mount(&rest)
        .await;

    let fabric = fabric(&remote, Some(&rest), Duration::from_secs(3600));
    let got = fabric.get("k", ValueKind::Text).await.unwrap();

    assert_eq!(got, Some(CacheValue::Text("v".to_string())));
    assert!(fabric.is_failover());
    // the primary was not retried after the auth failure
    assert_eq!(remote.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn recovery_probe_restores_the_preferred_provider() {
    let remote = MockServer::start().await;
    let rest = MockServer::start().await;

    // Two throttles, then the primary is healthy again (404 means "no such
    // key", which is a healthy answer for the probe).
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).set_body_string("busy"))
        .up_to_n_times(2)
        .mount(&remote)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&remote)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "v"})))
        .mount(&rest)
        .await;

    let fabric = fabric(&remote, Some(&rest), Duration::from_millis(100));
    let _ = fabric.get("k", ValueKind::Text).await.unwrap();
    assert!(fabric.is_failover());

    sleep(Duration::from_millis(400)).await;

    let snapshot = fabric.failover_snapshot();
    assert!(!snapshot.is_failover);
    assert_eq!(snapshot.active, ProviderId::RemoteHttpKv);
    assert_eq!(snapshot.failure_count, 0);
}

#[tokio::test]
async fn degraded_reads_fall_back_to_l1_in_failover_mode() {
    let remote = MockServer::start().await;
    let rest = MockServer::start().await;

    // One healthy write, then the primary goes dark.
    Mock::given(method("PUT"))
        .and(path(format!("{VALUES}/k")))
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(1)
        .mount(&remote)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("down"))
        .mount(&remote)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("down too"))
        .mount(&rest)
        .await;

    let fabric = fabric(&remote, Some(&rest), Duration::from_secs(3600));
    fabric.set("k", "v".into(), Some(300)).await.unwrap();

    // Every provider in the chain fails; the facade serves what L1 holds
    // rather than surfacing the L2 failure.
    let opts = CallOpts {
        skip_cache: true,
        ..CallOpts::default()
    };
    let got = fabric.get_with("k", ValueKind::Text, &opts).await.unwrap();
    assert_eq!(got, Some(CacheValue::Text("v".to_string())));
    assert!(fabric.is_failover());
}

#[tokio::test]
async fn ttl_clamp_travels_through_the_facade() {
    let remote = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path(format!("{VALUES}/k2")))
        .and(query_param("expiration_ttl", "60"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&remote)
        .await;

    let fabric = fabric(&remote, None, Duration::from_secs(3600));
    fabric.set("k2", "v".into(), Some(10)).await.unwrap();
}

#[tokio::test]
async fn exhaustion_without_any_fallback_lands_on_memory_writes() {
    let remote = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500).set_body_string("down"))
        .mount(&remote)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("down"))
        .mount(&remote)
        .await;

    let fabric = fabric(&remote, None, Duration::from_secs(3600));

    // The chain is remote -> memory; after two failures the write lands in
    // the in-process provider and succeeds.
    fabric.set("k", "v".into(), Some(300)).await.unwrap();
    assert_eq!(fabric.failover_snapshot().active, ProviderId::Memory);

    // Reads now come from the memory path, never the remote.
    let before = remote.received_requests().await.unwrap().len();
    let got = fabric.get("k", ValueKind::Text).await.unwrap();
    assert_eq!(got, Some(CacheValue::Text("v".to_string())));
    assert_eq!(remote.received_requests().await.unwrap().len(), before);
}
