//! Integration tests for the HTTP REST KV adapter against a mock server.

use cachefabric_core::{CacheValue, ValueKind};
use cachefabric_provider::{
    BulkPair, Pipeline, PipelineResult, Provider, RestKvConfig, RestKvProvider,
};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer) -> RestKvProvider {
    RestKvProvider::new(RestKvConfig {
        base_url: server.uri(),
        api_token: "test-token".to_string(),
    })
    .unwrap()
}

#[tokio::test]
async fn get_unwraps_result_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_json(json!(["GET", "k"])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "v"})))
        .mount(&server)
        .await;

    let got = provider(&server).get("k", ValueKind::Text).await.unwrap();
    assert_eq!(got, Some(CacheValue::Text("v".to_string())));
}

#[tokio::test]
async fn null_result_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": null})))
        .mount(&server)
        .await;

    assert_eq!(provider(&server).get("k", ValueKind::Text).await.unwrap(), None);
}

#[tokio::test]
async fn set_with_ttl_appends_ex() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_json(json!(["SET", "k", "v", "EX", 300])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "OK"})))
        .expect(1)
        .mount(&server)
        .await;

    provider(&server).set("k", &"v".into(), Some(300)).await.unwrap();
}

#[tokio::test]
async fn envelope_error_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"error": "ERR unknown command 'FROB'"})),
        )
        .mount(&server)
        .await;

    let err = provider(&server).get("k", ValueKind::Text).await.unwrap_err();
    assert!(err.is_client());
}

#[tokio::test]
async fn http_401_is_auth_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .mount(&server)
        .await;

    let err = provider(&server).get("k", ValueKind::Text).await.unwrap_err();
    assert!(err.is_auth());
}

#[tokio::test]
async fn http_429_honors_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "2")
                .set_body_string("throttled"),
        )
        .mount(&server)
        .await;

    let err = provider(&server).get("k", ValueKind::Text).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(2)));
}

#[tokio::test]
async fn scripted_lock_and_unlock_round_trip() {
    let server = MockServer::start().await;
    // Acquire wins, release matches the stored token.
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": 1})))
        .mount(&server)
        .await;

    let provider = provider(&server);
    assert!(provider.supports_atomic_lock());
    assert!(provider.lock("x", "tok", 30).await.unwrap());
    assert!(provider.unlock("x", "tok").await.unwrap());
}

#[tokio::test]
async fn lost_lock_race_returns_false() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": 0})))
        .mount(&server)
        .await;

    assert!(!provider(&server).lock("x", "tok", 30).await.unwrap());
}

#[tokio::test]
async fn pipeline_preserves_order_and_error_markers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pipeline"))
        .and(body_json(json!([
            ["SET", "a", "1"],
            ["GET", "a"],
            ["DEL", "a"]
        ])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"result": "OK"},
            {"result": "1"},
            {"result": 1}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let results = provider(&server)
        .exec_pipeline(Pipeline::new().set("a", "1".into(), None).get("a").del("a"))
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
async fn mid_pipeline_error_does_not_abort_peers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pipeline"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"result": "OK"},
            {"error": "WRONGTYPE Operation against a key holding the wrong kind of value"},
            {"result": 1}
        ])))
        .mount(&server)
        .await;

    let results = provider(&server)
        .exec_pipeline(Pipeline::new().set("a", "1".into(), None).incr("h").del("a"))
        .await
        .unwrap();

    assert_eq!(results[0], PipelineResult::Ok);
    assert!(matches!(&results[1], PipelineResult::Err(msg) if msg.contains("WRONGTYPE")));
    assert_eq!(results[2], PipelineResult::Int(1));
}

#[tokio::test]
async fn pipeline_endpoint_404_falls_back_to_single_exec() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pipeline"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "OK"})))
        .expect(2)
        .mount(&server)
        .await;

    let results = provider(&server)
        .bulk_set(&[
            BulkPair {
                key: "a".into(),
                value: "1".into(),
                ttl_secs: None,
            },
            BulkPair {
                key: "b".into(),
                value: "2".into(),
                ttl_secs: None,
            },
        ])
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.ok));
}

#[tokio::test]
async fn list_keys_scans_with_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_json(json!(["SCAN", "0", "MATCH", "p:*", "COUNT", 200])))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": ["5", ["p:1", "p:2"]]})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_json(json!(["SCAN", "5", "MATCH", "p:*", "COUNT", 200])))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": ["0", ["p:3"]]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let keys = provider(&server).list_keys("p:", 0).await.unwrap();
    assert_eq!(keys, vec!["p:1", "p:2", "p:3"]);
}

#[tokio::test]
async fn list_keys_falls_back_to_keys_when_scan_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_json(json!(["KEYS", "p:*"])))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": ["p:2", "p:1"]})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"error": "ERR unknown command 'SCAN'"})),
        )
        .mount(&server)
        .await;

    let keys = provider(&server).list_keys("p:", 0).await.unwrap();
    assert_eq!(keys, vec!["p:1", "p:2"]);
}
