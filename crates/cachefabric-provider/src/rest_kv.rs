//! HTTP REST KV adapter: a bearer-authenticated endpoint that accepts a
//! JSON array-of-args command (`["SET", "k", "v"]`) or an array of such
//! arrays at `/pipeline`.
//!
//! Responses are `{"result": …}` or `{"error": …}` envelopes; pipeline
//! responses are arrays of envelopes preserving submission order. Lock and
//! unlock go through `EVAL`, so mutual exclusion here is genuinely atomic.

use crate::{
    classify_reqwest, parse_retry_after, BulkPair, BulkResult, ConnectionInfo, Pipeline,
    PipelineCommand, PipelineResult, Provider, ProviderId,
};
use async_trait::async_trait;
use cachefabric_core::{CacheValue, FabricError, ValueKind};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Per-request deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const ACQUIRE_SCRIPT: &str =
    "if redis.call('set', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2]) then return 1 else return 0 end";
const RELEASE_SCRIPT: &str =
    "if redis.call('get', KEYS[1]) == ARGV[1] then return redis.call('del', KEYS[1]) else return 0 end";

/// Connection settings for the REST KV store.
#[derive(Debug, Clone)]
pub struct RestKvConfig {
    /// Endpoint root, without a trailing slash.
    pub base_url: String,
    /// Bearer token.
    pub api_token: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Adapter for the HTTP-REST variant of the TCP KV store.
pub struct RestKvProvider {
    config: RestKvConfig,
    client: reqwest::Client,
}

impl RestKvProvider {
    /// Builds the adapter and its HTTP client.
    pub fn new(config: RestKvConfig) -> Result<Self, FabricError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(classify_reqwest)?;
        Ok(Self { config, client })
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn log_telemetry(headers: &reqwest::header::HeaderMap) {
        let cost = headers
            .get("Upstash-Request-Cost")
            .and_then(|v| v.to_str().ok());
        let latency = headers
            .get("Upstash-Latency")
            .and_then(|v| v.to_str().ok());
        if cost.is_some() || latency.is_some() {
            tracing::debug!(?cost, ?latency, "rest kv telemetry");
        }
    }

    async fn post(&self, url: &str, body: &Value) -> Result<reqwest::Response, FabricError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.api_token)
            .json(body)
            .send()
            .await
            .map_err(classify_reqwest)?;
        Self::log_telemetry(response.headers());

        if response.status().is_success() || response.status().as_u16() == 404 {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(FabricError::classify_status(status, &body, retry_after))
    }

    /// Executes one command, unwrapping the result envelope.
    async fn command(&self, args: Value) -> Result<Value, FabricError> {
        let response = self.post(self.base(), &args).await?;
        if response.status().as_u16() == 404 {
            return Err(FabricError::client("rest kv endpoint not found"));
        }
        let envelope: Envelope = response.json().await.map_err(classify_reqwest)?;
        if let Some(error) = envelope.error {
            return Err(FabricError::classify_message(&error));
        }
        Ok(envelope.result.unwrap_or(Value::Null))
    }

    /// Executes many commands in one round-trip, falling back to
    /// per-command execution when the pipeline endpoint is absent.
    /// Per-command errors stay inside the returned envelopes.
    async fn commands(&self, batch: Vec<Value>) -> Result<Vec<Envelope>, FabricError> {
        let url = format!("{}/pipeline", self.base());
        let response = self.post(&url, &Value::Array(batch.clone())).await?;

        if response.status().as_u16() == 404 {
            tracing::debug!("pipeline endpoint missing, replaying commands singly");
            let mut envelopes = Vec::with_capacity(batch.len());
            for command in batch {
                match self.command(command).await {
                    Ok(result) => envelopes.push(Envelope {
                        result: Some(result),
                        error: None,
                    }),
                    Err(err) if err.is_client() => envelopes.push(Envelope {
                        result: None,
                        error: Some(err.to_string()),
                    }),
                    Err(err) => return Err(err),
                }
            }
            return Ok(envelopes);
        }

        response.json().await.map_err(classify_reqwest)
    }

    fn value_from_result(result: Value, kind: ValueKind) -> Option<CacheValue> {
        match result {
            Value::Null => None,
            Value::String(text) => Some(CacheValue::from_wire(text.into_bytes(), kind)),
            other => Some(CacheValue::from_wire(other.to_string().into_bytes(), kind)),
        }
    }

    fn int_from_result(result: &Value) -> i64 {
        match result {
            Value::Number(n) => n.as_i64().unwrap_or(0),
            Value::String(s) => s.parse().unwrap_or(0),
            _ => 0,
        }
    }

    fn set_command(pair_key: &str, value: &CacheValue, ttl_secs: Option<u64>) -> Value {
        match ttl_secs {
            Some(ttl) if ttl > 0 => {
                json!(["SET", pair_key, value.to_wire_string(), "EX", ttl])
            }
            _ => json!(["SET", pair_key, value.to_wire_string()]),
        }
    }

    fn pipeline_command(command: &PipelineCommand) -> Value {
        match command {
            PipelineCommand::Set {
                key,
                value,
                ttl_secs,
            } => Self::set_command(key, value, *ttl_secs),
            PipelineCommand::Get { key } => json!(["GET", key]),
            PipelineCommand::Del { key } => json!(["DEL", key]),
            PipelineCommand::Exists { key } => json!(["EXISTS", key]),
            PipelineCommand::Incr { key } => json!(["INCR", key]),
            PipelineCommand::Expire { key, ttl_secs } => json!(["EXPIRE", key, ttl_secs]),
        }
    }

    fn pipeline_result(command: &PipelineCommand, envelope: Envelope) -> PipelineResult {
        if let Some(error) = envelope.error {
            return PipelineResult::Err(error);
        }
        let result = envelope.result.unwrap_or(Value::Null);
        match command {
            PipelineCommand::Set { .. } => PipelineResult::Ok,
            PipelineCommand::Get { .. } => {
                PipelineResult::Value(Self::value_from_result(result, ValueKind::Text))
            }
            PipelineCommand::Del { .. }
            | PipelineCommand::Exists { .. }
            | PipelineCommand::Incr { .. }
            | PipelineCommand::Expire { .. } => {
                PipelineResult::Int(Self::int_from_result(&result))
            }
        }
    }
}

#[async_trait]
impl Provider for RestKvProvider {
    async fn initialize(&self) -> Result<(), FabricError> {
        tracing::debug!(endpoint = %self.base(), "rest kv provider ready");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http-rest-kv"
    }

    fn id(&self) -> ProviderId {
        ProviderId::HttpRestKv
    }

    async fn get(&self, key: &str, kind: ValueKind) -> Result<Option<CacheValue>, FabricError> {
        let result = self.command(json!(["GET", key])).await?;
        Ok(Self::value_from_result(result, kind))
    }

    async fn set(
        &self,
        key: &str,
        value: &CacheValue,
        ttl_secs: Option<u64>,
    ) -> Result<(), FabricError> {
        self.command(Self::set_command(key, value, ttl_secs))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), FabricError> {
        self.command(json!(["DEL", key])).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, FabricError> {
        let result = self.command(json!(["EXISTS", key])).await?;
        Ok(Self::int_from_result(&result) > 0)
    }

    async fn incr(&self, key: &str) -> Result<i64, FabricError> {
        let result = self.command(json!(["INCR", key])).await?;
        Ok(Self::int_from_result(&result))
    }

    async fn lock(&self, key: &str, token: &str, ttl_secs: u64) -> Result<bool, FabricError> {
        let ttl_ms = ttl_secs.max(1) * 1000;
        let result = self
            .command(json!([
                "EVAL",
                ACQUIRE_SCRIPT,
                1,
                key,
                token,
                ttl_ms.to_string()
            ]))
            .await?;
        Ok(Self::int_from_result(&result) == 1)
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<bool, FabricError> {
        let result = self
            .command(json!(["EVAL", RELEASE_SCRIPT, 1, key, token]))
            .await?;
        Ok(Self::int_from_result(&result) == 1)
    }

    async fn list_keys(&self, prefix: &str, limit: usize) -> Result<Vec<String>, FabricError> {
        let pattern = format!("{prefix}*");
        let mut keys = Vec::new();
        let mut cursor = "0".to_string();

        loop {
            let scanned = self
                .command(json!(["SCAN", cursor, "MATCH", pattern, "COUNT", 200]))
                .await;
            let result = match scanned {
                Ok(result) => result,
                // SCAN may be unavailable on constrained deployments; a
                // single KEYS sweep is acceptable for small catalogs.
                Err(err) if err.is_client() => {
                    tracing::debug!(error = %err, "scan unavailable, falling back to keys");
                    let result = self.command(json!(["KEYS", pattern])).await?;
                    let mut keys: Vec<String> = match result {
                        Value::Array(items) => items
                            .into_iter()
                            .filter_map(|item| item.as_str().map(str::to_string))
                            .collect(),
                        _ => Vec::new(),
                    };
                    keys.sort();
                    if limit > 0 {
                        keys.truncate(limit);
                    }
                    return Ok(keys);
                }
                Err(err) => return Err(err),
            };

            // SCAN replies [next_cursor, [keys…]]
            let (next_cursor, page) = match &result {
                Value::Array(parts) if parts.len() == 2 => {
                    let next = match &parts[0] {
                        Value::String(s) => s.clone(),
                        Value::Number(n) => n.to_string(),
                        _ => "0".to_string(),
                    };
                    let page: Vec<String> = match &parts[1] {
                        Value::Array(items) => items
                            .iter()
                            .filter_map(|item| item.as_str().map(str::to_string))
                            .collect(),
                        _ => Vec::new(),
                    };
                    (next, page)
                }
                _ => return Err(FabricError::client("malformed scan reply")),
            };

            for key in page {
                keys.push(key);
                if limit > 0 && keys.len() >= limit {
                    return Ok(keys);
                }
            }
            if next_cursor == "0" {
                break;
            }
            cursor = next_cursor;
        }
        Ok(keys)
    }

    async fn bulk_set(&self, pairs: &[BulkPair]) -> Result<Vec<BulkResult>, FabricError> {
        let batch: Vec<Value> = pairs
            .iter()
            .map(|pair| Self::set_command(&pair.key, &pair.value, pair.ttl_secs))
            .collect();
        let envelopes = self.commands(batch).await?;

        Ok(pairs
            .iter()
            .zip(envelopes)
            .map(|(pair, envelope)| match envelope.error {
                None => BulkResult::ok(&pair.key),
                Some(error) => BulkResult::failed(&pair.key, error),
            })
            .collect())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, FabricError> {
        let result = self.command(json!(["EXPIRE", key, ttl_secs])).await?;
        Ok(Self::int_from_result(&result) == 1)
    }

    async fn exec_pipeline(&self, pipeline: Pipeline) -> Result<Vec<PipelineResult>, FabricError> {
        let batch: Vec<Value> = pipeline
            .commands()
            .iter()
            .map(Self::pipeline_command)
            .collect();
        let envelopes = self.commands(batch).await?;

        Ok(pipeline
            .commands()
            .iter()
            .zip(envelopes)
            .map(|(command, envelope)| Self::pipeline_result(command, envelope))
            .collect())
    }

    async fn disconnect(&self) -> Result<(), FabricError> {
        Ok(())
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            provider: ProviderId::HttpRestKv,
            endpoint: self.base().to_string(),
            connected: true,
            details: BTreeMap::new(),
        }
    }
}
