//! Remote HTTP KV adapter: a bearer-authenticated, cursor-paginated,
//! eventually consistent key/value REST API laid out as
//! `/accounts/{acct}/storage/kv/namespaces/{ns}`.
//!
//! The backend enforces a 60 second TTL floor; below-minimum TTLs are
//! raised silently with a warning. Locks here are best-effort only (the
//! store is eventually consistent and has no compare-and-set), which the
//! adapter announces on every lock call.

use crate::{
    classify_reqwest, parse_retry_after, BulkPair, BulkResult, ConnectionInfo, Provider, ProviderId,
};
use async_trait::async_trait;
use cachefabric_core::{CacheValue, FabricError, ValueKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Smallest TTL the backend accepts.
const MIN_TTL_SECS: u64 = 60;
/// Per-request deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings for the remote HTTP KV store.
#[derive(Debug, Clone)]
pub struct RemoteKvConfig {
    /// API root, without a trailing slash.
    pub base_url: String,
    /// Account identifier in the URL layout.
    pub account_id: String,
    /// Namespace identifier in the URL layout.
    pub namespace_id: String,
    /// Bearer token.
    pub api_token: String,
}

impl RemoteKvConfig {
    fn namespace_url(&self) -> String {
        format!(
            "{}/accounts/{}/storage/kv/namespaces/{}",
            self.base_url.trim_end_matches('/'),
            self.account_id,
            self.namespace_id
        )
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    result: Vec<ListedKey>,
    #[serde(default)]
    result_info: Option<ListInfo>,
}

#[derive(Debug, Deserialize)]
struct ListedKey {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ListInfo {
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    list_complete: Option<bool>,
}

#[derive(Debug, Serialize)]
struct BulkItem<'a> {
    key: &'a str,
    value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiration_ttl: Option<u64>,
}

/// Adapter for the remote HTTP KV store.
pub struct RemoteKvProvider {
    config: RemoteKvConfig,
    client: reqwest::Client,
}

impl RemoteKvProvider {
    /// Builds the adapter and its HTTP client.
    pub fn new(config: RemoteKvConfig) -> Result<Self, FabricError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(classify_reqwest)?;
        Ok(Self { config, client })
    }

    fn value_url(&self, key: &str) -> String {
        format!("{}/values/{}", self.config.namespace_url(), key)
    }

    fn effective_ttl(&self, ttl_secs: Option<u64>) -> Option<u64> {
        match ttl_secs {
            Some(0) | None => None,
            Some(ttl) if ttl < MIN_TTL_SECS => {
                tracing::warn!(
                    requested = ttl,
                    minimum = MIN_TTL_SECS,
                    "ttl below remote kv minimum, raising"
                );
                Some(MIN_TTL_SECS)
            }
            Some(ttl) => Some(ttl),
        }
    }

    async fn error_from(&self, response: reqwest::Response) -> FabricError {
        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        FabricError::classify_status(status, &body, retry_after)
    }
}

#[async_trait]
impl Provider for RemoteKvProvider {
    async fn initialize(&self) -> Result<(), FabricError> {
        // Stateless transport; nothing to establish up front.
        tracing::debug!(endpoint = %self.config.namespace_url(), "remote kv provider ready");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "remote-http-kv"
    }

    fn id(&self) -> ProviderId {
        ProviderId::RemoteHttpKv
    }

    async fn get(&self, key: &str, kind: ValueKind) -> Result<Option<CacheValue>, FabricError> {
        let response = self
            .client
            .get(self.value_url(key))
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .map_err(classify_reqwest)?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(self.error_from(response).await);
        }

        let bytes = response.bytes().await.map_err(classify_reqwest)?;
        Ok(Some(CacheValue::from_wire(bytes.to_vec(), kind)))
    }

    async fn set(
        &self,
        key: &str,
        value: &CacheValue,
        ttl_secs: Option<u64>,
    ) -> Result<(), FabricError> {
        let mut request = self
            .client
            .put(self.value_url(key))
            .bearer_auth(&self.config.api_token)
            .body(value.to_wire());
        if let Some(ttl) = self.effective_ttl(ttl_secs) {
            request = request.query(&[("expiration_ttl", ttl)]);
        }

        let response = request.send().await.map_err(classify_reqwest)?;
        if !response.status().is_success() {
            return Err(self.error_from(response).await);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), FabricError> {
        let response = self
            .client
            .delete(self.value_url(key))
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = response.status();
        if status.is_success() || status.as_u16() == 404 {
            return Ok(());
        }
        // Delete is idempotent from the caller's point of view: server-side
        // trouble is reported as success and logged, while auth and other
        // client errors still classify so the failover path sees them.
        if status.is_server_error() {
            tracing::warn!(key, status = status.as_u16(), "remote kv delete returned server error");
            return Ok(());
        }
        Err(self.error_from(response).await)
    }

    async fn exists(&self, key: &str) -> Result<bool, FabricError> {
        Ok(self.get(key, ValueKind::Bytes).await?.is_some())
    }

    async fn incr(&self, key: &str) -> Result<i64, FabricError> {
        // The backend has no counter primitive; this is read-modify-write
        // and last-writer-wins under contention.
        let current = match self.get(key, ValueKind::Text).await? {
            Some(value) => value
                .as_i64()
                .ok_or_else(|| FabricError::client("value is not an integer"))?,
            None => 0,
        };
        let next = current + 1;
        self.set(key, &CacheValue::Text(next.to_string()), None)
            .await?;
        Ok(next)
    }

    async fn lock(&self, key: &str, token: &str, ttl_secs: u64) -> Result<bool, FabricError> {
        tracing::warn!(
            key,
            "remote kv lock is best-effort: the backend is eventually consistent and cannot guarantee mutual exclusion"
        );
        // Write-then-read-back. A concurrent acquirer can still win the
        // race between our write and our verify.
        self.set(key, &CacheValue::Text(token.to_string()), Some(ttl_secs))
            .await?;
        match self.get(key, ValueKind::Text).await? {
            Some(CacheValue::Text(stored)) => Ok(stored == token),
            _ => Ok(false),
        }
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<bool, FabricError> {
        match self.get(key, ValueKind::Text).await? {
            Some(CacheValue::Text(stored)) if stored == token => {
                self.delete(key).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_keys(&self, prefix: &str, limit: usize) -> Result<Vec<String>, FabricError> {
        let mut keys = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut request = self
                .client
                .get(format!("{}/keys", self.config.namespace_url()))
                .bearer_auth(&self.config.api_token)
                .query(&[("prefix", prefix)]);
            if !cursor.is_empty() {
                request = request.query(&[("cursor", cursor.as_str())]);
            }

            let response = request.send().await.map_err(classify_reqwest)?;
            if !response.status().is_success() {
                return Err(self.error_from(response).await);
            }
            let page: ListResponse = response.json().await.map_err(classify_reqwest)?;

            for listed in page.result {
                keys.push(listed.name);
                if limit > 0 && keys.len() >= limit {
                    return Ok(keys);
                }
            }

            let info = page.result_info.unwrap_or_default();
            if info.list_complete.unwrap_or(false) {
                break;
            }
            match info.cursor {
                Some(next) if !next.is_empty() => cursor = next,
                _ => break,
            }
        }
        Ok(keys)
    }

    async fn bulk_set(&self, pairs: &[BulkPair]) -> Result<Vec<BulkResult>, FabricError> {
        let body: Vec<BulkItem<'_>> = pairs
            .iter()
            .map(|pair| BulkItem {
                key: &pair.key,
                value: pair.value.to_wire_string(),
                expiration_ttl: self.effective_ttl(pair.ttl_secs),
            })
            .collect();

        let response = self
            .client
            .put(format!("{}/bulk", self.config.namespace_url()))
            .bearer_auth(&self.config.api_token)
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest)?;

        if !response.status().is_success() {
            return Err(self.error_from(response).await);
        }
        // The bulk endpoint carries no per-item status; a 2xx is
        // all-success by contract.
        Ok(pairs.iter().map(|p| BulkResult::ok(&p.key)).collect())
    }

    async fn disconnect(&self) -> Result<(), FabricError> {
        Ok(())
    }

    fn connection_info(&self) -> ConnectionInfo {
        let mut details = BTreeMap::new();
        details.insert("account".to_string(), self.config.account_id.clone());
        details.insert("namespace".to_string(), self.config.namespace_id.clone());
        ConnectionInfo {
            provider: ProviderId::RemoteHttpKv,
            endpoint: self.config.namespace_url(),
            connected: true,
            details,
        }
    }

    fn supports_atomic_lock(&self) -> bool {
        false
    }
}
