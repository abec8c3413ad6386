//! Backend adapters behind a single object-safe [`Provider`] contract.
//!
//! Four adapters are provided:
//!
//! - [`RemoteKvProvider`]: a cursor-paginated, eventually consistent HTTP
//!   key/value store (bearer auth, account/namespace URL layout).
//! - [`TcpKvProvider`]: a TCP key/value data store driven through the
//!   `redis` client, with an explicit connection-state machine.
//! - [`RestKvProvider`]: the HTTP-REST variant of the TCP store, speaking a
//!   JSON array-of-args command protocol with pipeline support.
//! - [`MemoryProvider`]: the in-process fallback every fallback chain
//!   terminates at.
//!
//! Adapters translate backend responses into the shared error taxonomy;
//! everything above this crate reasons about [`FabricError`] variants only.

mod connection;
mod memory;
mod pipeline;
mod remote_kv;
mod rest_kv;
mod tcp_kv;

use async_trait::async_trait;
use cachefabric_core::{CacheValue, FabricError, ValueKind};
use std::collections::BTreeMap;

pub use connection::{ConnectionHealth, ConnectionState};
pub use memory::MemoryProvider;
pub use pipeline::{Pipeline, PipelineCommand, PipelineResult};
pub use remote_kv::{RemoteKvConfig, RemoteKvProvider};
pub use rest_kv::{RestKvConfig, RestKvProvider};
pub use tcp_kv::{TcpKvConfig, TcpKvProvider, TlsMode};

/// Identifies a configured backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    /// Cursor-paginated remote HTTP KV store.
    RemoteHttpKv,
    /// TCP KV store, plaintext.
    TcpKv,
    /// TCP KV store over TLS.
    TcpKvTls,
    /// TCP KV store, plaintext/TLS resolved from the URL scheme.
    TcpKvAutoDetect,
    /// HTTP-REST variant of the TCP store.
    HttpRestKv,
    /// In-process memory fallback.
    Memory,
}

impl ProviderId {
    /// Stable name used in logs, config, and `connection_info`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::RemoteHttpKv => "remote-http-kv",
            ProviderId::TcpKv => "tcp-kv",
            ProviderId::TcpKvTls => "tcp-kv-tls",
            ProviderId::TcpKvAutoDetect => "tcp-kv-auto-detect",
            ProviderId::HttpRestKv => "http-rest-kv",
            ProviderId::Memory => "memory",
        }
    }

    /// Parses the config-file spelling. Unknown spellings return `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote-http-kv" => Some(ProviderId::RemoteHttpKv),
            "tcp-kv" => Some(ProviderId::TcpKv),
            "tcp-kv-tls" => Some(ProviderId::TcpKvTls),
            "tcp-kv-auto-detect" => Some(ProviderId::TcpKvAutoDetect),
            "http-rest-kv" => Some(ProviderId::HttpRestKv),
            "memory" => Some(ProviderId::Memory),
            _ => None,
        }
    }

    /// True for the TCP family (which carries connection state and gets a
    /// heartbeat).
    pub fn is_tcp(&self) -> bool {
        matches!(
            self,
            ProviderId::TcpKv | ProviderId::TcpKvTls | ProviderId::TcpKvAutoDetect
        )
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One key/value pair handed to `bulk_set`.
#[derive(Debug, Clone)]
pub struct BulkPair {
    /// Destination key.
    pub key: String,
    /// Value to store.
    pub value: CacheValue,
    /// Optional TTL in seconds.
    pub ttl_secs: Option<u64>,
}

/// Per-key outcome of a `bulk_set`.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkResult {
    /// The key this entry refers to.
    pub key: String,
    /// Whether the write succeeded.
    pub ok: bool,
    /// Backend detail when it did not.
    pub error: Option<String>,
}

impl BulkResult {
    /// A successful entry.
    pub fn ok(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ok: true,
            error: None,
        }
    }

    /// A failed entry.
    pub fn failed(key: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// Diagnostic snapshot of a provider's transport.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Which backend this is.
    pub provider: ProviderId,
    /// Where it points (redacted of credentials).
    pub endpoint: String,
    /// Whether the transport is currently usable.
    pub connected: bool,
    /// Adapter-specific extras.
    pub details: BTreeMap<String, String>,
}

/// The uniform contract every backend satisfies.
///
/// `get` returns `Ok(None)` on a not-found response; "not found" is never
/// an error. Lock/unlock take the caller's token explicitly: the facade
/// owns tokens, adapters stay stateless about them.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Establishes the transport. Called once before first use; adapters
    /// with stateless transports may make this a no-op.
    async fn initialize(&self) -> Result<(), FabricError>;

    /// Stable adapter name.
    fn name(&self) -> &'static str;

    /// Which backend this adapter is.
    fn id(&self) -> ProviderId;

    /// Reads `key`, re-typed per `kind`. `Ok(None)` on not-found.
    async fn get(&self, key: &str, kind: ValueKind) -> Result<Option<CacheValue>, FabricError>;

    /// Writes `key`. Providers may raise `ttl_secs` to their minimum (with
    /// a warning); `None` or `Some(0)` means the provider default.
    async fn set(
        &self,
        key: &str,
        value: &CacheValue,
        ttl_secs: Option<u64>,
    ) -> Result<(), FabricError>;

    /// Deletes `key`. Idempotent: deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), FabricError>;

    /// Whether `key` currently exists.
    async fn exists(&self, key: &str) -> Result<bool, FabricError>;

    /// Atomically increments the integer at `key` (creating it at 0),
    /// returning the new value. Atomicity is backend-dependent; see the
    /// adapter docs.
    async fn incr(&self, key: &str) -> Result<i64, FabricError>;

    /// Attempts to acquire a lock at `key` owned by `token`. Atomic on
    /// backends that support scripted eval; best-effort elsewhere (such
    /// adapters return `false` from [`Provider::supports_atomic_lock`] and
    /// warn on every call).
    async fn lock(&self, key: &str, token: &str, ttl_secs: u64) -> Result<bool, FabricError>;

    /// Releases the lock at `key` iff the stored token equals `token`.
    async fn unlock(&self, key: &str, token: &str) -> Result<bool, FabricError>;

    /// Lists keys starting with `prefix`, transparently following backend
    /// cursors. `limit == 0` means unbounded.
    async fn list_keys(&self, prefix: &str, limit: usize) -> Result<Vec<String>, FabricError>;

    /// Writes many pairs, using the backend's native batch endpoint when
    /// one exists. The default walks the pairs sequentially.
    async fn bulk_set(&self, pairs: &[BulkPair]) -> Result<Vec<BulkResult>, FabricError> {
        let mut results = Vec::with_capacity(pairs.len());
        for pair in pairs {
            match self.set(&pair.key, &pair.value, pair.ttl_secs).await {
                Ok(()) => results.push(BulkResult::ok(&pair.key)),
                Err(err) => results.push(BulkResult::failed(&pair.key, err.to_string())),
            }
        }
        Ok(results)
    }

    /// Updates the TTL of an existing key. Backends without a standalone
    /// expire surface reject it as a client error.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, FabricError> {
        let _ = (key, ttl_secs);
        Err(FabricError::client("expire is not supported by this provider"))
    }

    /// Executes an accumulated [`Pipeline`] in one round-trip where the
    /// backend supports it. Result order matches submission order;
    /// per-command failures surface as [`PipelineResult::Err`] entries.
    /// The default executes commands sequentially.
    async fn exec_pipeline(&self, pipeline: Pipeline) -> Result<Vec<PipelineResult>, FabricError> {
        let mut results = Vec::with_capacity(pipeline.len());
        for command in pipeline.commands() {
            let result = match command {
                PipelineCommand::Set {
                    key,
                    value,
                    ttl_secs,
                } => self
                    .set(key, value, *ttl_secs)
                    .await
                    .map(|_| PipelineResult::Ok),
                PipelineCommand::Get { key } => self
                    .get(key, ValueKind::Text)
                    .await
                    .map(PipelineResult::Value),
                PipelineCommand::Del { key } => {
                    self.delete(key).await.map(|_| PipelineResult::Int(1))
                }
                PipelineCommand::Exists { key } => self
                    .exists(key)
                    .await
                    .map(|found| PipelineResult::Int(found as i64)),
                PipelineCommand::Incr { key } => self.incr(key).await.map(PipelineResult::Int),
                PipelineCommand::Expire { key, ttl_secs } => self
                    .expire(key, *ttl_secs)
                    .await
                    .map(|set| PipelineResult::Int(set as i64)),
            };
            results.push(result.unwrap_or_else(|err| PipelineResult::Err(err.to_string())));
        }
        Ok(results)
    }

    /// Tears down the transport, best-effort.
    async fn disconnect(&self) -> Result<(), FabricError>;

    /// Diagnostic snapshot of the transport.
    fn connection_info(&self) -> ConnectionInfo;

    /// Whether this backend's lock/unlock are genuinely atomic.
    fn supports_atomic_lock(&self) -> bool {
        true
    }
}

/// Maps a transport-level HTTP client error into the taxonomy.
pub(crate) fn classify_reqwest(err: reqwest::Error) -> FabricError {
    use cachefabric_core::TransientKind;
    if err.is_timeout() {
        FabricError::transient(TransientKind::Timeout, err.to_string())
    } else {
        FabricError::transient(TransientKind::Network, err.to_string())
    }
}

/// Parses a `Retry-After` header (seconds form only).
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<std::time::Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(std::time::Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_id_round_trips_through_config_spelling() {
        for id in [
            ProviderId::RemoteHttpKv,
            ProviderId::TcpKv,
            ProviderId::TcpKvTls,
            ProviderId::TcpKvAutoDetect,
            ProviderId::HttpRestKv,
            ProviderId::Memory,
        ] {
            assert_eq!(ProviderId::parse(id.as_str()), Some(id));
        }
        assert_eq!(ProviderId::parse("sqlite"), None);
    }

    #[test]
    fn tcp_family_detection() {
        assert!(ProviderId::TcpKv.is_tcp());
        assert!(ProviderId::TcpKvTls.is_tcp());
        assert!(!ProviderId::Memory.is_tcp());
        assert!(!ProviderId::HttpRestKv.is_tcp());
    }
}
