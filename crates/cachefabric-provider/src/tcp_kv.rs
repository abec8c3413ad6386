//! TCP KV adapter over the native `redis` client.
//!
//! The transport is a [`redis::aio::ConnectionManager`] wrapped in an
//! explicit state machine (see [`crate::connection`]). Commands run under a
//! 5 s deadline and connects under a 10 s deadline; restarts are
//! single-flight, driven by the heartbeat, and throttled by a token bucket
//! so a flapping server or a bad password cannot turn the reconnect path
//! into an authentication storm.

use crate::connection::{ConnectionHealth, ConnectionState, ConnectionStatus};
use crate::{BulkPair, BulkResult, ConnectionInfo, Pipeline, PipelineCommand, PipelineResult,
    Provider, ProviderId};
use async_trait::async_trait;
use cachefabric_core::{CacheValue, FabricError, TransientKind, ValueKind};
use cachefabric_limiter::TokenBucket;
use redis::aio::ConnectionManager;
use redis::ErrorKind;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::timeout;

const RELEASE_SCRIPT: &str =
    "if redis.call('get', KEYS[1]) == ARGV[1] then return redis.call('del', KEYS[1]) else return 0 end";
const SCAN_PAGE: usize = 200;

/// Reconnect throttle: a burst of three attempts, refilling one per minute.
/// Each attempt re-authenticates, so this also caps the auth rate.
const RECONNECT_BURST: f64 = 3.0;
const RECONNECT_REFILL_PER_SEC: f64 = 1.0 / 60.0;

/// Whether the connection uses TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Plain TCP.
    Disabled,
    /// TLS, regardless of URL scheme.
    Enabled,
    /// Follow the URL scheme (`rediss://` means TLS).
    #[default]
    AutoDetect,
}

/// Connection settings for the TCP KV store.
#[derive(Debug, Clone)]
pub struct TcpKvConfig {
    /// Full connection URL. Takes precedence over host/port/password.
    pub url: Option<String>,
    /// Hostname, when no URL is given.
    pub host: Option<String>,
    /// Port, when no URL is given.
    pub port: Option<u16>,
    /// Optional password.
    pub password: Option<String>,
    /// TLS selection.
    pub tls: TlsMode,
    /// Deadline for establishing the transport.
    pub connect_timeout: Duration,
    /// Deadline for individual commands.
    pub command_timeout: Duration,
    /// Pause before a heartbeat-driven reconnect attempt.
    pub restart_delay: Duration,
}

impl Default for TcpKvConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: None,
            password: None,
            tls: TlsMode::AutoDetect,
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(5),
            restart_delay: Duration::from_secs(5),
        }
    }
}

impl TcpKvConfig {
    fn connection_url(&self) -> Result<String, FabricError> {
        if let Some(url) = &self.url {
            return Ok(match self.tls {
                TlsMode::Enabled if url.starts_with("redis://") => {
                    url.replacen("redis://", "rediss://", 1)
                }
                TlsMode::Disabled if url.starts_with("rediss://") => {
                    url.replacen("rediss://", "redis://", 1)
                }
                _ => url.clone(),
            });
        }

        let host = self
            .host
            .as_deref()
            .ok_or_else(|| FabricError::client("tcp kv requires a url or a host"))?;
        let port = self.port.unwrap_or(6379);
        let scheme = match self.tls {
            TlsMode::Enabled => "rediss",
            _ => "redis",
        };
        let auth = self
            .password
            .as_deref()
            .map(|password| format!(":{password}@"))
            .unwrap_or_default();
        Ok(format!("{scheme}://{auth}{host}:{port}"))
    }

    fn uses_tls(&self) -> bool {
        match self.tls {
            TlsMode::Enabled => true,
            TlsMode::Disabled => false,
            TlsMode::AutoDetect => self
                .url
                .as_deref()
                .map_or(false, |url| url.starts_with("rediss://")),
        }
    }

    fn redacted_endpoint(&self) -> String {
        if let Some(url) = &self.url {
            // strip userinfo, keep scheme + host
            match url.split_once('@') {
                Some((scheme_part, rest)) => {
                    let scheme = scheme_part.split("://").next().unwrap_or("redis");
                    format!("{scheme}://{rest}")
                }
                None => url.clone(),
            }
        } else {
            format!(
                "{}:{}",
                self.host.as_deref().unwrap_or("?"),
                self.port.unwrap_or(6379)
            )
        }
    }
}

/// Adapter for the TCP KV store.
pub struct TcpKvProvider {
    config: TcpKvConfig,
    status: ConnectionStatus,
    manager: Mutex<Option<ConnectionManager>>,
    restarting: AtomicBool,
    reconnect_tokens: TokenBucket,
}

impl TcpKvProvider {
    /// Builds the adapter; the transport is established by `initialize`.
    pub fn new(config: TcpKvConfig) -> Self {
        Self {
            config,
            status: ConnectionStatus::new(ConnectionState::Disconnected),
            manager: Mutex::new(None),
            restarting: AtomicBool::new(false),
            reconnect_tokens: TokenBucket::new(RECONNECT_BURST, RECONNECT_REFILL_PER_SEC),
        }
    }

    /// The configured pause before a heartbeat-driven reconnect.
    pub fn restart_delay(&self) -> Duration {
        self.config.restart_delay
    }

    fn classify(&self, err: redis::RedisError) -> FabricError {
        match err.kind() {
            ErrorKind::AuthenticationFailed => FabricError::auth(err.to_string()),
            ErrorKind::IoError => {
                self.status.set(ConnectionState::Disconnected);
                FabricError::transient(TransientKind::Network, err.to_string())
            }
            ErrorKind::BusyLoadingError | ErrorKind::TryAgain | ErrorKind::MasterDown => {
                FabricError::transient(TransientKind::Network, err.to_string())
            }
            _ => FabricError::classify_message(&err.to_string()),
        }
    }

    fn conn(&self) -> Result<ConnectionManager, FabricError> {
        self.manager.lock().unwrap().clone().ok_or_else(|| {
            FabricError::transient(TransientKind::Network, "tcp kv transport not established")
        })
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, FabricError>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        match timeout(self.config.command_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(self.classify(err)),
            Err(_) => Err(FabricError::transient(
                TransientKind::Timeout,
                "tcp kv command deadline elapsed",
            )),
        }
    }

    async fn connect(&self) -> Result<ConnectionManager, FabricError> {
        let url = self.config.connection_url()?;
        let client = redis::Client::open(url.as_str()).map_err(|err| self.classify(err))?;
        match timeout(self.config.connect_timeout, ConnectionManager::new(client)).await {
            Ok(Ok(manager)) => Ok(manager),
            Ok(Err(err)) => Err(self.classify(err)),
            Err(_) => Err(FabricError::transient(
                TransientKind::Timeout,
                "tcp kv connect deadline elapsed",
            )),
        }
    }

    async fn exec_sequentially(
        &self,
        pipeline: &Pipeline,
    ) -> Result<Vec<PipelineResult>, FabricError> {
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

    fn append_pipeline_command(pipe: &mut redis::Pipeline, command: &PipelineCommand) {
        match command {
            PipelineCommand::Set {
                key,
                value,
                ttl_secs,
            } => match ttl_secs {
                Some(ttl) if *ttl > 0 => {
                    pipe.cmd("SET").arg(key).arg(value.to_wire()).arg("EX").arg(ttl);
                }
                _ => {
                    pipe.cmd("SET").arg(key).arg(value.to_wire());
                }
            },
            PipelineCommand::Get { key } => {
                pipe.cmd("GET").arg(key);
            }
            PipelineCommand::Del { key } => {
                pipe.cmd("DEL").arg(key);
            }
            PipelineCommand::Exists { key } => {
                pipe.cmd("EXISTS").arg(key);
            }
            PipelineCommand::Incr { key } => {
                pipe.cmd("INCR").arg(key);
            }
            PipelineCommand::Expire { key, ttl_secs } => {
                pipe.cmd("EXPIRE").arg(key).arg(ttl_secs);
            }
        }
    }

    fn map_pipeline_value(command: &PipelineCommand, value: redis::Value) -> PipelineResult {
        match command {
            PipelineCommand::Set { .. } => PipelineResult::Ok,
            PipelineCommand::Get { .. } => match value {
                redis::Value::Nil => PipelineResult::Value(None),
                redis::Value::Data(bytes) => {
                    PipelineResult::Value(Some(CacheValue::from_wire(bytes, ValueKind::Text)))
                }
                other => PipelineResult::Err(format!("unexpected get reply: {other:?}")),
            },
            PipelineCommand::Del { .. }
            | PipelineCommand::Exists { .. }
            | PipelineCommand::Incr { .. }
            | PipelineCommand::Expire { .. } => match value {
                redis::Value::Int(n) => PipelineResult::Int(n),
                other => PipelineResult::Err(format!("unexpected integer reply: {other:?}")),
            },
        }
    }
}

#[async_trait]
impl Provider for TcpKvProvider {
    async fn initialize(&self) -> Result<(), FabricError> {
        if self.status.get() == ConnectionState::Ready && self.manager.lock().unwrap().is_some() {
            return Ok(());
        }
        self.status.set(ConnectionState::Connecting);
        match self.connect().await {
            Ok(manager) => {
                *self.manager.lock().unwrap() = Some(manager);
                self.status.set(ConnectionState::Ready);
                tracing::info!(endpoint = %self.config.redacted_endpoint(), "tcp kv connected");
                Ok(())
            }
            Err(err) => {
                self.status.set(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    fn name(&self) -> &'static str {
        "tcp-kv"
    }

    fn id(&self) -> ProviderId {
        if self.config.uses_tls() {
            ProviderId::TcpKvTls
        } else {
            ProviderId::TcpKv
        }
    }

    async fn get(&self, key: &str, kind: ValueKind) -> Result<Option<CacheValue>, FabricError> {
        let mut conn = self.conn()?;
        let bytes: Option<Vec<u8>> = self
            .timed(redis::cmd("GET").arg(key).query_async(&mut conn))
            .await?;
        Ok(bytes.map(|bytes| CacheValue::from_wire(bytes, kind)))
    }

    async fn set(
        &self,
        key: &str,
        value: &CacheValue,
        ttl_secs: Option<u64>,
    ) -> Result<(), FabricError> {
        let mut conn = self.conn()?;
        match ttl_secs {
            Some(ttl) if ttl > 0 => {
                self.timed(
                    redis::cmd("SET")
                        .arg(key)
                        .arg(value.to_wire())
                        .arg("EX")
                        .arg(ttl)
                        .query_async::<_, ()>(&mut conn),
                )
                .await
            }
            _ => {
                self.timed(
                    redis::cmd("SET")
                        .arg(key)
                        .arg(value.to_wire())
                        .query_async::<_, ()>(&mut conn),
                )
                .await
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), FabricError> {
        let mut conn = self.conn()?;
        self.timed(redis::cmd("DEL").arg(key).query_async::<_, i64>(&mut conn))
            .await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, FabricError> {
        let mut conn = self.conn()?;
        let found: i64 = self
            .timed(redis::cmd("EXISTS").arg(key).query_async(&mut conn))
            .await?;
        Ok(found > 0)
    }

    async fn incr(&self, key: &str) -> Result<i64, FabricError> {
        let mut conn = self.conn()?;
        self.timed(redis::cmd("INCR").arg(key).query_async(&mut conn))
            .await
    }

    async fn lock(&self, key: &str, token: &str, ttl_secs: u64) -> Result<bool, FabricError> {
        let mut conn = self.conn()?;
        let ttl_ms = ttl_secs.max(1) * 1000;
        let reply: Option<String> = self
            .timed(
                redis::cmd("SET")
                    .arg(key)
                    .arg(token)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<bool, FabricError> {
        let mut conn = self.conn()?;
        let script = redis::Script::new(RELEASE_SCRIPT);
        let deleted: i64 = self
            .timed(script.key(key).arg(token).invoke_async(&mut conn))
            .await?;
        Ok(deleted == 1)
    }

    async fn list_keys(&self, prefix: &str, limit: usize) -> Result<Vec<String>, FabricError> {
        let mut conn = self.conn()?;
        let pattern = format!("{prefix}*");
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, page): (u64, Vec<String>) = self
                .timed(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_PAGE)
                        .query_async(&mut conn),
                )
                .await?;

            for key in page {
                keys.push(key);
                if limit > 0 && keys.len() >= limit {
                    return Ok(keys);
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }

    async fn bulk_set(&self, pairs: &[BulkPair]) -> Result<Vec<BulkResult>, FabricError> {
        let mut conn = self.conn()?;
        let mut pipe = redis::pipe();
        for pair in pairs {
            match pair.ttl_secs {
                Some(ttl) if ttl > 0 => {
                    pipe.cmd("SET")
                        .arg(&pair.key)
                        .arg(pair.value.to_wire())
                        .arg("EX")
                        .arg(ttl);
                }
                _ => {
                    pipe.cmd("SET").arg(&pair.key).arg(pair.value.to_wire());
                }
            }
        }

        match self
            .timed(pipe.query_async::<_, Vec<redis::Value>>(&mut conn))
            .await
        {
            Ok(replies) => Ok(pairs
                .iter()
                .zip(replies)
                .map(|(pair, reply)| match reply {
                    redis::Value::Okay | redis::Value::Status(_) => BulkResult::ok(&pair.key),
                    other => BulkResult::failed(&pair.key, format!("unexpected reply: {other:?}")),
                })
                .collect()),
            // The client reports the first command error as a batch error;
            // replay sequentially so outcomes stay per-key.
            Err(err) if err.is_client() => {
                let mut results = Vec::with_capacity(pairs.len());
                for pair in pairs {
                    match self.set(&pair.key, &pair.value, pair.ttl_secs).await {
                        Ok(()) => results.push(BulkResult::ok(&pair.key)),
                        Err(err) => results.push(BulkResult::failed(&pair.key, err.to_string())),
                    }
                }
                Ok(results)
            }
            Err(err) => Err(err),
        }
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, FabricError> {
        let mut conn = self.conn()?;
        let set: i64 = self
            .timed(
                redis::cmd("EXPIRE")
                    .arg(key)
                    .arg(ttl_secs)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(set == 1)
    }

    async fn exec_pipeline(&self, pipeline: Pipeline) -> Result<Vec<PipelineResult>, FabricError> {
        let mut conn = self.conn()?;
        let mut pipe = redis::pipe();
        for command in pipeline.commands() {
            Self::append_pipeline_command(&mut pipe, command);
        }

        match self
            .timed(pipe.query_async::<_, Vec<redis::Value>>(&mut conn))
            .await
        {
            Ok(replies) => Ok(pipeline
                .commands()
                .iter()
                .zip(replies)
                .map(|(command, reply)| Self::map_pipeline_value(command, reply))
                .collect()),
            // Same per-command guarantee as bulk_set: a failed batch is
            // replayed one command at a time.
            Err(err) if err.is_client() => self.exec_sequentially(&pipeline).await,
            Err(err) => Err(err),
        }
    }

    async fn disconnect(&self) -> Result<(), FabricError> {
        self.manager.lock().unwrap().take();
        self.status.set(ConnectionState::End);
        tracing::debug!("tcp kv transport closed");
        Ok(())
    }

    fn connection_info(&self) -> ConnectionInfo {
        let mut details = BTreeMap::new();
        details.insert(
            "state".to_string(),
            self.status.get().as_str().to_string(),
        );
        details.insert("tls".to_string(), self.config.uses_tls().to_string());
        ConnectionInfo {
            provider: self.id(),
            endpoint: self.config.redacted_endpoint(),
            connected: self.status.get() == ConnectionState::Ready,
            details,
        }
    }
}

#[async_trait]
impl ConnectionHealth for TcpKvProvider {
    fn state(&self) -> ConnectionState {
        self.status.get()
    }

    async fn ping(&self) -> Result<Duration, FabricError> {
        let mut conn = self.conn()?;
        let start = Instant::now();
        self.timed(redis::cmd("PING").query_async::<_, String>(&mut conn))
            .await?;
        Ok(start.elapsed())
    }

    async fn restart(&self) -> Result<(), FabricError> {
        if self.restarting.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // A deliberately closed transport stays closed.
        if self.status.get() == ConnectionState::End {
            self.restarting.store(false, Ordering::SeqCst);
            return Ok(());
        }
        // Each reconnect re-authenticates; the bucket caps how fast we
        // hammer the server. A dry bucket skips this attempt and leaves the
        // next heartbeat tick to try again.
        if !self.reconnect_tokens.try_take(1.0) {
            tracing::warn!("reconnect attempt throttled, waiting for token refill");
            self.restarting.store(false, Ordering::SeqCst);
            return Ok(());
        }

        self.status.set(ConnectionState::Reconnecting);
        self.manager.lock().unwrap().take();

        let result = match self.connect().await {
            Ok(manager) => {
                *self.manager.lock().unwrap() = Some(manager);
                self.status.set(ConnectionState::Ready);
                tracing::info!(endpoint = %self.config.redacted_endpoint(), "tcp kv reconnected");
                Ok(())
            }
            Err(err) => {
                self.status.set(ConnectionState::Disconnected);
                Err(err)
            }
        };
        self.restarting.store(false, Ordering::SeqCst);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_built_from_parts() {
        let config = TcpKvConfig {
            host: Some("kv.internal".to_string()),
            port: Some(6380),
            password: Some("hunter2".to_string()),
            tls: TlsMode::Disabled,
            ..Default::default()
        };
        assert_eq!(
            config.connection_url().unwrap(),
            "redis://:hunter2@kv.internal:6380"
        );
    }

    #[test]
    fn tls_mode_rewrites_url_scheme() {
        let config = TcpKvConfig {
            url: Some("redis://kv.internal:6379".to_string()),
            tls: TlsMode::Enabled,
            ..Default::default()
        };
        assert_eq!(
            config.connection_url().unwrap(),
            "rediss://kv.internal:6379"
        );
    }

    #[test]
    fn auto_detect_follows_scheme() {
        let secure = TcpKvConfig {
            url: Some("rediss://kv.internal:6379".to_string()),
            ..Default::default()
        };
        assert!(secure.uses_tls());

        let plain = TcpKvConfig {
            url: Some("redis://kv.internal:6379".to_string()),
            ..Default::default()
        };
        assert!(!plain.uses_tls());
    }

    #[test]
    fn missing_host_and_url_is_a_client_error() {
        let config = TcpKvConfig::default();
        assert!(config.connection_url().unwrap_err().is_client());
    }

    #[test]
    fn redacted_endpoint_hides_credentials() {
        let config = TcpKvConfig {
            url: Some("redis://:secret@kv.internal:6379".to_string()),
            ..Default::default()
        };
        assert!(!config.redacted_endpoint().contains("secret"));
    }

    #[tokio::test]
    async fn commands_without_transport_fail_transient() {
        let provider = TcpKvProvider::new(TcpKvConfig {
            host: Some("localhost".to_string()),
            ..Default::default()
        });
        let err = provider.get("k", ValueKind::Text).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(provider.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn reconnect_attempts_are_throttled_by_the_token_bucket() {
        // Port 1 refuses immediately; every real attempt fails fast.
        let provider = TcpKvProvider::new(TcpKvConfig {
            host: Some("127.0.0.1".to_string()),
            port: Some(1),
            connect_timeout: Duration::from_millis(200),
            ..Default::default()
        });

        // The burst admits three real attempts.
        for _ in 0..3 {
            assert!(provider.restart().await.is_err());
        }

        // The bucket is dry: the attempt is skipped rather than issued, so
        // no connect (and no re-auth) happens until tokens refill.
        assert!(provider.restart().await.is_ok());
        assert_eq!(provider.state(), ConnectionState::Disconnected);
    }
}
