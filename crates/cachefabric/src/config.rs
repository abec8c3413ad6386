//! Configuration and startup provider selection.
//!
//! The embedding application hands in an environment-variable map; nothing
//! here reads the process environment directly. Explicit `CACHE_PROVIDER`
//! selection wins; otherwise the fabric auto-detects from configured
//! credentials in priority order TCP KV > remote HTTP KV > HTTP REST KV >
//! memory. Missing or partial credentials fall through to the next
//! candidate without panicking.

use cachefabric_provider::{ProviderId, RemoteKvConfig, RestKvConfig, TcpKvConfig, TlsMode};
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_REMOTE_KV_BASE_URL: &str = "https://api.cloudflare.com/client/v4";

/// Fabric-wide settings, typically built from an environment map.
#[derive(Debug, Clone)]
pub struct FabricConfig {
    /// Explicit provider selection (`CACHE_PROVIDER`). `None` auto-detects.
    pub provider: Option<ProviderId>,
    /// Remote HTTP KV credentials, when configured.
    pub remote_kv: Option<RemoteKvConfig>,
    /// TCP KV connection settings, when configured.
    pub tcp_kv: Option<TcpKvConfig>,
    /// HTTP REST KV credentials, when configured.
    pub rest_kv: Option<RestKvConfig>,
    /// L1 entry cap (`L1_CAP`).
    pub l1_capacity: usize,
    /// L1 entry TTL (`L1_TTL_MS`).
    pub l1_ttl: Duration,
    /// TCP heartbeat period (`HEARTBEAT_INTERVAL_MS`).
    pub heartbeat_interval: Duration,
    /// Recovery probe period for non-quota failures (`RECOVERY_INTERVAL_MS`).
    pub recovery_interval: Duration,
    /// Recovery probe period after quota failures (`RECOVERY_INTERVAL_QUOTA_MS`).
    pub recovery_interval_quota: Duration,
    /// Consecutive retryable failures before demotion (`FAILOVER_THRESHOLD`).
    pub failover_threshold: u32,
    /// Admissions per window for the remote-call limiter.
    pub limiter_interval_cap: usize,
    /// Window of the remote-call limiter.
    pub limiter_interval: Duration,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            provider: None,
            remote_kv: None,
            tcp_kv: None,
            rest_kv: None,
            l1_capacity: 1000,
            l1_ttl: Duration::from_millis(10_000),
            heartbeat_interval: Duration::from_millis(30_000),
            recovery_interval: Duration::from_millis(1_800_000),
            recovery_interval_quota: Duration::from_millis(43_200_000),
            failover_threshold: 2,
            limiter_interval_cap: 100,
            limiter_interval: Duration::from_secs(1),
        }
    }
}

fn parse_or<T: std::str::FromStr>(env: &HashMap<String, String>, key: &str, default: T) -> T {
    match env.get(key).map(|raw| raw.trim().parse::<T>()) {
        Some(Ok(value)) => value,
        Some(Err(_)) => {
            tracing::warn!(key, value = %env[key], "unparseable config value, using default");
            default
        }
        None => default,
    }
}

fn non_empty(env: &HashMap<String, String>, key: &str) -> Option<String> {
    env.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl FabricConfig {
    /// Builds a config from an environment-variable map.
    pub fn from_env_map(env: &HashMap<String, String>) -> Self {
        let defaults = Self::default();

        let provider = non_empty(env, "CACHE_PROVIDER").and_then(|raw| {
            let parsed = ProviderId::parse(&raw);
            if parsed.is_none() {
                tracing::warn!(value = %raw, "unknown CACHE_PROVIDER, falling back to auto-detection");
            }
            parsed
        });

        let remote_kv = match (
            non_empty(env, "REMOTE_KV_ACCOUNT"),
            non_empty(env, "REMOTE_KV_NAMESPACE"),
            non_empty(env, "REMOTE_KV_TOKEN"),
        ) {
            (Some(account_id), Some(namespace_id), Some(api_token)) => Some(RemoteKvConfig {
                base_url: non_empty(env, "REMOTE_KV_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_REMOTE_KV_BASE_URL.to_string()),
                account_id,
                namespace_id,
                api_token,
            }),
            _ => None,
        };

        let tcp_url = non_empty(env, "TCP_KV_URL");
        let tcp_host = non_empty(env, "TCP_KV_HOST");
        let tcp_kv = if tcp_url.is_some() || tcp_host.is_some() {
            Some(TcpKvConfig {
                url: tcp_url,
                host: tcp_host,
                port: non_empty(env, "TCP_KV_PORT").and_then(|raw| raw.parse().ok()),
                password: non_empty(env, "TCP_KV_PASSWORD"),
                tls: match provider {
                    Some(ProviderId::TcpKvTls) => TlsMode::Enabled,
                    Some(ProviderId::TcpKv) => TlsMode::Disabled,
                    _ => TlsMode::AutoDetect,
                },
                ..TcpKvConfig::default()
            })
        } else {
            None
        };

        let rest_kv = match (
            non_empty(env, "HTTP_REST_KV_URL"),
            non_empty(env, "HTTP_REST_KV_TOKEN"),
        ) {
            (Some(base_url), Some(api_token)) => Some(RestKvConfig {
                base_url,
                api_token,
            }),
            _ => None,
        };

        Self {
            provider,
            remote_kv,
            tcp_kv,
            rest_kv,
            l1_capacity: parse_or(env, "L1_CAP", defaults.l1_capacity),
            l1_ttl: Duration::from_millis(parse_or(
                env,
                "L1_TTL_MS",
                defaults.l1_ttl.as_millis() as u64,
            )),
            heartbeat_interval: Duration::from_millis(parse_or(
                env,
                "HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval.as_millis() as u64,
            )),
            recovery_interval: Duration::from_millis(parse_or(
                env,
                "RECOVERY_INTERVAL_MS",
                defaults.recovery_interval.as_millis() as u64,
            )),
            recovery_interval_quota: Duration::from_millis(parse_or(
                env,
                "RECOVERY_INTERVAL_QUOTA_MS",
                defaults.recovery_interval_quota.as_millis() as u64,
            )),
            failover_threshold: parse_or(env, "FAILOVER_THRESHOLD", defaults.failover_threshold),
            limiter_interval_cap: defaults.limiter_interval_cap,
            limiter_interval: defaults.limiter_interval,
        }
    }

    /// The providers this config has credentials for. Memory is always
    /// available.
    pub fn available(&self) -> Vec<ProviderId> {
        let mut out = Vec::new();
        if self.tcp_kv.is_some() {
            out.extend([
                ProviderId::TcpKv,
                ProviderId::TcpKvTls,
                ProviderId::TcpKvAutoDetect,
            ]);
        }
        if self.remote_kv.is_some() {
            out.push(ProviderId::RemoteHttpKv);
        }
        if self.rest_kv.is_some() {
            out.push(ProviderId::HttpRestKv);
        }
        out.push(ProviderId::Memory);
        out
    }

    /// Resolves the startup provider: explicit selection wins, then
    /// credential auto-detection in priority order, then memory.
    pub fn selected_provider(&self) -> ProviderId {
        if let Some(explicit) = self.provider {
            let available = self.available();
            if available.contains(&explicit) {
                return explicit;
            }
            tracing::warn!(
                provider = %explicit,
                "selected provider has no credentials, falling back to auto-detection"
            );
        }

        if self.tcp_kv.is_some() {
            ProviderId::TcpKvAutoDetect
        } else if self.remote_kv.is_some() {
            ProviderId::RemoteHttpKv
        } else if self.rest_kv.is_some() {
            ProviderId::HttpRestKv
        } else {
            ProviderId::Memory
        }
    }
}
