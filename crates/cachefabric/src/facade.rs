use crate::config::FabricConfig;
use crate::factory::FabricProviderFactory;
use crate::lock::generate_token;
use cachefabric_core::{CacheValue, FabricError, ValueKind};
use cachefabric_failover::{
    FailoverConfig, FailoverController, FailoverSnapshot, Heartbeat, HeartbeatConfig,
    ProviderFactory,
};
use cachefabric_limiter::WindowedLimiter;
use cachefabric_local::LocalCache;
use cachefabric_provider::{
    BulkPair, BulkResult, ConnectionInfo, Pipeline, PipelineResult, ProviderId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOpts {
    /// Bypass the L1 tier for this call.
    pub skip_cache: bool,
    /// Override the L1 TTL applied to a read-through fill.
    pub cache_ttl: Option<Duration>,
}

/// Point-in-time operation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FabricStats {
    /// Reads served from L1.
    pub l1_hits: u64,
    /// Reads served by the active provider.
    pub l2_hits: u64,
    /// Reads that found nothing anywhere.
    pub misses: u64,
    /// Writes short-circuited because the value was unchanged.
    pub unchanged_writes: u64,
}

#[derive(Default)]
struct Counters {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    unchanged_writes: AtomicU64,
}

/// The public key/value surface of the fabric.
///
/// Composes the L1 tier, the rate limiter, and the failover controller in
/// front of whichever backend is active. Construct one instance and inject
/// it where the application needs caching; cloning is not provided, share
/// via `Arc`.
pub struct CacheFabric {
    config: FabricConfig,
    local: LocalCache,
    limiter: WindowedLimiter,
    controller: FailoverController,
    factory: Arc<FabricProviderFactory>,
    locks: Mutex<HashMap<String, String>>,
    heartbeat: Mutex<Option<Heartbeat>>,
    destroyed: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    counters: Counters,
}

impl CacheFabric {
    /// Builds a fabric from configuration. Providers are created lazily;
    /// call [`CacheFabric::initialize`] to connect eagerly and start the
    /// heartbeat.
    pub fn new(config: FabricConfig) -> Self {
        let failover = FailoverConfig::builder()
            .threshold(config.failover_threshold)
            .recovery_interval(config.recovery_interval)
            .recovery_interval_quota(config.recovery_interval_quota)
            .name("cachefabric")
            .build();
        Self::with_failover(config, failover)
    }

    /// Builds a fabric from an environment-variable map.
    pub fn from_env_map(env: &HashMap<String, String>) -> Self {
        Self::new(FabricConfig::from_env_map(env))
    }

    /// Builds a fabric with explicit failover tuning (attempt budget,
    /// backoff, event listeners).
    pub fn with_failover(config: FabricConfig, failover: FailoverConfig) -> Self {
        let factory = Arc::new(FabricProviderFactory::new(config.clone()));
        let controller = FailoverController::new(
            Arc::clone(&factory) as Arc<dyn ProviderFactory>,
            config.selected_provider(),
            failover,
        );
        let (shutdown, _) = watch::channel(false);

        Self {
            local: LocalCache::new(config.l1_capacity, config.l1_ttl),
            limiter: WindowedLimiter::new(config.limiter_interval_cap, config.limiter_interval),
            controller,
            factory,
            locks: Mutex::new(HashMap::new()),
            heartbeat: Mutex::new(None),
            destroyed: Arc::new(AtomicBool::new(false)),
            shutdown,
            counters: Counters::default(),
            config,
        }
    }

    /// Connects the selected provider eagerly and, for the TCP family,
    /// starts the heartbeat.
    pub async fn initialize(&self) -> Result<(), FabricError> {
        self.ensure_live()?;
        let provider = self.controller.active_provider().await?;

        if provider.id().is_tcp() {
            if let Some(tcp) = self.factory.tcp_instance() {
                let heartbeat_config = HeartbeatConfig {
                    interval: self.config.heartbeat_interval,
                    restart_delay: tcp.restart_delay(),
                    ..HeartbeatConfig::default()
                };
                let heartbeat =
                    Heartbeat::spawn(tcp, heartbeat_config, Arc::clone(&self.destroyed));
                // Re-arming replaces (and thereby stops) any previous task.
                *self.heartbeat.lock().unwrap() = Some(heartbeat);
            }
        }
        Ok(())
    }

    /// Reads `key`, re-typed per `kind`, with default options.
    pub async fn get(
        &self,
        key: &str,
        kind: ValueKind,
    ) -> Result<Option<CacheValue>, FabricError> {
        self.get_with(key, kind, &CallOpts::default()).await
    }

    /// Reads `key` with explicit per-call options.
    ///
    /// An L1 hit returns without touching the provider. In failover mode a
    /// provider failure degrades to whatever L1 holds (possibly nothing)
    /// instead of surfacing every L2 error to the caller.
    pub async fn get_with(
        &self,
        key: &str,
        kind: ValueKind,
        opts: &CallOpts,
    ) -> Result<Option<CacheValue>, FabricError> {
        self.ensure_live()?;

        if !opts.skip_cache {
            if let Some(value) = self.local.get(key) {
                self.counters.l1_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(retype(value, kind)));
            }
        }

        let result = self
            .guarded(async {
                self.throttle().await;
                self.controller
                    .execute(|p| async move { p.get(key, kind).await })
                    .await
            })
            .await;

        match result {
            Ok(Some(value)) => {
                self.counters.l2_hits.fetch_add(1, Ordering::Relaxed);
                if !opts.skip_cache {
                    self.local.put(
                        key,
                        value.clone(),
                        Some(opts.cache_ttl.unwrap_or(self.config.l1_ttl)),
                    );
                }
                Ok(Some(value))
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(err @ (FabricError::Terminal | FabricError::Cancelled)) => Err(err),
            Err(err) if err.is_client() => Err(err),
            Err(err) => {
                if self.controller.is_failover() {
                    tracing::warn!(key, error = %err, "degraded read, serving from l1");
                    Ok(self.local.get(key).map(|value| retype(value, kind)))
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Writes `key` with default options. `ttl_secs` of `None` or zero
    /// means the provider default.
    pub async fn set(
        &self,
        key: &str,
        value: CacheValue,
        ttl_secs: Option<u64>,
    ) -> Result<(), FabricError> {
        self.set_with(key, value, ttl_secs, &CallOpts::default())
            .await
    }

    /// Writes `key` with explicit per-call options.
    ///
    /// A write whose value fingerprint matches the unexpired L1 entry is
    /// short-circuited without touching the provider.
    pub async fn set_with(
        &self,
        key: &str,
        value: CacheValue,
        ttl_secs: Option<u64>,
        opts: &CallOpts,
    ) -> Result<(), FabricError> {
        self.ensure_live()?;

        if !opts.skip_cache && self.local.is_unchanged(key, &value) {
            self.counters.unchanged_writes.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key, "write skipped, value unchanged in l1");
            return Ok(());
        }

        let value_ref = &value;
        self.guarded(async {
            self.throttle().await;
            self.controller
                .execute(|p| async move { p.set(key, value_ref, ttl_secs).await })
                .await
        })
        .await?;

        if !opts.skip_cache {
            let l1_ttl = match ttl_secs {
                Some(secs) if secs > 0 => self.config.l1_ttl.min(Duration::from_secs(secs)),
                _ => self.config.l1_ttl,
            };
            self.local.put(key, value, Some(l1_ttl));
        }
        Ok(())
    }

    /// Deletes `key`. L1 is evicted first; a provider-side failure is
    /// logged but not surfaced (deletes are eventually consistent).
    pub async fn delete(&self, key: &str) -> Result<(), FabricError> {
        self.ensure_live()?;
        self.local.delete(key);

        let result = self
            .guarded(async {
                self.throttle().await;
                self.controller
                    .execute(|p| async move { p.delete(key).await })
                    .await
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(err @ (FabricError::Terminal | FabricError::Cancelled)) => Err(err),
            Err(err) => {
                tracing::warn!(key, error = %err, "provider delete failed; l1 already evicted");
                Ok(())
            }
        }
    }

    /// Lists keys under `prefix`, straight from the active provider. L1 is
    /// not consulted. `limit == 0` means unbounded.
    pub async fn list_keys(&self, prefix: &str, limit: usize) -> Result<Vec<String>, FabricError> {
        self.ensure_live()?;
        self.guarded(async {
            self.throttle().await;
            self.controller
                .execute(|p| async move { p.list_keys(prefix, limit).await })
                .await
        })
        .await
    }

    /// Writes many pairs through the provider's bulk path, populating L1
    /// for each pair.
    pub async fn bulk_set(&self, pairs: Vec<BulkPair>) -> Result<Vec<BulkResult>, FabricError> {
        self.ensure_live()?;

        for pair in &pairs {
            let l1_ttl = match pair.ttl_secs {
                Some(secs) if secs > 0 => self.config.l1_ttl.min(Duration::from_secs(secs)),
                _ => self.config.l1_ttl,
            };
            self.local.put(&pair.key, pair.value.clone(), Some(l1_ttl));
        }

        let pairs_ref = &pairs;
        self.guarded(async {
            self.throttle().await;
            self.controller
                .execute(|p| async move { p.bulk_set(pairs_ref).await })
                .await
        })
        .await
    }

    /// Whether `key` exists on the active provider.
    pub async fn exists(&self, key: &str) -> Result<bool, FabricError> {
        self.ensure_live()?;
        self.guarded(async {
            self.throttle().await;
            self.controller
                .execute(|p| async move { p.exists(key).await })
                .await
        })
        .await
    }

    /// Increments the integer at `key`, returning the new value.
    pub async fn incr(&self, key: &str) -> Result<i64, FabricError> {
        self.ensure_live()?;
        // counters are never served stale from L1
        self.local.delete(key);
        self.guarded(async {
            self.throttle().await;
            self.controller
                .execute(|p| async move { p.incr(key).await })
                .await
        })
        .await
    }

    /// Attempts to acquire the distributed lock at `key`.
    ///
    /// On success the token is held locally; only this fabric instance can
    /// release the lock. Non-atomic backends make this best-effort only,
    /// and a security warning is logged on every call.
    pub async fn lock(&self, key: &str, ttl_secs: u64) -> Result<bool, FabricError> {
        self.ensure_live()?;

        let provider = self.controller.active_provider().await?;
        if !provider.supports_atomic_lock() {
            tracing::warn!(
                key,
                provider = %provider.id(),
                "lock on a non-atomic provider: mutual exclusion is NOT guaranteed"
            );
        }

        let token = generate_token();
        let token_ref = token.as_str();
        let acquired = self
            .guarded(async {
                self.throttle().await;
                self.controller
                    .execute(|p| async move { p.lock(key, token_ref, ttl_secs).await })
                    .await
            })
            .await?;

        if acquired {
            self.locks
                .lock()
                .unwrap()
                .insert(key.to_string(), token);
        }
        Ok(acquired)
    }

    /// Releases the distributed lock at `key`, if this instance holds it.
    ///
    /// Returns `false` when we never held the lock, or when the stored
    /// token no longer matches (our TTL lapsed and someone else acquired).
    pub async fn unlock(&self, key: &str) -> Result<bool, FabricError> {
        self.ensure_live()?;

        let Some(token) = self.locks.lock().unwrap().get(key).cloned() else {
            return Ok(false);
        };

        let token_ref = token.as_str();
        let released = self
            .guarded(async {
                self.throttle().await;
                self.controller
                    .execute(|p| async move { p.unlock(key, token_ref).await })
                    .await
            })
            .await?;

        if released {
            self.locks.lock().unwrap().remove(key);
        }
        Ok(released)
    }

    /// Starts an empty pipeline bound to this fabric.
    pub fn pipeline(&self) -> FabricPipeline<'_> {
        FabricPipeline {
            fabric: self,
            inner: Pipeline::new(),
        }
    }

    /// Whether the fabric is currently running on a fallback provider.
    pub fn is_failover(&self) -> bool {
        self.controller.is_failover()
    }

    /// Point-in-time view of the failover state.
    pub fn failover_snapshot(&self) -> FailoverSnapshot {
        self.controller.snapshot()
    }

    /// Operation counters since construction.
    pub fn stats(&self) -> FabricStats {
        FabricStats {
            l1_hits: self.counters.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.counters.l2_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            unchanged_writes: self.counters.unchanged_writes.load(Ordering::Relaxed),
        }
    }

    /// Diagnostic snapshot of the active provider's transport.
    pub async fn connection_info(&self) -> Result<ConnectionInfo, FabricError> {
        self.ensure_live()?;
        let provider = self.controller.active_provider().await?;
        Ok(provider.connection_info())
    }

    /// Tears the fabric down: stops the heartbeat and recovery timers,
    /// disconnects the active provider (bounded), cancels in-flight calls,
    /// and makes every subsequent operation return `Terminal`. Idempotent.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown.send(true);

        if let Some(heartbeat) = self.heartbeat.lock().unwrap().take() {
            heartbeat.stop();
        }
        self.controller.shutdown().await;
        self.local.clear();
        self.locks.lock().unwrap().clear();
        tracing::info!("cache fabric destroyed");
    }

    fn ensure_live(&self) -> Result<(), FabricError> {
        if self.destroyed.load(Ordering::Acquire) {
            Err(FabricError::Terminal)
        } else {
            Ok(())
        }
    }

    /// The limiter front-runs every remote call; the in-process provider
    /// is exempt.
    async fn throttle(&self) {
        if self.controller.active_id() != ProviderId::Memory {
            self.limiter.acquire().await;
        }
    }

    /// Races `fut` against destruction so `destroy()` cancels in-flight
    /// work instead of waiting behind it.
    async fn guarded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, FabricError>>,
    ) -> Result<T, FabricError> {
        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            result = fut => result,
            _ = shutdown.changed() => Err(FabricError::Cancelled),
        }
    }
}

fn retype(value: CacheValue, kind: ValueKind) -> CacheValue {
    match (&value, kind) {
        (CacheValue::Json(_), ValueKind::Json)
        | (CacheValue::Text(_), ValueKind::Text)
        | (CacheValue::Bytes(_), ValueKind::Bytes) => value,
        _ => CacheValue::from_wire(value.to_wire(), kind),
    }
}

/// A command batch bound to a fabric; built by chaining, submitted with
/// [`FabricPipeline::exec`].
pub struct FabricPipeline<'a> {
    fabric: &'a CacheFabric,
    inner: Pipeline,
}

impl FabricPipeline<'_> {
    /// Buffers a write.
    pub fn set(mut self, key: impl Into<String>, value: CacheValue, ttl_secs: Option<u64>) -> Self {
        self.inner = self.inner.set(key, value, ttl_secs);
        self
    }

    /// Buffers a read.
    pub fn get(mut self, key: impl Into<String>) -> Self {
        self.inner = self.inner.get(key);
        self
    }

    /// Buffers a delete.
    pub fn del(mut self, key: impl Into<String>) -> Self {
        self.inner = self.inner.del(key);
        self
    }

    /// Buffers an existence check.
    pub fn exists(mut self, key: impl Into<String>) -> Self {
        self.inner = self.inner.exists(key);
        self
    }

    /// Buffers an increment.
    pub fn incr(mut self, key: impl Into<String>) -> Self {
        self.inner = self.inner.incr(key);
        self
    }

    /// Buffers a TTL reset.
    pub fn expire(mut self, key: impl Into<String>, ttl_secs: u64) -> Self {
        self.inner = self.inner.expire(key, ttl_secs);
        self
    }

    /// Submits the batch in one round-trip. Results are index-aligned with
    /// the buffered commands; per-command failures surface as error
    /// entries, not call failures.
    pub async fn exec(self) -> Result<Vec<PipelineResult>, FabricError> {
        let FabricPipeline { fabric, inner } = self;
        fabric.ensure_live()?;

        let inner_ref = &inner;
        fabric
            .guarded(async {
                fabric.throttle().await;
                fabric
                    .controller
                    .execute(|p| async move { p.exec_pipeline(inner_ref.clone()).await })
                    .await
            })
            .await
    }
}
