use crate::config::FailoverConfig;
use crate::events::FailoverEvent;
use async_trait::async_trait;
use cachefabric_core::{ErrorClass, FabricError, ValueKind};
use cachefabric_provider::{Provider, ProviderId};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Key probed during recovery. Reading it is side-effect free on every
/// backend.
const HEALTH_CHECK_KEY: &str = "__health_check__";

/// Builds providers on demand. The facade implements this from its
/// configuration; the controller never sees credentials.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    /// Creates and initializes the provider for `id`.
    async fn create(&self, id: ProviderId) -> Result<Arc<dyn Provider>, FabricError>;

    /// The providers this deployment has credentials for. `Memory` is
    /// always implicitly available.
    fn available(&self) -> Vec<ProviderId>;
}

/// The ordered fallback list for each active provider. Every chain
/// terminates at the in-process memory provider.
pub fn fallback_chain(id: ProviderId) -> &'static [ProviderId] {
    match id {
        ProviderId::TcpKv | ProviderId::TcpKvTls | ProviderId::TcpKvAutoDetect => &[
            ProviderId::HttpRestKv,
            ProviderId::RemoteHttpKv,
            ProviderId::Memory,
        ],
        ProviderId::RemoteHttpKv => &[ProviderId::HttpRestKv, ProviderId::Memory],
        ProviderId::HttpRestKv => &[ProviderId::RemoteHttpKv, ProviderId::Memory],
        ProviderId::Memory => &[],
    }
}

/// Point-in-time view of the controller's state.
#[derive(Debug, Clone)]
pub struct FailoverSnapshot {
    /// The provider currently serving calls.
    pub active: ProviderId,
    /// The provider this deployment prefers.
    pub preferred: ProviderId,
    /// Consecutive retryable failures on the active provider.
    pub failure_count: u32,
    /// Whether the fabric is running on a fallback.
    pub is_failover: bool,
    /// The error that caused the last demotion or failure, if any.
    pub last_error: Option<String>,
    /// When the last retryable failure was recorded.
    pub last_failure_at: Option<Instant>,
}

struct ControllerState {
    preferred: ProviderId,
    active_id: ProviderId,
    active: Option<Arc<dyn Provider>>,
    failure_count: u32,
    is_failover: bool,
    last_error: Option<String>,
    last_error_quota: bool,
    last_failure_at: Option<Instant>,
}

struct Inner {
    factory: Arc<dyn ProviderFactory>,
    config: FailoverConfig,
    state: Mutex<ControllerState>,
    recovery: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

/// Routes operations to the active provider, demoting down the fallback
/// chain on classified failures and probing for recovery afterwards.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct FailoverController {
    inner: Arc<Inner>,
}

impl FailoverController {
    /// Creates a controller preferring `preferred`. Providers are created
    /// lazily on first dispatch.
    pub fn new(
        factory: Arc<dyn ProviderFactory>,
        preferred: ProviderId,
        config: FailoverConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                config,
                state: Mutex::new(ControllerState {
                    preferred,
                    active_id: preferred,
                    active: None,
                    failure_count: 0,
                    is_failover: false,
                    last_error: None,
                    last_error_quota: false,
                    last_failure_at: None,
                }),
                recovery: Mutex::new(None),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// Runs `op` against the active provider with failover: classified
    /// transient failures count toward the demotion threshold, auth
    /// failures demote immediately, and the operation is retried on the
    /// new active provider up to the configured attempt budget.
    ///
    /// Client errors are surfaced unchanged and never counted.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, FabricError>
    where
        F: Fn(Arc<dyn Provider>) -> Fut,
        Fut: std::future::Future<Output = Result<T, FabricError>>,
    {
        let mut last_error: Option<FabricError> = None;

        for attempt in 0..self.inner.config.max_attempts {
            if self.inner.destroyed.load(Ordering::Acquire) {
                return Err(FabricError::Terminal);
            }
            if attempt > 0 {
                self.backoff(attempt).await;
            }

            let result = match self.active_provider().await {
                Ok(provider) => op(provider).await,
                Err(err) => Err(err),
            };

            let err = match result {
                Ok(value) => {
                    self.record_success();
                    return Ok(value);
                }
                Err(err) => err,
            };

            match err.class() {
                ErrorClass::Client => return Err(err),
                ErrorClass::Fatal => return Err(err),
                ErrorClass::Auth => {
                    tracing::warn!(error = %err, "auth failure on active provider");
                    self.demote(&err).await;
                    last_error = Some(err);
                }
                ErrorClass::Transient => {
                    let failures = self.record_failure(&err);
                    if failures >= self.inner.config.threshold {
                        self.demote(&err).await;
                    }
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err @ FabricError::Auth { .. }) => Err(err),
            Some(err) => Err(FabricError::unavailable(format!(
                "all cache providers exhausted: {err}"
            ))),
            None => Err(FabricError::unavailable("all cache providers exhausted")),
        }
    }

    /// The provider currently serving calls, created lazily.
    pub async fn active_provider(&self) -> Result<Arc<dyn Provider>, FabricError> {
        let wanted = {
            let state = self.inner.state.lock().unwrap();
            if let Some(provider) = &state.active {
                return Ok(Arc::clone(provider));
            }
            state.active_id
        };

        let provider = self.inner.factory.create(wanted).await?;
        let mut state = self.inner.state.lock().unwrap();
        // A demotion may have raced the creation; only cache the instance
        // if it still matches the active id.
        if state.active_id == wanted && state.active.is_none() {
            state.active = Some(Arc::clone(&provider));
        }
        Ok(provider)
    }

    /// Whether the fabric is currently running on a fallback provider.
    pub fn is_failover(&self) -> bool {
        self.inner.state.lock().unwrap().is_failover
    }

    /// The id of the provider currently serving calls.
    pub fn active_id(&self) -> ProviderId {
        self.inner.state.lock().unwrap().active_id
    }

    /// Point-in-time view of the controller state.
    pub fn snapshot(&self) -> FailoverSnapshot {
        let state = self.inner.state.lock().unwrap();
        FailoverSnapshot {
            active: state.active_id,
            preferred: state.preferred,
            failure_count: state.failure_count,
            is_failover: state.is_failover,
            last_error: state.last_error.clone(),
            last_failure_at: state.last_failure_at,
        }
    }

    /// Stops the recovery timer and disconnects the active provider.
    /// Idempotent; all subsequent dispatches return `Terminal`.
    pub async fn shutdown(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel_recovery();

        let active = self.inner.state.lock().unwrap().active.take();
        if let Some(provider) = active {
            if timeout(self.inner.config.disconnect_timeout, provider.disconnect())
                .await
                .is_err()
            {
                tracing::warn!("provider disconnect exceeded deadline during shutdown");
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.failure_count = 0;
    }

    fn record_failure(&self, err: &FabricError) -> u32 {
        let mut state = self.inner.state.lock().unwrap();
        state.failure_count += 1;
        state.last_error = Some(err.to_string());
        state.last_error_quota = err.is_quota();
        state.last_failure_at = Some(Instant::now());
        tracing::debug!(
            failures = state.failure_count,
            active = %state.active_id,
            error = %err,
            "retryable provider failure"
        );
        state.failure_count
    }

    async fn backoff(&self, attempt: u32) {
        let base = self.inner.config.backoff_base;
        let exp = base.saturating_mul(1u32 << (attempt - 1).min(16));
        let jitter_max = self.inner.config.backoff_jitter_max.as_millis() as u64;
        let jitter = if jitter_max == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_max)
        };
        tokio::time::sleep(exp + std::time::Duration::from_millis(jitter)).await;
    }

    /// Swaps the active provider for the next available fallback and arms
    /// the recovery probe.
    async fn demote(&self, err: &FabricError) {
        // 1. The old recovery timer no longer matches the state we are
        //    about to install.
        self.cancel_recovery();

        let available = self.inner.factory.available();
        let (from, old_provider, to, quota) = {
            let mut state = self.inner.state.lock().unwrap();
            let next = fallback_chain(state.active_id)
                .iter()
                .find(|id| **id == ProviderId::Memory || available.contains(*id))
                .copied();
            let Some(next) = next else {
                // Already at the end of the chain (memory); nothing to
                // swap to.
                state.last_error = Some(err.to_string());
                return;
            };

            let from = state.active_id;
            let old = state.active.take();
            state.active_id = next;
            state.failure_count = 0;
            state.is_failover = true;
            state.last_error = Some(err.to_string());
            state.last_error_quota = err.is_quota();
            (from, old, next, state.last_error_quota)
        };

        // 2. Close the failed transport, best-effort.
        if let Some(provider) = old_provider {
            if timeout(self.inner.config.disconnect_timeout, provider.disconnect())
                .await
                .is_err()
            {
                tracing::warn!(provider = %from, "disconnect of demoted provider exceeded deadline");
            }
        }

        // 3/4. State already swapped; arm the probe for the preferred
        //      provider.
        self.arm_recovery(quota);

        tracing::info!(from = %from, to = %to, error = %err, "cache provider demoted");
        #[cfg(feature = "metrics")]
        metrics::counter!("cachefabric_demotions_total", "from" => from.as_str(), "to" => to.as_str())
            .increment(1);

        self.inner
            .config
            .event_listeners
            .emit(&FailoverEvent::Demoted {
                source: self.inner.config.name.clone(),
                timestamp: Instant::now(),
                from,
                to,
                reason: err.to_string(),
            });
    }

    fn cancel_recovery(&self) {
        if let Some(handle) = self.inner.recovery.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// (Re-)arms the recovery probe. Re-arming cancels the previous timer.
    fn arm_recovery(&self, quota: bool) {
        let interval = if quota {
            self.inner.config.recovery_interval_quota
        } else {
            self.inner.config.recovery_interval
        };

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if inner.destroyed.load(Ordering::Acquire) {
                    return;
                }

                let preferred = inner.state.lock().unwrap().preferred;
                match Self::probe(&inner, preferred).await {
                    Ok(provider) => {
                        let old = {
                            let mut state = inner.state.lock().unwrap();
                            let old = state.active.take();
                            state.active = Some(provider);
                            state.active_id = preferred;
                            state.is_failover = false;
                            state.failure_count = 0;
                            state.last_error = None;
                            old
                        };
                        if let Some(provider) = old {
                            let _ =
                                timeout(inner.config.disconnect_timeout, provider.disconnect())
                                    .await;
                        }

                        tracing::info!(provider = %preferred, "preferred cache provider recovered");
                        #[cfg(feature = "metrics")]
                        metrics::counter!("cachefabric_recoveries_total", "provider" => preferred.as_str())
                            .increment(1);
                        inner.config.event_listeners.emit(&FailoverEvent::Recovered {
                            source: inner.config.name.clone(),
                            timestamp: Instant::now(),
                            provider: preferred,
                        });
                        return;
                    }
                    Err(err) => {
                        tracing::debug!(provider = %preferred, error = %err, "recovery probe failed");
                        inner
                            .config
                            .event_listeners
                            .emit(&FailoverEvent::ProbeFailed {
                                source: inner.config.name.clone(),
                                timestamp: Instant::now(),
                                provider: preferred,
                                reason: err.to_string(),
                            });
                    }
                }
            }
        });

        let previous = self.inner.recovery.lock().unwrap().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// A cheap, side-effect-free health probe against `id`.
    async fn probe(inner: &Arc<Inner>, id: ProviderId) -> Result<Arc<dyn Provider>, FabricError> {
        let provider = inner.factory.create(id).await?;
        match timeout(
            inner.config.probe_timeout,
            provider.get(HEALTH_CHECK_KEY, ValueKind::Bytes),
        )
        .await
        {
            Ok(Ok(_)) => Ok(provider),
            Ok(Err(err)) => {
                let _ = provider.disconnect().await;
                Err(err)
            }
            Err(_) => {
                let _ = provider.disconnect().await;
                Err(FabricError::transient(
                    cachefabric_core::TransientKind::Timeout,
                    "recovery probe deadline elapsed",
                ))
            }
        }
    }
}
