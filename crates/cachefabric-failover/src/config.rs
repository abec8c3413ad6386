use crate::events::FailoverEvent;
use cachefabric_core::{EventListeners, FnListener};
use cachefabric_provider::ProviderId;
use std::time::Duration;

/// Configuration for the failover controller.
pub struct FailoverConfig {
    pub(crate) threshold: u32,
    pub(crate) max_attempts: u32,
    pub(crate) backoff_base: Duration,
    pub(crate) backoff_jitter_max: Duration,
    pub(crate) recovery_interval: Duration,
    pub(crate) recovery_interval_quota: Duration,
    pub(crate) probe_timeout: Duration,
    pub(crate) disconnect_timeout: Duration,
    pub(crate) event_listeners: EventListeners<FailoverEvent>,
    pub(crate) name: String,
}

impl FailoverConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> FailoverConfigBuilder {
        FailoverConfigBuilder::new()
    }
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`FailoverConfig`].
pub struct FailoverConfigBuilder {
    threshold: u32,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_jitter_max: Duration,
    recovery_interval: Duration,
    recovery_interval_quota: Duration,
    probe_timeout: Duration,
    disconnect_timeout: Duration,
    event_listeners: EventListeners<FailoverEvent>,
    name: String,
}

impl FailoverConfigBuilder {
    /// Creates a builder with default values.
    pub fn new() -> Self {
        Self {
            threshold: 2,
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_jitter_max: Duration::from_secs(2),
            recovery_interval: Duration::from_secs(30 * 60),
            recovery_interval_quota: Duration::from_secs(12 * 60 * 60),
            probe_timeout: Duration::from_secs(5),
            disconnect_timeout: Duration::from_secs(1),
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
        }
    }

    /// Consecutive retryable failures before demotion.
    ///
    /// Default: 2
    pub fn threshold(mut self, n: u32) -> Self {
        self.threshold = n.max(1);
        self
    }

    /// Total work attempts per logical call across primary and fallbacks.
    ///
    /// Default: 3
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    /// Base delay of the exponential backoff between attempts.
    ///
    /// Default: 1 second
    pub fn backoff_base(mut self, d: Duration) -> Self {
        self.backoff_base = d;
        self
    }

    /// Upper bound of the random jitter added to each backoff.
    ///
    /// Default: 2 seconds
    pub fn backoff_jitter_max(mut self, d: Duration) -> Self {
        self.backoff_jitter_max = d;
        self
    }

    /// Recovery probe period for non-quota failures.
    ///
    /// Default: 30 minutes
    pub fn recovery_interval(mut self, d: Duration) -> Self {
        self.recovery_interval = d;
        self
    }

    /// Recovery probe period when the last failure was quota-flavored.
    ///
    /// Default: 12 hours
    pub fn recovery_interval_quota(mut self, d: Duration) -> Self {
        self.recovery_interval_quota = d;
        self
    }

    /// Deadline for the recovery probe call.
    ///
    /// Default: 5 seconds
    pub fn probe_timeout(mut self, d: Duration) -> Self {
        self.probe_timeout = d;
        self
    }

    /// Deadline for best-effort disconnects during demotion.
    ///
    /// Default: 1 second
    pub fn disconnect_timeout(mut self, d: Duration) -> Self {
        self.disconnect_timeout = d;
        self
    }

    /// Give this controller a human-readable name for observability.
    ///
    /// Default: `<unnamed>`
    pub fn name<N: Into<String>>(mut self, n: N) -> Self {
        self.name = n.into();
        self
    }

    /// Register a callback for demotions.
    pub fn on_demotion<F>(mut self, f: F) -> Self
    where
        F: Fn(ProviderId, ProviderId) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &FailoverEvent| {
                if let FailoverEvent::Demoted { from, to, .. } = event {
                    f(*from, *to);
                }
            }));
        self
    }

    /// Register a callback for recoveries.
    pub fn on_recovery<F>(mut self, f: F) -> Self
    where
        F: Fn(ProviderId) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &FailoverEvent| {
                if let FailoverEvent::Recovered { provider, .. } = event {
                    f(*provider);
                }
            }));
        self
    }

    /// Register a raw event listener.
    pub fn event_listener<L>(mut self, listener: L) -> Self
    where
        L: cachefabric_core::EventListener<FailoverEvent> + 'static,
    {
        self.event_listeners.add(listener);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> FailoverConfig {
        FailoverConfig {
            threshold: self.threshold,
            max_attempts: self.max_attempts,
            backoff_base: self.backoff_base,
            backoff_jitter_max: self.backoff_jitter_max,
            recovery_interval: self.recovery_interval,
            recovery_interval_quota: self.recovery_interval_quota,
            probe_timeout: self.probe_timeout,
            disconnect_timeout: self.disconnect_timeout,
            event_listeners: self.event_listeners,
            name: self.name,
        }
    }
}

impl Default for FailoverConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
