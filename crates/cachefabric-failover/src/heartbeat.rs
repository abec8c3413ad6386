use cachefabric_provider::{ConnectionHealth, ConnectionState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

/// Configuration for the TCP heartbeat.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// How often the transport is probed.
    pub interval: Duration,
    /// Deadline for each liveness ping.
    pub ping_timeout: Duration,
    /// Latency above this is logged (but never demotes).
    pub latency_warn: Duration,
    /// Consecutive ping failures at which the log escalates to error.
    pub failure_log_threshold: u32,
    /// Pause before a scheduled reconnect attempt.
    pub restart_delay: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(5),
            latency_warn: Duration::from_millis(200),
            failure_log_threshold: 3,
            restart_delay: Duration::from_secs(5),
        }
    }
}

/// Periodic liveness probe for a stateful transport.
///
/// Per tick: a lost transport gets an asynchronous restart scheduled after
/// `restart_delay`; an in-flight connect gets a best-effort nudge ping that
/// is never counted; a ready transport gets a deadline ping whose failures
/// are logged. The heartbeat never demotes; demotion happens through the
/// normal error path on the next user-issued call.
pub struct Heartbeat {
    handle: JoinHandle<()>,
}

impl Heartbeat {
    /// Spawns the heartbeat task. It stops when `destroyed` flips or the
    /// transport reports [`ConnectionState::End`].
    pub fn spawn<T>(target: Arc<T>, config: HeartbeatConfig, destroyed: Arc<AtomicBool>) -> Self
    where
        T: ConnectionHealth + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = interval(config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately.
            ticker.tick().await;

            let mut consecutive_failures: u32 = 0;
            loop {
                ticker.tick().await;
                if destroyed.load(Ordering::Acquire) {
                    return;
                }

                match target.state() {
                    ConnectionState::End => {
                        // Deliberately closed; nothing left to watch.
                        return;
                    }
                    ConnectionState::Disconnected => {
                        tracing::warn!("tcp transport lost, scheduling reconnect");
                        let target = Arc::clone(&target);
                        let destroyed = Arc::clone(&destroyed);
                        let delay = config.restart_delay;
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            if destroyed.load(Ordering::Acquire) {
                                return;
                            }
                            if let Err(err) = target.restart().await {
                                tracing::warn!(error = %err, "scheduled reconnect failed");
                            }
                        });
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting => {
                        // Nudge the client along; not counted toward health.
                        let _ = timeout(config.ping_timeout, target.ping()).await;
                    }
                    ConnectionState::Ready => {
                        match timeout(config.ping_timeout, target.ping()).await {
                            Ok(Ok(latency)) => {
                                consecutive_failures = 0;
                                if latency > config.latency_warn {
                                    tracing::warn!(
                                        latency_ms = latency.as_millis() as u64,
                                        "tcp heartbeat latency is high"
                                    );
                                }
                            }
                            Ok(Err(err)) => {
                                consecutive_failures += 1;
                                Self::log_failure(consecutive_failures, config.failure_log_threshold, &err.to_string());
                            }
                            Err(_) => {
                                consecutive_failures += 1;
                                Self::log_failure(
                                    consecutive_failures,
                                    config.failure_log_threshold,
                                    "ping deadline elapsed",
                                );
                            }
                        }
                    }
                }
            }
        });

        Self { handle }
    }

    fn log_failure(consecutive: u32, threshold: u32, reason: &str) {
        if consecutive >= threshold {
            tracing::error!(
                consecutive,
                reason,
                "tcp heartbeat failing; the next user-issued call will drive failover"
            );
        } else {
            tracing::warn!(consecutive, reason, "tcp heartbeat ping failed");
        }
    }

    /// Stops the heartbeat task.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
