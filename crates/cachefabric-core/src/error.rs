//! The sealed error taxonomy shared by every provider and the failover path.
//!
//! A "not found" read is **not** an error anywhere in cachefabric; reads
//! return `Option<CacheValue>`. Everything that *is* an error falls into one
//! of the [`FabricError`] variants, and the failover controller bases its
//! demotion decisions purely on the variant, never on string matching at
//! the call site. Adapters translate backend responses into variants using
//! the classifiers in this module.

use std::time::Duration;
use thiserror::Error;

/// Finer-grained cause carried by [`FabricError::Transient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// Connection reset/refused, DNS failure, broken pipe.
    Network,
    /// A connect or command deadline elapsed.
    Timeout,
    /// The backend answered 429 or an equivalent throttle response.
    RateLimited,
    /// A quota / usage-cap message. Recovery probes run on the long
    /// interval when the last failure was quota-flavored.
    Quota,
    /// Every provider in the fallback chain has been exhausted.
    Unavailable,
}

impl TransientKind {
    /// Stable label used in logs and events.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransientKind::Network => "network",
            TransientKind::Timeout => "timeout",
            TransientKind::RateLimited => "rate_limited",
            TransientKind::Quota => "quota",
            TransientKind::Unavailable => "unavailable",
        }
    }
}

/// Classification buckets used by the failover controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Counts toward the consecutive-failure threshold.
    Transient,
    /// Demotes immediately, bypassing the threshold.
    Auth,
    /// Surfaced to the caller unchanged; never counts.
    Client,
    /// Cancelled / terminal; never retried, never counted.
    Fatal,
}

/// Unified error type for all cachefabric operations.
#[derive(Debug, Clone, Error)]
pub enum FabricError {
    /// Invalid argument, unknown command, or any 4xx that is neither an
    /// auth failure nor a throttle response.
    #[error("client error: {message}")]
    Client {
        /// Backend-supplied detail.
        message: String,
    },

    /// Authentication or authorization rejected by the backend.
    #[error("auth error: {message}")]
    Auth {
        /// Backend-supplied detail.
        message: String,
    },

    /// A retryable condition: network trouble, timeouts, throttling, quota.
    #[error("transient error ({}): {message}", .kind.as_str())]
    Transient {
        /// What flavor of transient failure this is.
        kind: TransientKind,
        /// Backend-supplied detail.
        message: String,
        /// Backend-advised wait before retrying, when known (HTTP 429).
        retry_after: Option<Duration>,
    },

    /// The caller's operation was cancelled mid-flight (typically because
    /// the facade was destroyed while the call was outstanding).
    #[error("operation cancelled")]
    Cancelled,

    /// The facade has been destroyed; no further operations are possible.
    #[error("cache facade destroyed")]
    Terminal,
}

impl FabricError {
    /// A client-classified error.
    pub fn client(message: impl Into<String>) -> Self {
        FabricError::Client {
            message: message.into(),
        }
    }

    /// An auth-terminal error.
    pub fn auth(message: impl Into<String>) -> Self {
        FabricError::Auth {
            message: message.into(),
        }
    }

    /// A transient error of the given kind.
    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        FabricError::Transient {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    /// A 429-style throttle error carrying the backend's retry hint.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        FabricError::Transient {
            kind: TransientKind::RateLimited,
            message: message.into(),
            retry_after,
        }
    }

    /// The all-providers-exhausted error surfaced to callers.
    pub fn unavailable(message: impl Into<String>) -> Self {
        FabricError::Transient {
            kind: TransientKind::Unavailable,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Classifies a backend error *message* the way the failover controller
    /// expects. Used by adapters whose client library only hands back
    /// strings (the TCP KV client, REST envelope errors).
    pub fn classify_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();

        if lower.contains("wrongpass")
            || lower.contains("noauth")
            || lower.contains("invalid username-password pair")
            || lower.contains("invalid password")
        {
            return FabricError::auth(message);
        }
        if lower.contains("quota exceeded") || lower.contains("free usage limit") {
            return FabricError::transient(TransientKind::Quota, message);
        }
        if lower.contains("rate limit") || lower.contains("too many requests") {
            return FabricError::rate_limited(message, None);
        }
        if lower.contains("econnreset")
            || lower.contains("econnrefused")
            || lower.contains("etimedout")
            || lower.contains("connection reset")
            || lower.contains("connection refused")
            || lower.contains("broken pipe")
            || lower.contains("dns")
            || lower.contains("failed to lookup")
        {
            return FabricError::transient(TransientKind::Network, message);
        }
        if lower.contains("timed out") || lower.contains("timeout") {
            return FabricError::transient(TransientKind::Timeout, message);
        }

        FabricError::client(message)
    }

    /// Classifies an HTTP status + body the way the failover controller
    /// expects. `retry_after` is the parsed `Retry-After` header, if any.
    pub fn classify_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => FabricError::auth(format!("http {status}: {body}")),
            429 => FabricError::rate_limited(format!("http 429: {body}"), retry_after),
            400..=499 => FabricError::client(format!("http {status}: {body}")),
            _ => {
                // 5xx and anything else: retryable server trouble, unless
                // the body names a quota problem.
                let lower = body.to_ascii_lowercase();
                let kind = if lower.contains("quota") || lower.contains("usage limit") {
                    TransientKind::Quota
                } else {
                    TransientKind::Network
                };
                FabricError::transient(kind, format!("http {status}: {body}"))
            }
        }
    }

    /// The classification bucket this error falls into.
    pub fn class(&self) -> ErrorClass {
        match self {
            FabricError::Client { .. } => ErrorClass::Client,
            FabricError::Auth { .. } => ErrorClass::Auth,
            FabricError::Transient { .. } => ErrorClass::Transient,
            FabricError::Cancelled | FabricError::Terminal => ErrorClass::Fatal,
        }
    }

    /// Returns `true` for errors that count toward the failover threshold.
    pub fn is_transient(&self) -> bool {
        matches!(self, FabricError::Transient { .. })
    }

    /// Returns `true` for auth-terminal errors (immediate demotion).
    pub fn is_auth(&self) -> bool {
        matches!(self, FabricError::Auth { .. })
    }

    /// Returns `true` for client/logic errors (surfaced, never counted).
    pub fn is_client(&self) -> bool {
        matches!(self, FabricError::Client { .. })
    }

    /// Returns `true` when the failure indicates a quota / usage-cap issue,
    /// which selects the long recovery interval.
    pub fn is_quota(&self) -> bool {
        matches!(
            self,
            FabricError::Transient {
                kind: TransientKind::Quota,
                ..
            }
        )
    }

    /// The backend's retry hint, when one was supplied.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FabricError::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
