//! Events emitted by the failover controller.

use cachefabric_core::FabricEvent;
use cachefabric_provider::ProviderId;
use std::time::Instant;

/// Events emitted as the controller moves providers around.
#[derive(Debug, Clone)]
pub enum FailoverEvent {
    /// The active provider was demoted to a fallback.
    Demoted {
        /// Name of the controller instance.
        source: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Provider that was demoted.
        from: ProviderId,
        /// Provider now active.
        to: ProviderId,
        /// The error that triggered the demotion.
        reason: String,
    },

    /// The preferred provider passed a recovery probe and is active again.
    Recovered {
        /// Name of the controller instance.
        source: String,
        /// When the event occurred.
        timestamp: Instant,
        /// The restored provider.
        provider: ProviderId,
    },

    /// A recovery probe ran and the preferred provider is still unhealthy.
    ProbeFailed {
        /// Name of the controller instance.
        source: String,
        /// When the event occurred.
        timestamp: Instant,
        /// The probed provider.
        provider: ProviderId,
        /// Why the probe failed.
        reason: String,
    },
}

impl FabricEvent for FailoverEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Demoted { .. } => "demoted",
            Self::Recovered { .. } => "recovered",
            Self::ProbeFailed { .. } => "probe_failed",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            Self::Demoted { timestamp, .. }
            | Self::Recovered { timestamp, .. }
            | Self::ProbeFailed { timestamp, .. } => *timestamp,
        }
    }

    fn source(&self) -> &str {
        match self {
            Self::Demoted { source, .. }
            | Self::Recovered { source, .. }
            | Self::ProbeFailed { source, .. } => source,
        }
    }
}
