//! Connection lifecycle for stateful transports.
//!
//! The TCP adapter models its client as an explicit state machine instead
//! of leaning on library-internal status strings. The heartbeat reads the
//! state through [`ConnectionHealth`] and drives reconnects through it.

use async_trait::async_trait;
use cachefabric_core::FabricError;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

/// Lifecycle states of a stateful transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No transport established, or the last one was lost.
    Disconnected = 0,
    /// A connect is in flight.
    Connecting = 1,
    /// Connected and serving commands.
    Ready = 2,
    /// A restart is in flight.
    Reconnecting = 3,
    /// Deliberately shut down; no further reconnects.
    End = 4,
}

impl ConnectionState {
    /// Stable label for logs and `connection_info`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::End => "end",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Ready,
            3 => ConnectionState::Reconnecting,
            4 => ConnectionState::End,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Lock-free holder for a [`ConnectionState`].
#[derive(Debug)]
pub(crate) struct ConnectionStatus(AtomicU8);

impl ConnectionStatus {
    pub(crate) fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// What the heartbeat needs from a stateful provider: where its transport
/// stands, a cheap liveness probe, and a way to rebuild the transport.
#[async_trait]
pub trait ConnectionHealth: Send + Sync {
    /// Current transport state.
    fn state(&self) -> ConnectionState;

    /// Issues a liveness probe, returning the observed latency.
    async fn ping(&self) -> Result<Duration, FabricError>;

    /// Tears down and re-establishes the transport. Implementations
    /// enforce a single in-flight restart; concurrent calls return
    /// immediately.
    async fn restart(&self) -> Result<(), FabricError>;
}
