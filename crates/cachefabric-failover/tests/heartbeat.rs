//! Heartbeat behavior against a fake stateful transport.

use async_trait::async_trait;
use cachefabric_core::{FabricError, TransientKind};
use cachefabric_failover::{Heartbeat, HeartbeatConfig};
use cachefabric_provider::{ConnectionHealth, ConnectionState};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

struct FakeTransport {
    state: Mutex<ConnectionState>,
    pings: AtomicU32,
    restarts: AtomicU32,
    ping_fails: AtomicBool,
}

impl FakeTransport {
    fn new(state: ConnectionState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            pings: AtomicU32::new(0),
            restarts: AtomicU32::new(0),
            ping_fails: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ConnectionHealth for FakeTransport {
    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    async fn ping(&self) -> Result<Duration, FabricError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.ping_fails.load(Ordering::SeqCst) {
            Err(FabricError::transient(TransientKind::Network, "ping lost"))
        } else {
            Ok(Duration::from_millis(1))
        }
    }

    async fn restart(&self) -> Result<(), FabricError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = ConnectionState::Ready;
        Ok(())
    }
}

fn fast_config() -> HeartbeatConfig {
    HeartbeatConfig {
        interval: Duration::from_millis(20),
        ping_timeout: Duration::from_millis(100),
        latency_warn: Duration::from_millis(200),
        failure_log_threshold: 3,
        restart_delay: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn ready_transport_gets_periodic_pings() {
    let transport = FakeTransport::new(ConnectionState::Ready);
    let destroyed = Arc::new(AtomicBool::new(false));
    let heartbeat = Heartbeat::spawn(transport.clone(), fast_config(), destroyed);

    sleep(Duration::from_millis(110)).await;
    heartbeat.stop();

    assert!(transport.pings.load(Ordering::SeqCst) >= 2);
    assert_eq!(transport.restarts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn lost_transport_gets_a_delayed_restart() {
    let transport = FakeTransport::new(ConnectionState::Disconnected);
    let destroyed = Arc::new(AtomicBool::new(false));
    let heartbeat = Heartbeat::spawn(transport.clone(), fast_config(), destroyed);

    sleep(Duration::from_millis(120)).await;
    heartbeat.stop();

    assert!(transport.restarts.load(Ordering::SeqCst) >= 1);
    assert_eq!(transport.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn ping_failures_never_restart_or_demote() {
    let transport = FakeTransport::new(ConnectionState::Ready);
    transport.ping_fails.store(true, Ordering::SeqCst);
    let destroyed = Arc::new(AtomicBool::new(false));
    let heartbeat = Heartbeat::spawn(transport.clone(), fast_config(), destroyed);

    // Enough ticks to cross the failure log threshold.
    sleep(Duration::from_millis(150)).await;
    heartbeat.stop();

    assert!(transport.pings.load(Ordering::SeqCst) >= 3);
    assert_eq!(transport.restarts.load(Ordering::SeqCst), 0);
    assert_eq!(transport.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn destroyed_flag_stops_the_heartbeat() {
    let transport = FakeTransport::new(ConnectionState::Ready);
    let destroyed = Arc::new(AtomicBool::new(true));
    let _heartbeat = Heartbeat::spawn(transport.clone(), fast_config(), destroyed);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.pings.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn deliberately_closed_transport_is_left_alone() {
    let transport = FakeTransport::new(ConnectionState::End);
    let destroyed = Arc::new(AtomicBool::new(false));
    let _heartbeat = Heartbeat::spawn(transport.clone(), fast_config(), destroyed);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.pings.load(Ordering::SeqCst), 0);
    assert_eq!(transport.restarts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn connecting_transport_is_nudged_not_counted() {
    let transport = FakeTransport::new(ConnectionState::Connecting);
    transport.ping_fails.store(true, Ordering::SeqCst);
    let destroyed = Arc::new(AtomicBool::new(false));
    let heartbeat = Heartbeat::spawn(transport.clone(), fast_config(), destroyed);

    sleep(Duration::from_millis(100)).await;
    heartbeat.stop();

    // Nudge pings happen, but no restarts are scheduled for a transport
    // that is already connecting.
    assert!(transport.pings.load(Ordering::SeqCst) >= 1);
    assert_eq!(transport.restarts.load(Ordering::SeqCst), 0);
}
