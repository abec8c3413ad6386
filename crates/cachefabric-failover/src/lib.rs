//! Failure accounting, demotion, recovery probing, and the TCP heartbeat.
//!
//! The [`FailoverController`] wraps every provider call the facade makes:
//! it classifies errors, counts consecutive retryable failures, demotes the
//! active provider down a deterministic fallback chain, retries the
//! caller's operation on the new active provider (at most three attempts
//! total per logical call), and arms a recovery probe that later restores
//! the preferred provider.
//!
//! The [`Heartbeat`] runs only for the stateful TCP provider: a periodic
//! liveness ping that nudges or restarts the transport. Heartbeat failures
//! never demote by themselves; demotion happens through the normal error
//! path on the next user-issued call.

mod config;
mod controller;
mod events;
mod heartbeat;

pub use config::{FailoverConfig, FailoverConfigBuilder};
pub use controller::{fallback_chain, FailoverController, FailoverSnapshot, ProviderFactory};
pub use events::FailoverEvent;
pub use heartbeat::{Heartbeat, HeartbeatConfig};
