//! Core infrastructure for cachefabric.
//!
//! This crate provides the pieces shared by every other cachefabric module:
//! - The sealed [`FabricError`] taxonomy and the error classification rules
//!   that drive failover decisions
//! - The [`CacheValue`] / [`ValueKind`] value model and write fingerprints
//! - An event system for observability

pub mod error;
pub mod events;
pub mod value;

pub use error::{ErrorClass, FabricError, TransientKind};
pub use events::{EventListener, EventListeners, FabricEvent, FnListener};
pub use value::{fingerprint, CacheValue, ValueKind};
