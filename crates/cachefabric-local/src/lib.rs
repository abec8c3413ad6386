//! The L1 tier: a bounded in-process map with monotonic-time expiry.
//!
//! L1 absorbs hot reads in front of whatever remote provider is active and
//! deduplicates redundant writes via value fingerprints. It is ephemeral
//! process-local state; nothing here survives a restart, and that is by
//! contract (see the facade's read/write paths for how L1 and L2 interact).

mod cache;

pub use cache::LocalCache;
