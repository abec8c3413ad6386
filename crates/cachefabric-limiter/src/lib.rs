//! Rate limiting primitives that front-run every remote call the fabric
//! makes.
//!
//! Three shapes, composable:
//!
//! - [`TokenBucket`]: classic capacity + fill-rate bucket with a
//!   non-blocking [`TokenBucket::try_take`] and a suspending
//!   [`TokenBucket::take`].
//! - [`WindowedLimiter`]: at most `interval_cap` completions per rolling
//!   window, with an optional per-task pause.
//! - [`PriorityExecutor`]: priority-ordered admission with bounded
//!   concurrency and an optional success-ratio auto-scaler.
//!
//! Cancellation safety: dropping a suspended `take`/`acquire`/`run` future
//! never consumes tokens or permits.

mod executor;
mod token_bucket;
mod window;

pub use executor::{AutoScaleConfig, PriorityExecutor};
pub use token_bucket::TokenBucket;
pub use window::WindowedLimiter;
