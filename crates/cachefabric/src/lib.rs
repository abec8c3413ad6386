//! # cachefabric
//!
//! A multi-provider caching fabric: one stable key/value surface over
//! several pluggable backends (a cursor-paginated remote HTTP KV store, a
//! TCP KV data store, its HTTP-REST variant, and an in-process memory
//! fallback), with:
//!
//! - an **L1 read-through / write-through cache** that absorbs hot reads
//!   and deduplicates redundant writes,
//! - a **failover controller** that classifies backend errors, demotes to
//!   fallbacks down a deterministic chain, and probes for recovery,
//! - a **heartbeat** on the stateful TCP transport,
//! - **rate limiting** in front of every remote call,
//! - a token-based **distributed lock** protocol, and
//! - **pipeline batching**.
//!
//! # Quick start
//!
//! ```no_run
//! use cachefabric::{CacheFabric, CacheValue, ValueKind};
//! use std::collections::HashMap;
//!
//! # async fn demo() -> Result<(), cachefabric::FabricError> {
//! let env: HashMap<String, String> = std::env::vars().collect();
//! let fabric = CacheFabric::from_env_map(&env);
//! fabric.initialize().await?;
//!
//! fabric
//!     .set("user:42", CacheValue::Json(serde_json::json!({"name": "ada"})), Some(300))
//!     .await?;
//! let user = fabric.get("user:42", ValueKind::Json).await?;
//! assert!(user.is_some());
//!
//! fabric.destroy().await;
//! # Ok(())
//! # }
//! ```
//!
//! The fabric is constructor-injected: build one [`CacheFabric`], share it
//! via `Arc`, and hand it to whatever needs caching. There are no process
//! globals.

mod config;
mod facade;
mod factory;
mod lock;

pub use config::FabricConfig;
pub use facade::{CacheFabric, CallOpts, FabricPipeline, FabricStats};

pub use cachefabric_core::{
    fingerprint, CacheValue, ErrorClass, EventListener, EventListeners, FabricError, FabricEvent,
    FnListener, TransientKind, ValueKind,
};
pub use cachefabric_failover::{
    fallback_chain, FailoverConfig, FailoverConfigBuilder, FailoverController, FailoverEvent,
    FailoverSnapshot, Heartbeat, HeartbeatConfig, ProviderFactory,
};
pub use cachefabric_limiter::{AutoScaleConfig, PriorityExecutor, TokenBucket, WindowedLimiter};
pub use cachefabric_local::LocalCache;
pub use cachefabric_provider::{
    BulkPair, BulkResult, ConnectionHealth, ConnectionInfo, ConnectionState, MemoryProvider,
    Pipeline, PipelineCommand, PipelineResult, Provider, ProviderId, RemoteKvConfig,
    RemoteKvProvider, RestKvConfig, RestKvProvider, TcpKvConfig, TcpKvProvider, TlsMode,
};
