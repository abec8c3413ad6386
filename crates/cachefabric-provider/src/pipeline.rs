//! Command batching.
//!
//! A [`Pipeline`] accumulates commands client-side; a provider's
//! `exec_pipeline` submits them in one round-trip where the backend has a
//! native batch surface. Pipelines are not transactional: a command that
//! fails mid-batch yields an error marker at its index without aborting its
//! peers.

use cachefabric_core::CacheValue;

/// One buffered command.
#[derive(Debug, Clone)]
pub enum PipelineCommand {
    /// Write a key.
    Set {
        /// Destination key.
        key: String,
        /// Value to store.
        value: CacheValue,
        /// Optional TTL in seconds.
        ttl_secs: Option<u64>,
    },
    /// Read a key.
    Get {
        /// Key to read.
        key: String,
    },
    /// Delete a key.
    Del {
        /// Key to delete.
        key: String,
    },
    /// Existence check.
    Exists {
        /// Key to check.
        key: String,
    },
    /// Increment an integer key.
    Incr {
        /// Key to increment.
        key: String,
    },
    /// Reset a key's TTL.
    Expire {
        /// Key to touch.
        key: String,
        /// New TTL in seconds.
        ttl_secs: u64,
    },
}

/// Per-command outcome, index-aligned with submission order.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineResult {
    /// The command succeeded with no interesting payload (`Set`).
    Ok,
    /// A read result (`Get`).
    Value(Option<CacheValue>),
    /// An integer result (`Del`, `Exists`, `Incr`, `Expire`).
    Int(i64),
    /// The command failed; its peers were unaffected.
    Err(String),
}

/// An accumulating command buffer. Builder-style: methods take and return
/// `self`, so batches read as one chain.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    commands: Vec<PipelineCommand>,
}

impl Pipeline {
    /// An empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers a write.
    pub fn set(mut self, key: impl Into<String>, value: CacheValue, ttl_secs: Option<u64>) -> Self {
        self.commands.push(PipelineCommand::Set {
            key: key.into(),
            value,
            ttl_secs,
        });
        self
    }

    /// Buffers a read.
    pub fn get(mut self, key: impl Into<String>) -> Self {
        self.commands.push(PipelineCommand::Get { key: key.into() });
        self
    }

    /// Buffers a delete.
    pub fn del(mut self, key: impl Into<String>) -> Self {
        self.commands.push(PipelineCommand::Del { key: key.into() });
        self
    }

    /// Buffers an existence check.
    pub fn exists(mut self, key: impl Into<String>) -> Self {
        self.commands
            .push(PipelineCommand::Exists { key: key.into() });
        self
    }

    /// Buffers an increment.
    pub fn incr(mut self, key: impl Into<String>) -> Self {
        self.commands.push(PipelineCommand::Incr { key: key.into() });
        self
    }

    /// Buffers a TTL reset.
    pub fn expire(mut self, key: impl Into<String>, ttl_secs: u64) -> Self {
        self.commands.push(PipelineCommand::Expire {
            key: key.into(),
            ttl_secs,
        });
        self
    }

    /// The buffered commands, in submission order.
    pub fn commands(&self) -> &[PipelineCommand] {
        &self.commands
    }

    /// Number of buffered commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
