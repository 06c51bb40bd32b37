//! Durability mode for write-ahead log flushes.

/// Controls when a committed batch's WAL record is fsynced to disk, trading
/// latency against the amount of data that can be lost on crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// No persistence: the WAL is not written at all. Used by tests and
    /// ephemeral collections; a crash loses everything since the last
    /// snapshot.
    InMemory,

    /// fsync after every commit. Safest, slowest; use for audit logs and
    /// collections where losing even one batch is unacceptable.
    Strict,

    /// fsync every `batch_size` commits or every `interval_ms`,
    /// whichever comes first. The default: a balance of throughput and
    /// bounded data loss on crash.
    Batched {
        /// Maximum milliseconds between fsyncs.
        interval_ms: u64,
        /// Maximum commits between fsyncs.
        batch_size: usize,
    },
}

impl DurabilityMode {
    /// Whether this mode writes to the WAL at all.
    pub fn requires_wal(&self) -> bool {
        !matches!(self, DurabilityMode::InMemory)
    }

    /// Whether this mode fsyncs after every single commit.
    pub fn requires_immediate_fsync(&self) -> bool {
        matches!(self, DurabilityMode::Strict)
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::Batched {
            interval_ms: 100,
            batch_size: 1000,
        }
    }
}
