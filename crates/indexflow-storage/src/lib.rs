//! indexflow-storage: index and checkpoint stores for IndexFlow.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)
//!
//! Both implement [`IndexStore`](indexflow_core::IndexStore): event
//! projection and checkpoint move commit together or not at all.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(feature = "memory")]
pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// A simulated crash point for atomicity tests.
///
/// An injected fault fires once, on the next write that reaches it, and the
/// write fails with [`IndexerError::Storage`](indexflow_core::IndexerError)
/// without any of its effects becoming visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// After the index rows are written, before the checkpoint moves.
    BeforeCheckpointWrite,
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BeforeCheckpointWrite => write!(f, "crash before checkpoint write"),
        }
    }
}
