//! Game Records
//!
//! Provides durable, verifiable game history through:
//! - Repository contracts for state, events and snapshots
//! - Versioned bincode snapshots with a state hash check
//! - Verification by deterministic replay of the decision log

pub mod store;
pub mod snapshot;
pub mod replay;

// Re-export key types
pub use store::{
    EventLog, GameStore, InMemoryEventLog, InMemoryGameStore, InMemorySnapshotStore,
    RepositoryError, SnapshotStore,
};
pub use snapshot::{GameSetup, Snapshot, SnapshotError, SNAPSHOT_VERSION};
pub use replay::{replay, verify_snapshot, ReplayError, ReplayReport};
