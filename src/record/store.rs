//! Repository Contracts
//!
//! Persistence collaborators keyed by game id. The engine never blocks a
//! resolution on them: anything that fails to land is queued and retried.
//!
//! In-memory implementations back tests and single-process runs.

use std::collections::BTreeMap;
use std::sync::RwLock;

use thiserror::Error;

use crate::game::events::Event;
use crate::game::state::{GameId, GameState};
use crate::record::snapshot::Snapshot;

/// Errors surfaced by repository implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// A repository lock was poisoned by a panicking writer.
    #[error("repository lock was poisoned")]
    LockPoisoned,

    /// Record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// No record for the game.
    #[error("no record for game {0}")]
    NotFound(GameId),

    /// Backend refused or timed out.
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Repository result.
pub type Result<T> = std::result::Result<T, RepositoryError>;

// =============================================================================
// CONTRACTS
// =============================================================================

/// Latest authoritative state per game.
pub trait GameStore: Send + Sync {
    /// Save the state, replacing any earlier one for the game.
    fn save(&self, state: &GameState) -> Result<()>;

    /// Load the latest state for a game.
    fn load(&self, game_id: GameId) -> Result<Option<GameState>>;

    /// Forget a game.
    fn delete(&self, game_id: GameId) -> Result<()>;

    /// Games with a stored state.
    fn list_games(&self) -> Result<Vec<GameId>> {
        Ok(vec![])
    }
}

/// Append-only play-by-play per game.
pub trait EventLog: Send + Sync {
    /// Append an event. Appending a sequence already stored is a no-op.
    ///
    /// Returns the length of the game's log afterwards.
    fn append(&self, game_id: GameId, event: &Event) -> Result<u64>;

    /// Events from `from_sequence` on, in order.
    fn read(&self, game_id: GameId, from_sequence: u64) -> Result<Vec<Event>>;

    /// Number of events stored for a game.
    fn size(&self, game_id: GameId) -> Result<u64>;
}

/// Latest snapshot per game.
pub trait SnapshotStore: Send + Sync {
    /// Store a snapshot, replacing any earlier one for the game.
    fn put(&self, snapshot: &Snapshot) -> Result<()>;

    /// Latest snapshot for a game.
    fn get(&self, game_id: GameId) -> Result<Option<Snapshot>>;
}

// =============================================================================
// IN-MEMORY IMPLEMENTATIONS
// =============================================================================

/// In-memory [`GameStore`].
#[derive(Debug, Default)]
pub struct InMemoryGameStore {
    states: RwLock<BTreeMap<GameId, GameState>>,
}

impl InMemoryGameStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl GameStore for InMemoryGameStore {
    fn save(&self, state: &GameState) -> Result<()> {
        let mut states = self
            .states
            .write()
            .map_err(|_| RepositoryError::LockPoisoned)?;
        states.insert(state.game_id, state.clone());
        Ok(())
    }

    fn load(&self, game_id: GameId) -> Result<Option<GameState>> {
        let states = self
            .states
            .read()
            .map_err(|_| RepositoryError::LockPoisoned)?;
        Ok(states.get(&game_id).cloned())
    }

    fn delete(&self, game_id: GameId) -> Result<()> {
        let mut states = self
            .states
            .write()
            .map_err(|_| RepositoryError::LockPoisoned)?;
        states.remove(&game_id);
        Ok(())
    }

    fn list_games(&self) -> Result<Vec<GameId>> {
        let states = self
            .states
            .read()
            .map_err(|_| RepositoryError::LockPoisoned)?;
        Ok(states.keys().copied().collect())
    }
}

/// In-memory [`EventLog`].
///
/// An event's sequence is its index in the game's log.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    logs: RwLock<BTreeMap<GameId, Vec<Event>>>,
}

impl InMemoryEventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventLog for InMemoryEventLog {
    fn append(&self, game_id: GameId, event: &Event) -> Result<u64> {
        let mut logs = self
            .logs
            .write()
            .map_err(|_| RepositoryError::LockPoisoned)?;
        let log = logs.entry(game_id).or_default();

        let next = log.len() as u64;
        if event.sequence < next {
            return Ok(next);
        }
        if event.sequence > next {
            return Err(RepositoryError::Serialization(format!(
                "event {} would leave a gap after {}",
                event.sequence, next
            )));
        }
        log.push(event.clone());
        Ok(log.len() as u64)
    }

    fn read(&self, game_id: GameId, from_sequence: u64) -> Result<Vec<Event>> {
        let logs = self
            .logs
            .read()
            .map_err(|_| RepositoryError::LockPoisoned)?;
        Ok(logs
            .get(&game_id)
            .map(|log| log.iter().skip(from_sequence as usize).cloned().collect())
            .unwrap_or_default())
    }

    fn size(&self, game_id: GameId) -> Result<u64> {
        let logs = self
            .logs
            .read()
            .map_err(|_| RepositoryError::LockPoisoned)?;
        Ok(logs.get(&game_id).map(|log| log.len() as u64).unwrap_or(0))
    }
}

/// In-memory [`SnapshotStore`]. Snapshots are kept in their compact encoding.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<BTreeMap<GameId, Vec<u8>>>,
}

impl InMemorySnapshotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn put(&self, snapshot: &Snapshot) -> Result<()> {
        let bytes = snapshot
            .to_bytes()
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        let mut snapshots = self
            .snapshots
            .write()
            .map_err(|_| RepositoryError::LockPoisoned)?;
        snapshots.insert(snapshot.setup.game_id, bytes);
        Ok(())
    }

    fn get(&self, game_id: GameId) -> Result<Option<Snapshot>> {
        let snapshots = self
            .snapshots
            .read()
            .map_err(|_| RepositoryError::LockPoisoned)?;
        snapshots
            .get(&game_id)
            .map(|bytes| Snapshot::from_bytes(bytes).map_err(|e| RepositoryError::Serialization(e.to_string())))
            .transpose()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::game::events::Event;
    use crate::game::lineup::tests::pitcher;

    /// Event log that refuses appends while `down` is set.
    #[derive(Debug, Default)]
    pub(crate) struct FlakyEventLog {
        pub(crate) down: AtomicBool,
        pub(crate) inner: InMemoryEventLog,
    }

    impl FlakyEventLog {
        pub(crate) fn failing() -> Self {
            Self { down: AtomicBool::new(true), inner: InMemoryEventLog::new() }
        }

        pub(crate) fn recover(&self) {
            self.down.store(false, Ordering::SeqCst);
        }
    }

    impl EventLog for FlakyEventLog {
        fn append(&self, game_id: GameId, event: &Event) -> Result<u64> {
            if self.down.load(Ordering::SeqCst) {
                return Err(RepositoryError::Unavailable("event log offline".into()));
            }
            self.inner.append(game_id, event)
        }

        fn read(&self, game_id: GameId, from_sequence: u64) -> Result<Vec<Event>> {
            self.inner.read(game_id, from_sequence)
        }

        fn size(&self, game_id: GameId) -> Result<u64> {
            self.inner.size(game_id)
        }
    }

    fn state(byte: u8) -> GameState {
        GameState::new(GameId::from_bytes([byte; 16]), 5, &pitcher(150, 3, 6), &pitcher(250, 3, 6))
    }

    #[test]
    fn test_game_store_save_load() {
        let store = InMemoryGameStore::new();
        let mut first = state(1);
        store.save(&first).unwrap();
        store.save(&state(2)).unwrap();

        first.outs = 2;
        store.save(&first).unwrap();

        let loaded = store.load(first.game_id).unwrap().unwrap();
        assert_eq!(loaded.outs, 2);
        assert_eq!(store.list_games().unwrap().len(), 2);

        store.delete(first.game_id).unwrap();
        assert!(store.load(first.game_id).unwrap().is_none());
    }

    #[test]
    fn test_event_log_append_is_idempotent() {
        let log = InMemoryEventLog::new();
        let id = GameId::from_bytes([4; 16]);

        let first = Event::at_bat(1, "Batter 101 walks.");
        let second = Event::at_bat(2, "Batter 102 strikes out. Outs: 1").with_sequence(1);
        assert_eq!(log.append(id, &first).unwrap(), 1);
        assert_eq!(log.append(id, &second).unwrap(), 2);

        // Retrying an event already stored changes nothing
        assert_eq!(log.append(id, &first).unwrap(), 2);
        assert_eq!(log.size(id).unwrap(), 2);
        assert_eq!(log.read(id, 1).unwrap(), vec![second]);
    }

    #[test]
    fn test_event_log_rejects_gaps() {
        let log = InMemoryEventLog::new();
        let id = GameId::from_bytes([4; 16]);
        let late = Event::at_bat(3, "Batter 103 walks.").with_sequence(5);
        assert!(matches!(log.append(id, &late), Err(RepositoryError::Serialization(_))));
        assert_eq!(log.size(id).unwrap(), 0);
    }

    #[test]
    fn test_flaky_log_recovers() {
        let log = FlakyEventLog::failing();
        let id = GameId::from_bytes([6; 16]);
        let event = Event::at_bat(1, "Batter 101 walks.");

        assert!(matches!(log.append(id, &event), Err(RepositoryError::Unavailable(_))));
        log.recover();
        assert_eq!(log.append(id, &event).unwrap(), 1);
    }
}
