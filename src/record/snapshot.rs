//! Game Snapshots
//!
//! Everything needed to resume a game or re-verify it from scratch: the
//! opening setup, every accepted decision, and the live state at the time of
//! the snapshot. Encoded with bincode.

use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::warn;

use crate::config::RulesConfig;
use crate::core::hash::StateHash;
use crate::core::rng::derive_game_seed;
use crate::game::card::CardId;
use crate::game::events::Event;
use crate::game::lineup::Team;
use crate::game::machine::{DecisionRecord, Game};
use crate::game::state::{GameId, GameState};
use crate::game::sync::SyncProjection;

/// Current snapshot version.
pub const SNAPSHOT_VERSION: u8 = 1;

/// How a game started: identity, seed, opening rosters and rules.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSetup {
    /// Game identifier
    pub game_id: GameId,
    /// RNG seed
    pub seed: u64,
    /// Visiting roster as it started
    pub away: Team,
    /// Home roster as it started
    pub home: Team,
    /// Rule constants
    pub rules: RulesConfig,
    /// Capacity adjustments for pitchers still tired from earlier games
    #[serde(default)]
    pub carried_fatigue: BTreeMap<CardId, i32>,
}

impl GameSetup {
    /// Setup with the seed derived from the game id and both lineups.
    pub fn derived(game_id: GameId, away: Team, home: Team, rules: RulesConfig) -> Self {
        let seed = derive_game_seed(game_id.as_bytes(), &away.lineup.card_ids(), &home.lineup.card_ids());
        Self { game_id, seed, away, home, rules, carried_fatigue: BTreeMap::new() }
    }

    /// Carry fatigue in for a pitcher: `-innings` he threw recently.
    pub fn with_carried_fatigue(mut self, pitcher: CardId, modifier: i32) -> Self {
        self.carried_fatigue.insert(pitcher, modifier);
        self
    }

    /// A fresh game in its pre-game state.
    pub fn start(&self) -> Game {
        let mut game = Game::with_seed(self.game_id, self.seed, self.away.clone(), self.home.clone(), self.rules.clone());
        if let Err(card) = game.carry_fatigue(&self.carried_fatigue) {
            warn!(game_id = %self.game_id, card = card.0, "carried fatigue for a pitcher on neither roster");
        }
        game
    }
}

/// A game at one point in time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Format version
    pub version: u8,
    /// How the game started
    pub setup: GameSetup,
    /// Accepted decisions, in order
    pub decisions: Vec<DecisionRecord>,
    /// Live state
    pub state: GameState,
    /// Live visiting roster
    pub away: Team,
    /// Live home roster
    pub home: Team,
    /// Play-by-play so far
    pub events: Vec<Event>,
    /// Per-side display lag
    pub sync: SyncProjection,
    /// RNG position
    pub rng_state: [u64; 2],
    /// Hash of `state`
    pub state_hash: StateHash,
    /// Data-integrity failure that halted the game, if any
    pub halted: Option<String>,
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
}

impl Snapshot {
    /// Game id.
    pub fn game_id(&self) -> GameId {
        self.setup.game_id
    }

    /// Hex of the recorded state hash.
    pub fn state_hash_hex(&self) -> String {
        hex::encode(self.state_hash)
    }

    /// Serialize to bytes using bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        bincode::serialize(self).map_err(|e| SnapshotError::Encode(e.to_string()))
    }

    /// Deserialize from bytes, checking version and hash.
    pub fn from_bytes(data: &[u8]) -> Result<Self, SnapshotError> {
        let snapshot: Snapshot =
            bincode::deserialize(data).map_err(|e| SnapshotError::Decode(e.to_string()))?;
        snapshot.check()?;
        Ok(snapshot)
    }

    /// Confirm the version and that the live state matches its hash.
    pub fn check(&self) -> Result<(), SnapshotError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                got: self.version,
            });
        }
        let computed = self.state.compute_hash();
        if computed != self.state_hash {
            return Err(SnapshotError::HashMismatch {
                expected: hex::encode(self.state_hash),
                computed: hex::encode(computed),
            });
        }
        Ok(())
    }

    /// The live game held in the snapshot.
    pub fn game(&self) -> Game {
        Game {
            state: self.state.clone(),
            away: self.away.clone(),
            home: self.home.clone(),
            rules: self.setup.rules.clone(),
        }
    }
}

/// Errors reading or writing snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// Encoding failed.
    #[error("snapshot encoding failed: {0}")]
    Encode(String),

    /// Bytes are not a snapshot.
    #[error("snapshot decoding failed: {0}")]
    Decode(String),

    /// Written by an incompatible version.
    #[error("snapshot version mismatch: expected {expected}, got {got}")]
    VersionMismatch {
        /// Version this build reads
        expected: u8,
        /// Version found
        got: u8,
    },

    /// State does not match the recorded hash.
    #[error("snapshot state hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch {
        /// Recorded hash (hex)
        expected: String,
        /// Hash of the state as read (hex)
        computed: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::lineup::tests::sample_team;

    fn snapshot() -> Snapshot {
        let setup = GameSetup::derived(
            GameId::from_bytes([2; 16]),
            sample_team("Away", 100),
            sample_team("Home", 200),
            RulesConfig::default(),
        );
        let game = setup.start();
        Snapshot {
            version: SNAPSHOT_VERSION,
            decisions: Vec::new(),
            state_hash: game.state.compute_hash(),
            state: game.state,
            away: game.away,
            home: game.home,
            events: vec![Event::inning_change(0, crate::game::state::Half::Top, 1)],
            sync: SyncProjection::new(),
            rng_state: [1, 2],
            halted: None,
            taken_at: Utc::now(),
            setup,
        }
    }

    #[test]
    fn test_snapshot_bytes_roundtrip() {
        let original = snapshot();
        let bytes = original.to_bytes().unwrap();
        let decoded = Snapshot::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.game_id(), original.game_id());
        assert_eq!(decoded.state, original.state);
        assert_eq!(decoded.events, original.events);
        assert_eq!(decoded.state_hash_hex(), original.state_hash_hex());
    }

    #[test]
    fn test_tampered_state_detected() {
        let mut tampered = snapshot();
        tampered.state.home_score = 7;
        let bytes = tampered.to_bytes().unwrap();
        assert!(matches!(Snapshot::from_bytes(&bytes), Err(SnapshotError::HashMismatch { .. })));
    }

    #[test]
    fn test_version_checked() {
        let mut old = snapshot();
        old.version = 0;
        assert_eq!(
            old.check(),
            Err(SnapshotError::VersionMismatch { expected: SNAPSHOT_VERSION, got: 0 })
        );
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(Snapshot::from_bytes(&[1, 2, 3]), Err(SnapshotError::Decode(_))));
    }

    #[test]
    fn test_setup_seed_is_derived() {
        let a = snapshot().setup;
        let b = snapshot().setup;
        assert_eq!(a.seed, b.seed);
        assert_eq!(a.start().state.seed, a.seed);
    }

    #[test]
    fn test_setup_carries_fatigue_into_the_game() {
        let setup = snapshot().setup.with_carried_fatigue(CardId(250), -6).with_carried_fatigue(CardId(260), -2);
        let game = setup.start();
        assert_eq!(game.state.pitcher_stats[&CardId(250)].fatigue_modifier, -6);
        assert_eq!(game.state.pitcher_stats[&CardId(260)].fatigue_modifier, -2);
        assert_eq!(game.state.pitcher_stats[&CardId(150)].fatigue_modifier, 0);
    }
}
