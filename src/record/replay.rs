//! Replay Verification
//!
//! Rebuild a game from its setup and decision log and compare state hashes.
//! Every roll comes from the seeded RNG, so the same decisions always land
//! on the same state.

use thiserror::Error;

use crate::core::hash::StateHash;
use crate::core::rng::DeterministicRng;
use crate::game::events::Event;
use crate::game::machine::{DecisionRecord, Game, RuleError};
use crate::record::snapshot::{GameSetup, Snapshot};

/// Result of a successful replay.
#[derive(Clone, Debug)]
pub struct ReplayReport {
    /// Replayed game
    pub game: Game,
    /// Events the replay emitted, in order
    pub events: Vec<Event>,
    /// Final state hash
    pub final_hash: StateHash,
    /// RNG position after the last decision
    pub rng_state: [u64; 2],
}

impl ReplayReport {
    /// Hex of the final hash.
    pub fn final_hash_hex(&self) -> String {
        hex::encode(self.final_hash)
    }
}

/// Replay failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    /// A recorded decision was refused on replay.
    #[error("decision {index} rejected on replay: {error}")]
    Rejected {
        /// Position in the decision log
        index: usize,
        /// Why
        error: RuleError,
    },

    /// Replay finished on a different state.
    #[error("final state hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch {
        /// Recorded hash (hex)
        expected: String,
        /// Replayed hash (hex)
        computed: String,
    },

    /// Replay finished with the RNG somewhere else.
    #[error("rng position mismatch after replay")]
    RngMismatch,
}

/// Replay a decision log from the start of a game.
pub fn replay(setup: &GameSetup, decisions: &[DecisionRecord]) -> Result<ReplayReport, ReplayError> {
    let mut game = setup.start();
    let mut rng = DeterministicRng::new(setup.seed);
    let mut events = Vec::new();

    for (index, record) in decisions.iter().enumerate() {
        let outcome = game
            .apply(record.side, &record.decision, &mut rng)
            .map_err(|error| ReplayError::Rejected { index, error })?;
        for event in outcome.events {
            let sequence = events.len() as u64;
            events.push(event.with_sequence(sequence));
        }
    }

    Ok(ReplayReport {
        final_hash: game.state.compute_hash(),
        rng_state: rng.state(),
        game,
        events,
    })
}

/// Replay a snapshot's decision log and check it lands on the snapshot.
pub fn verify_snapshot(snapshot: &Snapshot) -> Result<ReplayReport, ReplayError> {
    let report = replay(&snapshot.setup, &snapshot.decisions)?;
    if report.final_hash != snapshot.state_hash {
        return Err(ReplayError::HashMismatch {
            expected: hex::encode(snapshot.state_hash),
            computed: report.final_hash_hex(),
        });
    }
    if report.rng_state != snapshot.rng_state {
        return Err(ReplayError::RngMismatch);
    }
    Ok(report)
}
