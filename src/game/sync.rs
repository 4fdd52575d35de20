//! Turn Synchronization
//!
//! The authoritative [`GameState`] always holds the fully resolved outcome.
//! Each side's *displayed* context may lag it: a side keeps seeing the
//! situation before the oldest play it has not acknowledged, so a slow
//! client never skips over a half-inning change it has not watched resolve.
//!
//! Readiness lives here, never in the game state.

use std::collections::{BTreeMap, VecDeque};
use serde::{Serialize, Deserialize};

use crate::game::state::{Bases, GamePhase, GameState, Half, Side};

/// What a client shows: the scoreboard and the bases.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayState {
    /// Inning number
    pub inning: u32,
    /// Half
    pub half: Half,
    /// Outs in the half
    pub outs: u8,
    /// Away runs
    pub away_score: u32,
    /// Home runs
    pub home_score: u32,
    /// Occupancy
    pub bases: Bases,
    /// Phase
    pub phase: GamePhase,
}

impl DisplayState {
    /// Scoreboard of a state.
    pub fn of(state: &GameState) -> Self {
        Self {
            inning: state.inning,
            half: state.half,
            outs: state.outs,
            away_score: state.away_score,
            home_score: state.home_score,
            bases: state.bases.clone(),
            phase: state.phase,
        }
    }
}

/// A resolved play waiting to be shown.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reveal {
    /// Turn the play resolved at
    pub turn: u64,
    /// Scoreboard just before the play
    pub before: DisplayState,
    /// Play-by-play
    pub message: String,
}

/// One side's view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideView {
    /// Side viewing
    pub side: Side,
    /// What to show
    pub display: DisplayState,
    /// Next play to reveal, if any
    pub next_play: Option<String>,
    /// Plays not yet acknowledged
    pub pending: usize,
    /// Display sits in an earlier half than the authoritative state
    pub behind_half_change: bool,
    /// Opponent has acknowledged every play this side has
    pub opponent_caught_up: bool,
}

impl SideView {
    /// Display matches the authoritative state.
    pub fn is_synced(&self) -> bool {
        self.pending == 0
    }
}

/// Per-side display lag.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProjection {
    /// Last acknowledged turn per side
    pub acknowledged: BTreeMap<Side, u64>,
    /// Plays not yet acknowledged by both sides, oldest first
    pub pending: VecDeque<Reveal>,
}

impl SyncProjection {
    /// Empty projection: both sides in sync.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last turn a side acknowledged.
    pub fn acknowledged_turn(&self, side: Side) -> u64 {
        self.acknowledged.get(&side).copied().unwrap_or(0)
    }

    /// Queue a resolved play for both sides.
    pub fn record_play(&mut self, turn: u64, before: DisplayState, message: impl Into<String>) {
        self.pending.push_back(Reveal { turn, before, message: message.into() });
    }

    /// Oldest play a side has not seen.
    pub fn next_for(&self, side: Side) -> Option<&Reveal> {
        let seen = self.acknowledged_turn(side);
        self.pending.iter().find(|r| r.turn > seen)
    }

    /// Plays a side has not seen.
    pub fn pending_for(&self, side: Side) -> usize {
        let seen = self.acknowledged_turn(side);
        self.pending.iter().filter(|r| r.turn > seen).count()
    }

    /// Side is ready for its next play. Returns the play revealed.
    pub fn acknowledge(&mut self, side: Side) -> Option<Reveal> {
        let reveal = self.next_for(side)?.clone();
        self.acknowledged.insert(side, reveal.turn);
        self.prune();
        Some(reveal)
    }

    /// Catch a side all the way up.
    pub fn acknowledge_all(&mut self, side: Side) -> usize {
        let mut count = 0;
        while self.acknowledge(side).is_some() {
            count += 1;
        }
        count
    }

    /// Drop plays both sides have seen.
    pub fn prune(&mut self) {
        let floor = Side::BOTH
            .iter()
            .map(|s| self.acknowledged_turn(*s))
            .min()
            .unwrap_or(0);
        while self.pending.front().is_some_and(|r| r.turn <= floor) {
            self.pending.pop_front();
        }
    }

    /// What a side should display against the authoritative state.
    pub fn view(&self, side: Side, state: &GameState) -> SideView {
        let next = self.next_for(side);
        let display = match next {
            Some(reveal) => reveal.before.clone(),
            None => DisplayState::of(state),
        };
        let behind_half_change = display.inning != state.inning || display.half != state.half;

        SideView {
            side,
            behind_half_change,
            next_play: next.map(|r| r.message.clone()),
            pending: self.pending_for(side),
            opponent_caught_up: self.acknowledged_turn(side.opponent()) >= self.acknowledged_turn(side),
            display,
        }
    }
}
