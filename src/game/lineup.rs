//! Lineups and Bench Pools
//!
//! A side's lineup is nine batting-order slots plus the pitcher on the mound.
//! It changes only through substitutions. Everything on the roster that is not
//! in the lineup sits in the bench pool, tagged with the assignment that governs
//! where it may be used.

use std::collections::BTreeSet;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::card::{Card, CardId, Position};

/// Slots in a batting order.
pub const LINEUP_SIZE: usize = 9;

/// One batting-order slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineupSlot {
    /// Card batting here
    pub card: Card,
    /// Defensive position
    pub position: Position,
}

/// One side's assignment for a game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineup {
    /// Batting order
    pub batting_order: Vec<LineupSlot>,
    /// Pitcher on the mound
    pub pitcher: Card,
}

impl Lineup {
    /// Build and validate a lineup.
    pub fn new(batting_order: Vec<LineupSlot>, pitcher: Card) -> Result<Self, LineupError> {
        let lineup = Self { batting_order, pitcher };
        lineup.validate()?;
        Ok(lineup)
    }

    /// Check the lineup is playable.
    ///
    /// Every fielded position is covered exactly once; the ninth slot is a DH
    /// or the pitcher batting for himself.
    pub fn validate(&self) -> Result<(), LineupError> {
        if self.batting_order.len() != LINEUP_SIZE {
            return Err(LineupError::WrongSize { found: self.batting_order.len() });
        }
        if !self.pitcher.is_pitcher() {
            return Err(LineupError::NotAPitcher(self.pitcher.id));
        }

        let mut cards = BTreeSet::new();
        let mut positions = BTreeSet::new();
        for slot in &self.batting_order {
            if !positions.insert(slot.position) {
                return Err(LineupError::DuplicatePosition(slot.position));
            }
            match slot.position {
                Position::Pitcher => {
                    if slot.card.id != self.pitcher.id {
                        return Err(LineupError::PitcherSlotMismatch(slot.card.id));
                    }
                }
                position => {
                    if slot.card.is_pitcher() {
                        return Err(LineupError::RoleMismatch { card: slot.card.id, position });
                    }
                    if !cards.insert(slot.card.id) {
                        return Err(LineupError::DuplicateCard(slot.card.id));
                    }
                }
            }
        }
        if cards.contains(&self.pitcher.id) {
            return Err(LineupError::DuplicateCard(self.pitcher.id));
        }

        for position in Position::FIELDED {
            if !positions.contains(&position) {
                return Err(LineupError::MissingPosition(position));
            }
        }
        Ok(())
    }

    /// Slot at a batting-order index.
    pub fn batter_at(&self, index: usize) -> &LineupSlot {
        &self.batting_order[index % self.batting_order.len().max(1)]
    }

    /// Batting-order index of a card.
    pub fn slot_of(&self, card_id: CardId) -> Option<usize> {
        self.batting_order.iter().position(|s| s.card.id == card_id)
    }

    /// Card playing a defensive position.
    pub fn fielder_at(&self, position: Position) -> Option<&LineupSlot> {
        self.batting_order.iter().find(|s| s.position == position)
    }

    /// Is the card active, batting or pitching?
    pub fn contains(&self, card_id: CardId) -> bool {
        self.pitcher.id == card_id || self.slot_of(card_id).is_some()
    }

    /// Find an active card by id.
    pub fn card(&self, card_id: CardId) -> Option<&Card> {
        if self.pitcher.id == card_id {
            return Some(&self.pitcher);
        }
        self.batting_order.iter().map(|s| &s.card).find(|c| c.id == card_id)
    }

    /// Exchange the defensive positions of two batting-order cards.
    ///
    /// Batting order is untouched. Returns the new positions of `first` and
    /// `second`. The pitcher's slot never moves.
    pub fn swap_positions(&mut self, first: CardId, second: CardId) -> Result<(Position, Position), LineupError> {
        if first == second {
            return Err(LineupError::CannotSwap(first));
        }
        let a = self.slot_of(first).ok_or(LineupError::NotInLineup(first))?;
        let b = self.slot_of(second).ok_or(LineupError::NotInLineup(second))?;
        for (index, card) in [(a, first), (b, second)] {
            if self.batting_order[index].position == Position::Pitcher {
                return Err(LineupError::CannotSwap(card));
            }
        }

        let position_a = self.batting_order[a].position;
        self.batting_order[a].position = self.batting_order[b].position;
        self.batting_order[b].position = position_a;
        Ok((self.batting_order[a].position, self.batting_order[b].position))
    }

    /// Card ids in batting order, then the pitcher.
    pub fn card_ids(&self) -> Vec<i32> {
        self.batting_order
            .iter()
            .map(|s| s.card.id.0)
            .chain(std::iter::once(self.pitcher.id.0))
            .collect()
    }
}

// =============================================================================
// BENCH
// =============================================================================

/// Eligibility tag for a bench or bullpen card.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Assignment {
    /// Backup at one position
    Position(Position),
    /// Backup at either corner outfield spot
    CornerOutfield,
    /// Generic bench player
    Bench,
    /// Starting pitcher not starting this game
    Starter,
    /// Relief pitcher
    Reliever,
}

impl Assignment {
    /// Does the tag name this position outright?
    pub fn covers(self, position: Position) -> bool {
        match self {
            Assignment::Position(p) => p == position,
            Assignment::CornerOutfield => position.is_corner_outfield(),
            Assignment::Bench => false,
            Assignment::Starter | Assignment::Reliever => position == Position::Pitcher,
        }
    }

    /// Is this a bullpen tag?
    pub fn is_bullpen(self) -> bool {
        matches!(self, Assignment::Starter | Assignment::Reliever)
    }
}

/// A card waiting on the bench or in the bullpen.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchEntry {
    /// The card
    pub card: Card,
    /// Eligibility tag
    pub assignment: Assignment,
}

impl BenchEntry {
    /// Stock replacement hitter, usable anywhere late.
    pub fn replacement_hitter() -> Self {
        Self { card: Card::replacement_hitter(), assignment: Assignment::Bench }
    }

    /// Stock replacement pitcher.
    pub fn replacement_pitcher() -> Self {
        Self { card: Card::replacement_pitcher(), assignment: Assignment::Reliever }
    }
}

/// Cards available to come into the game.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchPool {
    /// Available cards
    pub entries: Vec<BenchEntry>,
}

impl BenchPool {
    /// Pool from entries.
    pub fn new(entries: Vec<BenchEntry>) -> Self {
        Self { entries }
    }

    /// Entry for a card.
    pub fn find(&self, card_id: CardId) -> Option<&BenchEntry> {
        self.entries.iter().find(|e| e.card.id == card_id)
    }

    /// Remove an entry.
    pub fn remove(&mut self, card_id: CardId) -> Option<BenchEntry> {
        let index = self.entries.iter().position(|e| e.card.id == card_id)?;
        Some(self.entries.remove(index))
    }

    /// Number of cards waiting.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Nobody left.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A side's full game-day roster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Name used in play-by-play
    pub name: String,
    /// Active lineup
    pub lineup: Lineup,
    /// Bench and bullpen
    pub bench: BenchPool,
}

impl Team {
    /// Build a team, validating the lineup.
    pub fn new(name: impl Into<String>, lineup: Lineup, bench: BenchPool) -> Result<Self, LineupError> {
        lineup.validate()?;
        let team = Self { name: name.into(), lineup, bench };
        for entry in &team.bench.entries {
            if team.lineup.contains(entry.card.id) {
                return Err(LineupError::DuplicateCard(entry.card.id));
            }
        }
        Ok(team)
    }

    /// A pitcher on the roster, starting or in the bullpen.
    pub fn pitcher_card(&self, card_id: CardId) -> Option<&Card> {
        if self.lineup.pitcher.id == card_id {
            return Some(&self.lineup.pitcher);
        }
        self.bench.find(card_id).map(|e| &e.card).filter(|c| c.is_pitcher())
    }
}

/// Lineup construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineupError {
    /// Batting order is not nine deep.
    #[error("batting order has {found} slots, expected 9")]
    WrongSize {
        /// Slots supplied
        found: usize,
    },

    /// A fielded position is uncovered.
    #[error("no player at {0}")]
    MissingPosition(Position),

    /// Two slots share a position.
    #[error("position {0} assigned twice")]
    DuplicatePosition(Position),

    /// A card appears twice.
    #[error("card {0} appears more than once")]
    DuplicateCard(CardId),

    /// Pitcher card in a fielding slot.
    #[error("pitcher card {card} cannot play {position}")]
    RoleMismatch {
        /// Offending card
        card: CardId,
        /// Slot position
        position: Position,
    },

    /// Pitching slot holds someone other than the pitcher.
    #[error("card {0} bats in the pitcher's slot but is not pitching")]
    PitcherSlotMismatch(CardId),

    /// Designated pitcher is a batter card.
    #[error("card {0} is not a pitcher")]
    NotAPitcher(CardId),

    /// Card is not in the batting order.
    #[error("card {0} is not in the batting order")]
    NotInLineup(CardId),

    /// Card cannot change places with the one named.
    #[error("card {0} cannot swap positions")]
    CannotSwap(CardId),
}
