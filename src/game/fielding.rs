//! Fielding and Speed Modifiers
//!
//! Team defense is derived from the fielding side's lineup:
//! - Catcher arm: the catcher's rating at C
//! - Infield: sum of 1B/2B/SS/3B ratings
//! - Outfield: sum of LF/CF/RF ratings
//!
//! Runner speed adjustments for each kind of advance live here too, so the
//! at-bat resolver and the baserunning protocol share one source of truth.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::config::RulesConfig;
use crate::game::card::Position;
use crate::game::lineup::Lineup;
use crate::game::state::Base;

/// Penalty for a first baseman who does not list 1B.
const OUT_OF_POSITION_FIRST_BASE: i32 = -1;

/// Penalty for a pure designated hitter forced to play first.
const DH_AT_FIRST_BASE: i32 = -2;

/// Defensive ratings of the side in the field.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefensiveAlignment {
    /// Rating per fielded position
    pub ratings: BTreeMap<Position, i32>,
    /// Catcher's arm
    pub catcher_arm: i32,
    /// Infield total
    pub infield: i32,
    /// Outfield total
    pub outfield: i32,
}

impl DefensiveAlignment {
    /// Compute the alignment for a lineup.
    pub fn of(lineup: &Lineup) -> Self {
        let mut ratings = BTreeMap::new();

        for slot in &lineup.batting_order {
            let position = slot.position;
            if !Position::FIELDED.contains(&position) {
                continue;
            }
            let rating = match slot.card.fielding_at(position) {
                Some(rating) => rating,
                None if position == Position::FirstBase => {
                    if slot.card.is_designated_hitter_only() {
                        DH_AT_FIRST_BASE
                    } else {
                        OUT_OF_POSITION_FIRST_BASE
                    }
                }
                None => 0,
            };
            ratings.insert(position, rating);
        }

        let sum = |positions: &[Position]| -> i32 {
            positions.iter().filter_map(|p| ratings.get(p)).sum()
        };
        let infield = sum(&Position::INFIELD);
        let outfield = sum(&Position::OUTFIELD);
        let catcher_arm = ratings.get(&Position::Catcher).copied().unwrap_or(0);

        Self { ratings, catcher_arm, infield, outfield }
    }

    /// Rating of the fielder at a position (0 when uncovered).
    pub fn rating_at(&self, position: Position) -> i32 {
        self.ratings.get(&position).copied().unwrap_or(0)
    }
}

/// Kind of runner advance being contested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvanceKind {
    /// Steal of the next base
    Steal,
    /// Tag-up after a caught fly ball
    TagUp,
    /// Extra base on a hit
    ExtraBase,
    /// Runner on third going home on a grounder to a drawn-in infield
    InfieldIn,
}

impl AdvanceKind {
    /// Runner speed adjusted for the target base and situation.
    pub fn adjusted_speed(self, speed: i32, target: Base, outs: u8, rules: &RulesConfig) -> i32 {
        let mut adjusted = speed;
        match self {
            AdvanceKind::Steal => {
                if target == Base::Third {
                    adjusted -= rules.steal_third_penalty;
                }
            }
            AdvanceKind::TagUp => {
                if target == Base::Home {
                    adjusted += rules.home_bonus;
                }
                if target == Base::Second {
                    adjusted -= rules.tag_to_second_penalty;
                }
            }
            AdvanceKind::ExtraBase => {
                if target == Base::Home {
                    adjusted += rules.home_bonus;
                }
                if outs == 2 {
                    adjusted += rules.two_out_bonus;
                }
            }
            AdvanceKind::InfieldIn => {}
        }
        adjusted
    }

    /// Steals and tag-ups need speed strictly above the throw; extra bases
    /// and runners sent into a drawn-in infield only need to match it.
    pub fn strict(self) -> bool {
        !matches!(self, AdvanceKind::ExtraBase | AdvanceKind::InfieldIn)
    }

    /// Defensive rating that opposes this advance.
    pub fn defense(self, alignment: &DefensiveAlignment) -> i32 {
        match self {
            AdvanceKind::Steal => alignment.catcher_arm,
            AdvanceKind::TagUp | AdvanceKind::ExtraBase => alignment.outfield,
            AdvanceKind::InfieldIn => alignment.infield,
        }
    }

    /// Lowest contest roll that keeps the runner safe.
    ///
    /// The runner is safe when `speed >= defense + throw` (strictly greater
    /// for steals and tag-ups), with the throw a die roll. Reading the die
    /// from the runner's side, `throw = die + 1 - roll`, gives a target the
    /// contest roll must meet or beat.
    pub fn contest_target(self, adjusted_speed: i32, defense: i32, rules: &RulesConfig) -> i32 {
        let strict = if self.strict() { 1 } else { 0 };
        rules.die_sides as i32 + 1 + defense + strict - adjusted_speed
    }

    /// Safe with no throw at all: speed clears the defense by the margin.
    pub fn is_automatic(self, adjusted_speed: i32, defense: i32, rules: &RulesConfig) -> bool {
        adjusted_speed >= defense + rules.auto_advance_margin
    }
}

/// Runners who never try this advance without being waved in.
pub fn auto_hold(kind: AdvanceKind, speed: i32, target: Base) -> bool {
    match kind {
        AdvanceKind::TagUp => {
            (speed <= 10 && matches!(target, Base::Second | Base::Third))
                || (speed <= 15 && target == Base::Second)
        }
        AdvanceKind::ExtraBase => speed <= 10 && target == Base::Third,
        AdvanceKind::Steal | AdvanceKind::InfieldIn => false,
    }
}
