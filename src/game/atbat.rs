//! At-Bat Resolution
//!
//! One plate appearance is two decisions and up to four rolls:
//!
//! 1. Pitch roll: `die + effective control > on-base` gives the pitcher the
//!    advantage and his chart is consulted; otherwise the batter's chart is.
//! 2. Swing roll on the chosen chart gives the raw outcome.
//! 3. Ground and fly balls pick the responsible fielder and roll a fielding
//!    check; `roll + rating <= error margin` lets the batter reach on an error.
//!
//! Intentional walks and bunts skip the dice entirely. Nothing here mutates
//! game state; the machine applies the returned [`AtBatResult`].

use serde::{Serialize, Deserialize};

use crate::config::RulesConfig;
use crate::core::hash::StateHasher;
use crate::core::rng::RandomSource;
use crate::game::card::{Card, CardId, Position};
use crate::game::chart::{ChartGapError, Outcome};
use crate::game::fielding::DefensiveAlignment;
use crate::game::state::Bases;

// =============================================================================
// DECISIONS
// =============================================================================

/// Defense's choice for the at-bat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PitcherAction {
    /// Pitch to the batter
    Pitch = 0,
    /// Put the batter on first
    IntentionalWalk = 1,
    /// Pitch with the infield drawn in to cut down a run at the plate
    InfieldIn = 2,
}

impl PitcherAction {
    /// Is the infield playing in for this pitch?
    pub fn infield_in(self) -> bool {
        self == PitcherAction::InfieldIn
    }
}

/// Offense's choice for the at-bat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BatterAction {
    /// Swing away
    Swing = 0,
    /// Sacrifice bunt
    Bunt = 1,
}

/// Decisions submitted so far for the at-bat in progress.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtBatDecisions {
    /// Defense's action, once submitted
    pub pitcher: Option<PitcherAction>,
    /// Offense's action, once submitted
    pub batter: Option<BatterAction>,
}

impl AtBatDecisions {
    /// Nothing submitted yet.
    pub fn is_empty(&self) -> bool {
        self.pitcher.is_none() && self.batter.is_none()
    }

    /// Can the at-bat resolve?
    pub fn ready(&self) -> bool {
        matches!(self.pitcher, Some(PitcherAction::IntentionalWalk))
            || (self.pitcher.is_some() && self.batter.is_some())
    }

    /// Forget both decisions.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Hash submitted decisions into the state hash.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_opt_i32(self.pitcher.map(|a| a as i32));
        hasher.update_opt_i32(self.batter.map(|a| a as i32));
    }
}

// =============================================================================
// RESULTS
// =============================================================================

/// Whose chart the swing is read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Advantage {
    /// Pitcher's chart
    Pitcher,
    /// Batter's chart
    Batter,
}

/// Plate-appearance result after fielding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlateResult {
    /// Strikeout
    Strikeout,
    /// Infield pop-up
    PopOut,
    /// Ground ball, fielded cleanly
    GroundOut,
    /// Fly ball, caught
    FlyOut,
    /// Walk
    Walk,
    /// Intentional walk
    IntentionalWalk,
    /// Single
    Single,
    /// Single; batter takes second if open
    SinglePlus,
    /// Double
    Double,
    /// Triple
    Triple,
    /// Home run
    HomeRun,
    /// Sacrifice bunt
    SacrificeBunt,
    /// Batter reached on a fielding error
    ReachedOnError {
        /// Fielder charged with the error
        position: Position,
    },
}

impl PlateResult {
    /// Bases the batter is credited with on a ball in play.
    pub fn advance_distance(self) -> u8 {
        match self {
            PlateResult::Walk
            | PlateResult::IntentionalWalk
            | PlateResult::Single
            | PlateResult::SinglePlus
            | PlateResult::ReachedOnError { .. } => 1,
            PlateResult::Double => 2,
            PlateResult::Triple => 3,
            PlateResult::HomeRun => 4,
            PlateResult::Strikeout
            | PlateResult::PopOut
            | PlateResult::GroundOut
            | PlateResult::FlyOut
            | PlateResult::SacrificeBunt => 0,
        }
    }

    /// Is the batter retired?
    pub fn is_batter_out(self) -> bool {
        matches!(
            self,
            PlateResult::Strikeout
                | PlateResult::PopOut
                | PlateResult::GroundOut
                | PlateResult::FlyOut
                | PlateResult::SacrificeBunt
        )
    }

    fn from_outcome(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Strikeout => PlateResult::Strikeout,
            Outcome::PopUp => PlateResult::PopOut,
            Outcome::GroundBall => PlateResult::GroundOut,
            Outcome::FlyBall => PlateResult::FlyOut,
            Outcome::Walk => PlateResult::Walk,
            Outcome::Single => PlateResult::Single,
            Outcome::SinglePlus => PlateResult::SinglePlus,
            Outcome::Double => PlateResult::Double,
            Outcome::Triple => PlateResult::Triple,
            Outcome::HomeRun => PlateResult::HomeRun,
            Outcome::IntentionalWalk => PlateResult::IntentionalWalk,
            Outcome::Bunt => PlateResult::SacrificeBunt,
        }
    }
}

/// Outcome of the fielding check on a ball in play.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldingCheck {
    /// Responsible fielder
    pub position: Position,
    /// Fielder's rating
    pub rating: i32,
    /// Check roll
    pub roll: u32,
    /// Was the ball misplayed?
    pub error: bool,
}

/// Everything the state machine needs to apply one plate appearance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtBatResult {
    /// Batter
    pub batter: CardId,
    /// Pitcher
    pub pitcher: CardId,
    /// Pitch roll, if thrown
    pub pitch_roll: Option<u32>,
    /// Swing roll, if swung
    pub swing_roll: Option<u32>,
    /// Chart owner, if a chart was read
    pub advantage: Option<Advantage>,
    /// Raw chart outcome or action
    pub outcome: Outcome,
    /// Result after fielding
    pub result: PlateResult,
    /// Fielding check, for ground and fly balls
    pub fielding: Option<FieldingCheck>,
    /// Occupancy before the play
    pub bases_before: Bases,
}

/// Inputs for one plate appearance.
#[derive(Clone, Copy, Debug)]
pub struct AtBatContext<'a> {
    /// Batter at the plate
    pub batter: &'a Card,
    /// Pitcher on the mound
    pub pitcher: &'a Card,
    /// Pitcher's control after fatigue
    pub effective_control: i32,
    /// Fielding side's defense
    pub defense: &'a DefensiveAlignment,
    /// Defense's decision
    pub pitcher_action: PitcherAction,
    /// Offense's decision (ignored for intentional walks)
    pub batter_action: BatterAction,
    /// Occupancy before the play
    pub bases: &'a Bases,
    /// Rule constants
    pub rules: &'a RulesConfig,
}

// =============================================================================
// RESOLUTION
// =============================================================================

/// Resolve one plate appearance.
///
/// Fails only if a chart has a hole, which a validated card never does.
pub fn resolve_at_bat(
    ctx: AtBatContext<'_>,
    rng: &mut dyn RandomSource,
) -> Result<AtBatResult, ChartGapError> {
    let mut result = AtBatResult {
        batter: ctx.batter.id,
        pitcher: ctx.pitcher.id,
        pitch_roll: None,
        swing_roll: None,
        advantage: None,
        outcome: Outcome::IntentionalWalk,
        result: PlateResult::IntentionalWalk,
        fielding: None,
        bases_before: ctx.bases.clone(),
    };

    if ctx.pitcher_action == PitcherAction::IntentionalWalk {
        return Ok(result);
    }

    let pitch_roll = rng.die(ctx.rules.die_sides);
    let advantage = pitch_advantage(pitch_roll, ctx.effective_control, ctx.batter);
    result.pitch_roll = Some(pitch_roll);
    result.advantage = Some(advantage);

    #[cfg(feature = "debug-tracing")]
    tracing::trace!(
        pitch_roll,
        control = ctx.effective_control,
        on_base = ?ctx.batter.on_base(),
        ?advantage,
        "pitch"
    );

    if ctx.batter_action == BatterAction::Bunt {
        result.outcome = Outcome::Bunt;
        result.result = PlateResult::SacrificeBunt;
        return Ok(result);
    }

    let chart = match advantage {
        Advantage::Pitcher => &ctx.pitcher.chart,
        Advantage::Batter => &ctx.batter.chart,
    };
    let swing_roll = rng.die(ctx.rules.die_sides);
    let outcome = chart.resolve(swing_roll)?;
    result.swing_roll = Some(swing_roll);
    result.outcome = outcome;
    result.result = PlateResult::from_outcome(outcome);

    #[cfg(feature = "debug-tracing")]
    tracing::trace!(swing_roll, outcome = outcome.code(), "swing");

    let fielders: &[Position] = match outcome {
        Outcome::GroundBall => &Position::INFIELD,
        Outcome::FlyBall => &Position::OUTFIELD,
        _ => &[],
    };
    if let Some(check) = fielding_check(fielders, ctx.defense, ctx.rules, rng) {
        if check.error {
            result.result = PlateResult::ReachedOnError { position: check.position };
        }
        result.fielding = Some(check);
    }

    Ok(result)
}

/// Chart selection for a pitch roll.
///
/// A pitcher at the plate never wins the advantage.
pub fn pitch_advantage(pitch_roll: u32, effective_control: i32, batter: &Card) -> Advantage {
    match batter.on_base() {
        Some(on_base) if pitch_roll as i32 + effective_control <= on_base => Advantage::Batter,
        _ => Advantage::Pitcher,
    }
}

fn fielding_check(
    fielders: &[Position],
    defense: &DefensiveAlignment,
    rules: &RulesConfig,
    rng: &mut dyn RandomSource,
) -> Option<FieldingCheck> {
    if fielders.is_empty() {
        return None;
    }
    let index = rng.roll(0, fielders.len() as u32 - 1) as usize;
    let position = fielders[index.min(fielders.len() - 1)];
    let rating = defense.rating_at(position);
    let roll = rng.die(rules.die_sides);
    let error = roll as i32 + rating <= rules.fielding_error_margin;

    #[cfg(feature = "debug-tracing")]
    tracing::trace!(%position, rating, roll, error, "fielding check");

    Some(FieldingCheck { position, rating, roll, error })
}

// =============================================================================
// TESTS
// =============================================================================
