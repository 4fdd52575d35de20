//! Substitution & Lineup Eligibility
//!
//! Rules, checked in order:
//! 1. A starting pitcher is locked in until he has pitched the minimum
//!    innings or tired.
//! 2. While he is locked, the whole bullpen is frozen.
//! 3. A bench card may fill a position its tag names outright; from the
//!    late-game inning on, any bench card may fill any position.
//!
//! Players who leave the game never return. Ineligibility is an answer, not
//! an error: callers get an [`Eligibility`] with the reason.

use serde::{Serialize, Deserialize};

use crate::config::RulesConfig;
use crate::game::card::{Card, CardId, Position, REPLACEMENT_HITTER_ID, REPLACEMENT_PITCHER_ID};
use crate::game::lineup::{BenchEntry, LineupSlot, Team};
use crate::game::state::{GamePhase, GameState, Runner, Side};

/// Why a substitution is not allowed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IneligibleReason {
    /// The game has ended
    GameOver,
    /// Incoming player already left the game
    AlreadyUsed,
    /// Incoming player is already playing
    InLineup,
    /// Incoming player is not available on the bench
    NotOnBench,
    /// Outgoing player is not in the lineup
    NotInLineup,
    /// Starter has not pitched enough and is not tired
    StarterLocked,
    /// No bullpen moves while the starter is locked
    BullpenFrozen,
    /// Pitcher for a position slot or batter for the mound
    RoleMismatch,
    /// Bench tag does not cover the position before the late game
    AssignmentMismatch,
}

impl IneligibleReason {
    /// Explanation for the user.
    pub fn describe(self) -> &'static str {
        match self {
            IneligibleReason::GameOver => "the game is over",
            IneligibleReason::AlreadyUsed => "that player has already left the game",
            IneligibleReason::InLineup => "that player is already in the game",
            IneligibleReason::NotOnBench => "that player is not available",
            IneligibleReason::NotInLineup => "that player is not in the lineup",
            IneligibleReason::StarterLocked => "the starting pitcher has not pitched enough innings",
            IneligibleReason::BullpenFrozen => "the bullpen is not available until the starter can be relieved",
            IneligibleReason::RoleMismatch => "pitchers and position players cannot replace each other",
            IneligibleReason::AssignmentMismatch => "that bench player is not assigned to this position",
        }
    }
}

impl std::fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

/// Advisory eligibility verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    /// May the substitution be made?
    pub eligible: bool,
    /// Why not, when not
    pub reason: Option<IneligibleReason>,
}

impl Eligibility {
    /// Allowed.
    pub const fn allowed() -> Self {
        Self { eligible: true, reason: None }
    }

    /// Refused for a reason.
    pub const fn denied(reason: IneligibleReason) -> Self {
        Self { eligible: false, reason: Some(reason) }
    }
}

/// Kind of change, by what the outgoing player was doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubstitutionKind {
    /// New batter for the one due up
    PinchHitter,
    /// New runner on base
    PinchRunner,
    /// New pitcher
    Relief,
    /// Fielding change
    Defensive,
}

/// An applied substitution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    /// Side making the change
    pub side: Side,
    /// What kind of change it was
    pub kind: SubstitutionKind,
    /// Card entering
    pub incoming: CardId,
    /// Card leaving
    pub outgoing: CardId,
    /// Position the incoming card takes
    pub position: Position,
    /// Play-by-play
    pub message: String,
}

// =============================================================================
// ELIGIBILITY
// =============================================================================

/// Can `incoming` replace the player in `outgoing`?
pub fn can_substitute(
    incoming: &BenchEntry,
    outgoing: &LineupSlot,
    side: Side,
    state: &GameState,
    rules: &RulesConfig,
) -> Eligibility {
    if state.is_over() {
        return Eligibility::denied(IneligibleReason::GameOver);
    }
    let team = state.team(side);
    if !incoming.card.is_replacement() && team.removed.contains(&incoming.card.id) {
        return Eligibility::denied(IneligibleReason::AlreadyUsed);
    }

    let starter_locked = team.starter_on_mound() && starter_is_locked(team.starting_pitcher, state, rules);
    if outgoing.position == Position::Pitcher && outgoing.card.id == team.starting_pitcher && starter_locked {
        return Eligibility::denied(IneligibleReason::StarterLocked);
    }
    if incoming.assignment.is_bullpen() && starter_locked {
        return Eligibility::denied(IneligibleReason::BullpenFrozen);
    }

    let needs_pitcher = outgoing.position == Position::Pitcher;
    if incoming.card.is_pitcher() != needs_pitcher {
        return Eligibility::denied(IneligibleReason::RoleMismatch);
    }

    if !needs_pitcher
        && !incoming.assignment.covers(outgoing.position)
        && state.inning < rules.late_game_inning
    {
        return Eligibility::denied(IneligibleReason::AssignmentMismatch);
    }

    Eligibility::allowed()
}

/// Starter still owes innings and is not tired.
fn starter_is_locked(starter: CardId, state: &GameState, rules: &RulesConfig) -> bool {
    let stats = state.pitcher_usage(starter);
    stats.innings_pitched() < rules.starter_min_innings && !stats.is_fatigued()
}

/// Find the incoming and outgoing cards for a requested change.
pub fn lookup(
    team: &Team,
    side: Side,
    state: &GameState,
    incoming: CardId,
    outgoing: CardId,
) -> Result<(BenchEntry, LineupSlot), IneligibleReason> {
    let team_state = state.team(side);
    let is_replacement = incoming == REPLACEMENT_HITTER_ID || incoming == REPLACEMENT_PITCHER_ID;

    if !is_replacement && team_state.removed.contains(&incoming) {
        return Err(IneligibleReason::AlreadyUsed);
    }
    if team.lineup.contains(incoming) {
        return Err(IneligibleReason::InLineup);
    }

    let entry = match incoming {
        id if id == REPLACEMENT_HITTER_ID => BenchEntry::replacement_hitter(),
        id if id == REPLACEMENT_PITCHER_ID => BenchEntry::replacement_pitcher(),
        id => team.bench.find(id).cloned().ok_or(IneligibleReason::NotOnBench)?,
    };

    let slot = if team.lineup.pitcher.id == outgoing {
        LineupSlot { card: team.lineup.pitcher.clone(), position: Position::Pitcher }
    } else {
        let index = team.lineup.slot_of(outgoing).ok_or(IneligibleReason::NotInLineup)?;
        team.lineup.batting_order[index].clone()
    };

    Ok((entry, slot))
}

/// Bench cards that may replace the outgoing card right now.
pub fn substitution_options(
    team: &Team,
    side: Side,
    state: &GameState,
    outgoing: CardId,
    rules: &RulesConfig,
) -> Vec<CardId> {
    team.bench
        .entries
        .iter()
        .map(|e| e.card.id)
        .chain([REPLACEMENT_HITTER_ID, REPLACEMENT_PITCHER_ID])
        .filter(|incoming| match lookup(team, side, state, *incoming, outgoing) {
            Ok((entry, slot)) => can_substitute(&entry, &slot, side, state, rules).eligible,
            Err(_) => false,
        })
        .collect()
}

// =============================================================================
// APPLICATION
// =============================================================================

/// Make a substitution, or say why it cannot be made.
///
/// Nothing is modified when the change is refused.
pub fn substitute(
    team: &mut Team,
    side: Side,
    state: &mut GameState,
    incoming: CardId,
    outgoing: CardId,
    rules: &RulesConfig,
) -> Result<Substitution, IneligibleReason> {
    let (entry, slot) = lookup(team, side, state, incoming, outgoing)?;
    let verdict = can_substitute(&entry, &slot, side, state, rules);
    if let Some(reason) = verdict.reason {
        return Err(reason);
    }

    team.bench.remove(entry.card.id);
    state.team_mut(side).removed.insert(slot.card.id);

    let incoming_card = entry.card;
    let outgoing_name = slot.card.display_name.clone();
    let position = slot.position;

    let kind = if position == Position::Pitcher {
        relieve(team, side, state, &incoming_card);
        SubstitutionKind::Relief
    } else {
        let index = team.lineup.slot_of(outgoing).ok_or(IneligibleReason::NotInLineup)?;
        team.lineup.batting_order[index].card = incoming_card.clone();
        batting_change_kind(side, state, index, outgoing, &incoming_card)
    };

    let incoming_name = &incoming_card.display_name;
    let message = match kind {
        SubstitutionKind::PinchHitter => {
            format!("{} brings in {incoming_name} to pinch hit for {outgoing_name}.", team.name)
        }
        SubstitutionKind::PinchRunner => {
            format!("{} brings in {incoming_name} to pinch run for {outgoing_name}.", team.name)
        }
        SubstitutionKind::Relief => {
            format!("{} brings in {incoming_name} to relieve {outgoing_name}.", team.name)
        }
        SubstitutionKind::Defensive => format!(
            "{} substitutes {incoming_name} for {outgoing_name}. {incoming_name} will now play {position}.",
            team.name
        ),
    };

    Ok(Substitution {
        side,
        kind,
        incoming: incoming_card.id,
        outgoing,
        position,
        message,
    })
}

/// New pitcher takes the mound, and the batting slot if the old one hit.
fn relieve(team: &mut Team, side: Side, state: &mut GameState, incoming: &Card) {
    let outgoing = team.lineup.pitcher.id;
    if let Some(index) = team.lineup.slot_of(outgoing) {
        team.lineup.batting_order[index].card = incoming.clone();
    }
    team.lineup.pitcher = incoming.clone();
    state.enter_pitcher(side, incoming);
}

fn batting_change_kind(
    side: Side,
    state: &mut GameState,
    index: usize,
    outgoing: CardId,
    incoming: &Card,
) -> SubstitutionKind {
    let batting = state.phase == GamePhase::InProgress || state.phase == GamePhase::PreGame;
    if !batting || side != state.batting_side() {
        return SubstitutionKind::Defensive;
    }

    if let Some(base) = state.bases.find(outgoing) {
        if let Some(old) = state.bases.take(base) {
            state.bases.place(
                base,
                Runner {
                    card_id: incoming.id,
                    name: incoming.display_name.clone(),
                    speed: incoming.speed(),
                    charged_to: old.charged_to,
                },
            );
        }
        return SubstitutionKind::PinchRunner;
    }

    if state.team(side).batting_index % crate::game::lineup::LINEUP_SIZE == index {
        SubstitutionKind::PinchHitter
    } else {
        SubstitutionKind::Defensive
    }
}

// =============================================================================
// TESTS
// =============================================================================
