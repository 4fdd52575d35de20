//! Game State Machine
//!
//! ```text
//! PreGame -> InProgress -> BetweenHalfInnings -> InProgress -> ... -> Completed
//! ```
//!
//! Every decision goes through [`Game::apply`]. A decision is checked against
//! the pending step first; anything that does not fit is rejected as
//! out-of-order and leaves the game untouched.
//!
//! The third out moves the game to `BetweenHalfInnings` in the step that
//! recorded it. The next accepted action opens the new half: outs reset,
//! bases cleared, sides flipped.
//!
//! The turn counter advances once per resolved play and once per
//! substitution. Decisions that only wait for the other side do not move it.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::config::RulesConfig;
use crate::core::rng::{derive_game_seed, RandomSource};
use crate::game::atbat::{
    resolve_at_bat, AtBatContext, AtBatResult, BatterAction, PitcherAction, PlateResult,
};
use crate::game::baserunning::{
    defense_response, infield_in_decision, offense_decision, open_play, steal_candidates, BaserunningPlay,
    CurrentPlay, OffenseStep, Opening, PlayResolution, ProtocolError, ProtocolStage, ThrowChoice,
};
use crate::game::card::{Card, CardId};
use crate::game::chart::ChartGapError;
use crate::game::events::{annotate_outs, Event, EventKind};
use crate::game::fielding::{AdvanceKind, DefensiveAlignment};
use crate::game::lineup::{Team, LINEUP_SIZE};
use crate::game::state::{Base, GameId, GamePhase, GameState, Half, Runner, Side};
use crate::game::substitution::{self, lookup, can_substitute, Eligibility, IneligibleReason, Substitution};
use crate::game::sync::{DisplayState, Reveal};

// =============================================================================
// DECISIONS
// =============================================================================

/// A decision submitted by one side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Defense: pitch or walk the batter
    Pitch(PitcherAction),
    /// Offense: swing or bunt
    Bat(BatterAction),
    /// Offense: start a steal with these runners, keyed by current base
    Steal(BTreeMap<Base, bool>),
    /// Offense: send runners on a pending tag-up or extra-base play
    SendRunners(BTreeMap<Base, bool>),
    /// Defense: throw on a pending play
    Throw(ThrowChoice),
    /// Either side: change personnel
    Substitute {
        /// Card coming in
        incoming: CardId,
        /// Card going out
        outgoing: CardId,
    },
    /// Either side: exchange two fielders' positions
    SwapPositions {
        /// One batting-order card
        first: CardId,
        /// The other
        second: CardId,
    },
}

/// An accepted decision, as recorded for replay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Submitting side
    pub side: Side,
    /// The decision
    pub decision: Decision,
}

/// What the game is waiting for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingStep {
    /// At-bat decisions; `true` marks a side still to submit
    AtBat {
        /// Defense has not chosen
        pitcher: bool,
        /// Offense has not chosen
        batter: bool,
    },
    /// Offense must decide who runs
    Offense(AdvanceKind),
    /// Defense must decide where to throw
    Defense(AdvanceKind),
    /// Next action starts the next half-inning
    NextHalf,
    /// Nothing more to do
    GameOver,
}

/// Rejected decisions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// Decision does not fit the pending step.
    #[error("decision does not match the pending step ({expected:?})")]
    OutOfOrder {
        /// What the game is waiting for
        expected: PendingStep,
    },

    /// Decision fits the step but its contents are not legal.
    #[error("invalid decision: {0}")]
    InvalidDecision(String),

    /// Game already completed.
    #[error("game is over")]
    GameOver,

    /// Card data could not resolve a roll.
    #[error("data integrity: {0}")]
    DataIntegrity(#[from] ChartGapError),
}

impl From<ProtocolError> for RuleError {
    fn from(err: ProtocolError) -> Self {
        RuleError::InvalidDecision(err.to_string())
    }
}

// =============================================================================
// STEP OUTCOME
// =============================================================================

/// What an accepted decision did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    /// Recorded; waiting on the other side
    Accepted,
    /// Plate appearance resolved
    AtBat,
    /// Tag-up or extra-base play resolved
    Baserunning,
    /// Steal resolved
    Steal,
    /// Personnel change made
    Substitution(Substitution),
    /// Personnel change refused; nothing changed
    Refused(IneligibleReason),
    /// Two fielders changed positions
    PositionSwap,
}

/// Result of one decision.
#[derive(Clone, Debug)]
pub struct StepOutcome {
    /// What happened
    pub kind: StepKind,
    /// Turn after the step
    pub turn: u64,
    /// Events emitted, in order
    pub events: Vec<Event>,
    /// Play to reveal to lagging viewers
    pub reveal: Option<Reveal>,
    /// What the game waits for next
    pub pending: PendingStep,
    /// Game ended in this step
    pub game_over: bool,
    /// Plate appearance details, when one resolved
    pub at_bat: Option<AtBatResult>,
    /// Baserunning details, when a play resolved
    pub play: Option<PlayResolution>,
}

/// Scratch record of a step in progress.
#[derive(Default)]
struct Step {
    events: Vec<Event>,
    message: Option<String>,
    at_bat: Option<AtBatResult>,
    play: Option<PlayResolution>,
    game_over: bool,
}

// =============================================================================
// GAME
// =============================================================================

/// One game: authoritative state plus both rosters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    /// Authoritative state
    pub state: GameState,
    /// Visiting roster
    pub away: Team,
    /// Home roster
    pub home: Team,
    /// Rule constants
    pub rules: RulesConfig,
}

impl Game {
    /// New game with a seed derived from its identity and lineups.
    pub fn new(game_id: GameId, away: Team, home: Team, rules: RulesConfig) -> Self {
        let seed = derive_game_seed(
            game_id.as_bytes(),
            &away.lineup.card_ids(),
            &home.lineup.card_ids(),
        );
        Self::with_seed(game_id, seed, away, home, rules)
    }

    /// New game with an explicit seed.
    pub fn with_seed(game_id: GameId, seed: u64, away: Team, home: Team, rules: RulesConfig) -> Self {
        let state = GameState::new(game_id, seed, &away.lineup.pitcher, &home.lineup.pitcher);
        Self { state, away, home, rules }
    }

    /// Seed pitchers' fatigue carried in from earlier games.
    ///
    /// Fails with the first id that is not a pitcher on either roster.
    pub fn carry_fatigue(&mut self, carried: &BTreeMap<CardId, i32>) -> Result<(), CardId> {
        for (&id, &modifier) in carried {
            let card = self
                .away
                .pitcher_card(id)
                .or_else(|| self.home.pitcher_card(id))
                .cloned()
                .ok_or(id)?;
            self.state.carry_fatigue(&card, modifier);
        }
        Ok(())
    }

    /// Roster for a side.
    pub fn team(&self, side: Side) -> &Team {
        match side {
            Side::Away => &self.away,
            Side::Home => &self.home,
        }
    }

    fn team_mut(&mut self, side: Side) -> &mut Team {
        match side {
            Side::Away => &mut self.away,
            Side::Home => &mut self.home,
        }
    }

    /// Batter due up for the side at bat.
    pub fn batter_up(&self) -> &Card {
        let side = self.state.batting_side();
        let index = self.state.team(side).batting_index;
        &self.team(side).lineup.batter_at(index).card
    }

    /// Defense of the side in the field.
    pub fn defense(&self) -> DefensiveAlignment {
        DefensiveAlignment::of(&self.team(self.state.fielding_side()).lineup)
    }

    /// What the game is waiting for.
    pub fn pending(&self) -> PendingStep {
        match self.state.phase {
            GamePhase::Completed => return PendingStep::GameOver,
            GamePhase::BetweenHalfInnings => return PendingStep::NextHalf,
            GamePhase::PreGame | GamePhase::InProgress => {}
        }
        match (self.state.current_play.kind(), self.state.current_play.stage()) {
            (Some(kind), Some(ProtocolStage::AwaitingOffense)) => PendingStep::Offense(kind),
            (Some(kind), Some(ProtocolStage::AwaitingDefense)) => PendingStep::Defense(kind),
            _ => PendingStep::AtBat {
                pitcher: self.state.at_bat.pitcher.is_none(),
                batter: self.state.at_bat.batter.is_none(),
            },
        }
    }

    /// Advisory check for a personnel change.
    pub fn eligibility(&self, side: Side, incoming: CardId, outgoing: CardId) -> Eligibility {
        match lookup(self.team(side), side, &self.state, incoming, outgoing) {
            Ok((entry, slot)) => can_substitute(&entry, &slot, side, &self.state, &self.rules),
            Err(reason) => Eligibility::denied(reason),
        }
    }

    /// Cards that may replace `outgoing` right now.
    pub fn substitution_options(&self, side: Side, outgoing: CardId) -> Vec<CardId> {
        substitution::substitution_options(self.team(side), side, &self.state, outgoing, &self.rules)
    }

    // =========================================================================
    // ENTRY POINTS
    // =========================================================================

    /// Defense chooses to pitch or walk the batter.
    pub fn submit_pitcher_action(
        &mut self,
        action: PitcherAction,
        rng: &mut dyn RandomSource,
    ) -> Result<StepOutcome, RuleError> {
        let side = self.next_fielding_side();
        self.apply(side, &Decision::Pitch(action), rng)
    }

    /// Offense chooses to swing or bunt.
    pub fn submit_batter_action(
        &mut self,
        action: BatterAction,
        rng: &mut dyn RandomSource,
    ) -> Result<StepOutcome, RuleError> {
        let side = self.next_fielding_side().opponent();
        self.apply(side, &Decision::Bat(action), rng)
    }

    /// Offense sends runners on a steal.
    pub fn initiate_steal(
        &mut self,
        sends: BTreeMap<Base, bool>,
        rng: &mut dyn RandomSource,
    ) -> Result<StepOutcome, RuleError> {
        let side = self.next_fielding_side().opponent();
        self.apply(side, &Decision::Steal(sends), rng)
    }

    /// Offense decides who runs on a pending play.
    pub fn submit_runner_decisions(
        &mut self,
        sends: BTreeMap<Base, bool>,
        rng: &mut dyn RandomSource,
    ) -> Result<StepOutcome, RuleError> {
        let side = self.state.batting_side();
        self.apply(side, &Decision::SendRunners(sends), rng)
    }

    /// Defense throws, or doesn't.
    pub fn submit_throw(
        &mut self,
        choice: ThrowChoice,
        rng: &mut dyn RandomSource,
    ) -> Result<StepOutcome, RuleError> {
        let side = self.state.fielding_side();
        self.apply(side, &Decision::Throw(choice), rng)
    }

    /// Change personnel for a side.
    pub fn substitute(
        &mut self,
        side: Side,
        incoming: CardId,
        outgoing: CardId,
        rng: &mut dyn RandomSource,
    ) -> Result<StepOutcome, RuleError> {
        self.apply(side, &Decision::Substitute { incoming, outgoing }, rng)
    }

    /// Exchange the positions of two of a side's fielders.
    pub fn swap_positions(
        &mut self,
        side: Side,
        first: CardId,
        second: CardId,
        rng: &mut dyn RandomSource,
    ) -> Result<StepOutcome, RuleError> {
        self.apply(side, &Decision::SwapPositions { first, second }, rng)
    }

    /// Fielding side once any pending half-inning change is made.
    fn next_fielding_side(&self) -> Side {
        match self.state.phase {
            GamePhase::BetweenHalfInnings => self.state.batting_side(),
            _ => self.state.fielding_side(),
        }
    }

    /// Apply one decision from one side.
    ///
    /// The game is only modified when the decision is accepted; a refused
    /// substitution or any error leaves it exactly as it was.
    pub fn apply(
        &mut self,
        side: Side,
        decision: &Decision,
        rng: &mut dyn RandomSource,
    ) -> Result<StepOutcome, RuleError> {
        if self.state.is_over() {
            return Err(RuleError::GameOver);
        }

        let mut next = self.clone();
        let mut step = Step::default();
        next.begin_half_if_needed(&mut step);
        let before = DisplayState::of(&next.state);

        let kind = next.dispatch(side, decision, &mut step, rng)?;
        if matches!(kind, StepKind::Refused(_)) {
            return Ok(self.outcome(kind, Step::default(), None));
        }

        *self = next;
        let reveal = match (&kind, step.message.as_ref()) {
            (StepKind::AtBat | StepKind::Baserunning | StepKind::Steal, Some(message)) => Some(Reveal {
                turn: self.state.turn,
                before,
                message: message.clone(),
            }),
            _ => None,
        };
        Ok(self.outcome(kind, step, reveal))
    }

    fn outcome(&self, kind: StepKind, step: Step, reveal: Option<Reveal>) -> StepOutcome {
        StepOutcome {
            kind,
            turn: self.state.turn,
            events: step.events,
            reveal,
            pending: self.pending(),
            game_over: step.game_over,
            at_bat: step.at_bat,
            play: step.play,
        }
    }

    fn dispatch(
        &mut self,
        side: Side,
        decision: &Decision,
        step: &mut Step,
        rng: &mut dyn RandomSource,
    ) -> Result<StepKind, RuleError> {
        let batting = self.state.batting_side();
        let fielding = self.state.fielding_side();
        let idle = self.state.current_play.is_none();

        match decision {
            Decision::Pitch(action) => {
                if side != fielding || !idle || self.state.at_bat.pitcher.is_some() {
                    return Err(self.out_of_order());
                }
                self.state.at_bat.pitcher = Some(*action);
                self.resolve_if_ready(step, rng)
            }

            Decision::Bat(action) => {
                if side != batting || !idle || self.state.at_bat.batter.is_some() {
                    return Err(self.out_of_order());
                }
                self.state.at_bat.batter = Some(*action);
                self.resolve_if_ready(step, rng)
            }

            Decision::Steal(sends) => {
                if side != batting || !idle || !self.state.at_bat.is_empty() {
                    return Err(self.out_of_order());
                }
                self.start_steal(sends, step)
            }

            Decision::SendRunners(sends) => {
                let awaiting = self.state.current_play.stage() == Some(ProtocolStage::AwaitingOffense);
                if side != batting || !awaiting {
                    return Err(self.out_of_order());
                }
                self.runners_sent(sends, step, rng)
            }

            Decision::Throw(choice) => {
                let awaiting = self.state.current_play.stage() == Some(ProtocolStage::AwaitingDefense);
                if side != fielding || !awaiting {
                    return Err(self.out_of_order());
                }
                self.throw(*choice, step, rng)
            }

            Decision::Substitute { incoming, outgoing } => {
                if !idle || !self.state.at_bat.is_empty() {
                    return Err(self.out_of_order());
                }
                self.make_substitution(side, *incoming, *outgoing, step)
            }

            Decision::SwapPositions { first, second } => {
                if !idle || !self.state.at_bat.is_empty() {
                    return Err(self.out_of_order());
                }
                self.swap_fielders(side, *first, *second, step)
            }
        }
    }

    fn out_of_order(&self) -> RuleError {
        RuleError::OutOfOrder { expected: self.pending() }
    }

    // =========================================================================
    // HALF-INNINGS AND GAME END
    // =========================================================================

    fn begin_half_if_needed(&mut self, step: &mut Step) {
        let state = &mut self.state;
        match state.phase {
            GamePhase::PreGame => {}
            GamePhase::BetweenHalfInnings => {
                state.outs = 0;
                state.bases.clear();
                state.at_bat.clear();
                state.current_play = CurrentPlay::None;
                match state.half {
                    Half::Top => state.half = Half::Bottom,
                    Half::Bottom => {
                        state.half = Half::Top;
                        state.inning += 1;
                    }
                }
            }
            GamePhase::InProgress | GamePhase::Completed => return,
        }
        state.phase = GamePhase::InProgress;
        step.events.push(Event::inning_change(state.turn, state.half, state.inning));
    }

    /// Walk-off, end of half, or end of game. Returns true if play stopped.
    fn check_end(&mut self, step: &mut Step) -> bool {
        let regulation = self.rules.regulation_innings;
        let state = &mut self.state;
        let late = state.inning >= regulation;

        if late && state.half == Half::Bottom && state.home_score > state.away_score {
            self.complete(Side::Home, "HOME TEAM WINS! WALK-OFF!".to_string(), step);
            return true;
        }

        if state.outs < 3 {
            return false;
        }

        state.at_bat.clear();
        state.current_play = CurrentPlay::None;
        let over = late
            && match state.half {
                Half::Bottom => state.home_score != state.away_score,
                Half::Top => state.home_score > state.away_score,
            };

        if over {
            let winner = if state.home_score > state.away_score { Side::Home } else { Side::Away };
            let message = format!(
                "That's the ballgame! Final Score: Away {}, Home {}.",
                state.away_score, state.home_score
            );
            self.complete(winner, message, step);
        } else {
            state.phase = GamePhase::BetweenHalfInnings;
        }
        true
    }

    fn complete(&mut self, winner: Side, message: String, step: &mut Step) {
        let state = &mut self.state;
        state.phase = GamePhase::Completed;
        state.winner = Some(winner);
        state.at_bat.clear();
        state.current_play = CurrentPlay::None;
        step.events.push(Event::game_over(state.turn, message));
        step.game_over = true;
    }

    // =========================================================================
    // AT-BATS
    // =========================================================================

    fn resolve_if_ready(&mut self, step: &mut Step, rng: &mut dyn RandomSource) -> Result<StepKind, RuleError> {
        if !self.state.at_bat.ready() {
            return Ok(StepKind::Accepted);
        }

        let batting = self.state.batting_side();
        let fielding = batting.opponent();
        let index = self.state.team(batting).batting_index;
        let batter = self.team(batting).lineup.batter_at(index).card.clone();
        let pitcher = self.team(fielding).lineup.pitcher.clone();
        let defense = self.defense();

        let inning = self.state.inning;
        self.state.pitcher_stats_mut(pitcher.id).innings.insert(inning);
        let effective_control = self
            .state
            .pitcher_usage(pitcher.id)
            .effective_control(pitcher.control().unwrap_or(0));

        let ctx = AtBatContext {
            batter: &batter,
            pitcher: &pitcher,
            effective_control,
            defense: &defense,
            pitcher_action: self.state.at_bat.pitcher.unwrap_or(PitcherAction::Pitch),
            batter_action: self.state.at_bat.batter.unwrap_or(BatterAction::Swing),
            bases: &self.state.bases,
            rules: &self.rules,
        };
        let result = resolve_at_bat(ctx, rng)?;
        let infield_in = self.state.at_bat.pitcher.is_some_and(PitcherAction::infield_in);

        self.state.at_bat.clear();
        self.state.team_mut(batting).batting_index = (index + 1) % LINEUP_SIZE;
        self.state.turn += 1;

        let outs_before = self.state.outs;
        let batter_runner = Runner {
            card_id: batter.id,
            name: batter.display_name.clone(),
            speed: batter.speed(),
            charged_to: pitcher.id,
        };
        let mut plate = PlateAppearance { state: &mut self.state, lines: Vec::new(), infield_in, batter: None };
        let opening = plate.apply(&result, batter_runner, &defense, &self.rules, rng);
        let held_batter = plate.batter.take();
        let raw = plate.lines.join(" ");
        let message = annotate_outs(&raw, outs_before, self.state.outs);
        step.at_bat = Some(result);

        if self.check_end_after(message.clone(), EventKind::AtBat, step) {
            return Ok(StepKind::AtBat);
        }

        let Some((kind, candidates)) = opening else {
            self.emit(EventKind::AtBat, message, step);
            return Ok(StepKind::AtBat);
        };

        let outs = self.state.outs;
        let mut play = BaserunningPlay::new(candidates, Some(raw));
        if let Some(batter) = held_batter {
            play = play.with_batter(batter);
        }
        let opening = match kind {
            // Always the offense's call
            AdvanceKind::InfieldIn => Opening::Pending(play),
            _ => open_play(kind, &self.state.bases, play, outs, &defense, &self.rules),
        };
        match opening {
            Opening::Automatic(resolution) => {
                let applied = resolution.apply(&mut self.state);
                let applied = annotate_outs(&applied.message, outs_before, self.state.outs);
                step.play = Some(resolution);
                if !self.check_end_after(applied.clone(), EventKind::AtBat, step) {
                    self.emit(EventKind::AtBat, applied, step);
                }
            }
            // The at-bat line is revealed with the play once it resolves
            Opening::Pending(play) => self.state.current_play = CurrentPlay::open(kind, play),
        }
        Ok(StepKind::AtBat)
    }

    /// Emit the play line, then any end-of-half or end-of-game event.
    fn check_end_after(&mut self, message: String, kind: EventKind, step: &mut Step) -> bool {
        let turn = self.state.turn;
        let mut ending = Step::default();
        if !self.check_end(&mut ending) {
            return false;
        }
        step.events.push(Event::new(turn, kind, message.clone()));
        step.events.append(&mut ending.events);
        step.message = Some(message);
        step.game_over |= ending.game_over;
        true
    }

    fn emit(&mut self, kind: EventKind, message: String, step: &mut Step) {
        step.events.push(Event::new(self.state.turn, kind, message.clone()));
        step.message = Some(message);
    }

    // =========================================================================
    // BASERUNNING
    // =========================================================================

    fn start_steal(&mut self, sends: &BTreeMap<Base, bool>, step: &mut Step) -> Result<StepKind, RuleError> {
        let candidates = steal_candidates(&self.state.bases);
        if candidates.is_empty() {
            return Err(RuleError::InvalidDecision("no runner can steal".to_string()));
        }
        let defense = self.defense();
        let mut play = BaserunningPlay::new(candidates, None);
        let outs = self.state.outs;

        match offense_decision(AdvanceKind::Steal, &mut play, sends, &self.state.bases, outs, &defense, &self.rules)? {
            // Nobody runs: resolved on the spot with nothing to report
            OffenseStep::Resolved(_) if play.sent_bases().is_empty() => {
                self.state.turn += 1;
                Ok(StepKind::Steal)
            }
            OffenseStep::Resolved(resolution) => {
                self.finish_play(resolution, step);
                Ok(StepKind::Steal)
            }
            OffenseStep::AwaitingDefense => {
                self.state.current_play = CurrentPlay::open(AdvanceKind::Steal, play);
                Ok(StepKind::Accepted)
            }
        }
    }

    fn runners_sent(
        &mut self,
        sends: &BTreeMap<Base, bool>,
        step: &mut Step,
        rng: &mut dyn RandomSource,
    ) -> Result<StepKind, RuleError> {
        let defense = self.defense();
        let outs = self.state.outs;
        let Some(kind) = self.state.current_play.kind() else {
            return Err(self.out_of_order());
        };
        let mut current = self.state.current_play.clone();
        let Some(play) = current.play_mut() else {
            return Err(self.out_of_order());
        };

        if kind == AdvanceKind::InfieldIn {
            let resolution = infield_in_decision(play, sends, &self.state.bases, &defense, &self.rules, rng)?;
            self.finish_play(resolution, step);
            return Ok(step_kind(kind));
        }

        match offense_decision(kind, play, sends, &self.state.bases, outs, &defense, &self.rules)? {
            OffenseStep::Resolved(resolution) => {
                self.finish_play(resolution, step);
                Ok(step_kind(kind))
            }
            OffenseStep::AwaitingDefense => {
                self.state.current_play = current;
                Ok(StepKind::Accepted)
            }
        }
    }

    fn throw(&mut self, choice: ThrowChoice, step: &mut Step, rng: &mut dyn RandomSource) -> Result<StepKind, RuleError> {
        let defense = self.defense();
        let outs = self.state.outs;
        let Some(kind) = self.state.current_play.kind() else {
            return Err(self.out_of_order());
        };
        let mut current = self.state.current_play.clone();
        let Some(play) = current.play_mut() else {
            return Err(self.out_of_order());
        };

        let resolution = defense_response(kind, play, choice, &self.state.bases, outs, &defense, &self.rules, rng)?;
        self.finish_play(resolution, step);
        Ok(step_kind(kind))
    }

    /// Apply a decided play: one combined line, then any half or game end.
    fn finish_play(&mut self, resolution: PlayResolution, step: &mut Step) {
        // Tag-ups follow a fly out that already counted its out
        let lead_in_outs = if resolution.lead_in.is_some() && resolution.kind == AdvanceKind::TagUp { 1 } else { 0 };
        let outs_before = self.state.outs.saturating_sub(lead_in_outs);

        let applied = resolution.apply(&mut self.state);
        self.state.current_play = CurrentPlay::None;
        self.state.turn += 1;

        let message = annotate_outs(&applied.message, outs_before, self.state.outs);
        let event_kind = match resolution.kind {
            AdvanceKind::Steal => EventKind::Steal,
            AdvanceKind::TagUp | AdvanceKind::ExtraBase | AdvanceKind::InfieldIn => EventKind::Baserunning,
        };
        step.play = Some(resolution);
        if !self.check_end_after(message.clone(), event_kind, step) {
            self.emit(event_kind, message, step);
        }
    }

    // =========================================================================
    // SUBSTITUTIONS
    // =========================================================================

    fn make_substitution(
        &mut self,
        side: Side,
        incoming: CardId,
        outgoing: CardId,
        step: &mut Step,
    ) -> Result<StepKind, RuleError> {
        let rules = self.rules.clone();
        let mut team = self.team(side).clone();
        match substitution::substitute(&mut team, side, &mut self.state, incoming, outgoing, &rules) {
            Ok(sub) => {
                *self.team_mut(side) = team;
                self.state.turn += 1;
                step.events.push(Event::substitution(self.state.turn, sub.message.clone()));
                step.message = Some(sub.message.clone());
                Ok(StepKind::Substitution(sub))
            }
            Err(reason) => Ok(StepKind::Refused(reason)),
        }
    }

    fn swap_fielders(&mut self, side: Side, first: CardId, second: CardId, step: &mut Step) -> Result<StepKind, RuleError> {
        let mut team = self.team(side).clone();
        let (to_a, to_b) = team
            .lineup
            .swap_positions(first, second)
            .map_err(|e| RuleError::InvalidDecision(e.to_string()))?;

        let name = |id: CardId| team.lineup.card(id).map(|c| c.display_name.clone()).unwrap_or_default();
        let message = format!(
            "{} swaps positions: {} moves to {to_a}, {} moves to {to_b}.",
            team.name,
            name(first),
            name(second),
        );
        *self.team_mut(side) = team;
        self.state.turn += 1;
        step.events.push(Event::substitution(self.state.turn, message.clone()));
        step.message = Some(message);
        Ok(StepKind::PositionSwap)
    }
}

fn step_kind(kind: AdvanceKind) -> StepKind {
    match kind {
        AdvanceKind::Steal => StepKind::Steal,
        AdvanceKind::TagUp | AdvanceKind::ExtraBase | AdvanceKind::InfieldIn => StepKind::Baserunning,
    }
}

// =============================================================================
// PLATE APPEARANCE APPLICATION
// =============================================================================

/// Applies a plate result to the bases, collecting play-by-play lines.
struct PlateAppearance<'a> {
    state: &'a mut GameState,
    lines: Vec<String>,
    /// Defense drew the infield in for this pitch
    infield_in: bool,
    /// Batter whose base the opened play still decides
    batter: Option<Runner>,
}

impl PlateAppearance<'_> {
    /// Returns the baserunning play the result opens, if any.
    fn apply(
        &mut self,
        result: &AtBatResult,
        batter: Runner,
        defense: &DefensiveAlignment,
        rules: &RulesConfig,
        rng: &mut dyn RandomSource,
    ) -> Option<(AdvanceKind, Vec<Base>)> {
        let name = batter.name.clone();
        match result.result {
            PlateResult::Strikeout => {
                self.say(format!("{name} strikes out."));
                self.out();
            }
            PlateResult::PopOut => {
                self.say(format!("{name} pops out."));
                self.out();
            }
            PlateResult::GroundOut => return self.ground_ball(batter, defense, rules, rng),
            PlateResult::FlyOut => {
                self.say(format!("{name} flies out."));
                self.out();
                if self.state.outs < 3 && !self.state.bases.is_empty() {
                    let candidates = self.state.bases.occupied_lead_first().iter().map(|(b, _)| *b).collect();
                    return Some((AdvanceKind::TagUp, candidates));
                }
            }
            PlateResult::Walk => {
                self.say(format!("{name} walks."));
                self.force(batter);
            }
            PlateResult::IntentionalWalk => {
                self.say(format!("{name} is intentionally walked."));
                self.force(batter);
            }
            PlateResult::Single | PlateResult::SinglePlus => {
                self.say(format!("{name} hits a SINGLE!"));
                self.score(Base::Third);
                let from_second = self.advance(Base::Second, Base::Third);
                let from_first = self.advance(Base::First, Base::Second);

                let plus = result.result == PlateResult::SinglePlus;
                if plus && !self.state.bases.is_occupied(Base::Second) {
                    self.say(format!("{name} takes second on the throw!"));
                    self.state.bases.place(Base::Second, batter);
                } else {
                    // 1B+ batter still takes second if the play ahead clears it
                    if plus {
                        self.batter = Some(batter.clone());
                    }
                    self.state.bases.place(Base::First, batter);
                }

                let candidates: Vec<Base> = [(from_second, Base::Third), (from_first, Base::Second)]
                    .into_iter()
                    .filter_map(|(moved, base)| moved.then_some(base))
                    .collect();
                if !candidates.is_empty() {
                    return Some((AdvanceKind::ExtraBase, candidates));
                }
            }
            PlateResult::Double => {
                self.say(format!("{name} hits a DOUBLE!"));
                self.score(Base::Third);
                self.score(Base::Second);
                let from_first = self.advance(Base::First, Base::Third);
                self.state.bases.place(Base::Second, batter);
                if from_first {
                    return Some((AdvanceKind::ExtraBase, vec![Base::Third]));
                }
            }
            PlateResult::Triple => {
                self.say(format!("{name} hits a TRIPLE!"));
                self.clear_bases();
                self.state.bases.place(Base::Third, batter);
            }
            PlateResult::HomeRun => {
                self.say(format!("{name} hits a HOME RUN!"));
                self.clear_bases();
                self.state.score_runner(&batter);
            }
            PlateResult::SacrificeBunt => self.bunt(batter),
            PlateResult::ReachedOnError { position } => {
                self.say(format!("{name} reaches on an error by the {position}."));
                self.score(Base::Third);
                self.advance(Base::Second, Base::Third);
                self.advance(Base::First, Base::Second);
                self.state.bases.place(Base::First, batter);
            }
        }
        None
    }

    fn say(&mut self, line: String) {
        self.lines.push(line);
    }

    fn out(&mut self) {
        self.state.record_out();
    }

    /// Score the runner on a base, if any.
    fn score(&mut self, base: Base) {
        if let Some(runner) = self.state.bases.take(base) {
            self.say(format!("{} scores!", runner.name));
            self.state.score_runner(&runner);
        }
    }

    /// Move the runner on `from` to `to`. Returns true if someone moved.
    fn advance(&mut self, from: Base, to: Base) -> bool {
        if to == Base::Home {
            let moved = self.state.bases.is_occupied(from);
            self.score(from);
            return moved;
        }
        match self.state.bases.take(from) {
            Some(runner) => {
                self.state.bases.place(to, runner);
                true
            }
            None => false,
        }
    }

    fn clear_bases(&mut self) {
        for base in [Base::Third, Base::Second, Base::First] {
            self.score(base);
        }
    }

    /// Walk: only forced runners move.
    fn force(&mut self, batter: Runner) {
        let forced_second = self.state.bases.is_occupied(Base::First);
        let forced_third = forced_second && self.state.bases.is_occupied(Base::Second);
        if forced_third {
            self.score(Base::Third);
            self.advance(Base::Second, Base::Third);
        }
        if forced_second {
            self.advance(Base::First, Base::Second);
        }
        self.state.bases.place(Base::First, batter);
    }

    /// Returns the infield-in play when the runner on third has a choice.
    fn ground_ball(
        &mut self,
        batter: Runner,
        defense: &DefensiveAlignment,
        rules: &RulesConfig,
        rng: &mut dyn RandomSource,
    ) -> Option<(AdvanceKind, Vec<Base>)> {
        let name = batter.name.clone();
        if self.infield_in && self.state.outs < 2 && self.state.bases.is_occupied(Base::Third) {
            self.say(format!("{name} hits a ground ball with the infield in..."));
            self.batter = Some(batter);
            return Some((AdvanceKind::InfieldIn, vec![Base::Third]));
        }

        let chance = rules.double_plays && self.state.outs <= 1 && self.state.bases.is_occupied(Base::First);
        if !chance {
            self.say(format!("{name} grounds out."));
            self.out();
            // A drawn-in infield keeps the runners where they are
            if self.state.outs < 3 && !self.infield_in {
                self.score(Base::Third);
                self.advance(Base::Second, Base::Third);
                self.advance(Base::First, Base::Second);
            }
            return None;
        }

        let roll = rng.die(rules.die_sides);
        let turned = roll as i32 + defense.infield > batter.speed;

        #[cfg(feature = "debug-tracing")]
        tracing::trace!(roll, infield = defense.infield, speed = batter.speed, turned, "double play");

        if turned {
            self.say(format!("{name} grounds into a double play."));
            self.state.bases.take(Base::First);
            self.out();
            self.out();
            if self.state.outs < 3 {
                self.score(Base::Third);
                self.advance(Base::Second, Base::Third);
            }
        } else {
            self.say(format!("{name} hits into a fielder's choice."));
            if let Some(lead) = self.state.bases.take(Base::First) {
                self.say(format!("{} is out at 2nd.", lead.name));
            }
            self.out();
            self.score(Base::Third);
            self.advance(Base::Second, Base::Third);
            self.state.bases.place(Base::First, batter);
        }
        None
    }

    fn bunt(&mut self, batter: Runner) {
        self.say(format!("{} lays down a sacrifice bunt.", batter.name));
        let bases = &self.state.bases;
        let (first, second, third) = (
            bases.is_occupied(Base::First),
            bases.is_occupied(Base::Second),
            bases.is_occupied(Base::Third),
        );

        match (first, second, third) {
            (true, true, true) => {
                if let Some(lead) = self.state.bases.take(Base::Third) {
                    self.say(format!("{} is forced out at home.", lead.name));
                }
                self.out();
                self.advance(Base::Second, Base::Third);
                self.advance(Base::First, Base::Second);
                self.state.bases.place(Base::First, batter);
            }
            // Runner on third holds; anyone behind him moves up if there is room
            (_, _, true) => {
                self.out();
                if self.state.outs < 3 && !second {
                    self.advance(Base::First, Base::Second);
                }
            }
            _ => {
                self.out();
                if self.state.outs < 3 {
                    self.advance(Base::Second, Base::Third);
                    self.advance(Base::First, Base::Second);
                }
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use crate::core::rng::{DeterministicRng, ScriptedRolls};
    use crate::game::card::Position;
    use crate::game::chart::{Chart, Outcome};
    use crate::game::lineup::tests::sample_team;

    fn game() -> Game {
        Game::with_seed(
            GameId::from_bytes([9; 16]),
            77,
            sample_team("Away", 100),
            sample_team("Home", 200),
            RulesConfig::default(),
        )
    }

    /// Game already under way in the given half.
    fn game_at(inning: u32, half: Half, outs: u8) -> Game {
        let mut game = game();
        game.state.phase = GamePhase::InProgress;
        game.state.inning = inning;
        game.state.half = half;
        game.state.outs = outs;
        game
    }

    fn runner(id: i32, speed: i32) -> Runner {
        Runner { card_id: CardId(id), name: format!("R{id}"), speed, charged_to: CardId(250) }
    }

    fn sends(list: &[(Base, bool)]) -> BTreeMap<Base, bool> {
        list.iter().copied().collect()
    }

    fn swing(game: &mut Game, rng: &mut ScriptedRolls) -> StepOutcome {
        game.submit_pitcher_action(PitcherAction::Pitch, rng).unwrap();
        game.submit_batter_action(BatterAction::Swing, rng).unwrap()
    }

    fn messages(outcome: &StepOutcome) -> Vec<&str> {
        outcome.events.iter().map(|e| e.message.as_str()).collect()
    }

    #[test]
    fn test_strikeout_from_pitcher_chart() {
        let mut game = game();
        // 10 + 3 > 8: pitcher's chart; 5 is a strikeout there
        let mut rng = ScriptedRolls::new([10, 5]);

        let first = game.submit_pitcher_action(PitcherAction::Pitch, &mut rng).unwrap();
        assert_eq!(first.kind, StepKind::Accepted);
        assert_eq!(first.turn, 0);
        assert_eq!(messages(&first), vec!["Top of the 1st."]);
        assert_eq!(first.pending, PendingStep::AtBat { pitcher: false, batter: true });

        let outcome = game.submit_batter_action(BatterAction::Swing, &mut rng).unwrap();
        assert_eq!(outcome.kind, StepKind::AtBat);
        assert_eq!(outcome.at_bat.as_ref().map(|r| r.result), Some(PlateResult::Strikeout));
        assert_eq!(messages(&outcome), vec!["Batter 101 strikes out. Outs: 1"]);
        assert_eq!(game.state.outs, 1);
        assert!(game.state.bases.is_empty());
        assert_eq!(game.state.turn, 1);
        assert_eq!(game.state.away.batting_index, 1);
        assert_eq!(game.state.pitcher_stats[&CardId(250)].outs_recorded, 1);
        assert!(game.state.pitcher_stats[&CardId(250)].innings.contains(&1));
    }

    #[test]
    fn test_fly_out_tag_up_safe_at_third() {
        let mut game = game_at(1, Half::Top, 1);
        game.state.bases.place(Base::Second, runner(902, 15));
        // Pitcher's chart, fly ball, left fielder, clean catch
        let mut rng = ScriptedRolls::new([10, 15, 0, 10]);

        let outcome = swing(&mut game, &mut rng);
        assert_eq!(outcome.kind, StepKind::AtBat);
        assert!(outcome.events.is_empty());
        assert_eq!(outcome.pending, PendingStep::Offense(AdvanceKind::TagUp));
        assert_eq!(game.state.outs, 2);

        let waiting = game.submit_runner_decisions(sends(&[(Base::Second, true)]), &mut rng).unwrap();
        assert_eq!(waiting.kind, StepKind::Accepted);
        assert_eq!(waiting.pending, PendingStep::Defense(AdvanceKind::TagUp));

        // Target 20 + 1 + 3 + 1 - 15 = 10
        rng.push(12);
        let outcome = game.submit_throw(ThrowChoice::Throw(Base::Third), &mut rng).unwrap();
        assert_eq!(outcome.kind, StepKind::Baserunning);
        assert_eq!(game.state.outs, 2);
        assert_eq!(game.state.bases.get(Base::Third).map(|r| r.card_id), Some(CardId(902)));
        assert_eq!(messages(&outcome), vec!["Batter 101 flies out. R902 is SAFE at 3rd! Outs: 2"]);
        assert!(game.state.current_play.is_none());
    }

    #[test]
    fn test_third_out_on_throw_ends_half() {
        let mut game = game_at(1, Half::Top, 2);
        game.state.bases.place(Base::First, runner(901, 15));
        let mut rng = ScriptedRolls::new([]);

        let waiting = game.initiate_steal(sends(&[(Base::First, true)]), &mut rng).unwrap();
        assert_eq!(waiting.pending, PendingStep::Defense(AdvanceKind::Steal));

        // Target 20 + 1 + 1 + 1 - 15 = 8
        rng.push(3);
        let outcome = game.submit_throw(ThrowChoice::Throw(Base::Second), &mut rng).unwrap();
        assert_eq!(outcome.kind, StepKind::Steal);
        assert_eq!(game.state.outs, 3);
        assert_eq!(game.state.phase, GamePhase::BetweenHalfInnings);
        assert_eq!(outcome.pending, PendingStep::NextHalf);
        assert_eq!(messages(&outcome), vec!["R901 takes off for 2nd... CAUGHT STEALING! Outs: 3"]);

        // Next action opens the bottom half
        let next = game.submit_pitcher_action(PitcherAction::Pitch, &mut rng).unwrap();
        assert_eq!(messages(&next), vec!["Bottom of the 1st."]);
        assert_eq!(game.state.half, Half::Bottom);
        assert_eq!(game.state.outs, 0);
        assert!(game.state.bases.is_empty());
        assert_eq!(game.state.at_bat.pitcher, Some(PitcherAction::Pitch));
    }

    #[test]
    fn test_steal_with_nobody_sent_advances_turn() {
        let mut game = game_at(2, Half::Top, 1);
        game.state.bases.place(Base::First, runner(901, 15));
        let mut rng = ScriptedRolls::new([]);
        let bases = game.state.bases.clone();

        let outcome = game.initiate_steal(sends(&[(Base::First, false)]), &mut rng).unwrap();
        assert_eq!(outcome.kind, StepKind::Steal);
        assert_eq!(outcome.turn, 1);
        assert_eq!(game.state.turn, 1);
        assert!(outcome.events.is_empty());
        assert!(outcome.reveal.is_none());
        assert_eq!(game.state.bases, bases);
        assert_eq!(game.state.outs, 1);
        assert_eq!(outcome.pending, PendingStep::AtBat { pitcher: true, batter: true });
    }

    #[test]
    fn test_double_steal_throw_to_second() {
        let mut game = game_at(3, Half::Top, 0);
        game.state.bases.place(Base::First, runner(901, 15));
        game.state.bases.place(Base::Second, runner(902, 15));
        let mut rng = ScriptedRolls::new([]);

        game.initiate_steal(sends(&[(Base::First, true), (Base::Second, true)]), &mut rng).unwrap();
        rng.push(15);
        let outcome = game.submit_throw(ThrowChoice::Throw(Base::Second), &mut rng).unwrap();

        assert_eq!(rng.consumed(), 1);
        let throw = outcome.play.as_ref().and_then(|p| p.throw).unwrap();
        assert_eq!(throw.runner, CardId(901));
        assert_eq!(game.state.bases.get(Base::Third).map(|r| r.card_id), Some(CardId(902)));
        assert_eq!(game.state.bases.get(Base::Second).map(|r| r.card_id), Some(CardId(901)));
        assert_eq!(game.state.outs, 0);
    }

    #[test]
    fn test_out_of_order_rejected_without_mutation() {
        let mut game = game_at(2, Half::Top, 1);
        let mut rng = ScriptedRolls::new([]);
        let before = game.clone();

        // No play pending
        let err = game.submit_throw(ThrowChoice::NoThrow, &mut rng).unwrap_err();
        assert!(matches!(err, RuleError::OutOfOrder { .. }));
        assert_eq!(game, before);

        // Offense cannot pitch
        let err = game.apply(Side::Away, &Decision::Pitch(PitcherAction::Pitch), &mut rng).unwrap_err();
        assert_eq!(err, RuleError::OutOfOrder { expected: PendingStep::AtBat { pitcher: true, batter: true } });
        assert_eq!(game, before);

        // Duplicate decision
        game.submit_batter_action(BatterAction::Swing, &mut rng).unwrap();
        let recorded = game.clone();
        assert!(game.submit_batter_action(BatterAction::Bunt, &mut rng).is_err());
        assert_eq!(game, recorded);

        // No steals or substitutions once the at-bat is under way
        assert!(game.initiate_steal(BTreeMap::new(), &mut rng).is_err());
        assert!(game.substitute(Side::Away, CardId(120), CardId(102), &mut rng).is_err());
        assert_eq!(game, recorded);
    }

    #[test]
    fn test_walk_off_single() {
        let mut game = game_at(9, Half::Bottom, 1);
        game.state.bases.place(Base::Third, runner(903, 15));
        // 1 + 3 <= 8: batter's chart; 15 is a single
        let mut rng = ScriptedRolls::new([1, 15]);

        let outcome = swing(&mut game, &mut rng);
        assert!(outcome.game_over);
        assert_eq!(game.state.phase, GamePhase::Completed);
        assert_eq!(game.state.winner, Some(Side::Home));
        assert_eq!(game.state.home_score, 1);
        assert!(game.state.current_play.is_none());
        assert_eq!(
            messages(&outcome),
            vec!["Batter 201 hits a SINGLE! R903 scores!", "HOME TEAM WINS! WALK-OFF!"]
        );

        let err = game.submit_pitcher_action(PitcherAction::Pitch, &mut rng).unwrap_err();
        assert_eq!(err, RuleError::GameOver);
    }

    #[test]
    fn test_game_ends_after_top_with_home_ahead() {
        let mut game = game_at(9, Half::Top, 2);
        game.state.home_score = 2;
        let mut rng = ScriptedRolls::new([10, 5]);

        let outcome = swing(&mut game, &mut rng);
        assert!(outcome.game_over);
        assert_eq!(game.state.winner, Some(Side::Home));
        assert_eq!(
            messages(&outcome),
            vec!["Batter 101 strikes out. Outs: 3", "That's the ballgame! Final Score: Away 0, Home 2."]
        );
    }

    #[test]
    fn test_tie_goes_to_extra_innings() {
        let mut game = game_at(9, Half::Bottom, 2);
        let mut rng = ScriptedRolls::new([10, 5]);

        let outcome = swing(&mut game, &mut rng);
        assert!(!outcome.game_over);
        assert_eq!(game.state.phase, GamePhase::BetweenHalfInnings);

        let next = game.submit_pitcher_action(PitcherAction::Pitch, &mut rng).unwrap();
        assert_eq!(messages(&next), vec!["Top of the 10th."]);
        assert_eq!((game.state.inning, game.state.half), (10, Half::Top));
    }

    #[test]
    fn test_intentional_walk_forces_runner() {
        let mut game = game_at(4, Half::Top, 0);
        game.state.bases.place(Base::First, runner(901, 15));
        let mut rng = ScriptedRolls::new([]);

        let outcome = game.submit_pitcher_action(PitcherAction::IntentionalWalk, &mut rng).unwrap();
        assert_eq!(outcome.kind, StepKind::AtBat);
        assert_eq!(rng.consumed(), 0);
        assert_eq!(messages(&outcome), vec!["Batter 101 is intentionally walked."]);
        assert_eq!(game.state.bases.get(Base::Second).map(|r| r.card_id), Some(CardId(901)));
        assert_eq!(game.state.bases.get(Base::First).map(|r| r.card_id), Some(CardId(101)));
    }

    #[test]
    fn test_double_play_and_fielders_choice() {
        // Ground ball to first, clean, then the turn: 15 + 4 > 15
        let mut game = game_at(2, Half::Top, 0);
        game.state.bases.place(Base::First, runner(901, 15));
        let mut rng = ScriptedRolls::new([10, 10, 0, 10, 15]);
        let outcome = swing(&mut game, &mut rng);
        assert_eq!(messages(&outcome), vec!["Batter 101 grounds into a double play. Outs: 2"]);
        assert_eq!(game.state.outs, 2);
        assert!(game.state.bases.is_empty());

        // 5 + 4 is not enough: lead runner forced at second
        let mut game = game_at(2, Half::Top, 0);
        game.state.bases.place(Base::First, runner(901, 15));
        let mut rng = ScriptedRolls::new([10, 10, 0, 10, 5]);
        let outcome = swing(&mut game, &mut rng);
        assert_eq!(
            messages(&outcome),
            vec!["Batter 101 hits into a fielder's choice. R901 is out at 2nd. Outs: 1"]
        );
        assert_eq!(game.state.bases.get(Base::First).map(|r| r.card_id), Some(CardId(101)));
        assert_eq!(game.state.bases.count(), 1);
    }

    #[test]
    fn test_bunt_with_bases_loaded() {
        let mut game = game_at(5, Half::Top, 0);
        game.state.bases.place(Base::First, runner(901, 15));
        game.state.bases.place(Base::Second, runner(902, 15));
        game.state.bases.place(Base::Third, runner(903, 15));
        let mut rng = ScriptedRolls::new([10]);

        game.submit_pitcher_action(PitcherAction::Pitch, &mut rng).unwrap();
        let outcome = game.submit_batter_action(BatterAction::Bunt, &mut rng).unwrap();

        assert_eq!(
            messages(&outcome),
            vec!["Batter 101 lays down a sacrifice bunt. R903 is forced out at home. Outs: 1"]
        );
        assert_eq!(game.state.away_score, 0);
        assert_eq!(game.state.bases.get(Base::Third).map(|r| r.card_id), Some(CardId(902)));
        assert_eq!(game.state.bases.get(Base::Second).map(|r| r.card_id), Some(CardId(901)));
        assert_eq!(game.state.bases.get(Base::First).map(|r| r.card_id), Some(CardId(101)));
    }

    #[test]
    fn test_home_run_charged_to_pitcher() {
        let mut game = game_at(3, Half::Top, 0);
        game.state.bases.place(Base::First, runner(901, 15));
        let mut rng = ScriptedRolls::new([1, 20]);

        let outcome = swing(&mut game, &mut rng);
        assert_eq!(messages(&outcome), vec!["Batter 101 hits a HOME RUN! R901 scores!"]);
        assert_eq!(game.state.away_score, 2);
        assert_eq!(game.state.pitcher_stats[&CardId(250)].runs_allowed, 2);
        assert!(game.state.bases.is_empty());
    }

    #[test]
    fn test_single_opens_extra_base_play() {
        let mut game = game_at(3, Half::Top, 0);
        game.state.bases.place(Base::Second, runner(902, 15));
        let mut rng = ScriptedRolls::new([1, 15]);

        let outcome = swing(&mut game, &mut rng);
        assert_eq!(outcome.pending, PendingStep::Offense(AdvanceKind::ExtraBase));
        assert_eq!(game.state.bases.get(Base::Third).map(|r| r.card_id), Some(CardId(902)));
        // Nothing to show until the play resolves
        assert!(outcome.reveal.is_none());

        // Holding him resolves with no throw; the at-bat line is revealed once
        let outcome = game.submit_runner_decisions(BTreeMap::new(), &mut rng).unwrap();
        assert_eq!(outcome.kind, StepKind::Baserunning);
        assert_eq!(messages(&outcome), vec!["Batter 101 hits a SINGLE! R902 holds at 3rd."]);
        assert_eq!(
            outcome.reveal.as_ref().map(|r| r.message.as_str()),
            Some("Batter 101 hits a SINGLE! R902 holds at 3rd.")
        );
        assert_eq!(game.state.turn, 2);
        assert_eq!(game.state.away_score, 0);
    }

    #[test]
    fn test_single_plus_batter_takes_second_once_it_clears() {
        let mut game = game_at(3, Half::Top, 0);
        game.away.lineup.batting_order[0].card.chart = Chart::from_frequencies(&[(Outcome::SinglePlus, 20)]);
        game.state.bases.place(Base::First, runner(901, 15));
        let mut rng = ScriptedRolls::new([1, 10]);

        // Second is taken, so the batter stops at first for now
        let outcome = swing(&mut game, &mut rng);
        assert_eq!(outcome.pending, PendingStep::Offense(AdvanceKind::ExtraBase));
        assert_eq!(game.state.bases.get(Base::First).map(|r| r.card_id), Some(CardId(101)));
        assert_eq!(game.state.bases.get(Base::Second).map(|r| r.card_id), Some(CardId(901)));

        game.submit_runner_decisions(sends(&[(Base::Second, true)]), &mut rng).unwrap();
        let outcome = game.submit_throw(ThrowChoice::NoThrow, &mut rng).unwrap();
        assert_eq!(
            messages(&outcome),
            vec!["Batter 101 hits a SINGLE! R901 advances to 3rd. Batter 101 takes 2nd without a throw!"]
        );
        assert_eq!(game.state.bases.get(Base::Third).map(|r| r.card_id), Some(CardId(901)));
        assert_eq!(game.state.bases.get(Base::Second).map(|r| r.card_id), Some(CardId(101)));
        assert!(!game.state.bases.is_occupied(Base::First));
    }

    /// Runners on first and third, infield drawn in, grounder to first.
    fn infield_in_grounder() -> (Game, ScriptedRolls) {
        let mut game = game_at(4, Half::Top, 0);
        game.state.bases.place(Base::Third, runner(903, 15));
        game.state.bases.place(Base::First, runner(901, 15));
        let mut rng = ScriptedRolls::new([10, 10, 0, 10]);

        game.submit_pitcher_action(PitcherAction::InfieldIn, &mut rng).unwrap();
        let outcome = game.submit_batter_action(BatterAction::Swing, &mut rng).unwrap();
        assert_eq!(outcome.kind, StepKind::AtBat);
        assert_eq!(outcome.pending, PendingStep::Offense(AdvanceKind::InfieldIn));
        assert!(outcome.events.is_empty());
        assert!(outcome.reveal.is_none());
        assert_eq!(game.state.outs, 0);
        assert!(!game.state.bases.get(Base::First).is_some_and(|r| r.card_id == CardId(101)));
        (game, rng)
    }

    #[test]
    fn test_infield_in_runner_sent_home_safe() {
        let (mut game, mut rng) = infield_in_grounder();

        // Target 21 + 4 - 15 = 10
        rng.push(12);
        let outcome = game.submit_runner_decisions(sends(&[(Base::Third, true)]), &mut rng).unwrap();
        assert_eq!(outcome.kind, StepKind::Baserunning);
        assert_eq!(
            messages(&outcome),
            vec![
                "Batter 101 hits a ground ball with the infield in... R903 is SENT HOME... SAFE! \
                 R901 advances to 2nd. Batter 101 reaches on a fielder's choice."
            ]
        );
        let throw = outcome.play.as_ref().and_then(|p| p.throw).unwrap();
        assert_eq!((throw.base, throw.target, throw.safe), (Base::Home, 10, true));
        assert_eq!(game.state.away_score, 1);
        assert_eq!(game.state.outs, 0);
        assert_eq!(game.state.bases.get(Base::First).map(|r| r.card_id), Some(CardId(101)));
        assert_eq!(game.state.bases.get(Base::Second).map(|r| r.card_id), Some(CardId(901)));
        assert_eq!(game.state.turn, 2);
    }

    #[test]
    fn test_infield_in_runner_thrown_out_at_plate() {
        let (mut game, mut rng) = infield_in_grounder();

        rng.push(3);
        let outcome = game.submit_runner_decisions(sends(&[(Base::Third, true)]), &mut rng).unwrap();
        assert_eq!(
            messages(&outcome),
            vec![
                "Batter 101 hits a ground ball with the infield in... R903 is THROWN OUT at the plate! \
                 R901 advances to 2nd. Batter 101 reaches on a fielder's choice. Outs: 1"
            ]
        );
        assert_eq!(game.state.away_score, 0);
        assert_eq!(game.state.outs, 1);
        assert!(!game.state.bases.is_occupied(Base::Third));
        assert_eq!(game.state.bases.count(), 2);
    }

    #[test]
    fn test_infield_in_runner_holds() {
        let (mut game, mut rng) = infield_in_grounder();

        let outcome = game.submit_runner_decisions(BTreeMap::new(), &mut rng).unwrap();
        assert_eq!(rng.consumed(), 4);
        assert_eq!(
            messages(&outcome),
            vec![
                "Batter 101 hits a ground ball with the infield in... Batter 101 is out at 1st. \
                 R903 holds at 3rd. R901 advances to 2nd. Outs: 1"
            ]
        );
        assert_eq!(game.state.outs, 1);
        assert_eq!(game.state.bases.get(Base::Third).map(|r| r.card_id), Some(CardId(903)));
        assert_eq!(game.state.bases.get(Base::Second).map(|r| r.card_id), Some(CardId(901)));
        assert!(!game.state.bases.is_occupied(Base::First));
        assert_eq!(game.state.pitcher_stats[&CardId(250)].outs_recorded, 1);
    }

    #[test]
    fn test_infield_in_without_runner_on_third_holds_runners() {
        let mut game = game_at(4, Half::Top, 0);
        game.state.bases.place(Base::Second, runner(902, 15));
        let mut rng = ScriptedRolls::new([10, 10, 0, 10]);

        game.submit_pitcher_action(PitcherAction::InfieldIn, &mut rng).unwrap();
        let outcome = game.submit_batter_action(BatterAction::Swing, &mut rng).unwrap();
        assert_eq!(messages(&outcome), vec!["Batter 101 grounds out. Outs: 1"]);
        assert_eq!(game.state.bases.get(Base::Second).map(|r| r.card_id), Some(CardId(902)));
        assert!(game.state.current_play.is_none());
    }

    #[test]
    fn test_position_swap_changes_defense() {
        let mut game = game_at(2, Half::Top, 0);
        let mut rng = ScriptedRolls::new([]);
        assert_eq!(game.defense().infield, 4);

        let outcome = game.swap_positions(Side::Home, CardId(203), CardId(202), &mut rng).unwrap();
        assert_eq!(outcome.kind, StepKind::PositionSwap);
        assert_eq!(
            messages(&outcome),
            vec!["Home swaps positions: Batter 203 moves to SS, Batter 202 moves to 1B."]
        );
        assert!(outcome.reveal.is_none());
        assert_eq!(game.state.turn, 1);

        // Shortstop at first is out of position; first baseman at short is unrated
        let defense = game.defense();
        assert_eq!(defense.rating_at(Position::FirstBase), -1);
        assert_eq!(defense.rating_at(Position::Shortstop), 0);
        assert_eq!(defense.infield, 1);

        // Bad swaps change nothing
        let before = game.clone();
        let err = game.swap_positions(Side::Home, CardId(203), CardId(299), &mut rng).unwrap_err();
        assert!(matches!(err, RuleError::InvalidDecision(_)));
        assert_eq!(game, before);

        // Not once an at-bat is under way
        game.submit_pitcher_action(PitcherAction::Pitch, &mut rng).unwrap();
        let err = game.swap_positions(Side::Home, CardId(203), CardId(202), &mut rng).unwrap_err();
        assert!(matches!(err, RuleError::OutOfOrder { .. }));
    }

    #[test]
    fn test_substitution_between_plays() {
        let mut game = game_at(2, Half::Top, 0);
        let mut rng = ScriptedRolls::new([]);
        let before = game.clone();

        // Starter is locked in
        let refused = game.substitute(Side::Home, CardId(260), CardId(250), &mut rng).unwrap();
        assert_eq!(refused.kind, StepKind::Refused(IneligibleReason::StarterLocked));
        assert_eq!(game, before);
        assert!(!game.eligibility(Side::Home, CardId(260), CardId(250)).eligible);

        // Bench shortstop hits for the shortstop due up
        game.state.away.batting_index = 1;
        let outcome = game.substitute(Side::Away, CardId(120), CardId(102), &mut rng).unwrap();
        assert!(matches!(outcome.kind, StepKind::Substitution(ref sub) if sub.incoming == CardId(120)));
        assert_eq!(messages(&outcome), vec!["Away brings in Batter 120 to pinch hit for Batter 102."]);
        assert!(outcome.reveal.is_none());
        assert_eq!(game.state.turn, 1);
        assert_eq!(game.batter_up().id, CardId(120));
    }

    // -------------------------------------------------------------------------
    // Whole games
    // -------------------------------------------------------------------------

    /// Sends each candidate at random without ever blocking a runner.
    fn pick_sends(candidates: &[Base], bases: &crate::game::state::Bases, pick: &mut StdRng) -> BTreeMap<Base, bool> {
        let mut sent = BTreeMap::new();
        for &from in candidates {
            let clear = match from.next() {
                Some(Base::Home) => true,
                Some(to) => !bases.is_occupied(to) || sent.get(&to).copied().unwrap_or(false),
                None => false,
            };
            sent.insert(from, clear && pick.gen_bool(0.5));
        }
        sent
    }

    /// A plausible decision for whoever is due to act.
    fn choose(game: &Game, pick: &mut StdRng) -> DecisionRecord {
        let batting = game.state.batting_side();
        let fielding = game.state.fielding_side();
        let (side, decision) = match game.pending() {
            PendingStep::NextHalf => (batting, Decision::Pitch(PitcherAction::Pitch)),
            PendingStep::AtBat { pitcher: true, batter: true } => {
                let candidates = steal_candidates(&game.state.bases);
                if !candidates.is_empty() && pick.gen_bool(0.1) {
                    (batting, Decision::Steal(pick_sends(&candidates, &game.state.bases, pick)))
                } else if game.state.inning >= 6 && pick.gen_bool(0.05) {
                    let outgoing = game.team(fielding).lineup.pitcher.id;
                    match game.substitution_options(fielding, outgoing).first() {
                        Some(incoming) => (fielding, Decision::Substitute { incoming: *incoming, outgoing }),
                        None => (fielding, Decision::Pitch(PitcherAction::Pitch)),
                    }
                } else if pick.gen_bool(0.05) {
                    (fielding, Decision::Pitch(PitcherAction::IntentionalWalk))
                } else if game.state.bases.is_occupied(Base::Third) && pick.gen_bool(0.4) {
                    (fielding, Decision::Pitch(PitcherAction::InfieldIn))
                } else {
                    (fielding, Decision::Pitch(PitcherAction::Pitch))
                }
            }
            PendingStep::AtBat { pitcher: true, .. } => (fielding, Decision::Pitch(PitcherAction::Pitch)),
            PendingStep::AtBat { .. } => {
                let action = if pick.gen_bool(0.08) { BatterAction::Bunt } else { BatterAction::Swing };
                (batting, Decision::Bat(action))
            }
            PendingStep::Offense(_) => {
                let candidates = game.state.current_play.play().map(|p| p.candidates.clone()).unwrap_or_default();
                (batting, Decision::SendRunners(pick_sends(&candidates, &game.state.bases, pick)))
            }
            PendingStep::Defense(_) => {
                let sent = game.state.current_play.play().map(|p| p.sent_bases()).unwrap_or_default();
                let choice = match sent.first().and_then(|b| b.next()) {
                    Some(target) if pick.gen_bool(0.7) => ThrowChoice::Throw(target),
                    _ => ThrowChoice::NoThrow,
                };
                (fielding, Decision::Throw(choice))
            }
            PendingStep::GameOver => unreachable!("game already over"),
        };
        DecisionRecord { side, decision }
    }

    /// Play to completion; returns the decision log.
    fn play_out(game: &mut Game, pick_seed: u64) -> Vec<DecisionRecord> {
        let mut pick = StdRng::seed_from_u64(pick_seed);
        let mut rng = DeterministicRng::new(game.state.seed);
        let mut log = Vec::new();

        for _ in 0..20_000 {
            if game.state.is_over() {
                break;
            }
            let record = choose(game, &mut pick);
            game.apply(record.side, &record.decision, &mut rng).unwrap();
            assert!(game.state.outs <= 3);
            if game.state.outs == 3 {
                assert!(matches!(game.state.phase, GamePhase::BetweenHalfInnings | GamePhase::Completed));
            }
            log.push(record);
        }
        log
    }

    #[test]
    fn test_full_games_complete_and_replay() {
        for pick_seed in 0..12 {
            let mut game = game();
            let log = play_out(&mut game, pick_seed);

            assert!(game.state.is_over(), "seed {pick_seed} never finished");
            assert!(game.state.inning >= 9);
            assert_ne!(game.state.home_score, game.state.away_score);
            let winner = if game.state.home_score > game.state.away_score { Side::Home } else { Side::Away };
            assert_eq!(game.state.winner, Some(winner));

            // Same seed and decisions give the same game
            let mut replay = super::tests::game();
            let mut rng = DeterministicRng::new(replay.state.seed);
            for record in &log {
                replay.apply(record.side, &record.decision, &mut rng).unwrap();
            }
            assert_eq!(replay.state.compute_hash(), game.state.compute_hash());
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn test_outs_never_exceed_three(seed in any::<u64>(), pick_seed in any::<u64>()) {
            let mut game = game();
            game.state.seed = seed;
            let mut pick = StdRng::seed_from_u64(pick_seed);
            let mut rng = DeterministicRng::new(seed);

            for _ in 0..400 {
                if game.state.is_over() {
                    break;
                }
                let outs_before = game.state.outs;
                let half_before = (game.state.inning, game.state.half);
                let record = choose(&game, &mut pick);
                let outcome = game.apply(record.side, &record.decision, &mut rng).unwrap();

                prop_assert!(game.state.outs <= 3);
                if game.state.outs == 3 {
                    prop_assert!(outcome.pending == PendingStep::NextHalf || outcome.game_over);
                }
                if (game.state.inning, game.state.half) == half_before && game.state.outs < outs_before {
                    prop_assert!(false, "outs went backwards within a half");
                }
            }
        }
    }

    #[test]
    fn test_repeated_decision_is_rejected() {
        let mut game = game_at(1, Half::Top, 0);
        let mut rng = ScriptedRolls::new([10, 5]);
        swing(&mut game, &mut rng);
        let resolved = game.clone();

        // A repeated swing counts toward the next at-bat once, then is refused
        let next = game.submit_batter_action(BatterAction::Swing, &mut rng).unwrap();
        assert_eq!(next.pending, PendingStep::AtBat { pitcher: true, batter: false });
        let err = game.submit_batter_action(BatterAction::Swing, &mut rng).unwrap_err();
        assert!(matches!(err, RuleError::OutOfOrder { .. }));
        assert_ne!(game, resolved);
    }
}
