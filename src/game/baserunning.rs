//! Baserunning Decision Protocol
//!
//! Steals, tag-ups and extra-base attempts share one negotiation:
//!
//! ```text
//! IDLE -> AWAITING_OFFENSE -> AWAITING_DEFENSE -> RESOLVED -> IDLE
//! ```
//!
//! The offense marks which eligible runners are sent. Nobody sent resolves
//! as a no-op; a single runner fast enough to be automatic advances without a
//! throw. Anything else waits for the defense, which may throw at one target
//! base. Only the runner heading there is contested; every other sent runner
//! advances freely.
//!
//! Runners are keyed by the base they stand on now. Each tries for the next
//! base.
//!
//! A ground ball into a drawn-in infield skips the throw step: the offense
//! sends the runner on third or holds him, and a send is contested at the
//! plate at once.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::config::RulesConfig;
use crate::core::hash::StateHasher;
use crate::core::rng::RandomSource;
use crate::game::card::CardId;
use crate::game::fielding::{auto_hold, AdvanceKind, DefensiveAlignment};
use crate::game::state::{Base, Bases, GameState, Runner};

// =============================================================================
// PLAY STATE
// =============================================================================

/// Step the protocol is waiting on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProtocolStage {
    /// Offense decides who runs
    AwaitingOffense = 0,
    /// Defense decides where to throw
    AwaitingDefense = 1,
}

/// An outstanding baserunning decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaserunningPlay {
    /// Pending step
    pub stage: ProtocolStage,
    /// Bases of runners who may go, lead runner first
    pub candidates: Vec<Base>,
    /// Offense's decision per candidate
    pub sent: BTreeMap<Base, bool>,
    /// Defense's throw target, once chosen
    pub throw_target: Option<Base>,
    /// Play-by-play of the at-bat that opened the play
    pub lead_in: Option<String>,
    /// Batter whose base depends on the play
    #[serde(default)]
    pub batter: Option<Runner>,
}

impl BaserunningPlay {
    /// Open a play awaiting the offense.
    pub fn new(mut candidates: Vec<Base>, lead_in: Option<String>) -> Self {
        candidates.sort_by(|a, b| b.cmp(a));
        candidates.dedup();
        Self {
            stage: ProtocolStage::AwaitingOffense,
            candidates,
            sent: BTreeMap::new(),
            throw_target: None,
            lead_in,
            batter: None,
        }
    }

    /// Attach the batter the play decides for.
    pub fn with_batter(mut self, batter: Runner) -> Self {
        self.batter = Some(batter);
        self
    }

    /// Bases of sent runners, lead runner first.
    pub fn sent_bases(&self) -> Vec<Base> {
        self.candidates
            .iter()
            .copied()
            .filter(|b| self.is_sent(*b))
            .collect()
    }

    /// Was the runner on this base sent?
    pub fn is_sent(&self, base: Base) -> bool {
        self.sent.get(&base).copied().unwrap_or(false)
    }

    fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u8(self.stage as u8);
        hasher.update_u32(self.candidates.len() as u32);
        for base in &self.candidates {
            hasher.update_u8(base.number());
            hasher.update_bool(self.is_sent(*base));
        }
        hasher.update_opt_i32(self.throw_target.map(|b| b.number() as i32));
        hasher.update_str(self.lead_in.as_deref().unwrap_or(""));
        hasher.update_opt_i32(self.batter.as_ref().map(|r| r.card_id.0));
    }
}

/// Secondary decision attached to the game while one is outstanding.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurrentPlay {
    /// Nothing pending
    #[default]
    None,
    /// Runners stealing
    StealAttempt(BaserunningPlay),
    /// Runners tagging up after a caught fly
    TagUp(BaserunningPlay),
    /// Runners trying for an extra base on a hit
    ExtraBase(BaserunningPlay),
    /// Runner on third deciding whether to go on a grounder to a drawn-in infield
    InfieldIn(BaserunningPlay),
}

impl CurrentPlay {
    /// Wrap a play of the given kind.
    pub fn open(kind: AdvanceKind, play: BaserunningPlay) -> Self {
        match kind {
            AdvanceKind::Steal => CurrentPlay::StealAttempt(play),
            AdvanceKind::TagUp => CurrentPlay::TagUp(play),
            AdvanceKind::ExtraBase => CurrentPlay::ExtraBase(play),
            AdvanceKind::InfieldIn => CurrentPlay::InfieldIn(play),
        }
    }

    /// Nothing pending?
    pub fn is_none(&self) -> bool {
        matches!(self, CurrentPlay::None)
    }

    /// Kind of advance in progress.
    pub fn kind(&self) -> Option<AdvanceKind> {
        match self {
            CurrentPlay::None => None,
            CurrentPlay::StealAttempt(_) => Some(AdvanceKind::Steal),
            CurrentPlay::TagUp(_) => Some(AdvanceKind::TagUp),
            CurrentPlay::ExtraBase(_) => Some(AdvanceKind::ExtraBase),
            CurrentPlay::InfieldIn(_) => Some(AdvanceKind::InfieldIn),
        }
    }

    /// The outstanding play.
    pub fn play(&self) -> Option<&BaserunningPlay> {
        match self {
            CurrentPlay::None => None,
            CurrentPlay::StealAttempt(play)
            | CurrentPlay::TagUp(play)
            | CurrentPlay::ExtraBase(play)
            | CurrentPlay::InfieldIn(play) => Some(play),
        }
    }

    /// The outstanding play, mutably.
    pub fn play_mut(&mut self) -> Option<&mut BaserunningPlay> {
        match self {
            CurrentPlay::None => None,
            CurrentPlay::StealAttempt(play)
            | CurrentPlay::TagUp(play)
            | CurrentPlay::ExtraBase(play)
            | CurrentPlay::InfieldIn(play) => Some(play),
        }
    }

    /// Pending protocol step.
    pub fn stage(&self) -> Option<ProtocolStage> {
        self.play().map(|p| p.stage)
    }

    /// Hash the pending play into the state hash.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        match self {
            CurrentPlay::None => hasher.update_u8(0),
            CurrentPlay::StealAttempt(play) => {
                hasher.update_u8(1);
                play.hash_into(hasher);
            }
            CurrentPlay::TagUp(play) => {
                hasher.update_u8(2);
                play.hash_into(hasher);
            }
            CurrentPlay::ExtraBase(play) => {
                hasher.update_u8(3);
                play.hash_into(hasher);
            }
            CurrentPlay::InfieldIn(play) => {
                hasher.update_u8(4);
                play.hash_into(hasher);
            }
        }
    }
}

/// Defense's response to sent runners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThrowChoice {
    /// Throw to this base
    Throw(Base),
    /// Concede every advance
    NoThrow,
}

/// Rejected baserunning decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// No eligible runner stands on the base.
    #[error("no runner on {0} may advance on this play")]
    NotACandidate(Base),

    /// Runner cannot go because the base ahead stays occupied.
    #[error("runner on {0} is blocked by a runner who is holding")]
    Blocked(Base),

    /// Throw nominated at a base no sent runner is heading to.
    #[error("no sent runner is heading to {0}")]
    NoRunnerToThrowAt(Base),
}

// =============================================================================
// RESOLUTION
// =============================================================================

/// What happened to one runner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fate {
    /// Stayed put
    Held,
    /// Advanced without a throw being possible
    Automatic,
    /// Sent, not thrown at
    Uncontested,
    /// Thrown at, safe
    Safe,
    /// Thrown at, out
    Out,
}

/// One runner's part in a resolved play.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerFate {
    /// Runner
    pub runner: Runner,
    /// Base he started on
    pub from: Base,
    /// Base he tried for
    pub to: Base,
    /// Result
    pub fate: Fate,
}

/// The contested throw, when one was made.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrowRoll {
    /// Base thrown to
    pub base: Base,
    /// Runner thrown at
    pub runner: CardId,
    /// Contest roll
    pub roll: u32,
    /// Lowest safe roll
    pub target: i32,
    /// Was the runner safe?
    pub safe: bool,
}

/// A fully decided play, ready to apply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayResolution {
    /// Kind of advance
    pub kind: AdvanceKind,
    /// Play-by-play of the at-bat that opened the play
    pub lead_in: Option<String>,
    /// Runner fates, lead runner first
    pub fates: Vec<RunnerFate>,
    /// Contested throw
    pub throw: Option<ThrowRoll>,
    /// Batter whose base depends on the play
    #[serde(default)]
    pub batter: Option<Runner>,
}

/// Effect of applying a play.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedPlay {
    /// Combined play-by-play
    pub message: String,
    /// Outs recorded
    pub outs_added: u8,
    /// Runs scored
    pub runs: u32,
}

impl PlayResolution {
    /// Move runners, record outs and score runs.
    ///
    /// Fates are applied lead runner first; once the third out is recorded
    /// the remaining runners are left where they stand.
    ///
    /// A held runner on a drawn-in grounder leaves the batter out at first;
    /// a sent one lets him reach. After an extra-base play a 1B+ batter
    /// still takes second if it came open.
    pub fn apply(&self, state: &mut GameState) -> AppliedPlay {
        let outs_before = state.outs;
        let side = state.batting_side();
        let runs_before = state.score(side);
        let mut lines: Vec<String> = self.lead_in.iter().cloned().collect();

        let grounder_batter = self.batter.as_ref().filter(|_| self.kind == AdvanceKind::InfieldIn);
        let sent_home = self.fates.iter().any(|f| f.to == Base::Home && f.fate != Fate::Held);
        if let Some(batter) = grounder_batter.filter(|_| !sent_home) {
            state.record_out();
            lines.push(format!("{} is out at 1st.", batter.name));
        }

        for fate in &self.fates {
            if state.outs >= 3 {
                break;
            }
            let name = &fate.runner.name;
            match fate.fate {
                Fate::Held => {
                    if self.kind != AdvanceKind::Steal {
                        lines.push(format!("{name} holds at {}.", fate.from));
                    }
                }
                Fate::Out => {
                    state.bases.take(fate.from);
                    state.record_out();
                    lines.push(fate_line(self.kind, fate));
                }
                Fate::Automatic | Fate::Uncontested | Fate::Safe => {
                    if fate.to != Base::Home && state.bases.is_occupied(fate.to) {
                        lines.push(format!("{name} holds at {}.", fate.from));
                        continue;
                    }
                    if let Some(runner) = state.bases.take(fate.from) {
                        if fate.to == Base::Home {
                            state.score_runner(&runner);
                        } else {
                            state.bases.place(fate.to, runner);
                        }
                        lines.push(fate_line(self.kind, fate));
                    }
                }
            }
        }

        if state.outs < 3 {
            if let Some(batter) = grounder_batter.filter(|_| sent_home) {
                state.bases.place(Base::First, batter.clone());
                lines.push(format!("{} reaches on a fielder's choice.", batter.name));
            }
            if self.kind == AdvanceKind::ExtraBase {
                self.batter_takes_open_second(state, &mut lines);
            }
        }

        AppliedPlay {
            message: lines.join(" "),
            outs_added: state.outs - outs_before,
            runs: state.score(side) - runs_before,
        }
    }

    fn batter_takes_open_second(&self, state: &mut GameState, lines: &mut Vec<String>) {
        let Some(batter) = &self.batter else {
            return;
        };
        let on_first = state.bases.get(Base::First).is_some_and(|r| r.card_id == batter.card_id);
        if !on_first || state.bases.is_occupied(Base::Second) {
            return;
        }
        if let Some(runner) = state.bases.take(Base::First) {
            lines.push(format!("{} takes {} without a throw!", runner.name, Base::Second));
            state.bases.place(Base::Second, runner);
        }
    }
}

fn fate_line(kind: AdvanceKind, fate: &RunnerFate) -> String {
    let name = &fate.runner.name;
    let to = fate.to;
    let home = to == Base::Home;
    match (kind, fate.fate) {
        (_, Fate::Held) => format!("{name} holds at {}.", fate.from),

        (AdvanceKind::Steal, Fate::Automatic) => format!("{name} steals {to} without a throw."),
        (AdvanceKind::Steal, Fate::Uncontested) => format!("{name} steals {to}."),
        (AdvanceKind::Steal, Fate::Safe) => format!("{name} takes off for {to}... SAFE!"),
        (AdvanceKind::Steal, Fate::Out) => format!("{name} takes off for {to}... CAUGHT STEALING!"),

        (AdvanceKind::TagUp, Fate::Automatic) if home => {
            format!("{name} tags up and scores without a throw.")
        }
        (AdvanceKind::TagUp, Fate::Automatic) => {
            format!("{name} tags up and advances to {to} without a throw.")
        }
        (AdvanceKind::TagUp, Fate::Uncontested) if home => format!("{name} tags up and scores."),
        (AdvanceKind::ExtraBase, Fate::Automatic) if home => format!("{name} scores without a throw!"),
        (AdvanceKind::ExtraBase, Fate::Automatic) => format!("{name} takes {to} without a throw!"),
        (AdvanceKind::ExtraBase, Fate::Uncontested) if home => format!("{name} scores."),
        (AdvanceKind::InfieldIn, Fate::Automatic) | (_, Fate::Uncontested) => format!("{name} advances to {to}."),

        (AdvanceKind::InfieldIn, Fate::Safe) => format!("{name} is SENT HOME... SAFE!"),
        (AdvanceKind::InfieldIn, Fate::Out) => format!("{name} is THROWN OUT at the plate!"),

        (_, Fate::Safe) => format!("{name} is SAFE at {to}!"),
        (_, Fate::Out) => format!("{name} is THROWN OUT at {to}!"),
    }
}

// =============================================================================
// PROTOCOL STEPS
// =============================================================================

/// Runners who may try to steal: home is never stolen.
pub fn steal_candidates(bases: &Bases) -> Vec<Base> {
    [Base::Second, Base::First]
        .into_iter()
        .filter(|b| bases.is_occupied(*b))
        .collect()
}

/// Decision the rules make for a runner without asking anyone.
///
/// `Some(true)` advances, `Some(false)` holds, `None` leaves it to the
/// offense.
pub fn automatic_decision(
    kind: AdvanceKind,
    runner: &Runner,
    target: Base,
    outs: u8,
    defense: &DefensiveAlignment,
    rules: &RulesConfig,
) -> Option<bool> {
    let adjusted = kind.adjusted_speed(runner.speed, target, outs, rules);
    if kind.is_automatic(adjusted, kind.defense(defense), rules) {
        Some(true)
    } else if auto_hold(kind, runner.speed, target) {
        Some(false)
    } else {
        None
    }
}

/// A play opened after an at-bat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Opening {
    /// Every runner's decision was automatic
    Automatic(PlayResolution),
    /// The offense must decide for every candidate
    Pending(BaserunningPlay),
}

/// Open a tag-up or extra-base play.
///
/// When the rules decide every runner, the play resolves on the spot;
/// otherwise the offense is asked about all of them.
pub fn open_play(
    kind: AdvanceKind,
    bases: &Bases,
    play: BaserunningPlay,
    outs: u8,
    defense: &DefensiveAlignment,
    rules: &RulesConfig,
) -> Opening {
    let mut fates = Vec::with_capacity(play.candidates.len());

    for from in play.candidates.clone() {
        let (Some(runner), Some(to)) = (bases.get(from), from.next()) else {
            continue;
        };
        match automatic_decision(kind, runner, to, outs, defense, rules) {
            Some(advance) => fates.push(RunnerFate {
                runner: runner.clone(),
                from,
                to,
                fate: if advance { Fate::Automatic } else { Fate::Held },
            }),
            None => return Opening::Pending(play),
        }
    }

    Opening::Automatic(PlayResolution {
        kind,
        lead_in: play.lead_in,
        fates,
        throw: None,
        batter: play.batter,
    })
}

/// Result of the offense's step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OffenseStep {
    /// Resolved without the defense
    Resolved(PlayResolution),
    /// Waiting for the throw decision
    AwaitingDefense,
}

/// Apply the offense's send decisions.
///
/// Validation happens before the play is touched: on error it is unchanged.
pub fn offense_decision(
    kind: AdvanceKind,
    play: &mut BaserunningPlay,
    sends: &BTreeMap<Base, bool>,
    bases: &Bases,
    outs: u8,
    defense: &DefensiveAlignment,
    rules: &RulesConfig,
) -> Result<OffenseStep, ProtocolError> {
    for base in sends.keys() {
        if !play.candidates.contains(base) || !bases.is_occupied(*base) {
            return Err(ProtocolError::NotACandidate(*base));
        }
    }

    let sent: BTreeMap<Base, bool> = play
        .candidates
        .iter()
        .map(|b| (*b, sends.get(b).copied().unwrap_or(false)))
        .collect();

    for (&from, _) in sent.iter().filter(|(_, go)| **go) {
        let to = from.next().ok_or(ProtocolError::NotACandidate(from))?;
        let ahead_sent = sent.get(&to).copied().unwrap_or(false);
        if to != Base::Home && bases.is_occupied(to) && !ahead_sent {
            return Err(ProtocolError::Blocked(from));
        }
    }

    play.sent = sent;
    let going = play.sent_bases();

    match going.as_slice() {
        [] => Ok(OffenseStep::Resolved(settle(kind, play, bases, Fate::Automatic))),
        [only] => {
            let automatic = match (bases.get(*only), only.next()) {
                (Some(runner), Some(to)) => {
                    let adjusted = kind.adjusted_speed(runner.speed, to, outs, rules);
                    kind.is_automatic(adjusted, kind.defense(defense), rules)
                }
                _ => false,
            };
            if automatic {
                Ok(OffenseStep::Resolved(settle(kind, play, bases, Fate::Automatic)))
            } else {
                play.stage = ProtocolStage::AwaitingDefense;
                Ok(OffenseStep::AwaitingDefense)
            }
        }
        _ => {
            play.stage = ProtocolStage::AwaitingDefense;
            Ok(OffenseStep::AwaitingDefense)
        }
    }
}

/// Apply the defense's throw and roll the contest.
#[allow(clippy::too_many_arguments)]
pub fn defense_response(
    kind: AdvanceKind,
    play: &mut BaserunningPlay,
    choice: ThrowChoice,
    bases: &Bases,
    outs: u8,
    defense: &DefensiveAlignment,
    rules: &RulesConfig,
    rng: &mut dyn RandomSource,
) -> Result<PlayResolution, ProtocolError> {
    let going = play.sent_bases();
    let thrown_at = match choice {
        ThrowChoice::NoThrow => None,
        ThrowChoice::Throw(target) => Some(
            going
                .iter()
                .copied()
                .find(|b| b.next() == Some(target))
                .ok_or(ProtocolError::NoRunnerToThrowAt(target))?,
        ),
    };
    play.throw_target = thrown_at.and_then(Base::next);

    let mut fates = Vec::with_capacity(play.candidates.len());
    let mut throw = None;
    for &from in &play.candidates {
        let (Some(runner), Some(to)) = (bases.get(from), from.next()) else {
            continue;
        };
        let fate = if !play.is_sent(from) {
            Fate::Held
        } else if thrown_at == Some(from) {
            let speed = kind.adjusted_speed(runner.speed, to, outs, rules);
            let target = kind.contest_target(speed, kind.defense(defense), rules);
            let roll = rng.die(rules.die_sides);
            let safe = roll as i32 >= target;

            #[cfg(feature = "debug-tracing")]
            tracing::trace!(?kind, %to, speed, target, roll, safe, "throw");

            throw = Some(ThrowRoll { base: to, runner: runner.card_id, roll, target, safe });
            if safe { Fate::Safe } else { Fate::Out }
        } else {
            Fate::Uncontested
        };
        fates.push(RunnerFate { runner: runner.clone(), from, to, fate });
    }

    Ok(PlayResolution { kind, lead_in: play.lead_in.clone(), fates, throw, batter: play.batter.clone() })
}

/// Offense sends or holds the runner on third on a drawn-in grounder.
///
/// A send is thrown at immediately: safe when speed reaches infield plus the
/// throw. The batter reaches either way and forced runners move up. A hold
/// costs the batter and only lets runners into open bases.
pub fn infield_in_decision(
    play: &mut BaserunningPlay,
    sends: &BTreeMap<Base, bool>,
    bases: &Bases,
    defense: &DefensiveAlignment,
    rules: &RulesConfig,
    rng: &mut dyn RandomSource,
) -> Result<PlayResolution, ProtocolError> {
    let kind = AdvanceKind::InfieldIn;
    for base in sends.keys() {
        if !play.candidates.contains(base) || !bases.is_occupied(*base) {
            return Err(ProtocolError::NotACandidate(*base));
        }
    }
    let Some(lead) = bases.get(Base::Third) else {
        return Err(ProtocolError::NotACandidate(Base::Third));
    };

    let send = sends.get(&Base::Third).copied().unwrap_or(false);
    play.sent = play.candidates.iter().map(|b| (*b, send && *b == Base::Third)).collect();

    let mut fates = Vec::with_capacity(3);
    let mut throw = None;
    if send {
        let target = kind.contest_target(lead.speed, kind.defense(defense), rules);
        let roll = rng.die(rules.die_sides);
        let safe = roll as i32 >= target;

        #[cfg(feature = "debug-tracing")]
        tracing::trace!(speed = lead.speed, infield = defense.infield, target, roll, safe, "infield in");

        play.throw_target = Some(Base::Home);
        throw = Some(ThrowRoll { base: Base::Home, runner: lead.card_id, roll, target, safe });
        let fate = if safe { Fate::Safe } else { Fate::Out };
        fates.push(RunnerFate { runner: lead.clone(), from: Base::Third, to: Base::Home, fate });
    } else {
        fates.push(RunnerFate { runner: lead.clone(), from: Base::Third, to: Base::Home, fate: Fate::Held });
    }

    // Batter reaching forces runners ahead of him; an out at first only
    // frees whatever base is open
    let second_moves = send && bases.is_occupied(Base::First);
    if let Some(runner) = bases.get(Base::Second) {
        let fate = if second_moves { Fate::Automatic } else { Fate::Held };
        fates.push(RunnerFate { runner: runner.clone(), from: Base::Second, to: Base::Third, fate });
    }
    if let Some(runner) = bases.get(Base::First) {
        let fate = if send || !bases.is_occupied(Base::Second) { Fate::Automatic } else { Fate::Held };
        fates.push(RunnerFate { runner: runner.clone(), from: Base::First, to: Base::Second, fate });
    }

    Ok(PlayResolution { kind, lead_in: play.lead_in.clone(), fates, throw, batter: play.batter.clone() })
}

/// Resolve with no throw: sent runners get `sent_fate`, the rest hold.
fn settle(kind: AdvanceKind, play: &BaserunningPlay, bases: &Bases, sent_fate: Fate) -> PlayResolution {
    let fates = play
        .candidates
        .iter()
        .filter_map(|&from| {
            let runner = bases.get(from)?;
            let to = from.next()?;
            let fate = if play.is_sent(from) { sent_fate } else { Fate::Held };
            Some(RunnerFate { runner: runner.clone(), from, to, fate })
        })
        .collect();
    PlayResolution { kind, lead_in: play.lead_in.clone(), fates, throw: None, batter: play.batter.clone() }
}

// =============================================================================
// TESTS
// =============================================================================
