//! Game State Definitions
//!
//! The single authoritative aggregate for one game.
//! Uses BTreeMap/BTreeSet for deterministic iteration order.

use std::collections::{BTreeMap, BTreeSet};
use serde::{Serialize, Deserialize};

use crate::core::hash::{StateHash, StateHasher, compute_state_hash};
use crate::game::atbat::AtBatDecisions;
use crate::game::baserunning::CurrentPlay;
use crate::game::card::{Card, CardId};

// =============================================================================
// GAME ID
// =============================================================================

/// Unique game identifier (UUID).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(pub uuid::Uuid);

impl GameId {
    /// Fresh random id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }

    /// Parse from a UUID string.
    pub fn parse(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(Self)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for GameId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// SIDES, HALVES, BASES
// =============================================================================

/// One of the two participants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Side {
    /// Visiting side, bats in the top half
    Away = 0,
    /// Home side, bats in the bottom half
    Home = 1,
}

impl Side {
    /// The other side.
    pub fn opponent(self) -> Side {
        match self {
            Side::Away => Side::Home,
            Side::Home => Side::Away,
        }
    }

    /// Both sides, away first.
    pub const BOTH: [Side; 2] = [Side::Away, Side::Home];
}

/// Half of an inning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Half {
    /// Away bats
    Top = 0,
    /// Home bats
    Bottom = 1,
}

impl Half {
    /// Side at bat.
    pub fn batting_side(self) -> Side {
        match self {
            Half::Top => Side::Away,
            Half::Bottom => Side::Home,
        }
    }

    /// Side in the field.
    pub fn fielding_side(self) -> Side {
        self.batting_side().opponent()
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Half::Top => "Top",
            Half::Bottom => "Bottom",
        }
    }
}

/// A base a runner can occupy or reach.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Base {
    /// First base
    First = 1,
    /// Second base
    Second = 2,
    /// Third base
    Third = 3,
    /// Home plate
    Home = 4,
}

impl Base {
    /// Bases a runner can stand on.
    pub const OCCUPIABLE: [Base; 3] = [Base::First, Base::Second, Base::Third];

    /// Base number (home is 4).
    pub fn number(self) -> u8 {
        self as u8
    }

    /// From a base number.
    pub fn from_number(n: u8) -> Option<Base> {
        match n {
            1 => Some(Base::First),
            2 => Some(Base::Second),
            3 => Some(Base::Third),
            4 => Some(Base::Home),
            _ => None,
        }
    }

    /// Next base along the basepaths.
    pub fn next(self) -> Option<Base> {
        Base::from_number(self.number() + 1)
    }

    /// `steps` bases further along, capped at home.
    pub fn advanced_by(self, steps: u8) -> Base {
        Base::from_number((self.number() + steps).min(4)).unwrap_or(Base::Home)
    }

    /// Play-by-play name.
    pub fn ordinal(self) -> &'static str {
        match self {
            Base::First => "1st",
            Base::Second => "2nd",
            Base::Third => "3rd",
            Base::Home => "home",
        }
    }
}

impl std::fmt::Display for Base {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.ordinal())
    }
}

// =============================================================================
// RUNNERS
// =============================================================================

/// A runner on base.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runner {
    /// Runner's card
    pub card_id: CardId,
    /// Name for play-by-play
    pub name: String,
    /// Numeric speed
    pub speed: i32,
    /// Pitcher charged if this runner scores
    pub charged_to: CardId,
}

/// Occupancy of first, second and third.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bases {
    /// Runner on first
    pub first: Option<Runner>,
    /// Runner on second
    pub second: Option<Runner>,
    /// Runner on third
    pub third: Option<Runner>,
}

impl Bases {
    /// Runner on a base. Home never holds a runner.
    pub fn get(&self, base: Base) -> Option<&Runner> {
        match base {
            Base::First => self.first.as_ref(),
            Base::Second => self.second.as_ref(),
            Base::Third => self.third.as_ref(),
            Base::Home => None,
        }
    }

    fn slot_mut(&mut self, base: Base) -> Option<&mut Option<Runner>> {
        match base {
            Base::First => Some(&mut self.first),
            Base::Second => Some(&mut self.second),
            Base::Third => Some(&mut self.third),
            Base::Home => None,
        }
    }

    /// Remove and return the runner on a base.
    pub fn take(&mut self, base: Base) -> Option<Runner> {
        self.slot_mut(base).and_then(Option::take)
    }

    /// Put a runner on a base, returning whoever stood there.
    ///
    /// Placing on home is a no-op that hands the runner back.
    pub fn place(&mut self, base: Base, runner: Runner) -> Option<Runner> {
        match self.slot_mut(base) {
            Some(slot) => slot.replace(runner),
            None => Some(runner),
        }
    }

    /// Is a base occupied?
    pub fn is_occupied(&self, base: Base) -> bool {
        self.get(base).is_some()
    }

    /// No runners on.
    pub fn is_empty(&self) -> bool {
        self.first.is_none() && self.second.is_none() && self.third.is_none()
    }

    /// Number of runners on.
    pub fn count(&self) -> usize {
        Base::OCCUPIABLE.iter().filter(|b| self.is_occupied(**b)).count()
    }

    /// Occupied bases with their runners, lead runner first.
    pub fn occupied_lead_first(&self) -> Vec<(Base, &Runner)> {
        [Base::Third, Base::Second, Base::First]
            .iter()
            .filter_map(|b| self.get(*b).map(|r| (*b, r)))
            .collect()
    }

    /// Base a card is standing on.
    pub fn find(&self, card_id: CardId) -> Option<Base> {
        Base::OCCUPIABLE
            .iter()
            .copied()
            .find(|b| self.get(*b).is_some_and(|r| r.card_id == card_id))
    }

    /// Empty every base.
    pub fn clear(&mut self) {
        *self = Bases::default();
    }

    /// Hash occupancy into the state hash.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        for base in Base::OCCUPIABLE {
            match self.get(base) {
                Some(runner) => {
                    hasher.update_u8(1);
                    hasher.update_i32(runner.card_id.0);
                    hasher.update_i32(runner.speed);
                    hasher.update_i32(runner.charged_to.0);
                }
                None => hasher.update_u8(0),
            }
        }
    }
}

// =============================================================================
// PITCHER USAGE
// =============================================================================

/// Usage counters for one pitcher in this game.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitcherStats {
    /// Innings of capacity printed on the card
    pub capacity: u32,
    /// Outs recorded while on the mound
    pub outs_recorded: u32,
    /// Innings appeared in
    pub innings: BTreeSet<u32>,
    /// Runs charged
    pub runs_allowed: u32,
    /// Adjustment to innings capacity carried in from earlier use
    pub fatigue_modifier: i32,
}

impl PitcherStats {
    /// Fresh usage for a pitcher with the given capacity.
    pub fn new(capacity: u32) -> Self {
        Self { capacity, ..Default::default() }
    }

    /// Whole innings pitched.
    pub fn innings_pitched(&self) -> u32 {
        self.outs_recorded / 3
    }

    /// Control lost to fatigue.
    ///
    /// Every three runs allowed shortens the capacity by one inning.
    pub fn control_penalty(&self) -> i32 {
        let threshold = self.capacity as i32 + self.fatigue_modifier - (self.runs_allowed / 3) as i32;
        let appeared = self.innings.len() as i32;
        (appeared - threshold).max(0)
    }

    /// Control after fatigue.
    pub fn effective_control(&self, control: i32) -> i32 {
        control - self.control_penalty()
    }

    /// Tired: already losing control, or carrying fatigue in.
    pub fn is_fatigued(&self) -> bool {
        self.control_penalty() > 0 || self.fatigue_modifier < 0
    }

    fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u32(self.capacity);
        hasher.update_u32(self.outs_recorded);
        hasher.update_u32(self.innings.len() as u32);
        for inning in &self.innings {
            hasher.update_u32(*inning);
        }
        hasher.update_u32(self.runs_allowed);
        hasher.update_i32(self.fatigue_modifier);
    }
}

// =============================================================================
// TEAM STATE
// =============================================================================

/// Per-side progress through the game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamState {
    /// Index into the batting order of the next batter
    pub batting_index: usize,
    /// Pitcher currently on the mound
    pub pitcher: CardId,
    /// Pitcher who started the game
    pub starting_pitcher: CardId,
    /// Players removed from the game; they may not re-enter
    pub removed: BTreeSet<CardId>,
}

impl TeamState {
    /// Fresh side with its starter on the mound.
    pub fn new(starting_pitcher: CardId) -> Self {
        Self {
            batting_index: 0,
            pitcher: starting_pitcher,
            starting_pitcher,
            removed: BTreeSet::new(),
        }
    }

    /// Is the starter still pitching?
    pub fn starter_on_mound(&self) -> bool {
        self.pitcher == self.starting_pitcher
    }

    fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u32(self.batting_index as u32);
        hasher.update_i32(self.pitcher.0);
        hasher.update_i32(self.starting_pitcher.0);
        hasher.update_u32(self.removed.len() as u32);
        for id in &self.removed {
            hasher.update_i32(id.0);
        }
    }
}

// =============================================================================
// GAME STATE
// =============================================================================

/// Game lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum GamePhase {
    /// Lineups set, nothing played
    PreGame = 0,
    /// A half-inning is in progress
    InProgress = 1,
    /// Third out recorded; next action starts the next half
    BetweenHalfInnings = 2,
    /// Game over
    Completed = 3,
}

/// Complete authoritative state of one game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    /// Game identifier
    pub game_id: GameId,
    /// RNG seed the game was started with
    pub seed: u64,
    /// Count of accepted resolutions
    pub turn: u64,
    /// Lifecycle phase
    pub phase: GamePhase,
    /// Inning number, from 1
    pub inning: u32,
    /// Current half
    pub half: Half,
    /// Outs in the current half (0-3)
    pub outs: u8,
    /// Away runs
    pub away_score: u32,
    /// Home runs
    pub home_score: u32,
    /// Base occupancy
    pub bases: Bases,
    /// Away progress
    pub away: TeamState,
    /// Home progress
    pub home: TeamState,
    /// Usage per pitcher who has appeared
    pub pitcher_stats: BTreeMap<CardId, PitcherStats>,
    /// Decisions submitted for the at-bat in progress
    pub at_bat: AtBatDecisions,
    /// Outstanding secondary baserunning decision
    pub current_play: CurrentPlay,
    /// Winner, once completed
    pub winner: Option<Side>,
}

impl GameState {
    /// Create the pre-game state with both starters on the mound.
    pub fn new(game_id: GameId, seed: u64, away_pitcher: &Card, home_pitcher: &Card) -> Self {
        let mut pitcher_stats = BTreeMap::new();
        for pitcher in [away_pitcher, home_pitcher] {
            pitcher_stats.insert(pitcher.id, PitcherStats::new(pitcher.innings().unwrap_or(0)));
        }

        Self {
            game_id,
            seed,
            turn: 0,
            phase: GamePhase::PreGame,
            inning: 1,
            half: Half::Top,
            outs: 0,
            away_score: 0,
            home_score: 0,
            bases: Bases::default(),
            away: TeamState::new(away_pitcher.id),
            home: TeamState::new(home_pitcher.id),
            pitcher_stats,
            at_bat: AtBatDecisions::default(),
            current_play: CurrentPlay::None,
            winner: None,
        }
    }

    /// Side at bat.
    pub fn batting_side(&self) -> Side {
        self.half.batting_side()
    }

    /// Side in the field.
    pub fn fielding_side(&self) -> Side {
        self.half.fielding_side()
    }

    /// Progress for a side.
    pub fn team(&self, side: Side) -> &TeamState {
        match side {
            Side::Away => &self.away,
            Side::Home => &self.home,
        }
    }

    /// Mutable progress for a side.
    pub fn team_mut(&mut self, side: Side) -> &mut TeamState {
        match side {
            Side::Away => &mut self.away,
            Side::Home => &mut self.home,
        }
    }

    /// Runs for a side.
    pub fn score(&self, side: Side) -> u32 {
        match side {
            Side::Away => self.away_score,
            Side::Home => self.home_score,
        }
    }

    /// Add a run for a side.
    pub fn add_run(&mut self, side: Side) {
        match side {
            Side::Away => self.away_score += 1,
            Side::Home => self.home_score += 1,
        }
    }

    /// Score a runner for the side at bat. The run is charged to the pitcher
    /// who put him on.
    pub fn score_runner(&mut self, runner: &Runner) {
        self.add_run(self.batting_side());
        self.pitcher_stats_mut(runner.charged_to).runs_allowed += 1;
    }

    /// Record an out for the pitcher on the mound.
    pub fn record_out(&mut self) {
        self.outs = (self.outs + 1).min(3);
        let pitcher = self.current_pitcher();
        self.pitcher_stats_mut(pitcher).outs_recorded += 1;
    }

    /// Pitcher currently facing batters.
    pub fn current_pitcher(&self) -> CardId {
        self.team(self.fielding_side()).pitcher
    }

    /// Usage for a pitcher, created on first use.
    pub fn pitcher_stats_mut(&mut self, pitcher: CardId) -> &mut PitcherStats {
        self.pitcher_stats.entry(pitcher).or_default()
    }

    /// Usage for a pitcher; zeroed if he has not appeared.
    pub fn pitcher_usage(&self, pitcher: CardId) -> PitcherStats {
        self.pitcher_stats.get(&pitcher).cloned().unwrap_or_default()
    }

    /// Put a pitcher on the mound for a side, starting his usage counters.
    pub fn enter_pitcher(&mut self, side: Side, pitcher: &Card) {
        self.team_mut(side).pitcher = pitcher.id;
        self.pitcher_stats
            .entry(pitcher.id)
            .or_insert_with(|| PitcherStats::new(pitcher.innings().unwrap_or(0)));
    }

    /// Start a pitcher's usage with fatigue carried in from earlier games.
    ///
    /// A negative modifier shortens his capacity and leaves him tired from
    /// the first pitch.
    pub fn carry_fatigue(&mut self, pitcher: &Card, modifier: i32) {
        self.pitcher_stats
            .entry(pitcher.id)
            .or_insert_with(|| PitcherStats::new(pitcher.innings().unwrap_or(0)))
            .fatigue_modifier = modifier;
    }

    /// Has the game ended?
    pub fn is_over(&self) -> bool {
        self.phase == GamePhase::Completed
    }

    /// Compute state hash for replay verification.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(self.turn, self.seed, |hasher| {
            hasher.update_bytes(self.game_id.as_bytes());
            hasher.update_u8(self.phase as u8);
            hasher.update_u32(self.inning);
            hasher.update_u8(self.half as u8);
            hasher.update_u8(self.outs);
            hasher.update_u32(self.away_score);
            hasher.update_u32(self.home_score);
            self.bases.hash_into(hasher);
            self.away.hash_into(hasher);
            self.home.hash_into(hasher);

            hasher.update_u32(self.pitcher_stats.len() as u32);
            for (id, stats) in &self.pitcher_stats {
                hasher.update_i32(id.0);
                stats.hash_into(hasher);
            }

            self.at_bat.hash_into(hasher);
            self.current_play.hash_into(hasher);
            hasher.update_opt_i32(self.winner.map(|s| s as i32));
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
