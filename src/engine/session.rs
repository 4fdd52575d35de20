//! Game Sessions
//!
//! One live game: the rules engine plus everything around it that is not
//! deterministic. The session owns the RNG, the play-by-play log, the
//! decision log used for replay, the per-side display lag and an outbox of
//! events that still have to reach the event log.
//!
//! A session is a single writer. Callers serialize access to it (the
//! registry holds each session behind its own mutex).

use std::collections::VecDeque;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::core::rng::DeterministicRng;
use crate::engine::protocol::{AtBatAction, BaserunningPayload, BaserunningStage, ErrorCode, Resolution};
use crate::game::card::CardId;
use crate::game::chart::ChartGapError;
use crate::game::events::{Event, EventKind};
use crate::game::lineup::Team;
use crate::game::machine::{Decision, DecisionRecord, Game, PendingStep, RuleError, StepKind};
use crate::game::state::{GameId, GameState, Side};
use crate::game::substitution::Eligibility;
use crate::game::sync::{Reveal, SideView, SyncProjection};
use crate::record::snapshot::{GameSetup, Snapshot, SnapshotError, SNAPSHOT_VERSION};
use crate::record::store::{EventLog, GameStore, RepositoryError};

// =============================================================================
// ERRORS
// =============================================================================

/// Engine errors.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Submitted against a turn that has already passed.
    #[error("stale decision: game is at turn {expected}")]
    Stale {
        /// Current turn
        expected: u64,
        /// Authoritative state to resynchronize from
        state: Box<GameState>,
    },

    /// Decision does not fit what the game is waiting for.
    #[error("out of order: game is waiting for {expected:?}")]
    OutOfOrder {
        /// What the game is waiting for
        expected: PendingStep,
        /// Authoritative state to resynchronize from
        state: Box<GameState>,
    },

    /// Decision contents are not legal.
    #[error("invalid decision: {0}")]
    InvalidDecision(String),

    /// Game already ended.
    #[error("game is over")]
    GameOver,

    /// Card data could not resolve a play; the game is halted.
    #[error("data integrity failure: {0}")]
    DataIntegrity(String),

    /// No such game.
    #[error("unknown game {0}")]
    UnknownGame(GameId),

    /// Game could not be created or restored.
    #[error("setup failed: {0}")]
    Setup(String),
}

impl EngineError {
    /// Wire code.
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Stale { .. } => ErrorCode::Stale,
            EngineError::OutOfOrder { .. } => ErrorCode::OutOfOrder,
            EngineError::InvalidDecision(_) => ErrorCode::InvalidDecision,
            EngineError::GameOver => ErrorCode::GameOver,
            EngineError::DataIntegrity(_) => ErrorCode::DataIntegrity,
            EngineError::UnknownGame(_) => ErrorCode::UnknownGame,
            EngineError::Setup(_) => ErrorCode::Setup,
        }
    }

    /// State carried for resynchronization, if any.
    pub fn current_state(&self) -> Option<&GameState> {
        match self {
            EngineError::Stale { state, .. } | EngineError::OutOfOrder { state, .. } => Some(state),
            _ => None,
        }
    }

    fn from_rule(err: RuleError, state: &GameState) -> Self {
        match err {
            RuleError::OutOfOrder { expected } => EngineError::OutOfOrder {
                expected,
                state: Box::new(state.clone()),
            },
            RuleError::InvalidDecision(reason) => EngineError::InvalidDecision(reason),
            RuleError::GameOver => EngineError::GameOver,
            RuleError::DataIntegrity(gap) => EngineError::DataIntegrity(gap.to_string()),
        }
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// One live game.
#[derive(Debug)]
pub struct GameSession {
    /// How the game started
    setup: GameSetup,
    /// Rules engine
    game: Game,
    /// Roll source, seeded from the setup
    rng: DeterministicRng,
    /// Per-side display lag
    sync: SyncProjection,
    /// Play-by-play so far
    events: Vec<Event>,
    /// Accepted decisions, for replay
    decisions: Vec<DecisionRecord>,
    /// Events not yet in the event log
    outbox: VecDeque<Event>,
    /// State changed since it was last saved
    state_dirty: bool,
    /// Set once a data-integrity failure stops the game
    halted: Option<String>,
}

impl GameSession {
    /// Start a session, checking both rosters.
    pub fn new(setup: GameSetup) -> Result<Self, EngineError> {
        check_team(&setup.away, setup.rules.die_sides)?;
        check_team(&setup.home, setup.rules.die_sides)?;
        for &card in setup.carried_fatigue.keys() {
            if setup.away.pitcher_card(card).is_none() && setup.home.pitcher_card(card).is_none() {
                return Err(EngineError::Setup(format!("carried fatigue for card {}, not a pitcher in this game", card.0)));
            }
        }

        let game = setup.start();
        let rng = DeterministicRng::new(setup.seed);
        Ok(Self {
            setup,
            game,
            rng,
            sync: SyncProjection::new(),
            events: Vec::new(),
            decisions: Vec::new(),
            outbox: VecDeque::new(),
            state_dirty: true,
            halted: None,
        })
    }

    /// Game id.
    pub fn game_id(&self) -> GameId {
        self.setup.game_id
    }

    /// Authoritative state.
    pub fn state(&self) -> &GameState {
        &self.game.state
    }

    /// Rules engine.
    pub fn game(&self) -> &Game {
        &self.game
    }

    /// Play-by-play so far.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Accepted decisions so far.
    pub fn decisions(&self) -> &[DecisionRecord] {
        &self.decisions
    }

    /// Data-integrity failure that stopped the game, if any.
    pub fn halted(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    /// Events or state still to persist.
    pub fn has_unflushed(&self) -> bool {
        self.state_dirty || !self.outbox.is_empty()
    }

    /// Events waiting for the event log.
    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    // =========================================================================
    // DECISIONS
    // =========================================================================

    /// Submit a pitcher or batter decision.
    pub fn submit_at_bat_decision(&mut self, side: Side, turn: u64, action: AtBatAction) -> Result<Resolution, EngineError> {
        self.submit(side, turn, action.into())
    }

    /// Submit a steal, runner sends, or a throw.
    pub fn submit_baserunning_decision(
        &mut self,
        side: Side,
        turn: u64,
        stage: BaserunningStage,
        payload: BaserunningPayload,
    ) -> Result<Resolution, EngineError> {
        let decision = stage.decision(payload)?;
        self.submit(side, turn, decision)
    }

    /// Submit a personnel change. A refused change comes back as
    /// [`StepKind::Refused`] and changes nothing.
    pub fn submit_substitution(
        &mut self,
        side: Side,
        turn: u64,
        incoming: CardId,
        outgoing: CardId,
    ) -> Result<Resolution, EngineError> {
        self.submit(side, turn, Decision::Substitute { incoming, outgoing })
    }

    /// Exchange the positions of two of a side's fielders.
    pub fn submit_position_swap(&mut self, side: Side, turn: u64, first: CardId, second: CardId) -> Result<Resolution, EngineError> {
        self.submit(side, turn, Decision::SwapPositions { first, second })
    }

    /// Apply one decision submitted against `turn`.
    ///
    /// Rejections leave the game, the logs and the RNG untouched.
    pub fn submit(&mut self, side: Side, turn: u64, decision: Decision) -> Result<Resolution, EngineError> {
        let game_id = self.game_id();
        if let Some(reason) = &self.halted {
            return Err(EngineError::DataIntegrity(reason.clone()));
        }
        if self.game.state.is_over() {
            return Err(EngineError::GameOver);
        }
        if turn != self.game.state.turn {
            debug!(%game_id, ?side, turn, current = self.game.state.turn, "stale decision rejected");
            return Err(EngineError::Stale {
                expected: self.game.state.turn,
                state: Box::new(self.game.state.clone()),
            });
        }

        let rng_before = self.rng.state();
        let outcome = match self.game.apply(side, &decision, &mut self.rng) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.rng.set_state(rng_before);
                let err = EngineError::from_rule(err, &self.game.state);
                match &err {
                    EngineError::DataIntegrity(reason) => {
                        error!(%game_id, turn, %reason, "data integrity failure, game halted");
                        self.halted = Some(reason.clone());
                    }
                    _ => debug!(%game_id, ?side, turn, error = %err, "decision rejected"),
                }
                return Err(err);
            }
        };

        let mut events = Vec::with_capacity(outcome.events.len());
        for event in outcome.events {
            let event = event.with_sequence(self.events.len() as u64);
            if event.kind == EventKind::InningChange {
                info!(%game_id, inning = self.game.state.inning, half = ?self.game.state.half, "half-inning started");
            }
            self.events.push(event.clone());
            self.outbox.push_back(event.clone());
            events.push(event);
        }

        if !matches!(outcome.kind, StepKind::Refused(_)) {
            self.decisions.push(DecisionRecord { side, decision });
            self.state_dirty = true;
        }
        if let Some(Reveal { turn, before, message }) = outcome.reveal {
            self.sync.record_play(turn, before, message);
        }

        match &outcome.kind {
            StepKind::Accepted => debug!(%game_id, ?side, turn, "decision recorded"),
            StepKind::Refused(reason) => debug!(%game_id, ?side, ?reason, "substitution refused"),
            kind => info!(%game_id, turn = outcome.turn, ?kind, "play resolved"),
        }
        if outcome.game_over {
            info!(
                %game_id,
                away = self.game.state.away_score,
                home = self.game.state.home_score,
                winner = ?self.game.state.winner,
                "game completed"
            );
        }

        Ok(Resolution {
            game_id,
            kind: outcome.kind,
            turn: outcome.turn,
            state_hash: hex::encode(self.game.state.compute_hash()),
            state: self.game.state.clone(),
            events,
            pending: outcome.pending,
            game_over: outcome.game_over,
            at_bat: outcome.at_bat,
            play: outcome.play,
        })
    }

    // =========================================================================
    // SYNC AND SUBSTITUTION QUERIES
    // =========================================================================

    /// Side is ready to see its next play.
    pub fn acknowledge(&mut self, side: Side) -> Option<Reveal> {
        self.sync.acknowledge(side)
    }

    /// What a side should display right now.
    pub fn view(&self, side: Side) -> SideView {
        self.sync.view(side, &self.game.state)
    }

    /// Advisory check for a personnel change.
    pub fn eligibility(&self, side: Side, incoming: CardId, outgoing: CardId) -> Eligibility {
        self.game.eligibility(side, incoming, outgoing)
    }

    /// Cards that may replace `outgoing` right now.
    pub fn substitution_options(&self, side: Side, outgoing: CardId) -> Vec<CardId> {
        self.game.substitution_options(side, outgoing)
    }

    // =========================================================================
    // PERSISTENCE
    // =========================================================================

    /// Save the state and drain the outbox, oldest event first.
    ///
    /// Stops at the first failure; whatever did not land stays queued.
    /// Returns the number of events appended.
    pub fn flush(&mut self, store: &dyn GameStore, log: &dyn EventLog) -> Result<usize, RepositoryError> {
        if self.state_dirty {
            store.save(&self.game.state)?;
            self.state_dirty = false;
        }

        let mut appended = 0;
        while let Some(event) = self.outbox.front() {
            log.append(self.setup.game_id, event)?;
            self.outbox.pop_front();
            appended += 1;
        }
        Ok(appended)
    }

    /// Everything needed to resume or re-verify the game.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            setup: self.setup.clone(),
            decisions: self.decisions.clone(),
            state: self.game.state.clone(),
            away: self.game.away.clone(),
            home: self.game.home.clone(),
            events: self.events.clone(),
            sync: self.sync.clone(),
            rng_state: self.rng.state(),
            state_hash: self.game.state.compute_hash(),
            halted: self.halted.clone(),
            taken_at: Utc::now(),
        }
    }

    /// Resume a session from a snapshot.
    ///
    /// The restored session treats everything in the snapshot as persisted.
    pub fn restore(snapshot: Snapshot) -> Result<Self, SnapshotError> {
        snapshot.check()?;
        let game = snapshot.game();
        let mut rng = DeterministicRng::new(snapshot.setup.seed);
        rng.set_state(snapshot.rng_state);

        Ok(Self {
            game,
            rng,
            setup: snapshot.setup,
            sync: snapshot.sync,
            events: snapshot.events,
            decisions: snapshot.decisions,
            outbox: VecDeque::new(),
            state_dirty: false,
            halted: snapshot.halted,
        })
    }
}

/// Lineup must be legal and every chart must cover the whole die.
fn check_team(team: &Team, die_sides: u32) -> Result<(), EngineError> {
    team.lineup
        .validate()
        .map_err(|e| EngineError::Setup(format!("{}: {e}", team.name)))?;

    let cards = team
        .lineup
        .batting_order
        .iter()
        .map(|slot| &slot.card)
        .chain(std::iter::once(&team.lineup.pitcher))
        .chain(team.bench.entries.iter().map(|entry| &entry.card));
    for card in cards {
        let covered = card.chart.validate().and_then(|()| {
            if card.chart.total() < die_sides {
                Err(ChartGapError { roll: card.chart.total() + 1, total: card.chart.total() })
            } else {
                Ok(())
            }
        });
        covered.map_err(|e| EngineError::Setup(format!("{}: card {}: {e}", team.name, card.id.0)))?;
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
