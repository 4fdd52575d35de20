//! Engine Messages
//!
//! Requests a client submits for a game and the replies the engine sends
//! back. JSON is the readable form.
//!
//! ```text
//! ClientRequest ──> GameRegistry::handle_request ──> ServerReply
//! ```

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::engine::session::EngineError;
use crate::game::atbat::{AtBatResult, BatterAction, PitcherAction};
use crate::game::baserunning::{PlayResolution, ThrowChoice};
use crate::game::card::CardId;
use crate::game::events::Event;
use crate::game::machine::{Decision, PendingStep, StepKind};
use crate::game::state::{Base, GameId, GameState, Side};
use crate::game::sync::{Reveal, SideView};

// =============================================================================
// CLIENT -> ENGINE
// =============================================================================

/// Requests sent to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Pitcher or batter decision for the at-bat.
    SubmitAtBat {
        /// Target game
        game_id: GameId,
        /// Submitting side
        side: Side,
        /// Turn the client last saw
        turn: u64,
        /// The choice
        action: AtBatAction,
    },

    /// Steal, runner sends, or a throw.
    SubmitBaserunning {
        /// Target game
        game_id: GameId,
        /// Submitting side
        side: Side,
        /// Turn the client last saw
        turn: u64,
        /// Protocol stage being answered
        stage: BaserunningStage,
        /// Stage payload
        payload: BaserunningPayload,
    },

    /// Personnel change.
    SubmitSubstitution {
        /// Target game
        game_id: GameId,
        /// Submitting side
        side: Side,
        /// Turn the client last saw
        turn: u64,
        /// Card coming in
        incoming: CardId,
        /// Card going out
        outgoing: CardId,
    },

    /// Two fielders trade positions.
    SubmitPositionSwap {
        /// Target game
        game_id: GameId,
        /// Submitting side
        side: Side,
        /// Turn the client last saw
        turn: u64,
        /// One batting-order card
        first: CardId,
        /// The other
        second: CardId,
    },

    /// Side is ready to see its next play.
    Acknowledge {
        /// Target game
        game_id: GameId,
        /// Acknowledging side
        side: Side,
    },

    /// Side's current display.
    View {
        /// Target game
        game_id: GameId,
        /// Viewing side
        side: Side,
    },
}

impl ClientRequest {
    /// Game the request targets.
    pub fn game_id(&self) -> GameId {
        match self {
            ClientRequest::SubmitAtBat { game_id, .. }
            | ClientRequest::SubmitBaserunning { game_id, .. }
            | ClientRequest::SubmitSubstitution { game_id, .. }
            | ClientRequest::SubmitPositionSwap { game_id, .. }
            | ClientRequest::Acknowledge { game_id, .. }
            | ClientRequest::View { game_id, .. } => *game_id,
        }
    }
}

/// One side's at-bat choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtBatAction {
    /// Defense
    Pitcher(PitcherAction),
    /// Offense
    Batter(BatterAction),
}

impl From<AtBatAction> for Decision {
    fn from(action: AtBatAction) -> Self {
        match action {
            AtBatAction::Pitcher(action) => Decision::Pitch(action),
            AtBatAction::Batter(action) => Decision::Bat(action),
        }
    }
}

/// Stage of the baserunning protocol a submission answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaserunningStage {
    /// Offense starts a steal
    Initiate,
    /// Offense sends or holds runners on a pending play
    Offense,
    /// Defense picks a throw
    Defense,
}

/// Payload of a baserunning submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaserunningPayload {
    /// Runners by current base: `true` to send
    Runners(BTreeMap<Base, bool>),
    /// Where the defense throws
    Throw(ThrowChoice),
}

impl BaserunningStage {
    /// Decision for this stage, if the payload fits it.
    pub fn decision(self, payload: BaserunningPayload) -> Result<Decision, EngineError> {
        match (self, payload) {
            (BaserunningStage::Initiate, BaserunningPayload::Runners(sends)) => Ok(Decision::Steal(sends)),
            (BaserunningStage::Offense, BaserunningPayload::Runners(sends)) => Ok(Decision::SendRunners(sends)),
            (BaserunningStage::Defense, BaserunningPayload::Throw(choice)) => Ok(Decision::Throw(choice)),
            (stage, _) => Err(EngineError::InvalidDecision(format!(
                "payload does not fit the {stage:?} stage"
            ))),
        }
    }
}

// =============================================================================
// ENGINE -> CLIENT
// =============================================================================

/// Replies sent by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerReply {
    /// Decision accepted.
    Resolved(Resolution),

    /// Decision or request refused.
    Rejected(Rejection),

    /// Side's display.
    View(SideView),

    /// Play revealed by an acknowledgement, if one was waiting.
    Revealed {
        /// The play
        reveal: Option<Reveal>,
    },
}

/// Result of an accepted decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    /// Game
    pub game_id: GameId,
    /// What the decision did
    pub kind: StepKind,
    /// Turn after the decision
    pub turn: u64,
    /// Authoritative state after the decision
    pub state: GameState,
    /// Events emitted, with log sequence numbers
    pub events: Vec<Event>,
    /// What the game waits for next
    pub pending: PendingStep,
    /// Game ended with this decision
    pub game_over: bool,
    /// Plate appearance details
    pub at_bat: Option<AtBatResult>,
    /// Baserunning details
    pub play: Option<PlayResolution>,
    /// State hash (hex)
    pub state_hash: String,
}

impl Resolution {
    /// Play-by-play lines, in order.
    pub fn messages(&self) -> Vec<&str> {
        self.events.iter().map(|e| e.message.as_str()).collect()
    }
}

/// A refused request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Authoritative state, when the client needs to resynchronize
    pub state: Option<GameState>,
}

impl From<&EngineError> for Rejection {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            state: err.current_state().cloned(),
        }
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Submitted against an old turn.
    Stale,
    /// Does not fit what the game is waiting for.
    OutOfOrder,
    /// Illegal contents.
    InvalidDecision,
    /// Game already ended.
    GameOver,
    /// Card data failure; game halted.
    DataIntegrity,
    /// No such game.
    UnknownGame,
    /// Game could not be created or restored.
    Setup,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientRequest {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerReply {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
