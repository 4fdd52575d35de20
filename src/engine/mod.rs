//! Engine Layer
//!
//! Live games behind per-game locks, the request/reply payloads, and
//! persistence of what they produce.
//! This layer is **non-deterministic** - all rules run through `game/`.

pub mod protocol;
pub mod session;
pub mod registry;

pub use protocol::{
    AtBatAction, BaserunningPayload, BaserunningStage, ClientRequest, ErrorCode,
    Rejection, Resolution, ServerReply,
};
pub use session::{EngineError, GameSession};
pub use registry::{GameHandle, GameRegistry};
