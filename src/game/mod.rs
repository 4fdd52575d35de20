//! Game Logic Module
//!
//! All play resolution code. 100% deterministic.
//!
//! ## Module Structure
//!
//! - `chart`: Outcome charts and roll lookup
//! - `card`: Player cards and card records
//! - `lineup`: Lineups, bench pools and teams
//! - `fielding`: Defensive ratings and contest arithmetic
//! - `atbat`: Pitch and swing resolution
//! - `baserunning`: Steal, tag-up and extra-base protocol
//! - `substitution`: Eligibility and personnel changes
//! - `state`: Authoritative game state
//! - `machine`: Decision handling and half-inning lifecycle
//! - `events`: Play-by-play log entries
//! - `sync`: Per-side display lag

pub mod chart;
pub mod card;
pub mod lineup;
pub mod fielding;
pub mod atbat;
pub mod baserunning;
pub mod substitution;
pub mod state;
pub mod machine;
pub mod events;
pub mod sync;

// Re-export key types
pub use card::{Card, CardId, CardRecord, Position};
pub use chart::{Chart, ChartGapError, Outcome};
pub use lineup::{Lineup, Team};
pub use state::{Base, GameId, GamePhase, GameState, Half, Side};
pub use machine::{Decision, DecisionRecord, Game, PendingStep, RuleError, StepKind, StepOutcome};
pub use events::{Event, EventKind};
pub use sync::{SideView, SyncProjection};
