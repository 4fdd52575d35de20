//! # Showdown Game Server
//!
//! Deterministic play resolution for Showdown card baseball.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    SHOWDOWN SERVER                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Deterministic primitives                 │
//! │  ├── rng.rs       - Xorshift128+ PRNG, scripted rolls        │
//! │  └── hash.rs      - State hashing for verification           │
//! │                                                              │
//! │  game/            - Game rules (deterministic)               │
//! │  ├── chart.rs     - Outcome charts                           │
//! │  ├── card.rs      - Player cards                             │
//! │  ├── lineup.rs    - Lineups and bench pools                  │
//! │  ├── fielding.rs  - Defensive ratings                        │
//! │  ├── atbat.rs     - At-bat resolution                        │
//! │  ├── baserunning.rs - Steals, tag-ups, extra bases           │
//! │  ├── substitution.rs - Eligibility and changes               │
//! │  ├── state.rs     - Authoritative game state                 │
//! │  ├── machine.rs   - Decision handling, half-innings          │
//! │  ├── events.rs    - Play-by-play                             │
//! │  └── sync.rs      - Per-side display lag                     │
//! │                                                              │
//! │  engine/          - Live games (non-deterministic)           │
//! │  ├── protocol.rs  - Request and reply payloads               │
//! │  ├── session.rs   - One game, single writer                  │
//! │  └── registry.rs  - Per-game serialized access               │
//! │                                                              │
//! │  record/          - Persistence and replay                   │
//! │  ├── store.rs     - State, event and snapshot repositories   │
//! │  ├── snapshot.rs  - Compact game snapshots                   │
//! │  └── replay.rs    - Decision-log replay                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `game/` modules are **100% deterministic**:
//! - No floating-point arithmetic in game logic
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - No ambient randomness: every roll comes from a seeded source
//!
//! Given the same lineups, seed and decision log, a game replays to an
//! **identical state hash**.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod engine;
pub mod record;

// Re-export commonly used types
pub use config::{EngineConfig, RulesConfig};
pub use core::rng::{DeterministicRng, RandomSource};
pub use game::machine::{Decision, Game};
pub use game::state::{GameId, GameState, Side};
pub use engine::{EngineError, GameRegistry, GameSession};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
