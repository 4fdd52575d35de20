//! Core deterministic primitives.
//!
//! Every roll and every state hash goes through this module, so a game can be
//! replayed bit-for-bit from its seed and decision log.

pub mod rng;
pub mod hash;

// Re-export core types
pub use rng::{DeterministicRng, RandomSource, ScriptedRolls};
pub use hash::{compute_state_hash, StateHash};
