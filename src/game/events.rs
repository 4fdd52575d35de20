//! Play-by-Play Events
//!
//! Append-only log entries emitted by resolutions. Events are ordered by the
//! turn that produced them, then by their position in the game's log.
//!
//! Timestamps are wall-clock and never enter the state hash.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::game::state::Half;

/// What produced an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventKind {
    /// Plate appearance (with any automatic baserunning)
    AtBat = 0,
    /// Tag-up or extra-base decision
    Baserunning = 1,
    /// Steal attempt
    Steal = 2,
    /// Lineup or pitching change
    Substitution = 3,
    /// A half-inning began
    InningChange = 4,
    /// The game ended
    GameOver = 5,
}

impl EventKind {
    /// Stable tag for storage.
    pub fn tag(self) -> &'static str {
        match self {
            EventKind::AtBat => "at_bat",
            EventKind::Baserunning => "baserunning",
            EventKind::Steal => "steal",
            EventKind::Substitution => "substitution",
            EventKind::InningChange => "inning_change",
            EventKind::GameOver => "game_over",
        }
    }
}

/// One play-by-play entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    /// Turn the event belongs to
    pub turn: u64,

    /// Position in the game's log, assigned when appended
    pub sequence: u64,

    /// Event type tag
    pub kind: EventKind,

    /// Play-by-play text
    pub message: String,

    /// Wall-clock time of emission
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a new event stamped now.
    pub fn new(turn: u64, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            turn,
            sequence: 0,
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create at-bat event.
    pub fn at_bat(turn: u64, message: impl Into<String>) -> Self {
        Self::new(turn, EventKind::AtBat, message)
    }

    /// Create baserunning event.
    pub fn baserunning(turn: u64, message: impl Into<String>) -> Self {
        Self::new(turn, EventKind::Baserunning, message)
    }

    /// Create steal event.
    pub fn steal(turn: u64, message: impl Into<String>) -> Self {
        Self::new(turn, EventKind::Steal, message)
    }

    /// Create substitution event.
    pub fn substitution(turn: u64, message: impl Into<String>) -> Self {
        Self::new(turn, EventKind::Substitution, message)
    }

    /// Create half-inning event, e.g. "Top of the 3rd."
    pub fn inning_change(turn: u64, half: Half, inning: u32) -> Self {
        Self::new(
            turn,
            EventKind::InningChange,
            format!("{} of the {}.", half.label(), inning_ordinal(inning)),
        )
    }

    /// Create game over event.
    pub fn game_over(turn: u64, message: impl Into<String>) -> Self {
        Self::new(turn, EventKind::GameOver, message)
    }

    /// Place the event in the game's log.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.turn == other.turn
            && self.sequence == other.sequence
            && self.kind == other.kind
            && self.message == other.message
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.turn
            .cmp(&other.turn)
            .then(self.sequence.cmp(&other.sequence))
            .then(self.kind.cmp(&other.kind))
            .then_with(|| self.message.cmp(&other.message))
    }
}

/// Append the out count to a play line when the play recorded outs.
pub fn annotate_outs(message: &str, outs_before: u8, outs_after: u8) -> String {
    if outs_after > outs_before {
        format!("{message} Outs: {outs_after}")
    } else {
        message.to_string()
    }
}

/// "1st", "2nd", "11th", "23rd".
pub fn inning_ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_ordering() {
        let first = Event::at_bat(3, "B1 walks.");
        let second = Event::game_over(3, "HOME TEAM WINS! WALK-OFF!").with_sequence(1);
        let later = Event::inning_change(4, Half::Bottom, 9);

        assert!(first < second);
        assert!(second < later);
    }

    #[test]
    fn test_out_annotation() {
        assert_eq!(annotate_outs("B1 strikes out.", 0, 1), "B1 strikes out. Outs: 1");
        assert_eq!(annotate_outs("B1 walks.", 1, 1), "B1 walks.");
    }

    #[test]
    fn test_inning_change_message() {
        assert_eq!(Event::inning_change(0, Half::Top, 1).message, "Top of the 1st.");
        assert_eq!(Event::inning_change(0, Half::Bottom, 12).message, "Bottom of the 12th.");
        assert_eq!(inning_ordinal(22), "22nd");
        assert_eq!(inning_ordinal(13), "13th");
    }

    #[test]
    fn test_kind_tags_are_stable() {
        assert_eq!(EventKind::AtBat.tag(), "at_bat");
        assert_eq!(EventKind::GameOver.tag(), "game_over");
    }
}
