//! Outcome Charts
//!
//! Every card carries a chart mapping die rolls to plate-appearance outcomes.
//! Charts are built once, when a card is loaded, by walking an ordered list of
//! `(outcome, frequency)` pairs and giving each the next contiguous range
//! starting at 1.

use serde::{Serialize, Deserialize};
use thiserror::Error;

// =============================================================================
// OUTCOME CODES
// =============================================================================

/// Discrete plate-appearance outcome printed on a chart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Outcome {
    /// Strikeout
    #[serde(rename = "SO")]
    Strikeout = 0,
    /// Pop-up (infield fly, no fielding check)
    #[serde(rename = "PU")]
    PopUp = 1,
    /// Ground ball
    #[serde(rename = "GB")]
    GroundBall = 2,
    /// Fly ball
    #[serde(rename = "FB")]
    FlyBall = 3,
    /// Walk
    #[serde(rename = "BB")]
    Walk = 4,
    /// Single
    #[serde(rename = "1B")]
    Single = 5,
    /// Single, batter takes second if open
    #[serde(rename = "1B+")]
    SinglePlus = 6,
    /// Double
    #[serde(rename = "2B")]
    Double = 7,
    /// Triple
    #[serde(rename = "3B")]
    Triple = 8,
    /// Home run
    #[serde(rename = "HR")]
    HomeRun = 9,
    /// Intentional walk (never on a chart; issued by the defense)
    #[serde(rename = "IBB")]
    IntentionalWalk = 10,
    /// Sacrifice bunt (never on a chart; chosen by the offense)
    #[serde(rename = "BUNT")]
    Bunt = 11,
}

impl Outcome {
    /// Short code as printed on the card.
    pub fn code(self) -> &'static str {
        match self {
            Outcome::Strikeout => "SO",
            Outcome::PopUp => "PU",
            Outcome::GroundBall => "GB",
            Outcome::FlyBall => "FB",
            Outcome::Walk => "BB",
            Outcome::Single => "1B",
            Outcome::SinglePlus => "1B+",
            Outcome::Double => "2B",
            Outcome::Triple => "3B",
            Outcome::HomeRun => "HR",
            Outcome::IntentionalWalk => "IBB",
            Outcome::Bunt => "BUNT",
        }
    }

    /// Parse a chart code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "SO" => Some(Outcome::Strikeout),
            "PU" => Some(Outcome::PopUp),
            "GB" => Some(Outcome::GroundBall),
            "FB" => Some(Outcome::FlyBall),
            "BB" => Some(Outcome::Walk),
            "1B" | "SINGLE" => Some(Outcome::Single),
            "1B+" => Some(Outcome::SinglePlus),
            "2B" => Some(Outcome::Double),
            "3B" => Some(Outcome::Triple),
            "HR" => Some(Outcome::HomeRun),
            "IBB" => Some(Outcome::IntentionalWalk),
            "BUNT" => Some(Outcome::Bunt),
            _ => None,
        }
    }

    /// Does this outcome retire the batter outright?
    pub fn is_out(self) -> bool {
        matches!(
            self,
            Outcome::Strikeout | Outcome::PopUp | Outcome::GroundBall | Outcome::FlyBall | Outcome::Bunt
        )
    }
}

/// Column order of a pitcher card's printed chart.
pub const PITCHER_CHART_ORDER: [Outcome; 8] = [
    Outcome::PopUp,
    Outcome::Strikeout,
    Outcome::GroundBall,
    Outcome::FlyBall,
    Outcome::Walk,
    Outcome::Single,
    Outcome::Double,
    Outcome::HomeRun,
];

/// Column order of a batter card's printed chart.
pub const BATTER_CHART_ORDER: [Outcome; 9] = [
    Outcome::Strikeout,
    Outcome::GroundBall,
    Outcome::FlyBall,
    Outcome::Walk,
    Outcome::Single,
    Outcome::SinglePlus,
    Outcome::Double,
    Outcome::Triple,
    Outcome::HomeRun,
];

// =============================================================================
// CHART
// =============================================================================

/// One inclusive roll range on a chart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartRange {
    /// Lowest roll in range
    pub low: u32,
    /// Highest roll in range
    pub high: u32,
    /// Outcome for rolls in range
    pub outcome: Outcome,
}

impl ChartRange {
    /// Does this range contain the roll?
    #[inline]
    pub fn contains(&self, roll: u32) -> bool {
        roll >= self.low && roll <= self.high
    }
}

/// Ordered, contiguous roll ranges.
///
/// A well-formed chart partitions `[1, total]` with no gaps or overlaps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chart {
    ranges: Vec<ChartRange>,
}

impl Chart {
    /// Build a chart from `(outcome, frequency)` pairs.
    ///
    /// Each pair takes the next `frequency` rolls; zero frequencies are
    /// skipped.
    pub fn from_frequencies(frequencies: &[(Outcome, u32)]) -> Self {
        let mut ranges = Vec::with_capacity(frequencies.len());
        let mut next = 1u32;

        for &(outcome, frequency) in frequencies {
            if frequency == 0 {
                continue;
            }
            let high = next + frequency - 1;
            ranges.push(ChartRange { low: next, high, outcome });
            next = high + 1;
        }

        Self { ranges }
    }

    /// Build a chart from explicit ranges, checking they partition
    /// `[1, total]`.
    pub fn from_ranges(mut ranges: Vec<ChartRange>) -> Result<Self, ChartGapError> {
        ranges.sort_by_key(|r| r.low);
        let chart = Self { ranges };
        chart.validate()?;
        Ok(chart)
    }

    /// Look up the outcome for a roll.
    pub fn resolve(&self, roll: u32) -> Result<Outcome, ChartGapError> {
        self.ranges
            .iter()
            .find(|r| r.contains(roll))
            .map(|r| r.outcome)
            .ok_or(ChartGapError { roll, total: self.total() })
    }

    /// Highest roll covered.
    pub fn total(&self) -> u32 {
        self.ranges.last().map(|r| r.high).unwrap_or(0)
    }

    /// Ranges in roll order.
    pub fn ranges(&self) -> &[ChartRange] {
        &self.ranges
    }

    /// Number of rolls mapped to an outcome.
    pub fn frequency_of(&self, outcome: Outcome) -> u32 {
        self.ranges
            .iter()
            .filter(|r| r.outcome == outcome)
            .map(|r| r.high - r.low + 1)
            .sum()
    }

    /// Check the ranges are contiguous from 1 with no overlap.
    ///
    /// The reported roll is the first one not covered exactly once.
    pub fn validate(&self) -> Result<(), ChartGapError> {
        let mut expected = 1u32;
        for range in &self.ranges {
            if range.low != expected || range.high < range.low {
                return Err(ChartGapError { roll: expected, total: self.total() });
            }
            expected = range.high + 1;
        }
        Ok(())
    }
}

/// A roll fell outside every chart range.
///
/// Never expected from a validly loaded card; treated as a data-integrity
/// defect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("no chart range covers roll {roll} (chart spans 1..={total})")]
pub struct ChartGapError {
    /// Roll that could not be resolved
    pub roll: u32,
    /// Highest roll the chart covers
    pub total: u32,
}

// =============================================================================
// TESTS
// =============================================================================
