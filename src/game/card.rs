//! Player Cards
//!
//! A card is the immutable gameplay profile for one player: role, ratings and
//! outcome chart. Cards arrive from the roster collaborator as loosely typed
//! [`CardRecord`]s and are validated into [`Card`]s before any game uses them.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::hash::StateHasher;
use crate::game::chart::{Chart, ChartGapError, Outcome};

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Card identifier as assigned by the card catalogue.
///
/// Negative ids are reserved for replacement cards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(pub i32);

impl std::fmt::Display for CardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Id of the stock replacement hitter.
pub const REPLACEMENT_HITTER_ID: CardId = CardId(-1);

/// Id of the stock replacement pitcher.
pub const REPLACEMENT_PITCHER_ID: CardId = CardId(-2);

// =============================================================================
// POSITIONS
// =============================================================================

/// Defensive position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Position {
    /// Catcher
    #[serde(rename = "C")]
    Catcher = 0,
    /// First base
    #[serde(rename = "1B")]
    FirstBase = 1,
    /// Second base
    #[serde(rename = "2B")]
    SecondBase = 2,
    /// Third base
    #[serde(rename = "3B")]
    ThirdBase = 3,
    /// Shortstop
    #[serde(rename = "SS")]
    Shortstop = 4,
    /// Left field
    #[serde(rename = "LF")]
    LeftField = 5,
    /// Center field
    #[serde(rename = "CF")]
    CenterField = 6,
    /// Right field
    #[serde(rename = "RF")]
    RightField = 7,
    /// Designated hitter
    #[serde(rename = "DH")]
    DesignatedHitter = 8,
    /// Pitcher
    #[serde(rename = "P")]
    Pitcher = 9,
}

impl Position {
    /// Infield positions, in the order fielders are drawn for ground balls.
    pub const INFIELD: [Position; 4] = [
        Position::FirstBase,
        Position::SecondBase,
        Position::Shortstop,
        Position::ThirdBase,
    ];

    /// Outfield positions.
    pub const OUTFIELD: [Position; 3] = [
        Position::LeftField,
        Position::CenterField,
        Position::RightField,
    ];

    /// Positions that must be covered by a fielder in every lineup.
    pub const FIELDED: [Position; 8] = [
        Position::Catcher,
        Position::FirstBase,
        Position::SecondBase,
        Position::ThirdBase,
        Position::Shortstop,
        Position::LeftField,
        Position::CenterField,
        Position::RightField,
    ];

    /// Scorecard abbreviation.
    pub fn code(self) -> &'static str {
        match self {
            Position::Catcher => "C",
            Position::FirstBase => "1B",
            Position::SecondBase => "2B",
            Position::ThirdBase => "3B",
            Position::Shortstop => "SS",
            Position::LeftField => "LF",
            Position::CenterField => "CF",
            Position::RightField => "RF",
            Position::DesignatedHitter => "DH",
            Position::Pitcher => "P",
        }
    }

    /// Parse a scorecard abbreviation.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "C" => Some(Position::Catcher),
            "1B" => Some(Position::FirstBase),
            "2B" => Some(Position::SecondBase),
            "3B" => Some(Position::ThirdBase),
            "SS" => Some(Position::Shortstop),
            "LF" => Some(Position::LeftField),
            "CF" => Some(Position::CenterField),
            "RF" => Some(Position::RightField),
            "DH" => Some(Position::DesignatedHitter),
            "P" => Some(Position::Pitcher),
            _ => None,
        }
    }

    /// Is this an infield position?
    pub fn is_infield(self) -> bool {
        Self::INFIELD.contains(&self)
    }

    /// Is this an outfield position?
    pub fn is_outfield(self) -> bool {
        Self::OUTFIELD.contains(&self)
    }

    /// Left or right field.
    pub fn is_corner_outfield(self) -> bool {
        matches!(self, Position::LeftField | Position::RightField)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

// =============================================================================
// SPEED
// =============================================================================

/// Baserunning speed grade.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SpeedGrade {
    /// Fast (20)
    A,
    /// Average (15)
    B,
    /// Slow (10)
    C,
    /// Explicit numeric speed
    Value(i32),
}

impl SpeedGrade {
    /// Numeric speed used in contests.
    pub fn value(self) -> i32 {
        match self {
            SpeedGrade::A => 20,
            SpeedGrade::B => 15,
            SpeedGrade::C => 10,
            SpeedGrade::Value(v) => v,
        }
    }

    /// Parse a printed grade (`A`/`B`/`C`) or a bare number.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "A" => Some(SpeedGrade::A),
            "B" => Some(SpeedGrade::B),
            "C" => Some(SpeedGrade::C),
            other => other.parse::<i32>().ok().map(SpeedGrade::Value),
        }
    }
}

/// Speed every pitcher runs with, regardless of card.
pub const PITCHER_SPEED: i32 = 10;

// =============================================================================
// CARD
// =============================================================================

/// Role-specific ratings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardProfile {
    /// Position player.
    Batter {
        /// On-base number the pitch roll must beat
        on_base: i32,
        /// Baserunning speed
        speed: SpeedGrade,
        /// Fielding rating per playable position
        fielding: BTreeMap<Position, i32>,
    },
    /// Pitcher.
    Pitcher {
        /// Control added to the pitch roll
        control: i32,
        /// Innings of capacity before fatigue
        innings: u32,
    },
}

/// Immutable gameplay profile for one player-card.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// Catalogue id
    pub id: CardId,
    /// Full name
    pub name: String,
    /// Name shown in play-by-play
    pub display_name: String,
    /// Ratings
    pub profile: CardProfile,
    /// Outcome chart
    pub chart: Chart,
}

impl Card {
    /// Is this a pitcher card?
    pub fn is_pitcher(&self) -> bool {
        matches!(self.profile, CardProfile::Pitcher { .. })
    }

    /// On-base number, if a batter.
    pub fn on_base(&self) -> Option<i32> {
        match self.profile {
            CardProfile::Batter { on_base, .. } => Some(on_base),
            CardProfile::Pitcher { .. } => None,
        }
    }

    /// Control, if a pitcher.
    pub fn control(&self) -> Option<i32> {
        match self.profile {
            CardProfile::Pitcher { control, .. } => Some(control),
            CardProfile::Batter { .. } => None,
        }
    }

    /// Innings capacity, if a pitcher.
    pub fn innings(&self) -> Option<u32> {
        match self.profile {
            CardProfile::Pitcher { innings, .. } => Some(innings),
            CardProfile::Batter { .. } => None,
        }
    }

    /// Baserunning speed. Pitchers always run at [`PITCHER_SPEED`].
    pub fn speed(&self) -> i32 {
        match self.profile {
            CardProfile::Batter { speed, .. } => speed.value(),
            CardProfile::Pitcher { .. } => PITCHER_SPEED,
        }
    }

    /// Fielding rating at a position, if the card lists one.
    pub fn fielding_at(&self, position: Position) -> Option<i32> {
        match &self.profile {
            CardProfile::Batter { fielding, .. } => fielding.get(&position).copied(),
            CardProfile::Pitcher { .. } => None,
        }
    }

    /// A batter with no listed fielding position outside DH.
    pub fn is_designated_hitter_only(&self) -> bool {
        match &self.profile {
            CardProfile::Batter { fielding, .. } => {
                fielding.keys().all(|p| *p == Position::DesignatedHitter)
            }
            CardProfile::Pitcher { .. } => false,
        }
    }

    /// Is this one of the stock replacement cards?
    pub fn is_replacement(&self) -> bool {
        self.id == REPLACEMENT_HITTER_ID || self.id == REPLACEMENT_PITCHER_ID
    }

    /// Build a validated card from a catalogue record.
    pub fn from_record(record: &CardRecord, die_sides: u32) -> Result<Self, CardError> {
        let id = CardId(record.card_id);

        let mut frequencies = Vec::with_capacity(record.chart.len());
        for entry in &record.chart {
            let outcome = Outcome::from_code(&entry.outcome).ok_or_else(|| CardError::UnknownOutcome {
                card: id,
                code: entry.outcome.clone(),
            })?;
            frequencies.push((outcome, entry.frequency));
        }
        let chart = Chart::from_frequencies(&frequencies);
        chart.validate().map_err(|source| CardError::Chart { card: id, source })?;
        if chart.total() != die_sides {
            return Err(CardError::ChartSize {
                card: id,
                total: chart.total(),
                expected: die_sides,
            });
        }

        let profile = match (record.control, record.on_base) {
            (Some(control), _) => CardProfile::Pitcher {
                control,
                innings: record.ip.unwrap_or(1),
            },
            (None, Some(on_base)) => {
                let speed = match record.speed.as_deref() {
                    Some(raw) => SpeedGrade::parse(raw).ok_or_else(|| CardError::InvalidSpeed {
                        card: id,
                        raw: raw.to_string(),
                    })?,
                    None => SpeedGrade::C,
                };
                CardProfile::Batter {
                    on_base,
                    speed,
                    fielding: parse_fielding(id, &record.fielding_ratings)?,
                }
            }
            (None, None) => return Err(CardError::MissingRole { card: id }),
        };

        let display_name = record
            .display_name
            .clone()
            .unwrap_or_else(|| record.name.clone());

        Ok(Self {
            id,
            name: record.name.clone(),
            display_name,
            profile,
            chart,
        })
    }

    /// Stock replacement hitter: fills a lineup hole at any position.
    pub fn replacement_hitter() -> Self {
        let fielding = Position::FIELDED.iter().map(|p| (*p, 0)).collect();
        Self {
            id: REPLACEMENT_HITTER_ID,
            name: "Replacement Hitter".to_string(),
            display_name: "Replacement Hitter".to_string(),
            profile: CardProfile::Batter {
                on_base: -10,
                speed: SpeedGrade::B,
                fielding,
            },
            chart: Chart::from_frequencies(&[(Outcome::Strikeout, 2), (Outcome::GroundBall, 18)]),
        }
    }

    /// Stock replacement pitcher.
    pub fn replacement_pitcher() -> Self {
        Self {
            id: REPLACEMENT_PITCHER_ID,
            name: "Replacement Pitcher".to_string(),
            display_name: "Replacement Pitcher".to_string(),
            profile: CardProfile::Pitcher { control: -1, innings: 1 },
            chart: Chart::from_frequencies(&[
                (Outcome::PopUp, 3),
                (Outcome::Strikeout, 5),
                (Outcome::GroundBall, 4),
                (Outcome::FlyBall, 4),
                (Outcome::Walk, 1),
                (Outcome::Single, 2),
                (Outcome::Double, 1),
            ]),
        }
    }

    /// Hash the card identity into state hashes.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_i32(self.id.0);
    }
}

/// Expand raw fielding keys. `LFRF` rates both corner outfield spots.
fn parse_fielding(
    card: CardId,
    raw: &BTreeMap<String, i32>,
) -> Result<BTreeMap<Position, i32>, CardError> {
    let mut fielding = BTreeMap::new();
    for (key, rating) in raw {
        if key == "LFRF" || key == "LF/RF" {
            fielding.entry(Position::LeftField).or_insert(*rating);
            fielding.entry(Position::RightField).or_insert(*rating);
            continue;
        }
        let position = Position::from_code(key).ok_or_else(|| CardError::UnknownPosition {
            card,
            code: key.clone(),
        })?;
        fielding.insert(position, *rating);
    }
    Ok(fielding)
}

// =============================================================================
// CATALOGUE RECORDS
// =============================================================================

/// One `(outcome, frequency)` column of a printed chart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartEntry {
    /// Outcome code (`SO`, `GB`, `1B+`, ...)
    pub outcome: String,
    /// Number of die faces
    pub frequency: u32,
}

/// Card as supplied by the catalogue collaborator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRecord {
    /// Catalogue id
    pub card_id: i32,
    /// Full name
    pub name: String,
    /// Play-by-play name
    #[serde(default)]
    pub display_name: Option<String>,
    /// On-base (batters)
    #[serde(default)]
    pub on_base: Option<i32>,
    /// Control (pitchers)
    #[serde(default)]
    pub control: Option<i32>,
    /// Innings capacity (pitchers)
    #[serde(default)]
    pub ip: Option<u32>,
    /// Speed grade (batters)
    #[serde(default)]
    pub speed: Option<String>,
    /// Fielding ratings keyed by position code
    #[serde(default)]
    pub fielding_ratings: BTreeMap<String, i32>,
    /// Chart columns in printed order
    #[serde(default)]
    pub chart: Vec<ChartEntry>,
}

/// Card data-integrity errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CardError {
    /// Chart ranges do not partition the roll space.
    #[error("card {card}: malformed chart: {source}")]
    Chart {
        /// Offending card
        card: CardId,
        /// Underlying gap
        source: ChartGapError,
    },

    /// Chart does not cover exactly one die.
    #[error("card {card}: chart covers {total} rolls, expected {expected}")]
    ChartSize {
        /// Offending card
        card: CardId,
        /// Rolls covered
        total: u32,
        /// Die faces
        expected: u32,
    },

    /// Unknown outcome code.
    #[error("card {card}: unknown outcome code {code:?}")]
    UnknownOutcome {
        /// Offending card
        card: CardId,
        /// Raw code
        code: String,
    },

    /// Unknown position code.
    #[error("card {card}: unknown position {code:?}")]
    UnknownPosition {
        /// Offending card
        card: CardId,
        /// Raw code
        code: String,
    },

    /// Unparseable speed grade.
    #[error("card {card}: invalid speed {raw:?}")]
    InvalidSpeed {
        /// Offending card
        card: CardId,
        /// Raw speed
        raw: String,
    },

    /// Neither on-base nor control present.
    #[error("card {card}: record has neither on_base nor control")]
    MissingRole {
        /// Offending card
        card: CardId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batter_record() -> CardRecord {
        let mut fielding_ratings = BTreeMap::new();
        fielding_ratings.insert("SS".to_string(), 3);
        fielding_ratings.insert("LFRF".to_string(), 1);
        CardRecord {
            card_id: 101,
            name: "Derek Jeter".to_string(),
            display_name: Some("Jeter".to_string()),
            on_base: Some(11),
            speed: Some("A".to_string()),
            fielding_ratings,
            chart: vec![
                ChartEntry { outcome: "SO".into(), frequency: 3 },
                ChartEntry { outcome: "GB".into(), frequency: 4 },
                ChartEntry { outcome: "FB".into(), frequency: 2 },
                ChartEntry { outcome: "BB".into(), frequency: 3 },
                ChartEntry { outcome: "1B".into(), frequency: 5 },
                ChartEntry { outcome: "1B+".into(), frequency: 0 },
                ChartEntry { outcome: "2B".into(), frequency: 2 },
                ChartEntry { outcome: "3B".into(), frequency: 0 },
                ChartEntry { outcome: "HR".into(), frequency: 1 },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_batter_from_record() {
        let card = Card::from_record(&batter_record(), 20).unwrap();
        assert!(!card.is_pitcher());
        assert_eq!(card.on_base(), Some(11));
        assert_eq!(card.speed(), 20);
        assert_eq!(card.display_name, "Jeter");
        assert_eq!(card.fielding_at(Position::Shortstop), Some(3));
        // LFRF expands to both corners
        assert_eq!(card.fielding_at(Position::LeftField), Some(1));
        assert_eq!(card.fielding_at(Position::RightField), Some(1));
        assert_eq!(card.fielding_at(Position::CenterField), None);
        assert_eq!(card.chart.resolve(20), Ok(Outcome::HomeRun));
    }

    #[test]
    fn test_pitcher_from_record() {
        let record = CardRecord {
            card_id: 7,
            name: "Pedro Martinez".to_string(),
            control: Some(6),
            ip: Some(7),
            chart: vec![
                ChartEntry { outcome: "PU".into(), frequency: 2 },
                ChartEntry { outcome: "SO".into(), frequency: 8 },
                ChartEntry { outcome: "GB".into(), frequency: 5 },
                ChartEntry { outcome: "FB".into(), frequency: 4 },
                ChartEntry { outcome: "BB".into(), frequency: 1 },
            ],
            ..Default::default()
        };
        let card = Card::from_record(&record, 20).unwrap();
        assert!(card.is_pitcher());
        assert_eq!(card.control(), Some(6));
        assert_eq!(card.innings(), Some(7));
        assert_eq!(card.speed(), PITCHER_SPEED);
        assert_eq!(card.display_name, "Pedro Martinez");
    }

    #[test]
    fn test_short_chart_rejected() {
        let mut record = batter_record();
        record.chart.pop();
        let result = Card::from_record(&record, 20);
        assert!(matches!(result, Err(CardError::ChartSize { total: 19, .. })));
    }

    #[test]
    fn test_bad_codes_rejected() {
        let mut record = batter_record();
        record.chart[0].outcome = "K".into();
        assert!(matches!(
            Card::from_record(&record, 20),
            Err(CardError::UnknownOutcome { .. })
        ));

        let mut record = batter_record();
        record.fielding_ratings.insert("XX".into(), 0);
        assert!(matches!(
            Card::from_record(&record, 20),
            Err(CardError::UnknownPosition { .. })
        ));

        let mut record = batter_record();
        record.on_base = None;
        assert!(matches!(
            Card::from_record(&record, 20),
            Err(CardError::MissingRole { .. })
        ));
    }

    #[test]
    fn test_replacement_cards_are_complete() {
        let hitter = Card::replacement_hitter();
        let pitcher = Card::replacement_pitcher();
        assert_eq!(hitter.chart.total(), 20);
        assert_eq!(pitcher.chart.total(), 20);
        assert!(hitter.is_replacement());
        assert!(pitcher.is_pitcher());
        assert_eq!(hitter.fielding_at(Position::Catcher), Some(0));
    }

    #[test]
    fn test_speed_grades() {
        assert_eq!(SpeedGrade::parse("B"), Some(SpeedGrade::B));
        assert_eq!(SpeedGrade::parse("17").map(SpeedGrade::value), Some(17));
        assert_eq!(SpeedGrade::parse("Z"), None);
    }
}
