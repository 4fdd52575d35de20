//! Showdown Game Server
//!
//! Authoritative play-resolution engine for Showdown card baseball.
//! Plays a seeded demo game through the registry and re-verifies it by replay.

use std::collections::BTreeMap;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::EnvFilter;

use showdown::{
    EngineConfig, GameId, GameRegistry, Side, VERSION,
    game::{
        atbat::{BatterAction, PitcherAction},
        baserunning::ThrowChoice,
        card::{Card, CardRecord, ChartEntry, Position},
        lineup::{Assignment, BenchEntry, BenchPool, Lineup, LineupSlot, Team},
        machine::{Decision, Game, PendingStep},
        state::Base,
    },
    record::replay::verify_snapshot,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Showdown Server v{}", VERSION);

    let config = match std::env::var("SHOWDOWN_CONFIG") {
        Ok(path) => EngineConfig::from_json_file(&path).with_context(|| format!("loading config from {path}"))?,
        Err(_) => EngineConfig::default(),
    };
    info!(
        die = config.rules.die_sides,
        innings = config.rules.regulation_innings,
        "rules loaded"
    );

    demo_game(config).await
}

/// Play one game to the end with a simple manager on each side.
async fn demo_game(config: EngineConfig) -> anyhow::Result<()> {
    info!("=== Starting Demo Game ===");

    let die_sides = config.rules.die_sides;
    let registry = GameRegistry::new(config);
    let game_id = GameId::from_bytes([1u8; 16]);
    registry
        .create_game_with_id(game_id, demo_team("Visitors", 100, die_sides)?, demo_team("Locals", 200, die_sides)?)
        .await?;

    let handle = registry.handle(game_id).await?;
    let mut resolutions = 0usize;
    for _ in 0..10_000 {
        let state = handle.latest();
        if state.is_over() {
            break;
        }
        let (side, decision) = manager(&registry.game(game_id).await?);
        let resolution = registry.submit(game_id, side, state.turn, decision).await?;
        for message in resolution.messages() {
            info!("{message}");
        }
        resolutions += 1;

        // Both clients keep up with the play-by-play
        for side in Side::BOTH {
            while registry.acknowledge(game_id, side).await?.is_some() {}
        }
    }

    let state = registry.state(game_id).await?;
    if !state.is_over() {
        bail!("demo game did not finish");
    }

    // Print final results
    info!("=== Game Results ===");
    info!("Final: Away {}, Home {} after {} innings", state.away_score, state.home_score, state.inning);
    info!("Decisions: {}", resolutions);
    let snapshot = registry.snapshot(game_id).await?;
    info!("Final State Hash: {}", snapshot.state_hash_hex());

    // Verify determinism by replaying
    info!("=== Verifying Determinism ===");
    let report = verify_snapshot(&snapshot)?;
    info!("Replay Hash: {}", report.final_hash_hex());
    info!("Determinism verified: hashes match");

    Ok(())
}

/// Pitch and swing; send a runner when the base ahead is open and throw at
/// the lead runner.
fn manager(game: &Game) -> (Side, Decision) {
    let batting = game.state.batting_side();
    let fielding = game.state.fielding_side();
    match game.pending() {
        PendingStep::NextHalf => (batting, Decision::Pitch(PitcherAction::Pitch)),
        PendingStep::AtBat { pitcher: true, .. } => {
            // Play the infield in to protect a run in the late innings
            let protect = game.state.inning >= 7 && game.state.outs < 2 && game.state.bases.is_occupied(Base::Third);
            let action = if protect { PitcherAction::InfieldIn } else { PitcherAction::Pitch };
            (fielding, Decision::Pitch(action))
        }
        PendingStep::AtBat { .. } => (batting, Decision::Bat(BatterAction::Swing)),
        PendingStep::Offense(_) => {
            let mut sends = BTreeMap::new();
            if let Some(play) = game.state.current_play.play() {
                for &from in &play.candidates {
                    let open = match from.next() {
                        Some(Base::Home) => true,
                        Some(to) => !game.state.bases.is_occupied(to),
                        None => false,
                    };
                    sends.insert(from, open && game.state.turn % 2 == 0);
                }
            }
            (batting, Decision::SendRunners(sends))
        }
        PendingStep::Defense(_) => {
            let target = game
                .state
                .current_play
                .play()
                .and_then(|play| play.sent_bases().first().and_then(|b| b.next()));
            let choice = target.map(ThrowChoice::Throw).unwrap_or(ThrowChoice::NoThrow);
            (fielding, Decision::Throw(choice))
        }
        PendingStep::GameOver => (fielding, Decision::Pitch(PitcherAction::Pitch)),
    }
}

// =============================================================================
// DEMO ROSTERS
// =============================================================================

fn chart(columns: &[(&str, u32)]) -> Vec<ChartEntry> {
    columns
        .iter()
        .map(|(outcome, frequency)| ChartEntry { outcome: outcome.to_string(), frequency: *frequency })
        .collect()
}

fn batter_record(id: i32, position: Position, on_base: i32, speed: &str) -> CardRecord {
    let mut fielding_ratings = BTreeMap::new();
    if position != Position::DesignatedHitter {
        fielding_ratings.insert(position.code().to_string(), 1 + id % 3);
    }
    CardRecord {
        card_id: id,
        name: format!("Player {id}"),
        on_base: Some(on_base),
        speed: Some(speed.to_string()),
        fielding_ratings,
        chart: chart(&[("SO", 4), ("GB", 4), ("FB", 3), ("BB", 2), ("1B", 3), ("1B+", 1), ("2B", 1), ("3B", 1), ("HR", 1)]),
        ..CardRecord::default()
    }
}

fn pitcher_record(id: i32, control: i32, ip: u32) -> CardRecord {
    CardRecord {
        card_id: id,
        name: format!("Pitcher {id}"),
        control: Some(control),
        ip: Some(ip),
        chart: chart(&[("PU", 2), ("SO", 5), ("GB", 6), ("FB", 4), ("BB", 1), ("1B", 2)]),
        ..CardRecord::default()
    }
}

/// Nine-man DH lineup, a two-man bench and a two-man bullpen.
fn demo_team(name: &str, base: i32, die_sides: u32) -> anyhow::Result<Team> {
    const ORDER: [(Position, i32, &str); 9] = [
        (Position::CenterField, 9, "A"),
        (Position::Shortstop, 8, "A"),
        (Position::FirstBase, 10, "C"),
        (Position::DesignatedHitter, 11, "C"),
        (Position::ThirdBase, 9, "B"),
        (Position::LeftField, 8, "B"),
        (Position::RightField, 8, "B"),
        (Position::Catcher, 7, "C"),
        (Position::SecondBase, 7, "A"),
    ];

    let mut batting_order = Vec::with_capacity(ORDER.len());
    for (i, (position, on_base, speed)) in ORDER.iter().enumerate() {
        let card = Card::from_record(&batter_record(base + 1 + i as i32, *position, *on_base, speed), die_sides)?;
        batting_order.push(LineupSlot { card, position: *position });
    }
    let starter = Card::from_record(&pitcher_record(base + 50, 4, 7), die_sides)?;
    let lineup = Lineup::new(batting_order, starter)?;

    let bench = BenchPool::new(vec![
        BenchEntry {
            card: Card::from_record(&batter_record(base + 20, Position::Shortstop, 9, "A"), die_sides)?,
            assignment: Assignment::Position(Position::Shortstop),
        },
        BenchEntry {
            card: Card::from_record(&batter_record(base + 21, Position::LeftField, 8, "B"), die_sides)?,
            assignment: Assignment::CornerOutfield,
        },
        BenchEntry {
            card: Card::from_record(&pitcher_record(base + 60, 5, 2), die_sides)?,
            assignment: Assignment::Reliever,
        },
        BenchEntry {
            card: Card::from_record(&pitcher_record(base + 61, 3, 1), die_sides)?,
            assignment: Assignment::Reliever,
        },
    ]);

    Ok(Team::new(name, lineup, bench)?)
}
