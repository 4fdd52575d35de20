//! Benchmarks for play resolution.
//!
//! Single at-bats, state hashing, and whole games driven by a fixed manager.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use showdown::{
    DeterministicRng, GameId, RulesConfig, Side,
    game::{
        atbat::{BatterAction, PitcherAction},
        baserunning::ThrowChoice,
        card::{Card, CardRecord, ChartEntry, Position},
        lineup::{BenchPool, Lineup, LineupSlot, Team},
        machine::{Decision, Game, PendingStep},
    },
};

const POSITIONS: [Position; 9] = [
    Position::CenterField,
    Position::Shortstop,
    Position::FirstBase,
    Position::DesignatedHitter,
    Position::ThirdBase,
    Position::LeftField,
    Position::RightField,
    Position::Catcher,
    Position::SecondBase,
];

fn chart(columns: &[(&str, u32)]) -> Vec<ChartEntry> {
    columns
        .iter()
        .map(|(outcome, frequency)| ChartEntry { outcome: outcome.to_string(), frequency: *frequency })
        .collect()
}

fn team(name: &str, base: i32) -> Team {
    let batting_order = POSITIONS
        .iter()
        .enumerate()
        .map(|(i, position)| {
            let mut fielding_ratings = BTreeMap::new();
            if *position != Position::DesignatedHitter {
                fielding_ratings.insert(position.code().to_string(), 2);
            }
            let record = CardRecord {
                card_id: base + 1 + i as i32,
                name: format!("Player {}", base + 1 + i as i32),
                on_base: Some(9),
                speed: Some("B".to_string()),
                fielding_ratings,
                chart: chart(&[("SO", 4), ("GB", 4), ("FB", 3), ("BB", 2), ("1B", 4), ("2B", 2), ("HR", 1)]),
                ..CardRecord::default()
            };
            LineupSlot { card: Card::from_record(&record, 20).unwrap(), position: *position }
        })
        .collect();
    let pitcher = CardRecord {
        card_id: base + 50,
        name: format!("Pitcher {}", base + 50),
        control: Some(4),
        ip: Some(7),
        chart: chart(&[("PU", 2), ("SO", 5), ("GB", 6), ("FB", 4), ("BB", 1), ("1B", 2)]),
        ..CardRecord::default()
    };
    let lineup = Lineup::new(batting_order, Card::from_record(&pitcher, 20).unwrap()).unwrap();
    Team::new(name, lineup, BenchPool::default()).unwrap()
}

fn new_game(seed: u64) -> Game {
    Game::with_seed(GameId::from_bytes([7; 16]), seed, team("Away", 100), team("Home", 200), RulesConfig::default())
}

/// Pitch, swing, hold every runner.
fn next_decision(game: &Game) -> (Side, Decision) {
    let batting = game.state.batting_side();
    let fielding = game.state.fielding_side();
    match game.pending() {
        PendingStep::NextHalf => (batting, Decision::Pitch(PitcherAction::Pitch)),
        PendingStep::AtBat { pitcher: true, .. } => (fielding, Decision::Pitch(PitcherAction::Pitch)),
        PendingStep::AtBat { .. } | PendingStep::GameOver => (batting, Decision::Bat(BatterAction::Swing)),
        PendingStep::Offense(_) => (batting, Decision::SendRunners(BTreeMap::new())),
        PendingStep::Defense(_) => (fielding, Decision::Throw(ThrowChoice::NoThrow)),
    }
}

fn bench_at_bat(c: &mut Criterion) {
    let game = new_game(42);

    c.bench_function("at_bat", |b| {
        let mut rng = DeterministicRng::new(42);
        b.iter(|| {
            let mut game = game.clone();
            game.submit_pitcher_action(PitcherAction::Pitch, &mut rng).unwrap();
            let outcome = game.submit_batter_action(BatterAction::Swing, &mut rng).unwrap();
            black_box(outcome)
        });
    });
}

fn bench_state_hash(c: &mut Criterion) {
    let game = new_game(42);

    c.bench_function("state_hash", |b| {
        b.iter(|| black_box(black_box(&game.state).compute_hash()));
    });
}

fn bench_full_game(c: &mut Criterion) {
    c.bench_function("full_game", |b| {
        b.iter(|| {
            let mut game = new_game(black_box(42));
            let mut rng = DeterministicRng::new(42);
            while !game.state.is_over() {
                let (side, decision) = next_decision(&game);
                game.apply(side, &decision, &mut rng).unwrap();
            }
            black_box(game.state.compute_hash())
        });
    });
}

criterion_group!(benches, bench_at_bat, bench_state_hash, bench_full_game);
criterion_main!(benches);
