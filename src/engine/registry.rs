//! Game Registry
//!
//! Every live game, each behind its own lock:
//!
//! ```text
//! GameRegistry
//!   └─ RwLock<BTreeMap<GameId, Arc<GameHandle>>>
//!        └─ GameHandle
//!             ├─ Mutex<GameSession>        one writer per game
//!             ├─ watch::Sender<GameState>  latest state, read without the lock
//!             └─ broadcast::Sender<Event>  play-by-play fan-out
//! ```
//!
//! The map lock is only held to find a handle, so decisions for different
//! games never wait on each other. Persistence runs after a resolution is
//! published; a failed write never loses a resolution, it stays in the
//! session's outbox until [`GameRegistry::retry_pending`] gets it through.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::engine::protocol::{
    AtBatAction, BaserunningPayload, BaserunningStage, ClientRequest, Rejection, Resolution, ServerReply,
};
use crate::engine::session::{EngineError, GameSession};
use crate::game::card::CardId;
use crate::game::events::Event;
use crate::game::lineup::Team;
use crate::game::machine::{Decision, Game};
use crate::game::state::{GameId, GameState, Side};
use crate::game::substitution::Eligibility;
use crate::game::sync::{Reveal, SideView};
use crate::record::replay::verify_snapshot;
use crate::record::snapshot::{GameSetup, Snapshot};
use crate::record::store::{
    EventLog, GameStore, InMemoryEventLog, InMemoryGameStore, InMemorySnapshotStore, SnapshotStore,
};

// =============================================================================
// GAME HANDLE
// =============================================================================

/// One registered game.
#[derive(Debug)]
pub struct GameHandle {
    /// Game id
    pub game_id: GameId,
    session: Mutex<GameSession>,
    state_tx: watch::Sender<GameState>,
    events_tx: broadcast::Sender<Event>,
}

impl GameHandle {
    fn new(session: GameSession, event_buffer: usize) -> Self {
        let (state_tx, _) = watch::channel(session.state().clone());
        let (events_tx, _) = broadcast::channel(event_buffer);
        Self {
            game_id: session.game_id(),
            session: Mutex::new(session),
            state_tx,
            events_tx,
        }
    }

    /// Latest published state.
    pub fn latest(&self) -> GameState {
        self.state_tx.borrow().clone()
    }

    /// Follow state changes.
    pub fn watch(&self) -> watch::Receiver<GameState> {
        self.state_tx.subscribe()
    }

    /// Follow the play-by-play.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }

    fn publish(&self, resolution: &Resolution) {
        self.state_tx.send_replace(resolution.state.clone());
        for event in &resolution.events {
            // No subscribers is fine
            let _ = self.events_tx.send(event.clone());
        }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// All live games.
pub struct GameRegistry {
    games: RwLock<BTreeMap<GameId, Arc<GameHandle>>>,
    store: Arc<dyn GameStore>,
    events: Arc<dyn EventLog>,
    snapshots: Arc<dyn SnapshotStore>,
    config: EngineConfig,
}

impl GameRegistry {
    /// Registry backed by in-memory stores.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_stores(
            config,
            Arc::new(InMemoryGameStore::new()),
            Arc::new(InMemoryEventLog::new()),
            Arc::new(InMemorySnapshotStore::new()),
        )
    }

    /// Registry backed by the given stores.
    pub fn with_stores(
        config: EngineConfig,
        store: Arc<dyn GameStore>,
        events: Arc<dyn EventLog>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            games: RwLock::new(BTreeMap::new()),
            store,
            events,
            snapshots,
            config,
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of live games.
    pub async fn game_count(&self) -> usize {
        self.games.read().await.len()
    }

    /// Handle for a game.
    pub async fn handle(&self, game_id: GameId) -> Result<Arc<GameHandle>, EngineError> {
        let games = self.games.read().await;
        games.get(&game_id).cloned().ok_or(EngineError::UnknownGame(game_id))
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Create a game with a fresh id.
    pub async fn create_game(&self, away: Team, home: Team) -> Result<GameId, EngineError> {
        self.create_game_with_id(GameId::new(), away, home).await
    }

    /// Create a game with a chosen id.
    #[instrument(skip(self, away, home), fields(away = %away.name, home = %home.name))]
    pub async fn create_game_with_id(&self, game_id: GameId, away: Team, home: Team) -> Result<GameId, EngineError> {
        let setup = GameSetup::derived(game_id, away, home, self.config.rules.clone());
        self.create_game_from_setup(setup).await
    }

    /// Create a game from a full setup, carried-in pitcher fatigue included.
    #[instrument(skip(self, setup), fields(game_id = %setup.game_id))]
    pub async fn create_game_from_setup(&self, setup: GameSetup) -> Result<GameId, EngineError> {
        let game_id = setup.game_id;
        let seed = setup.seed;
        let session = GameSession::new(setup)?;
        let handle = Arc::new(GameHandle::new(session, self.config.event_buffer));

        {
            let mut games = self.games.write().await;
            if games.contains_key(&game_id) {
                return Err(EngineError::Setup(format!("game {game_id} already exists")));
            }
            games.insert(game_id, Arc::clone(&handle));
        }

        info!(%game_id, seed, "game created");
        let mut session = handle.session.lock().await;
        self.persist(&mut session);
        Ok(game_id)
    }

    /// Drop a game from memory. Stored records are kept.
    pub async fn remove_game(&self, game_id: GameId) -> bool {
        let removed = self.games.write().await.remove(&game_id).is_some();
        if removed {
            info!(%game_id, "game removed");
        }
        removed
    }

    // =========================================================================
    // DECISIONS
    // =========================================================================

    /// Apply one decision to a game, publish the result, then persist it.
    pub async fn submit(&self, game_id: GameId, side: Side, turn: u64, decision: Decision) -> Result<Resolution, EngineError> {
        let handle = self.handle(game_id).await?;
        let mut session = handle.session.lock().await;

        let resolution = session.submit(side, turn, decision)?;
        handle.publish(&resolution);
        self.persist(&mut session);
        Ok(resolution)
    }

    /// Submit a pitcher or batter decision.
    pub async fn submit_at_bat_decision(
        &self,
        game_id: GameId,
        side: Side,
        turn: u64,
        action: AtBatAction,
    ) -> Result<Resolution, EngineError> {
        self.submit(game_id, side, turn, action.into()).await
    }

    /// Submit a steal, runner sends, or a throw.
    pub async fn submit_baserunning_decision(
        &self,
        game_id: GameId,
        side: Side,
        turn: u64,
        stage: BaserunningStage,
        payload: BaserunningPayload,
    ) -> Result<Resolution, EngineError> {
        let decision = stage.decision(payload)?;
        self.submit(game_id, side, turn, decision).await
    }

    /// Submit a personnel change.
    pub async fn submit_substitution(
        &self,
        game_id: GameId,
        side: Side,
        turn: u64,
        incoming: CardId,
        outgoing: CardId,
    ) -> Result<Resolution, EngineError> {
        self.submit(game_id, side, turn, Decision::Substitute { incoming, outgoing }).await
    }

    /// Submit a fielding swap.
    pub async fn submit_position_swap(
        &self,
        game_id: GameId,
        side: Side,
        turn: u64,
        first: CardId,
        second: CardId,
    ) -> Result<Resolution, EngineError> {
        self.submit(game_id, side, turn, Decision::SwapPositions { first, second }).await
    }

    /// Answer one client request.
    pub async fn handle_request(&self, request: ClientRequest) -> ServerReply {
        let reply = match request {
            ClientRequest::SubmitAtBat { game_id, side, turn, action } => self
                .submit_at_bat_decision(game_id, side, turn, action)
                .await
                .map(ServerReply::Resolved),
            ClientRequest::SubmitBaserunning { game_id, side, turn, stage, payload } => self
                .submit_baserunning_decision(game_id, side, turn, stage, payload)
                .await
                .map(ServerReply::Resolved),
            ClientRequest::SubmitSubstitution { game_id, side, turn, incoming, outgoing } => self
                .submit_substitution(game_id, side, turn, incoming, outgoing)
                .await
                .map(ServerReply::Resolved),
            ClientRequest::SubmitPositionSwap { game_id, side, turn, first, second } => self
                .submit_position_swap(game_id, side, turn, first, second)
                .await
                .map(ServerReply::Resolved),
            ClientRequest::Acknowledge { game_id, side } => self
                .acknowledge(game_id, side)
                .await
                .map(|reveal| ServerReply::Revealed { reveal }),
            ClientRequest::View { game_id, side } => self.view(game_id, side).await.map(ServerReply::View),
        };
        reply.unwrap_or_else(|err| ServerReply::Rejected(Rejection::from(&err)))
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Side is ready to see its next play.
    pub async fn acknowledge(&self, game_id: GameId, side: Side) -> Result<Option<Reveal>, EngineError> {
        let handle = self.handle(game_id).await?;
        let mut session = handle.session.lock().await;
        Ok(session.acknowledge(side))
    }

    /// What a side should display.
    pub async fn view(&self, game_id: GameId, side: Side) -> Result<SideView, EngineError> {
        let handle = self.handle(game_id).await?;
        let session = handle.session.lock().await;
        Ok(session.view(side))
    }

    /// Latest authoritative state. Does not wait on a resolution in progress.
    pub async fn state(&self, game_id: GameId) -> Result<GameState, EngineError> {
        Ok(self.handle(game_id).await?.latest())
    }

    /// Copy of the rules engine, rosters included. Waits for any resolution
    /// in progress.
    pub async fn game(&self, game_id: GameId) -> Result<Game, EngineError> {
        let handle = self.handle(game_id).await?;
        let session = handle.session.lock().await;
        Ok(session.game().clone())
    }

    /// Advisory check for a personnel change.
    pub async fn eligibility(
        &self,
        game_id: GameId,
        side: Side,
        incoming: CardId,
        outgoing: CardId,
    ) -> Result<Eligibility, EngineError> {
        let handle = self.handle(game_id).await?;
        let session = handle.session.lock().await;
        Ok(session.eligibility(side, incoming, outgoing))
    }

    // =========================================================================
    // SNAPSHOTS AND PERSISTENCE
    // =========================================================================

    /// Snapshot a game and hand it to the snapshot store.
    ///
    /// The snapshot is returned even when the store refuses it.
    pub async fn snapshot(&self, game_id: GameId) -> Result<Snapshot, EngineError> {
        let handle = self.handle(game_id).await?;
        let snapshot = handle.session.lock().await.snapshot();
        if let Err(err) = self.snapshots.put(&snapshot) {
            warn!(%game_id, error = %err, "snapshot not stored");
        }
        debug!(%game_id, turn = snapshot.state.turn, hash = %snapshot.state_hash_hex(), "snapshot taken");
        Ok(snapshot)
    }

    /// Bring a game back from a snapshot after replaying its decision log.
    #[instrument(skip(self, snapshot), fields(game_id = %snapshot.game_id()))]
    pub async fn restore(&self, snapshot: Snapshot) -> Result<GameId, EngineError> {
        let game_id = snapshot.game_id();
        verify_snapshot(&snapshot).map_err(|e| EngineError::Setup(e.to_string()))?;
        let session = GameSession::restore(snapshot).map_err(|e| EngineError::Setup(e.to_string()))?;
        let handle = Arc::new(GameHandle::new(session, self.config.event_buffer));

        let mut games = self.games.write().await;
        if games.contains_key(&game_id) {
            return Err(EngineError::Setup(format!("game {game_id} already exists")));
        }
        games.insert(game_id, handle);
        info!(%game_id, "game restored");
        Ok(game_id)
    }

    /// Restore a game from the snapshot store.
    pub async fn resume(&self, game_id: GameId) -> Result<GameId, EngineError> {
        let snapshot = self
            .snapshots
            .get(game_id)
            .map_err(|e| EngineError::Setup(e.to_string()))?
            .ok_or(EngineError::UnknownGame(game_id))?;
        self.restore(snapshot).await
    }

    /// Push every game's unpersisted state and events again.
    ///
    /// Returns the number of events that reached the event log.
    pub async fn retry_pending(&self) -> usize {
        let handles: Vec<Arc<GameHandle>> = self.games.read().await.values().cloned().collect();
        let mut appended = 0;
        for handle in handles {
            let mut session = handle.session.lock().await;
            if session.has_unflushed() {
                appended += self.persist(&mut session);
            }
        }
        appended
    }

    fn persist(&self, session: &mut GameSession) -> usize {
        match session.flush(self.store.as_ref(), self.events.as_ref()) {
            Ok(appended) => appended,
            Err(err) => {
                warn!(
                    game_id = %session.game_id(),
                    error = %err,
                    queued = session.outbox_len(),
                    "persistence failed, will retry"
                );
                0
            }
        }
    }
}

impl std::fmt::Debug for GameRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameRegistry").field("config", &self.config).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::protocol::ErrorCode;
    use crate::engine::session::tests::autoplay;
    use crate::game::atbat::{BatterAction, PitcherAction};
    use crate::game::lineup::tests::sample_team;
    use crate::game::machine::StepKind;
    use crate::record::store::tests::FlakyEventLog;

    fn registry() -> GameRegistry {
        GameRegistry::new(EngineConfig::default())
    }

    async fn new_game(registry: &GameRegistry, byte: u8) -> GameId {
        registry
            .create_game_with_id(GameId::from_bytes([byte; 16]), sample_team("Away", 100), sample_team("Home", 200))
            .await
            .unwrap()
    }

    /// Let the simple manager make the next decision.
    async fn step(registry: &GameRegistry, game_id: GameId) -> Resolution {
        let handle = registry.handle(game_id).await.unwrap();
        let (side, decision, turn) = {
            let session = handle.session.lock().await;
            let (side, decision) = autoplay(session.game());
            (side, decision, session.state().turn)
        };
        registry.submit(game_id, side, turn, decision).await.unwrap()
    }

    #[tokio::test]
    async fn test_requests_resolve_an_at_bat() {
        let registry = registry();
        let game_id = new_game(&registry, 1).await;

        let reply = registry
            .handle_request(ClientRequest::SubmitAtBat {
                game_id,
                side: Side::Home,
                turn: 0,
                action: AtBatAction::Pitcher(PitcherAction::IntentionalWalk),
            })
            .await;
        let ServerReply::Resolved(resolution) = reply else {
            panic!("expected a resolution, got {reply:?}");
        };
        assert_eq!(resolution.kind, StepKind::AtBat);
        assert_eq!(resolution.messages(), vec!["Top of the 1st.", "Batter 101 is intentionally walked."]);

        // Watch channel already has the new state
        let state = registry.state(game_id).await.unwrap();
        assert_eq!(state.turn, 1);

        let reply = registry.handle_request(ClientRequest::View { game_id, side: Side::Away }).await;
        assert!(matches!(reply, ServerReply::View(view) if view.pending == 1));

        let reply = registry.handle_request(ClientRequest::Acknowledge { game_id, side: Side::Away }).await;
        assert!(matches!(reply, ServerReply::Revealed { reveal: Some(r) } if r.turn == 1));
    }

    #[tokio::test]
    async fn test_stale_and_unknown_rejected() {
        let registry = registry();
        let game_id = new_game(&registry, 2).await;

        let reply = registry
            .handle_request(ClientRequest::SubmitAtBat {
                game_id,
                side: Side::Away,
                turn: 3,
                action: AtBatAction::Batter(BatterAction::Swing),
            })
            .await;
        let ServerReply::Rejected(rejection) = reply else {
            panic!("expected a rejection");
        };
        assert_eq!(rejection.code, ErrorCode::Stale);
        assert_eq!(rejection.state.map(|s| s.turn), Some(0));

        let missing = GameId::from_bytes([99; 16]);
        let reply = registry.handle_request(ClientRequest::View { game_id: missing, side: Side::Home }).await;
        assert!(matches!(reply, ServerReply::Rejected(r) if r.code == ErrorCode::UnknownGame));
    }

    #[tokio::test]
    async fn test_duplicate_game_id_rejected() {
        let registry = registry();
        new_game(&registry, 3).await;
        let err = registry
            .create_game_with_id(GameId::from_bytes([3; 16]), sample_team("Away", 100), sample_team("Home", 200))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Setup);
        assert_eq!(registry.game_count().await, 1);
    }

    #[tokio::test]
    async fn test_setup_with_carried_fatigue_creates_game() {
        let registry = registry();
        let setup = GameSetup::derived(
            GameId::from_bytes([4; 16]),
            sample_team("Away", 100),
            sample_team("Home", 200),
            EngineConfig::default().rules,
        )
        .with_carried_fatigue(CardId(150), -4);
        let game_id = registry.create_game_from_setup(setup).await.unwrap();

        let state = registry.state(game_id).await.unwrap();
        assert_eq!(state.pitcher_stats[&CardId(150)].fatigue_modifier, -4);
        assert!(state.pitcher_stats[&CardId(150)].is_fatigued());
    }

    #[tokio::test]
    async fn test_events_broadcast_to_subscribers() {
        let registry = registry();
        let game_id = new_game(&registry, 4).await;
        let handle = registry.handle(game_id).await.unwrap();
        let mut events = handle.subscribe();
        let mut states = handle.watch();

        registry
            .submit_at_bat_decision(game_id, Side::Home, 0, AtBatAction::Pitcher(PitcherAction::IntentionalWalk))
            .await
            .unwrap();

        assert_eq!(events.recv().await.unwrap().message, "Top of the 1st.");
        assert_eq!(events.recv().await.unwrap().sequence, 1);
        states.changed().await.unwrap();
        assert_eq!(states.borrow().turn, 1);
    }

    #[tokio::test]
    async fn test_failed_appends_retried() {
        let log = Arc::new(FlakyEventLog::failing());
        let store = Arc::new(InMemoryGameStore::new());
        let registry = GameRegistry::with_stores(
            EngineConfig::default(),
            store.clone(),
            log.clone(),
            Arc::new(InMemorySnapshotStore::new()),
        );
        let game_id = new_game(&registry, 5).await;

        // Resolutions keep coming while the log is down
        for _ in 0..4 {
            step(&registry, game_id).await;
        }
        assert_eq!(log.size(game_id).unwrap(), 0);
        assert_eq!(store.load(game_id).unwrap().map(|s| s.turn), Some(registry.state(game_id).await.unwrap().turn));

        log.recover();
        let appended = registry.retry_pending().await;
        assert!(appended > 0);
        assert_eq!(log.size(game_id).unwrap(), appended as u64);
        assert_eq!(registry.retry_pending().await, 0);
    }

    #[tokio::test]
    async fn test_snapshot_resume_after_removal() {
        let registry = registry();
        let game_id = new_game(&registry, 6).await;
        for _ in 0..15 {
            step(&registry, game_id).await;
        }
        let snapshot = registry.snapshot(game_id).await.unwrap();
        let before = registry.state(game_id).await.unwrap();

        assert!(registry.remove_game(game_id).await);
        assert!(matches!(registry.state(game_id).await, Err(EngineError::UnknownGame(_))));

        registry.resume(game_id).await.unwrap();
        assert_eq!(registry.state(game_id).await.unwrap(), before);
        assert_eq!(snapshot.state, before);

        // Play carries on from where it stopped
        let next = step(&registry, game_id).await;
        assert!(next.turn >= before.turn);
    }

    #[tokio::test]
    async fn test_tampered_snapshot_refused() {
        let registry = registry();
        let game_id = new_game(&registry, 7).await;
        for _ in 0..6 {
            step(&registry, game_id).await;
        }
        let mut snapshot = registry.snapshot(game_id).await.unwrap();
        registry.remove_game(game_id).await;

        // Consistent hash, but the decision log no longer leads there
        snapshot.decisions.truncate(2);
        let err = registry.restore(snapshot).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Setup);
    }

    #[tokio::test]
    async fn test_games_progress_independently() {
        let registry = Arc::new(registry());
        let first = new_game(&registry, 8).await;
        let second = new_game(&registry, 9).await;

        let tasks: Vec<_> = [first, second]
            .into_iter()
            .map(|game_id| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    for _ in 0..30 {
                        step(&registry, game_id).await;
                    }
                    registry.state(game_id).await.unwrap()
                })
            })
            .collect();

        for task in tasks {
            let state = task.await.unwrap();
            assert!(state.turn > 0);
        }

        // Same manager, different seeds: the games are not copies
        let a = registry.state(first).await.unwrap();
        let b = registry.state(second).await.unwrap();
        assert_ne!(a.seed, b.seed);
    }
}
