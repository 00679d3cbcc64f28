//! Game orchestrator: from roster handoff to a finished match
//!
//! Takes completed rosters from the queue, balances them into teams, finds
//! and configures a free game server, and drives the game's lifecycle from
//! the match telemetry. Per-game mutations are serialized behind one lock;
//! control-protocol IO never runs while holding it.

use crate::balance::{extract_friends, pick_teams, PlayerSlot};
use crate::config::{OrchestratorSettings, QueueConfig, VoiceSettings};
use crate::error::{PickupError, Result};
use crate::game::model::{Game, GameState};
use crate::game::store::GameStore;
use crate::notify::PushChannel;
use crate::players::{PlayerDirectory, SkillProvider};
use crate::queue::{GameLauncher, QueueSlot};
use crate::servers::control::ControlConnector;
use crate::servers::model::GameServer;
use crate::servers::pool::ServerPool;
use crate::servers::telemetry::TelemetryEvent;
use crate::types::{GameId, PlayerStatus, ServerId};
use crate::utils::{current_timestamp, generate_connect_password, generate_game_id};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

const CONNECT_PASSWORD_LENGTH: usize = 10;
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5 * 60);

/// Drives games from creation through launch, play and cleanup
#[derive(Clone)]
pub struct GameOrchestrator {
    store: Arc<dyn GameStore>,
    pool: ServerPool,
    directory: Arc<dyn PlayerDirectory>,
    skills: Arc<dyn SkillProvider>,
    push: Arc<dyn PushChannel>,
    connector: Arc<dyn ControlConnector>,
    queue_config: QueueConfig,
    settings: OrchestratorSettings,
    control_timeout: Duration,
    /// Address game servers forward their logs to
    telemetry_address: String,
    voice: VoiceSettings,
    /// Serializes all per-game state mutations
    game_lock: Arc<Mutex<()>>,
}

impl GameOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn GameStore>,
        pool: ServerPool,
        directory: Arc<dyn PlayerDirectory>,
        skills: Arc<dyn SkillProvider>,
        push: Arc<dyn PushChannel>,
        connector: Arc<dyn ControlConnector>,
        queue_config: QueueConfig,
        settings: OrchestratorSettings,
        control_timeout: Duration,
        telemetry_address: String,
        voice: VoiceSettings,
    ) -> Self {
        Self {
            store,
            pool,
            directory,
            skills,
            push,
            connector,
            queue_config,
            settings,
            control_timeout,
            telemetry_address,
            voice,
            game_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create a game from a completed queue roster and start launching it
    pub async fn create(&self, slots: Vec<QueueSlot>, map: String) -> Result<Game> {
        if slots.len() != self.queue_config.slot_count()
            || slots.iter().any(|slot| !slot.is_taken())
        {
            return Err(PickupError::RosterIncomplete.into());
        }

        let mut roster_pool = Vec::with_capacity(slots.len());
        for slot in &slots {
            if !self.queue_config.is_known_class(&slot.game_class) {
                return Err(PickupError::InvalidGameClass {
                    game_class: slot.game_class.clone(),
                }
                .into());
            }
            let player_id = slot
                .player_id
                .clone()
                .ok_or(PickupError::RosterIncomplete)?;
            let skill = self.skills.skill(&player_id, &slot.game_class).await?;
            roster_pool.push(PlayerSlot {
                player_id,
                game_class: slot.game_class.clone(),
                skill,
            });
        }

        let friends = extract_friends(&slots, self.queue_config.friend_class.as_deref());
        let roster = pick_teams(
            &roster_pool,
            &self.queue_config.class_names(),
            &friends,
        )?;

        let number = self.store.max_game_number().await? + 1;
        let game = Game::new(
            generate_game_id(),
            number,
            current_timestamp(),
            map,
            roster,
        );
        self.store.insert(game.clone()).await?;
        info!("Created game #{} ({}) on {}", game.number, game.id, game.map);
        self.broadcast("game.created", serde_json::json!(game)).await;

        let orchestrator = self.clone();
        let game_id = game.id;
        tokio::spawn(async move {
            orchestrator.launch(game_id).await;
        });

        Ok(game)
    }

    /// Find a free server for the game and configure it, retrying with
    /// backoff up to the configured attempt limit
    pub async fn launch(&self, game_id: GameId) {
        let mut delay = self.settings.launch_retry_delay();

        for attempt in 1..=self.settings.launch_max_attempts {
            match self.store.find(game_id).await {
                Ok(Some(game)) if !game.state.is_terminal() => {}
                Ok(_) => return,
                Err(e) => {
                    error!("Failed to load game {}: {}", game_id, e);
                    return;
                }
            }

            match self.pool.get_free_server().await {
                Ok(Some(server)) => match self.pool.assign(server.id, game_id).await {
                    Ok(_) => {
                        self.configure_and_record(game_id, server).await;
                        return;
                    }
                    Err(e) => debug!("Lost server {} to a concurrent launch: {}", server.name, e),
                },
                Ok(None) => {}
                Err(e) => error!("Free-server lookup failed: {}", e),
            }

            warn!(
                "No server available for game {} (attempt {}/{})",
                game_id, attempt, self.settings.launch_max_attempts
            );
            if attempt < self.settings.launch_max_attempts {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_RETRY_DELAY);
            }
        }

        self.interrupt(game_id, "no server available").await;
    }

    async fn configure_and_record(&self, game_id: GameId, server: GameServer) {
        let game = match self.store.find(game_id).await {
            Ok(Some(game)) => game,
            Ok(None) => return,
            Err(e) => {
                error!("Failed to load game {}: {}", game_id, e);
                return;
            }
        };

        match self.configure_server(&server, &game).await {
            Ok(connect_string) => {
                // The game may have been force-ended while the server was
                // being configured; never revive a terminal game
                let stale = {
                    let _guard = self.game_lock.lock().await;
                    let Ok(Some(mut game)) = self.store.find(game_id).await else {
                        return;
                    };
                    if game.state.is_terminal() {
                        true
                    } else {
                        game.connect_string = Some(connect_string);
                        game.voice_url = Some(self.resolve_voice_url(&server));
                        if let Err(e) = self.store.save(&game).await {
                            error!("Failed to save game {}: {}", game_id, e);
                            return;
                        }
                        info!(
                            "Game #{} is live on {} ({})",
                            game.number, server.name, game.map
                        );
                        self.push_game_updated(&game).await;
                        false
                    }
                };

                if stale {
                    debug!("Game {} ended during configuration of {}", game_id, server.name);
                    if let Err(e) = self.cleanup_server(&server).await {
                        warn!("Cleanup of {} failed: {}", server.name, e);
                    }
                    self.pool.release(game_id).await;
                }
            }
            Err(e) => {
                error!("Failed to configure {} for game {}: {}", server.name, game_id, e);
                self.interrupt(game_id, &format!("server configuration failed: {}", e))
                    .await;
                if let Err(e) = self.cleanup_server(&server).await {
                    warn!("Cleanup of {} failed: {}", server.name, e);
                }
                self.pool.release(game_id).await;
            }
        }
    }

    /// Run the full configuration command sequence and return the connect
    /// string for players
    async fn configure_server(&self, server: &GameServer, game: &Game) -> Result<String> {
        let mut session = self
            .connector
            .connect(
                &server.address,
                server.port,
                &server.control_secret,
                self.control_timeout,
            )
            .await?;

        session.send("kickall").await?;
        session.send(&format!("changelevel {}", game.map)).await?;
        for config in &self.queue_config.exec_configs {
            session.send(&format!("exec {}", config)).await?;
        }
        session
            .send(&format!("logaddress_add {}", self.telemetry_address))
            .await?;

        let password = generate_connect_password(CONNECT_PASSWORD_LENGTH);
        session.send(&format!("sv_password {}", password)).await?;

        for slot in game.slots.iter().filter(|s| s.status != PlayerStatus::Replaced) {
            let name = match self.directory.get_player(&slot.player_id).await {
                Ok(Some(profile)) => profile.display_name,
                _ => slot.player_id.clone(),
            };
            session
                .send(&format!(
                    "sm_game_player_add {} -name \"{}\" -team {} -class {}",
                    slot.player_id,
                    name,
                    slot.team_id + 2,
                    slot.game_class
                ))
                .await?;
        }

        session.close().await?;
        Ok(format!(
            "connect {}:{}; password {}",
            server.address, server.port, password
        ))
    }

    /// Undo the per-game server configuration
    async fn cleanup_server(&self, server: &GameServer) -> Result<()> {
        let mut session = self
            .connector
            .connect(
                &server.address,
                server.port,
                &server.control_secret,
                self.control_timeout,
            )
            .await?;
        session
            .send(&format!("logaddress_del {}", self.telemetry_address))
            .await?;
        session.send("sm_game_player_delall").await?;
        session.close().await
    }

    fn resolve_voice_url(&self, server: &GameServer) -> String {
        format!(
            "mumble://{}/{}/{}",
            self.voice.server_url, self.voice.channel, server.voice_channel_tag
        )
    }

    /// The match on the assigned server went live
    pub async fn on_match_started(&self, server_id: ServerId) -> Result<()> {
        let _guard = self.game_lock.lock().await;
        let Some(game_id) = self.pool.get_assigned_game(server_id).await else {
            debug!("Match started on unassigned server {}", server_id);
            return Ok(());
        };
        let Some(mut game) = self.store.find(game_id).await? else {
            return Ok(());
        };
        if game.state != GameState::Launching {
            return Ok(());
        }

        game.state = GameState::Started;
        self.store.save(&game).await?;
        info!("Game #{} started", game.number);
        self.push_game_updated(&game).await;
        Ok(())
    }

    /// The match on the assigned server finished; cleanup is deferred so
    /// that late log uploads still reach us
    pub async fn on_match_ended(&self, server_id: ServerId) -> Result<()> {
        let _guard = self.game_lock.lock().await;
        let Some(game_id) = self.pool.get_assigned_game(server_id).await else {
            debug!("Match ended on unassigned server {}", server_id);
            return Ok(());
        };
        let Some(mut game) = self.store.find(game_id).await? else {
            return Ok(());
        };
        if game.state.is_terminal() {
            return Ok(());
        }

        game.state = GameState::Ended;
        game.connect_string = None;
        self.store.save(&game).await?;
        info!("Game #{} ended", game.number);
        self.push_game_updated(&game).await;

        let orchestrator = self.clone();
        let delay = self.settings.cleanup_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(server) = orchestrator.pool.get_assigned_server(game_id).await {
                if let Err(e) = orchestrator.cleanup_server(&server).await {
                    warn!("Cleanup of {} failed: {}", server.name, e);
                }
            }
            orchestrator.pool.release(game_id).await;
        });
        Ok(())
    }

    /// The server's match log was archived
    pub async fn on_logs_uploaded(&self, server_id: ServerId, logs_url: String) -> Result<()> {
        let _guard = self.game_lock.lock().await;
        let Some(game_id) = self.pool.get_assigned_game(server_id).await else {
            debug!("Logs uploaded for unassigned server {}", server_id);
            return Ok(());
        };
        let Some(mut game) = self.store.find(game_id).await? else {
            return Ok(());
        };

        info!("Game #{} logs available at {}", game.number, logs_url);
        game.logs_url = Some(logs_url);
        self.store.save(&game).await?;
        self.push_game_updated(&game).await;
        Ok(())
    }

    /// Abort the game immediately; cleanup failures are logged, not surfaced
    pub async fn force_end(&self, game_id: GameId, reason: &str) -> Result<()> {
        {
            let _guard = self.game_lock.lock().await;
            let mut game =
                self.store
                    .find(game_id)
                    .await?
                    .ok_or_else(|| PickupError::GameNotFound {
                        game_id: game_id.to_string(),
                    })?;
            if game.state.is_terminal() {
                return Ok(());
            }

            game.state = GameState::Interrupted;
            game.error = Some(reason.to_string());
            game.connect_string = None;
            self.store.save(&game).await?;
            info!("Game #{} force-ended: {}", game.number, reason);
            self.push_game_updated(&game).await;
        }

        if let Some(server) = self.pool.get_assigned_server(game_id).await {
            if let Err(e) = self.cleanup_server(&server).await {
                warn!("Cleanup of {} failed: {}", server.name, e);
            }
        }
        self.pool.release(game_id).await;
        Ok(())
    }

    /// Flag the player's roster entry as needing a substitute
    pub async fn request_substitute(&self, game_id: GameId, player_id: &str) -> Result<()> {
        let _guard = self.game_lock.lock().await;
        let mut game =
            self.store
                .find(game_id)
                .await?
                .ok_or_else(|| PickupError::GameNotFound {
                    game_id: game_id.to_string(),
                })?;
        let slot = game
            .slots
            .iter_mut()
            .find(|s| s.player_id == player_id)
            .ok_or_else(|| PickupError::PlayerNotInGame {
                player_id: player_id.to_string(),
            })?;

        match slot.status {
            PlayerStatus::Replaced => Err(PickupError::PlayerAlreadyReplaced {
                player_id: player_id.to_string(),
            }
            .into()),
            PlayerStatus::AwaitingSubstitute => Ok(()),
            PlayerStatus::Active => {
                slot.status = PlayerStatus::AwaitingSubstitute;
                self.store.save(&game).await?;
                info!("Game #{}: substitute requested for {}", game.number, player_id);
                self.push_game_updated(&game).await;
                Ok(())
            }
        }
    }

    /// Withdraw a pending substitute request
    pub async fn cancel_substitute(&self, game_id: GameId, player_id: &str) -> Result<()> {
        let _guard = self.game_lock.lock().await;
        let mut game =
            self.store
                .find(game_id)
                .await?
                .ok_or_else(|| PickupError::GameNotFound {
                    game_id: game_id.to_string(),
                })?;
        let slot = game
            .slots
            .iter_mut()
            .find(|s| s.player_id == player_id)
            .ok_or_else(|| PickupError::PlayerNotInGame {
                player_id: player_id.to_string(),
            })?;

        match slot.status {
            PlayerStatus::Replaced => Err(PickupError::PlayerAlreadyReplaced {
                player_id: player_id.to_string(),
            }
            .into()),
            PlayerStatus::Active => Ok(()),
            PlayerStatus::AwaitingSubstitute => {
                slot.status = PlayerStatus::Active;
                self.store.save(&game).await?;
                self.push_game_updated(&game).await;
                Ok(())
            }
        }
    }

    /// Re-run cleanup and configuration on the game's assigned server
    pub async fn reinitialize(&self, game_id: GameId) -> Result<()> {
        let server = {
            let _guard = self.game_lock.lock().await;
            let mut game =
                self.store
                    .find(game_id)
                    .await?
                    .ok_or_else(|| PickupError::GameNotFound {
                        game_id: game_id.to_string(),
                    })?;
            if game.state.is_terminal() {
                return Err(PickupError::GameNotFound {
                    game_id: game_id.to_string(),
                }
                .into());
            }
            let server = self.pool.get_assigned_server(game_id).await.ok_or_else(|| {
                PickupError::ServerNotFound {
                    server_id: format!("for game {}", game_id),
                }
            })?;

            game.connect_string = None;
            self.store.save(&game).await?;
            self.push_game_updated(&game).await;
            server
        };

        info!("Reinitializing game {} on {}", game_id, server.name);
        if let Err(e) = self.cleanup_server(&server).await {
            warn!("Cleanup of {} failed: {}", server.name, e);
        }
        self.configure_and_record(game_id, server).await;
        Ok(())
    }

    /// Dispatch one telemetry event to the matching lifecycle handler
    pub async fn handle_telemetry(&self, event: TelemetryEvent) {
        let result = match event {
            TelemetryEvent::MatchStarted { server_id } => self.on_match_started(server_id).await,
            TelemetryEvent::MatchEnded { server_id } => self.on_match_ended(server_id).await,
            TelemetryEvent::LogsUploaded {
                server_id,
                logs_url,
            } => self.on_logs_uploaded(server_id, logs_url).await,
        };
        if let Err(e) = result {
            error!("Failed to handle telemetry event: {}", e);
        }
    }

    /// Consume the telemetry stream until it closes
    pub async fn run_telemetry(&self, mut events: mpsc::Receiver<TelemetryEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_telemetry(event).await;
        }
    }

    async fn interrupt(&self, game_id: GameId, reason: &str) {
        let _guard = self.game_lock.lock().await;
        let game = match self.store.find(game_id).await {
            Ok(Some(game)) if !game.state.is_terminal() => game,
            Ok(_) => return,
            Err(e) => {
                error!("Failed to load game {}: {}", game_id, e);
                return;
            }
        };

        let mut game = game;
        game.state = GameState::Interrupted;
        game.error = Some(reason.to_string());
        game.connect_string = None;
        if let Err(e) = self.store.save(&game).await {
            error!("Failed to save game {}: {}", game_id, e);
            return;
        }
        warn!("Game #{} interrupted: {}", game.number, reason);
        self.push_game_updated(&game).await;
    }

    async fn push_game_updated(&self, game: &Game) {
        self.broadcast("game.updated", serde_json::json!(game)).await;
    }

    async fn broadcast(&self, event: &str, payload: serde_json::Value) {
        if let Err(e) = self.push.broadcast(event, payload).await {
            warn!("Failed to push {} event: {}", event, e);
        }
    }
}

#[async_trait]
impl GameLauncher for GameOrchestrator {
    async fn active_game_for_player(&self, player_id: &str) -> Result<Option<GameId>> {
        Ok(self
            .store
            .active_game_for_player(player_id)
            .await?
            .map(|game| game.id))
    }

    async fn launch_roster(&self, slots: Vec<QueueSlot>, map: String) -> Result<GameId> {
        let game = self.create(slots, map).await?;
        Ok(game.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::game::store::InMemoryGameStore;
    use crate::notify::MockPushChannel;
    use crate::players::{InMemoryPlayerDirectory, StaticSkillProvider};
    use crate::queue::build_slots;
    use crate::servers::control::MockControlConnector;
    use crate::servers::model::ServerDescriptor;
    use crate::types::PlayerProfile;

    struct Harness {
        orchestrator: GameOrchestrator,
        store: Arc<InMemoryGameStore>,
        pool: ServerPool,
        push: Arc<MockPushChannel>,
        connector: Arc<MockControlConnector>,
        directory: Arc<InMemoryPlayerDirectory>,
    }

    fn harness(settings: OrchestratorSettings) -> Harness {
        let store = Arc::new(InMemoryGameStore::new());
        let connector = Arc::new(MockControlConnector::new());
        let pool = ServerPool::new(connector.clone(), Duration::from_secs(1));
        let directory = Arc::new(InMemoryPlayerDirectory::new());
        let push = Arc::new(MockPushChannel::new());
        let config = AppConfig::default();
        let orchestrator = GameOrchestrator::new(
            store.clone(),
            pool.clone(),
            directory.clone(),
            Arc::new(StaticSkillProvider::new()),
            push.clone(),
            connector.clone(),
            QueueConfig::sixes(),
            settings,
            Duration::from_secs(1),
            config.telemetry.public_address.clone(),
            config.voice,
        );
        Harness {
            orchestrator,
            store,
            pool,
            push,
            connector,
            directory,
        }
    }

    fn full_roster(directory: &InMemoryPlayerDirectory) -> Vec<QueueSlot> {
        let mut slots = build_slots(&QueueConfig::sixes());
        for (i, slot) in slots.iter_mut().enumerate() {
            let id = format!("p{}", i);
            directory.add_player(PlayerProfile {
                id: id.clone(),
                display_name: id.to_uppercase(),
                role: None,
            });
            slot.player_id = Some(id);
        }
        slots
    }

    async fn add_server(pool: &ServerPool, name: &str) -> GameServer {
        pool.add_server(ServerDescriptor {
            name: name.to_string(),
            address: "127.0.0.1".to_string(),
            port: 27015,
            control_secret: "secret".to_string(),
            voice_channel_tag: name.to_string(),
        })
        .await
        .unwrap()
    }

    async fn wait_for<F>(mut condition: F)
    where
        F: FnMut() -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send>>,
    {
        for _ in 0..200 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_create_rejects_incomplete_roster() {
        let h = harness(OrchestratorSettings::default());
        let slots = build_slots(&QueueConfig::sixes());
        let err = h
            .orchestrator
            .create(slots, "cp_badlands".to_string())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PickupError>(),
            Some(PickupError::RosterIncomplete)
        ));
    }

    #[tokio::test]
    async fn test_create_balances_and_numbers_games() {
        let h = harness(OrchestratorSettings::default());
        let roster = full_roster(&h.directory);

        let game = h
            .orchestrator
            .create(roster, "cp_process_final".to_string())
            .await
            .unwrap();

        assert_eq!(game.number, 1);
        assert_eq!(game.state, GameState::Launching);
        assert_eq!(game.slots.len(), 12);
        for team in [0, 1] {
            assert_eq!(game.slots.iter().filter(|s| s.team_id == team).count(), 6);
        }
        assert_eq!(h.push.events_named("game.created").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_configures_server_and_records_connect_string() {
        let h = harness(OrchestratorSettings::default());
        let server = add_server(&h.pool, "alpha").await;
        h.connector.clear();
        let roster = full_roster(&h.directory);

        let game = h
            .orchestrator
            .create(roster, "cp_process_final".to_string())
            .await
            .unwrap();

        let store = h.store.clone();
        let game_id = game.id;
        wait_for(move || {
            let store = store.clone();
            Box::pin(async move {
                store
                    .find(game_id)
                    .await
                    .unwrap()
                    .and_then(|g| g.connect_string)
                    .is_some()
            })
        })
        .await;

        let launched = h.store.find(game.id).await.unwrap().unwrap();
        let connect = launched.connect_string.unwrap();
        assert!(connect.starts_with("connect 127.0.0.1:27015; password "));
        assert_eq!(
            launched.voice_url.as_deref(),
            Some("mumble://voice.localhost/Pickups/alpha")
        );
        assert_eq!(h.pool.get_assigned_game(server.id).await, Some(game.id));

        let commands = h.connector.commands();
        assert_eq!(commands[0], "kickall");
        assert_eq!(commands[1], "changelevel cp_process_final");
        assert_eq!(commands[2], "exec etf2l_6v6_5cp");
        assert!(commands[3].starts_with("logaddress_add "));
        assert!(commands[4].starts_with("sv_password "));
        assert_eq!(
            commands
                .iter()
                .filter(|c| c.starts_with("sm_game_player_add "))
                .count(),
            12
        );
        // Team indices on the server are offset by two
        assert!(commands
            .iter()
            .any(|c| c.starts_with("sm_game_player_add p0 -name \"P0\" -team ")));
        assert!(commands.iter().all(|c| !c.contains("-team 0")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_interrupts_after_exhausting_attempts() {
        let h = harness(OrchestratorSettings {
            launch_retry_delay_ms: 100,
            launch_max_attempts: 3,
            cleanup_delay_seconds: 1,
        });
        let roster = full_roster(&h.directory);
        let game = h
            .orchestrator
            .create(roster, "cp_badlands".to_string())
            .await
            .unwrap();

        let store = h.store.clone();
        let game_id = game.id;
        wait_for(move || {
            let store = store.clone();
            Box::pin(async move {
                store
                    .find(game_id)
                    .await
                    .unwrap()
                    .map(|g| g.state == GameState::Interrupted)
                    .unwrap_or(false)
            })
        })
        .await;

        let interrupted = h.store.find(game.id).await.unwrap().unwrap();
        assert_eq!(interrupted.error.as_deref(), Some("no server available"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_lifecycle_is_idempotent() {
        let h = harness(OrchestratorSettings {
            launch_retry_delay_ms: 100,
            launch_max_attempts: 3,
            cleanup_delay_seconds: 1,
        });
        let server = add_server(&h.pool, "alpha").await;
        let roster = full_roster(&h.directory);
        let game = h
            .orchestrator
            .create(roster, "cp_badlands".to_string())
            .await
            .unwrap();

        let store = h.store.clone();
        let game_id = game.id;
        wait_for(move || {
            let store = store.clone();
            Box::pin(async move {
                store
                    .find(game_id)
                    .await
                    .unwrap()
                    .and_then(|g| g.connect_string)
                    .is_some()
            })
        })
        .await;

        // Started events on an already started game change nothing
        h.orchestrator.on_match_started(server.id).await.unwrap();
        h.orchestrator.on_match_started(server.id).await.unwrap();
        let started = h.store.find(game.id).await.unwrap().unwrap();
        assert_eq!(started.state, GameState::Started);

        h.orchestrator
            .on_logs_uploaded(server.id, "http://logs.tf/123".to_string())
            .await
            .unwrap();

        h.orchestrator.on_match_ended(server.id).await.unwrap();
        let ended = h.store.find(game.id).await.unwrap().unwrap();
        assert_eq!(ended.state, GameState::Ended);
        assert!(ended.connect_string.is_none());
        assert_eq!(ended.logs_url.as_deref(), Some("http://logs.tf/123"));

        // The server is released after the cooldown, then the duplicate
        // ended event finds no assignment and is dropped
        let pool = h.pool.clone();
        let server_id = server.id;
        wait_for(move || {
            let pool = pool.clone();
            Box::pin(async move { pool.get_assigned_game(server_id).await.is_none() })
        })
        .await;
        h.orchestrator.on_match_ended(server.id).await.unwrap();
        assert_eq!(
            h.store.find(game.id).await.unwrap().unwrap().state,
            GameState::Ended
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_end_releases_server_even_when_cleanup_fails() {
        let h = harness(OrchestratorSettings::default());
        let server = add_server(&h.pool, "alpha").await;
        let roster = full_roster(&h.directory);
        let game = h
            .orchestrator
            .create(roster, "cp_badlands".to_string())
            .await
            .unwrap();

        let store = h.store.clone();
        let game_id = game.id;
        wait_for(move || {
            let store = store.clone();
            Box::pin(async move {
                store
                    .find(game_id)
                    .await
                    .unwrap()
                    .and_then(|g| g.connect_string)
                    .is_some()
            })
        })
        .await;

        h.connector.set_refuse_connections(true);
        h.orchestrator
            .force_end(game.id, "ended by admin")
            .await
            .unwrap();

        let forced = h.store.find(game.id).await.unwrap().unwrap();
        assert_eq!(forced.state, GameState::Interrupted);
        assert_eq!(forced.error.as_deref(), Some("ended by admin"));
        assert!(h.pool.get_assigned_game(server.id).await.is_none());

        // A second force end is a no-op
        h.orchestrator
            .force_end(game.id, "again")
            .await
            .unwrap();
        assert_eq!(
            h.store
                .find(game.id)
                .await
                .unwrap()
                .unwrap()
                .error
                .as_deref(),
            Some("ended by admin")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_end_during_configuration_is_not_overwritten() {
        let h = harness(OrchestratorSettings::default());
        let server = add_server(&h.pool, "alpha").await;
        h.connector.clear();
        h.connector.set_command_delay(Duration::from_millis(500));
        let roster = full_roster(&h.directory);
        let game = h
            .orchestrator
            .create(roster, "cp_process_final".to_string())
            .await
            .unwrap();

        // Wait until the configuration sequence is in flight
        let connector = h.connector.clone();
        wait_for(move || {
            let connector = connector.clone();
            Box::pin(async move { connector.commands().iter().any(|c| c == "kickall") })
        })
        .await;

        h.orchestrator
            .force_end(game.id, "ended by admin")
            .await
            .unwrap();
        h.connector.set_command_delay(Duration::from_millis(0));

        // Let the stalled configuration task run to completion
        let connector = h.connector.clone();
        wait_for(move || {
            let connector = connector.clone();
            Box::pin(async move {
                connector
                    .commands()
                    .iter()
                    .filter(|c| c.starts_with("sm_game_player_add "))
                    .count()
                    == 12
            })
        })
        .await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        // The late configuration result must not revive the game
        let forced = h.store.find(game.id).await.unwrap().unwrap();
        assert_eq!(forced.state, GameState::Interrupted);
        assert_eq!(forced.error.as_deref(), Some("ended by admin"));
        assert!(forced.connect_string.is_none());
        assert!(h.pool.get_assigned_game(server.id).await.is_none());
    }

    #[tokio::test]
    async fn test_substitute_request_rules() {
        let h = harness(OrchestratorSettings::default());
        let roster = full_roster(&h.directory);
        let game = h
            .orchestrator
            .create(roster, "cp_badlands".to_string())
            .await
            .unwrap();

        let err = h
            .orchestrator
            .request_substitute(game.id, "stranger")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PickupError>(),
            Some(PickupError::PlayerNotInGame { .. })
        ));

        h.orchestrator
            .request_substitute(game.id, "p0")
            .await
            .unwrap();
        // Requesting again is a no-op
        h.orchestrator
            .request_substitute(game.id, "p0")
            .await
            .unwrap();
        let stored = h.store.find(game.id).await.unwrap().unwrap();
        let slot = stored.slots.iter().find(|s| s.player_id == "p0").unwrap();
        assert_eq!(slot.status, PlayerStatus::AwaitingSubstitute);

        h.orchestrator
            .cancel_substitute(game.id, "p0")
            .await
            .unwrap();
        let stored = h.store.find(game.id).await.unwrap().unwrap();
        let slot = stored.slots.iter().find(|s| s.player_id == "p0").unwrap();
        assert_eq!(slot.status, PlayerStatus::Active);
    }

    #[tokio::test]
    async fn test_active_game_lookup_through_launcher() {
        let h = harness(OrchestratorSettings::default());
        let roster = full_roster(&h.directory);
        let game = h
            .orchestrator
            .create(roster, "cp_badlands".to_string())
            .await
            .unwrap();

        assert_eq!(
            h.orchestrator.active_game_for_player("p3").await.unwrap(),
            Some(game.id)
        );
        assert_eq!(
            h.orchestrator
                .active_game_for_player("stranger")
                .await
                .unwrap(),
            None
        );
    }
}
