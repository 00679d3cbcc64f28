//! Queue service: serialized mutations, validation and roster handoff
//!
//! Wraps the [`QueueEngine`] behind a single mutex, validates joins against
//! the player directory, drives the ready-up timer, pushes slot/state events
//! to clients and hands completed rosters to the game orchestrator through
//! the [`GameLauncher`] trait.

use crate::error::{PickupError, Result};
use crate::notify::PushChannel;
use crate::players::PlayerDirectory;
use crate::queue::engine::{EngineUpdate, QueueEngine, QueueState};
use crate::queue::slot::QueueSlot;
use crate::types::{GameId, SlotId};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Receives completed rosters from the queue
///
/// Implemented by the game orchestrator; kept as a trait so the queue has no
/// compile-time dependency on game internals and tests can substitute it.
#[async_trait]
pub trait GameLauncher: Send + Sync {
    /// The game the player is currently part of, if any
    async fn active_game_for_player(&self, player_id: &str) -> Result<Option<GameId>>;

    /// Take ownership of a full, readied roster and launch a game for it
    async fn launch_roster(&self, slots: Vec<QueueSlot>, map: String) -> Result<GameId>;
}

/// The matchmaking queue service
#[derive(Clone)]
pub struct QueueService {
    engine: Arc<Mutex<QueueEngine>>,
    directory: Arc<dyn PlayerDirectory>,
    launcher: Arc<dyn GameLauncher>,
    push: Arc<dyn PushChannel>,
    /// Bumped on every entry/exit of `ready`; stale timer tasks bail out
    ready_epoch: Arc<AtomicU64>,
}

impl QueueService {
    pub fn new(
        engine: QueueEngine,
        directory: Arc<dyn PlayerDirectory>,
        launcher: Arc<dyn GameLauncher>,
        push: Arc<dyn PushChannel>,
    ) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            directory,
            launcher,
            push,
            ready_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current queue state
    pub async fn state(&self) -> QueueState {
        self.engine.lock().await.state()
    }

    /// Snapshot of all slots
    pub async fn slots(&self) -> Vec<QueueSlot> {
        self.engine.lock().await.slots().to_vec()
    }

    /// Current map
    pub async fn current_map(&self) -> String {
        self.engine.lock().await.current_map().to_string()
    }

    /// Whether the player currently holds a slot
    pub async fn is_in_queue(&self, player_id: &str) -> bool {
        self.engine.lock().await.is_in_queue(player_id)
    }

    /// Join the given player at the given slot
    pub async fn join(&self, slot_id: SlotId, player_id: &str) -> Result<QueueSlot> {
        let player = self
            .directory
            .get_player(player_id)
            .await?
            .ok_or_else(|| PickupError::UnknownPlayer {
                player_id: player_id.to_string(),
            })?;

        let bans = self.directory.active_bans(player_id).await?;
        if !bans.is_empty() {
            return Err(PickupError::PlayerBanned {
                player_id: player_id.to_string(),
            }
            .into());
        }

        if self
            .launcher
            .active_game_for_player(player_id)
            .await?
            .is_some()
        {
            return Err(PickupError::PlayerInActiveGame {
                player_id: player_id.to_string(),
            }
            .into());
        }

        let update = {
            let mut engine = self.engine.lock().await;
            engine.join(slot_id, player_id)?
        };

        debug!("{} joined the queue at slot {}", player.id, slot_id);
        let joined = update
            .changed_slots
            .iter()
            .find(|s| s.id == slot_id)
            .cloned()
            .ok_or_else(|| PickupError::InternalError {
                message: "joined slot missing from engine update".to_string(),
            })?;
        self.after_update(update).await;
        Ok(joined)
    }

    /// Remove the player from the queue
    pub async fn leave(&self, player_id: &str) -> Result<()> {
        let update = {
            let mut engine = self.engine.lock().await;
            engine.leave(player_id)?
        };
        debug!("{} left the queue", player_id);
        self.after_update(update).await;
        Ok(())
    }

    /// Forced removal, e.g. when a ban lands while the player is queued
    pub async fn kick(&self, player_id: &str) -> Result<()> {
        let update = {
            let mut engine = self.engine.lock().await;
            engine.kick(player_id)?
        };
        if !update.changed_slots.is_empty() {
            if let Err(e) = self
                .push
                .send_to_player(player_id, "queue.kicked", serde_json::Value::Null)
                .await
            {
                warn!("failed to notify {} of kick: {}", player_id, e);
            }
        }
        self.after_update(update).await;
        Ok(())
    }

    /// Mark the player's slot as ready
    pub async fn ready(&self, player_id: &str) -> Result<()> {
        let update = {
            let mut engine = self.engine.lock().await;
            engine.mark_ready(player_id)?
        };
        self.after_update(update).await;
        Ok(())
    }

    /// Record a preferred-teammate request
    pub async fn mark_friend(&self, player_id: &str, friend_id: &str) -> Result<()> {
        let update = {
            let mut engine = self.engine.lock().await;
            engine.mark_friend(player_id, friend_id)?
        };
        self.after_update(update).await;
        Ok(())
    }

    /// Record or withdraw a map-change vote
    pub async fn vote_map_change(&self, player_id: &str, vote: bool) -> Result<()> {
        let update = {
            let mut engine = self.engine.lock().await;
            engine.vote_map_change(player_id, vote)?
        };
        self.after_update(update).await;
        Ok(())
    }

    /// Clear all slots and return the queue to its default state
    pub async fn reset(&self) -> Result<()> {
        let update = {
            let mut engine = self.engine.lock().await;
            engine.reset()
        };
        self.after_update(update).await;
        Ok(())
    }

    /// Apply the side effects of one engine operation: push notifications,
    /// timer management and the roster handoff on entering `launching`
    ///
    /// Returns a boxed future: the ready-up timer task awaits this method,
    /// and this method spawns the timer task, so the future type must not
    /// mention itself.
    fn after_update(
        &self,
        update: EngineUpdate,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let mut pending = vec![update];
            while let Some(update) = pending.pop() {
                for slot in &update.changed_slots {
                    self.broadcast("queue.slot_update", serde_json::json!(slot))
                        .await;
                }

                if let Some(map) = &update.rotated_map {
                    info!("map vote succeeded, rotating to {}", map);
                    self.broadcast("queue.map_change", serde_json::json!(map))
                        .await;
                }

                for transition in &update.transitions {
                    info!(
                        "queue state: {} -> {}",
                        transition.from, transition.to
                    );
                    self.broadcast("queue.state_update", serde_json::json!(transition.to))
                        .await;

                    if transition.from == QueueState::Ready {
                        // Invalidate any pending ready-up timer
                        self.ready_epoch.fetch_add(1, Ordering::SeqCst);
                    }

                    match transition.to {
                        QueueState::Ready => self.start_ready_timer().await,
                        QueueState::Launching => {
                            let (slots, map) = {
                                let engine = self.engine.lock().await;
                                (
                                    engine.slots().to_vec(),
                                    engine.current_map().to_string(),
                                )
                            };

                            match self.launcher.launch_roster(slots, map).await {
                                Ok(game_id) => info!("roster handed off as game {}", game_id),
                                Err(e) => error!("failed to launch game for roster: {}", e),
                            }

                            // The queue resets for the next round regardless
                            // of the launch outcome
                            let follow_up = {
                                let mut engine = self.engine.lock().await;
                                engine.reset()
                            };
                            pending.push(follow_up);
                        }
                        QueueState::Waiting => {}
                    }
                }
            }
        })
    }

    async fn start_ready_timer(&self) {
        let epoch = self.ready_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let timeout = {
            let engine = self.engine.lock().await;
            engine.config().ready_up_timeout()
        };

        let service = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if service.ready_epoch.load(Ordering::SeqCst) != epoch {
                return;
            }

            info!("ready-up timer expired");
            let update = {
                let mut engine = service.engine.lock().await;
                engine.on_ready_timeout()
            };
            service.after_update(update).await;
        });
    }

    async fn broadcast(&self, event: &str, payload: serde_json::Value) {
        if let Err(e) = self.push.broadcast(event, payload).await {
            warn!("failed to push {} event: {}", event, e);
        }
    }
}
