//! Queue engine state machine
//!
//! The engine is a synchronous state machine over `waiting -> ready ->
//! launching`; all asynchronous concerns (validation against external
//! providers, the ready-up timer, push notifications, roster handoff) live in
//! [`crate::queue::service::QueueService`], which serializes every mutation.

use crate::config::QueueConfig;
use crate::error::{PickupError, Result};
use crate::queue::slot::{build_slots, QueueSlot};
use crate::types::{PlayerId, SlotId};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Queue engine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    /// Waiting for players to fill the slots
    Waiting,
    /// All slots taken; players must ready up before the timer expires
    Ready,
    /// Everyone readied up; the roster is being handed to the orchestrator
    Launching,
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueState::Waiting => write!(f, "waiting"),
            QueueState::Ready => write!(f, "ready"),
            QueueState::Launching => write!(f, "launching"),
        }
    }
}

/// A single state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: QueueState,
    pub to: QueueState,
}

/// Effects of one engine operation, reported back to the service layer
#[derive(Debug, Clone, Default)]
pub struct EngineUpdate {
    /// Snapshots of every slot mutated by the operation
    pub changed_slots: Vec<QueueSlot>,
    /// State transitions, in order of occurrence
    pub transitions: Vec<StateTransition>,
    /// Set when a successful map vote rotated the current map
    pub rotated_map: Option<String>,
}

impl EngineUpdate {
    fn record_slot(&mut self, slot: &QueueSlot) {
        // Keep the latest snapshot per slot id
        self.changed_slots.retain(|s| s.id != slot.id);
        self.changed_slots.push(slot.clone());
    }

    /// Whether the operation caused a transition into the given state
    pub fn entered(&self, state: QueueState) -> bool {
        self.transitions.iter().any(|t| t.to == state)
    }

    /// Whether the operation caused a transition out of the given state
    pub fn left(&self, state: QueueState) -> bool {
        self.transitions.iter().any(|t| t.from == state)
    }
}

/// The matchmaking queue state machine
#[derive(Debug, Clone)]
pub struct QueueEngine {
    config: QueueConfig,
    slots: Vec<QueueSlot>,
    state: QueueState,
    current_map: String,
}

impl QueueEngine {
    pub fn new(config: QueueConfig) -> Self {
        let slots = build_slots(&config);
        let current_map = config
            .maps
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default();
        Self {
            config,
            slots,
            state: QueueState::Waiting,
            current_map,
        }
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn slots(&self) -> &[QueueSlot] {
        &self.slots
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn current_map(&self) -> &str {
        &self.current_map
    }

    pub fn required_player_count(&self) -> usize {
        self.config.slot_count()
    }

    pub fn player_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_taken()).count()
    }

    pub fn ready_player_count(&self) -> usize {
        self.slots.iter().filter(|s| s.player_ready).count()
    }

    pub fn is_in_queue(&self, player_id: &str) -> bool {
        self.slot_of_player(player_id).is_some()
    }

    fn slot_of_player(&self, player_id: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.player_id.as_deref() == Some(player_id))
    }

    fn slot_index(&self, slot_id: SlotId) -> Option<usize> {
        self.slots.iter().position(|s| s.id == slot_id)
    }

    /// Join the given player at the given slot
    ///
    /// The player is first removed from any slot they currently hold. A
    /// friend request survives the move only between friend-class slots.
    /// While the queue is `ready`, the joined slot inherits ready status.
    pub fn join(&mut self, slot_id: SlotId, player_id: &str) -> Result<EngineUpdate> {
        let target = self
            .slot_index(slot_id)
            .ok_or(PickupError::UnknownSlot { slot_id })?;

        if self.slots[target].is_taken() {
            return Err(PickupError::SlotTaken { slot_id }.into());
        }

        let mut update = EngineUpdate::default();
        let friend_class = self.config.friend_class.clone();

        // Vacate the player's previous slot, if any
        let mut carried_friend: Option<PlayerId> = None;
        if let Some(previous) = self.slot_of_player(player_id) {
            if self.slots[previous].game_class == friend_class.clone().unwrap_or_default() {
                carried_friend = self.slots[previous].friend_player_id.clone();
            }
            self.slots[previous].vacate();
            update.record_slot(&self.slots[previous]);
        }

        let slot = &mut self.slots[target];
        slot.player_id = Some(player_id.to_string());
        // Late joiners inherit ready status only while the queue is `ready`,
        // never once it is launching
        slot.player_ready = self.state == QueueState::Ready;
        if friend_class.as_deref() == Some(slot.game_class.as_str()) {
            slot.friend_player_id = carried_friend;
        }
        update.record_slot(slot);

        self.update_state(&mut update);
        Ok(update)
    }

    /// Remove the player from the queue
    ///
    /// Fails once the player has readied up while the queue is committed.
    pub fn leave(&mut self, player_id: &str) -> Result<EngineUpdate> {
        let mut update = EngineUpdate::default();
        let Some(index) = self.slot_of_player(player_id) else {
            return Ok(update);
        };

        if self.slots[index].player_ready
            && matches!(self.state, QueueState::Ready | QueueState::Launching)
        {
            return Err(PickupError::CannotUnready.into());
        }

        self.slots[index].vacate();
        update.record_slot(&self.slots[index]);
        self.update_state(&mut update);
        Ok(update)
    }

    /// Forced removal (e.g. on ban); a no-op while launching
    pub fn kick(&mut self, player_id: &str) -> Result<EngineUpdate> {
        let mut update = EngineUpdate::default();
        if self.state == QueueState::Launching {
            return Ok(update);
        }

        if let Some(index) = self.slot_of_player(player_id) {
            self.slots[index].vacate();
            update.record_slot(&self.slots[index]);
            self.update_state(&mut update);
        }
        Ok(update)
    }

    /// Mark the player's slot as ready
    pub fn mark_ready(&mut self, player_id: &str) -> Result<EngineUpdate> {
        if self.state != QueueState::Ready {
            return Err(PickupError::QueueNotReady.into());
        }

        let index = self
            .slot_of_player(player_id)
            .ok_or_else(|| PickupError::NotInQueue {
                player_id: player_id.to_string(),
            })?;

        let mut update = EngineUpdate::default();
        self.slots[index].player_ready = true;
        update.record_slot(&self.slots[index]);
        self.update_state(&mut update);
        Ok(update)
    }

    /// Record a preferred-teammate request on the caller's slot
    pub fn mark_friend(&mut self, player_id: &str, friend_id: &str) -> Result<EngineUpdate> {
        if self.state == QueueState::Launching {
            return Err(PickupError::FriendMarkingClosed.into());
        }

        let index = self
            .slot_of_player(player_id)
            .ok_or_else(|| PickupError::NotInQueue {
                player_id: player_id.to_string(),
            })?;

        let game_class = self.slots[index].game_class.clone();
        if self.config.friend_class.as_deref() != Some(game_class.as_str()) {
            return Err(PickupError::FriendMarkingNotAllowed { game_class }.into());
        }

        // Two friend-class players cannot pair up
        if let Some(friend_index) = self.slot_of_player(friend_id) {
            if self.slots[friend_index].game_class == game_class {
                return Err(PickupError::InvalidFriendTarget {
                    player_id: friend_id.to_string(),
                }
                .into());
            }
        }

        let mut update = EngineUpdate::default();
        self.slots[index].friend_player_id = Some(friend_id.to_string());
        update.record_slot(&self.slots[index]);
        Ok(update)
    }

    /// Record or withdraw a map-change vote; rotates the map at the threshold
    pub fn vote_map_change(&mut self, player_id: &str, vote: bool) -> Result<EngineUpdate> {
        let index = self
            .slot_of_player(player_id)
            .ok_or_else(|| PickupError::NotInQueue {
                player_id: player_id.to_string(),
            })?;

        let mut update = EngineUpdate::default();
        self.slots[index].votes_for_map_change = vote;
        update.record_slot(&self.slots[index]);

        let votes = self
            .slots
            .iter()
            .filter(|s| s.is_taken() && s.votes_for_map_change)
            .count();
        if votes >= self.config.map_vote_threshold {
            self.rotate_map(&mut update);
        }
        Ok(update)
    }

    /// Ready-up timer expiry: launch if everyone made it, otherwise vacate
    /// the slots that never readied up and return to `waiting`
    pub fn on_ready_timeout(&mut self) -> EngineUpdate {
        let mut update = EngineUpdate::default();
        if self.state != QueueState::Ready {
            return update;
        }

        if self.ready_player_count() == self.required_player_count() {
            self.set_state(QueueState::Launching, &mut update);
            return update;
        }

        for slot in &mut self.slots {
            if slot.player_ready {
                // Ready players keep their spot for the next round
                slot.player_ready = false;
                update.record_slot(slot);
            } else if slot.is_taken() {
                slot.vacate();
                update.record_slot(slot);
            }
        }
        self.set_state(QueueState::Waiting, &mut update);
        update
    }

    /// Clear all slots and return to `waiting`; slot identity is preserved
    pub fn reset(&mut self) -> EngineUpdate {
        let mut update = EngineUpdate::default();
        for slot in &mut self.slots {
            if slot.is_taken() || slot.player_ready || slot.votes_for_map_change {
                slot.vacate();
                update.record_slot(slot);
            }
        }
        if self.state != QueueState::Waiting {
            self.set_state(QueueState::Waiting, &mut update);
        }
        update
    }

    fn rotate_map(&mut self, update: &mut EngineUpdate) {
        let candidates: Vec<&String> = self
            .config
            .maps
            .iter()
            .filter(|m| **m != self.current_map)
            .collect();
        if let Some(next) = candidates.choose(&mut rand::thread_rng()) {
            self.current_map = (**next).clone();
        }

        for slot in &mut self.slots {
            if slot.votes_for_map_change {
                slot.votes_for_map_change = false;
                update.record_slot(slot);
            }
        }
        update.rotated_map = Some(self.current_map.clone());
    }

    fn update_state(&mut self, update: &mut EngineUpdate) {
        match self.state {
            QueueState::Waiting => {
                if self.player_count() == self.required_player_count() {
                    self.set_state(QueueState::Ready, update);
                }
            }
            QueueState::Ready => {
                if self.player_count() == 0 {
                    self.set_state(QueueState::Waiting, update);
                } else if self.ready_player_count() == self.required_player_count() {
                    self.set_state(QueueState::Launching, update);
                }
            }
            QueueState::Launching => {
                // Left only via reset() once the roster has been handed off
            }
        }
    }

    fn set_state(&mut self, state: QueueState, update: &mut EngineUpdate) {
        if state != self.state {
            update.transitions.push(StateTransition {
                from: self.state,
                to: state,
            });
            self.state = state;
        }
    }
}
