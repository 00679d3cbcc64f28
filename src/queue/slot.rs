//! Queue slot model and slot-table construction

use crate::config::QueueConfig;
use crate::types::{PlayerId, SlotId};
use serde::{Deserialize, Serialize};

/// A single role/team position in the matchmaking queue
///
/// Slot identity is stable across queue resets: slot N always refers to the
/// same (class, position) combination for a given configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSlot {
    pub id: SlotId,
    pub game_class: String,
    pub player_id: Option<PlayerId>,
    pub player_ready: bool,
    /// Requested teammate; only meaningful on the configured friend class
    pub friend_player_id: Option<PlayerId>,
    pub votes_for_map_change: bool,
}

impl QueueSlot {
    fn vacant(id: SlotId, game_class: &str) -> Self {
        Self {
            id,
            game_class: game_class.to_string(),
            player_id: None,
            player_ready: false,
            friend_player_id: None,
            votes_for_map_change: false,
        }
    }

    /// Whether a player currently occupies this slot
    pub fn is_taken(&self) -> bool {
        self.player_id.is_some()
    }

    /// Clear the occupant and all associated flags
    pub fn vacate(&mut self) {
        self.player_id = None;
        self.player_ready = false;
        self.friend_player_id = None;
        self.votes_for_map_change = false;
    }
}

/// Build the full slot table for a configuration, ids assigned in class order
pub fn build_slots(config: &QueueConfig) -> Vec<QueueSlot> {
    let mut slots = Vec::with_capacity(config.slot_count());
    let mut next_id: SlotId = 0;
    for cls in &config.classes {
        for _ in 0..(cls.count_per_team * config.team_count) {
            slots.push(QueueSlot::vacant(next_id, &cls.name));
            next_id += 1;
        }
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_count_matches_config() {
        let config = QueueConfig::sixes();
        let slots = build_slots(&config);
        assert_eq!(slots.len(), config.slot_count());
        assert_eq!(slots.len(), 12);
    }

    #[test]
    fn test_slot_ids_are_stable_and_ordered() {
        let config = QueueConfig::sixes();
        let slots = build_slots(&config);
        for (i, slot) in slots.iter().enumerate() {
            assert_eq!(slot.id, i as u32);
        }

        // First four slots are scouts, last two are medics
        assert_eq!(slots[0].game_class, "scout");
        assert_eq!(slots[3].game_class, "scout");
        assert_eq!(slots[10].game_class, "medic");
        assert_eq!(slots[11].game_class, "medic");
    }

    #[test]
    fn test_vacate_clears_all_flags() {
        let config = QueueConfig::sixes();
        let mut slot = build_slots(&config).remove(11);
        slot.player_id = Some("p1".to_string());
        slot.player_ready = true;
        slot.friend_player_id = Some("p2".to_string());
        slot.votes_for_map_change = true;

        slot.vacate();
        assert!(!slot.is_taken());
        assert!(!slot.player_ready);
        assert!(slot.friend_player_id.is_none());
        assert!(!slot.votes_for_map_change);
    }
}
