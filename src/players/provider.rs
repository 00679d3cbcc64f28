//! Provider traits for player identity, bans and per-class skill

use crate::error::Result;
use crate::types::{PlayerBan, PlayerProfile};
use crate::utils::current_timestamp;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Skill assumed for players with no recorded skill for a class
pub const DEFAULT_SKILL: f64 = 1.0;

/// Resolves player identifiers to profiles and ban state
#[async_trait]
pub trait PlayerDirectory: Send + Sync {
    /// Look up a player by ID; `None` if unknown
    async fn get_player(&self, player_id: &str) -> Result<Option<PlayerProfile>>;

    /// Bans currently in effect for the player
    async fn active_bans(&self, player_id: &str) -> Result<Vec<PlayerBan>>;
}

/// Resolves a player's skill for a given game class
#[async_trait]
pub trait SkillProvider: Send + Sync {
    /// Skill value for the player on the given class, defaulting to
    /// [`DEFAULT_SKILL`] when absent
    async fn skill(&self, player_id: &str, game_class: &str) -> Result<f64>;
}

/// In-memory player directory, used for wiring and tests
#[derive(Debug, Default)]
pub struct InMemoryPlayerDirectory {
    players: RwLock<HashMap<String, PlayerProfile>>,
    bans: RwLock<HashMap<String, Vec<PlayerBan>>>,
}

impl InMemoryPlayerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a player profile
    pub fn add_player(&self, profile: PlayerProfile) {
        if let Ok(mut players) = self.players.write() {
            players.insert(profile.id.clone(), profile);
        }
    }

    /// Record a ban for a player
    pub fn add_ban(&self, ban: PlayerBan) {
        if let Ok(mut bans) = self.bans.write() {
            bans.entry(ban.player_id.clone()).or_default().push(ban);
        }
    }
}

#[async_trait]
impl PlayerDirectory for InMemoryPlayerDirectory {
    async fn get_player(&self, player_id: &str) -> Result<Option<PlayerProfile>> {
        let players = self.players.read().map_err(|_| {
            crate::error::PickupError::InternalError {
                message: "Failed to acquire players lock".to_string(),
            }
        })?;
        Ok(players.get(player_id).cloned())
    }

    async fn active_bans(&self, player_id: &str) -> Result<Vec<PlayerBan>> {
        let bans = self
            .bans
            .read()
            .map_err(|_| crate::error::PickupError::InternalError {
                message: "Failed to acquire bans lock".to_string(),
            })?;
        let now = current_timestamp();
        Ok(bans
            .get(player_id)
            .map(|list| {
                list.iter()
                    .filter(|ban| ban.is_active_at(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Skill provider backed by a static table, used for wiring and tests
#[derive(Debug, Default)]
pub struct StaticSkillProvider {
    skills: RwLock<HashMap<(String, String), f64>>,
}

impl StaticSkillProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a player's skill for a class
    pub fn set_skill(&self, player_id: &str, game_class: &str, skill: f64) {
        if let Ok(mut skills) = self.skills.write() {
            skills.insert((player_id.to_string(), game_class.to_string()), skill);
        }
    }
}

#[async_trait]
impl SkillProvider for StaticSkillProvider {
    async fn skill(&self, player_id: &str, game_class: &str) -> Result<f64> {
        let skills = self.skills.read().map_err(|_| {
            crate::error::PickupError::InternalError {
                message: "Failed to acquire skills lock".to_string(),
            }
        })?;
        Ok(skills
            .get(&(player_id.to_string(), game_class.to_string()))
            .copied()
            .unwrap_or(DEFAULT_SKILL))
    }
}
