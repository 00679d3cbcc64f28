//! Common types used throughout the pickup service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for players
pub type PlayerId = String;

/// Unique identifier for games
pub type GameId = Uuid;

/// Unique identifier for game servers
pub type ServerId = Uuid;

/// Stable identifier of a queue slot
pub type SlotId = u32;

/// Team index within a game (0 or 1)
pub type TeamId = u32;

/// Status of a single roster entry over the course of a game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlayerStatus {
    Active,
    AwaitingSubstitute,
    Replaced,
}

/// One entry in a finalized game roster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamePlayer {
    pub player_id: PlayerId,
    pub game_class: String,
    pub team_id: TeamId,
    pub status: PlayerStatus,
}

/// Resolved player identity, provided by the external directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub id: PlayerId,
    pub display_name: String,
    /// Privilege role, if any (e.g. "admin")
    pub role: Option<String>,
}

/// An active or expired queue ban
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerBan {
    pub player_id: PlayerId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub reason: Option<String>,
}

impl PlayerBan {
    /// Whether the ban is in effect at the given instant
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_ban_activity_window() {
        let now = Utc::now();
        let ban = PlayerBan {
            player_id: "p1".to_string(),
            start: now - Duration::hours(1),
            end: now + Duration::hours(1),
            reason: None,
        };

        assert!(ban.is_active_at(now));
        assert!(!ban.is_active_at(now + Duration::hours(2)));
        assert!(!ban.is_active_at(now - Duration::hours(2)));
    }

    #[test]
    fn test_player_status_serialization() {
        let status = PlayerStatus::AwaitingSubstitute;
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, "\"awaiting-substitute\"");
    }
}
