//! Game model and lifecycle states

use crate::types::{GameId, GamePlayer, PlayerId, TeamId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle state of a game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameState {
    /// A server is being found and configured
    Launching,
    /// The match is underway
    Started,
    /// The match ran to completion
    Ended,
    /// The game was aborted before or during the match
    Interrupted,
}

impl GameState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GameState::Ended | GameState::Interrupted)
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameState::Launching => write!(f, "launching"),
            GameState::Started => write!(f, "started"),
            GameState::Ended => write!(f, "ended"),
            GameState::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// A single pickup game from roster handoff to completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    /// Sequential, human-facing game number
    pub number: u64,
    pub launched_at: DateTime<Utc>,
    pub map: String,
    /// Team display names, keyed by team index
    pub teams: BTreeMap<TeamId, String>,
    /// Roster entries, including replaced players
    pub slots: Vec<GamePlayer>,
    /// Every player who ever took part, substitutes included
    pub players: Vec<PlayerId>,
    pub state: GameState,
    /// Console string players paste to join; cleared once the match ends
    pub connect_string: Option<String>,
    /// Failure description when the game was interrupted
    pub error: Option<String>,
    /// Archive URL of the uploaded match log
    pub logs_url: Option<String>,
    pub voice_url: Option<String>,
}

impl Game {
    pub fn new(
        id: GameId,
        number: u64,
        launched_at: DateTime<Utc>,
        map: String,
        slots: Vec<GamePlayer>,
    ) -> Self {
        let mut teams = BTreeMap::new();
        teams.insert(0, "RED".to_string());
        teams.insert(1, "BLU".to_string());
        let players = slots.iter().map(|s| s.player_id.clone()).collect();
        Self {
            id,
            number,
            launched_at,
            map,
            teams,
            slots,
            players,
            state: GameState::Launching,
            connect_string: None,
            error: None,
            logs_url: None,
            voice_url: None,
        }
    }

    /// Whether the player ever took part in this game
    pub fn involves(&self, player_id: &str) -> bool {
        self.players.iter().any(|p| p == player_id)
    }
}
