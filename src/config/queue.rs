//! Queue configuration and format presets
//!
//! A queue configuration defines the pickup format: how many teams, which
//! game classes with how many players per team, the ready-up timeout, the map
//! pool, and the server-side configs executed when a game launches.

use crate::error::{PickupError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One game class entry of a queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSpec {
    pub name: String,
    pub count_per_team: usize,
}

/// Immutable queue configuration, loaded once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of teams; the balancer supports exactly two
    pub team_count: usize,
    /// Ordered list of game classes with per-team quotas
    pub classes: Vec<ClassSpec>,
    /// Ready-up timeout in milliseconds
    pub ready_up_timeout_ms: u64,
    /// Pool of allowed maps
    pub maps: Vec<String>,
    /// Server-side configs executed, in order, when configuring a server
    pub exec_configs: Vec<String>,
    /// Number of map-change votes required to rotate the map
    pub map_vote_threshold: usize,
    /// The class allowed to request a preferred teammate, if any
    pub friend_class: Option<String>,
}

impl QueueConfig {
    /// The classic 6v6 format
    pub fn sixes() -> Self {
        Self {
            team_count: 2,
            classes: vec![
                ClassSpec {
                    name: "scout".to_string(),
                    count_per_team: 2,
                },
                ClassSpec {
                    name: "soldier".to_string(),
                    count_per_team: 2,
                },
                ClassSpec {
                    name: "demoman".to_string(),
                    count_per_team: 1,
                },
                ClassSpec {
                    name: "medic".to_string(),
                    count_per_team: 1,
                },
            ],
            ready_up_timeout_ms: 60 * 1000,
            maps: vec![
                "cp_process_final".to_string(),
                "cp_snakewater_final1".to_string(),
                "cp_sunshine".to_string(),
                "cp_granary_pro_rc8".to_string(),
                "cp_gullywash_final1".to_string(),
                "cp_metalworks".to_string(),
                "cp_prolands_rc2t".to_string(),
            ],
            exec_configs: vec!["etf2l_6v6_5cp".to_string()],
            map_vote_threshold: 7,
            friend_class: Some("medic".to_string()),
        }
    }

    /// 2v2 soldier-only format
    pub fn bball() -> Self {
        Self {
            team_count: 2,
            classes: vec![ClassSpec {
                name: "soldier".to_string(),
                count_per_team: 2,
            }],
            ready_up_timeout_ms: 60 * 1000,
            maps: vec!["ctf_ballin_sky".to_string()],
            exec_configs: vec!["etf2l_bball".to_string(), "instant_spawns".to_string()],
            map_vote_threshold: 4,
            friend_class: None,
        }
    }

    /// Look up a preset by name
    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "sixes" | "6v6" => Ok(Self::sixes()),
            "bball" => Ok(Self::bball()),
            other => Err(PickupError::ConfigurationError {
                message: format!("unknown queue preset: {}", other),
            }
            .into()),
        }
    }

    /// Total number of slots across all teams
    pub fn slot_count(&self) -> usize {
        self.team_count
            * self
                .classes
                .iter()
                .map(|cls| cls.count_per_team)
                .sum::<usize>()
    }

    /// Ready-up timeout as a Duration
    pub fn ready_up_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_up_timeout_ms)
    }

    /// Whether the given class name is part of this configuration
    pub fn is_known_class(&self, game_class: &str) -> bool {
        self.classes.iter().any(|cls| cls.name == game_class)
    }

    /// Ordered class names
    pub fn class_names(&self) -> Vec<String> {
        self.classes.iter().map(|cls| cls.name.clone()).collect()
    }

    /// Validate the configuration against the balancer's preconditions
    pub fn validate(&self) -> Result<()> {
        if self.team_count != 2 {
            return Err(PickupError::ConfigurationError {
                message: format!("team count must be 2, got {}", self.team_count),
            }
            .into());
        }

        if self.classes.is_empty() {
            return Err(PickupError::ConfigurationError {
                message: "at least one game class is required".to_string(),
            }
            .into());
        }

        // The balancer only enumerates 1v1 and 2v2 per-class partitions
        for cls in &self.classes {
            if cls.count_per_team == 0 || cls.count_per_team > 2 {
                return Err(PickupError::ConfigurationError {
                    message: format!(
                        "class {} has unsupported per-team count {}",
                        cls.name, cls.count_per_team
                    ),
                }
                .into());
            }
        }

        if self.maps.is_empty() {
            return Err(PickupError::ConfigurationError {
                message: "map pool cannot be empty".to_string(),
            }
            .into());
        }

        if self.map_vote_threshold == 0 {
            return Err(PickupError::ConfigurationError {
                message: "map vote threshold must be greater than 0".to_string(),
            }
            .into());
        }

        if let Some(friend_class) = &self.friend_class {
            if !self.is_known_class(friend_class) {
                return Err(PickupError::ConfigurationError {
                    message: format!("friend class {} is not a known class", friend_class),
                }
                .into());
            }
        }

        Ok(())
    }
}
