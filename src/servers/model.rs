//! Game server and assignment models

use crate::types::{GameId, ServerId};
use crate::utils::{current_timestamp, generate_server_id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered game server
#[derive(Debug, Clone, Serialize)]
pub struct GameServer {
    pub id: ServerId,
    pub name: String,
    /// Hostname or IP players connect to
    pub address: String,
    pub port: u16,
    /// Control-protocol secret; never serialized to clients
    #[serde(skip_serializing)]
    pub control_secret: String,
    pub is_online: bool,
    /// IP addresses the hostname resolved to, used to attribute inbound
    /// telemetry datagrams
    pub resolved_addresses: Vec<String>,
    /// Suffix of the voice channel dedicated to this server
    pub voice_channel_tag: String,
}

/// Parameters for registering a new game server
#[derive(Debug, Clone, Deserialize)]
pub struct ServerDescriptor {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub control_secret: String,
    pub voice_channel_tag: String,
}

impl GameServer {
    pub fn from_descriptor(descriptor: ServerDescriptor) -> Self {
        Self {
            id: generate_server_id(),
            name: descriptor.name,
            address: descriptor.address,
            port: descriptor.port,
            control_secret: descriptor.control_secret,
            is_online: false,
            resolved_addresses: Vec::new(),
            voice_channel_tag: descriptor.voice_channel_tag,
        }
    }
}

/// Binds a server to a game for the duration of a match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerAssignment {
    pub server_id: ServerId,
    pub game_id: GameId,
    pub is_active: bool,
    pub assigned_at: DateTime<Utc>,
}

impl ServerAssignment {
    pub fn new(server_id: ServerId, game_id: GameId) -> Self {
        Self {
            server_id,
            game_id,
            is_active: true,
            assigned_at: current_timestamp(),
        }
    }
}
