//! Registry of game servers and their game assignments
//!
//! The pool tracks which servers exist, whether they answer on their control
//! port and which game each one is currently bound to. A server carries at
//! most one active assignment at a time, and so does a game.

use crate::error::{PickupError, Result};
use crate::servers::control::ControlConnector;
use crate::servers::model::{GameServer, ServerAssignment, ServerDescriptor};
use crate::types::{GameId, ServerId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// The game-server pool
#[derive(Clone)]
pub struct ServerPool {
    servers: Arc<RwLock<Vec<GameServer>>>,
    assignments: Arc<Mutex<Vec<ServerAssignment>>>,
    connector: Arc<dyn ControlConnector>,
    control_timeout: Duration,
}

impl ServerPool {
    pub fn new(connector: Arc<dyn ControlConnector>, control_timeout: Duration) -> Self {
        Self {
            servers: Arc::new(RwLock::new(Vec::new())),
            assignments: Arc::new(Mutex::new(Vec::new())),
            connector,
            control_timeout,
        }
    }

    /// Register a new server after verifying its control port answers
    pub async fn add_server(&self, descriptor: ServerDescriptor) -> Result<GameServer> {
        let mut server = GameServer::from_descriptor(descriptor);
        self.verify(&server).await?;
        server.is_online = true;

        // Resolution failures are tolerated; the server just cannot be
        // matched to telemetry by hostname
        match tokio::net::lookup_host((server.address.as_str(), server.port)).await {
            Ok(addresses) => {
                server.resolved_addresses =
                    addresses.map(|addr| addr.ip().to_string()).collect();
            }
            Err(e) => warn!("Failed to resolve {}: {}", server.address, e),
        }

        info!("Registered game server {} ({})", server.name, server.id);
        let mut servers = self.servers.write().await;
        servers.push(server.clone());
        Ok(server)
    }

    /// Remove a server from the pool
    pub async fn remove_server(&self, server_id: ServerId) -> Result<()> {
        let mut servers = self.servers.write().await;
        let before = servers.len();
        servers.retain(|s| s.id != server_id);
        if servers.len() == before {
            return Err(PickupError::ServerNotFound {
                server_id: server_id.to_string(),
            }
            .into());
        }
        info!("Removed game server {}", server_id);
        Ok(())
    }

    pub async fn find(&self, server_id: ServerId) -> Option<GameServer> {
        let servers = self.servers.read().await;
        servers.iter().find(|s| s.id == server_id).cloned()
    }

    pub async fn all(&self) -> Vec<GameServer> {
        self.servers.read().await.clone()
    }

    /// First unassigned server that answers a live probe, in registration
    /// order
    pub async fn get_free_server(&self) -> Result<Option<GameServer>> {
        let candidates = {
            let servers = self.servers.read().await;
            let assignments = self.assignments.lock().await;
            servers
                .iter()
                .filter(|server| {
                    !assignments
                        .iter()
                        .any(|a| a.is_active && a.server_id == server.id)
                })
                .cloned()
                .collect::<Vec<_>>()
        };

        for server in candidates {
            match self.verify(&server).await {
                Ok(()) => return Ok(Some(server)),
                Err(e) => {
                    debug!("Server {} failed liveness probe: {}", server.name, e);
                    self.set_online(server.id, false).await;
                }
            }
        }
        Ok(None)
    }

    /// Bind a server to a game
    pub async fn assign(&self, server_id: ServerId, game_id: GameId) -> Result<ServerAssignment> {
        let mut assignments = self.assignments.lock().await;
        if assignments
            .iter()
            .any(|a| a.is_active && a.server_id == server_id)
        {
            return Err(PickupError::AssignmentConflict {
                server_id: server_id.to_string(),
            }
            .into());
        }
        if assignments
            .iter()
            .any(|a| a.is_active && a.game_id == game_id)
        {
            return Err(PickupError::InternalError {
                message: format!("Game {} is already assigned to a server", game_id),
            }
            .into());
        }

        let assignment = ServerAssignment::new(server_id, game_id);
        assignments.push(assignment.clone());
        info!("Assigned server {} to game {}", server_id, game_id);
        Ok(assignment)
    }

    /// End a game's active assignment; a no-op when none exists
    pub async fn release(&self, game_id: GameId) {
        let mut assignments = self.assignments.lock().await;
        for assignment in assignments.iter_mut() {
            if assignment.is_active && assignment.game_id == game_id {
                assignment.is_active = false;
                info!(
                    "Released server {} from game {}",
                    assignment.server_id, game_id
                );
            }
        }
    }

    /// The game currently bound to a server, if any
    pub async fn get_assigned_game(&self, server_id: ServerId) -> Option<GameId> {
        let assignments = self.assignments.lock().await;
        assignments
            .iter()
            .rev()
            .find(|a| a.is_active && a.server_id == server_id)
            .map(|a| a.game_id)
    }

    /// The server currently bound to a game, if any
    pub async fn get_assigned_server(&self, game_id: GameId) -> Option<GameServer> {
        let server_id = {
            let assignments = self.assignments.lock().await;
            assignments
                .iter()
                .rev()
                .find(|a| a.is_active && a.game_id == game_id)
                .map(|a| a.server_id)
        }?;
        self.find(server_id).await
    }

    /// Match an inbound telemetry datagram's source IP to a server
    pub async fn find_by_event_source(&self, source_ip: &str) -> Option<GameServer> {
        let servers = self.servers.read().await;
        servers
            .iter()
            .find(|server| {
                server.address == source_ip
                    || server
                        .resolved_addresses
                        .iter()
                        .any(|addr| addr == source_ip)
            })
            .cloned()
    }

    pub async fn set_online(&self, server_id: ServerId, online: bool) {
        let mut servers = self.servers.write().await;
        if let Some(server) = servers.iter_mut().find(|s| s.id == server_id) {
            if server.is_online != online {
                info!(
                    "Server {} is now {}",
                    server.name,
                    if online { "online" } else { "offline" }
                );
            }
            server.is_online = online;
        }
    }

    /// Periodically probe every server and record its liveness
    pub fn spawn_health_sweep(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                for server in pool.all().await {
                    let online = pool.verify(&server).await.is_ok();
                    pool.set_online(server.id, online).await;
                }
            }
        })
    }

    /// Probe the control port with a short-lived authenticated session
    async fn verify(&self, server: &GameServer) -> Result<()> {
        let session = self
            .connector
            .connect(
                &server.address,
                server.port,
                &server.control_secret,
                self.control_timeout,
            )
            .await?;
        session.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servers::control::MockControlConnector;
    use crate::utils::generate_game_id;

    fn descriptor(name: &str) -> ServerDescriptor {
        ServerDescriptor {
            name: name.to_string(),
            address: "127.0.0.1".to_string(),
            port: 27015,
            control_secret: "secret".to_string(),
            voice_channel_tag: name.to_string(),
        }
    }

    fn pool_with_mock() -> (ServerPool, Arc<MockControlConnector>) {
        let connector = Arc::new(MockControlConnector::new());
        let pool = ServerPool::new(connector.clone(), Duration::from_secs(1));
        (pool, connector)
    }

    #[tokio::test]
    async fn test_add_server_requires_reachable_control_port() {
        let (pool, connector) = pool_with_mock();
        connector.set_refuse_connections(true);
        assert!(pool.add_server(descriptor("alpha")).await.is_err());
        assert!(pool.all().await.is_empty());

        connector.set_refuse_connections(false);
        let server = pool.add_server(descriptor("alpha")).await.unwrap();
        assert!(server.is_online);
    }

    #[tokio::test]
    async fn test_assigned_servers_are_not_free() {
        let (pool, _) = pool_with_mock();
        let alpha = pool.add_server(descriptor("alpha")).await.unwrap();
        let beta = pool.add_server(descriptor("beta")).await.unwrap();

        let game = generate_game_id();
        pool.assign(alpha.id, game).await.unwrap();

        let free = pool.get_free_server().await.unwrap().unwrap();
        assert_eq!(free.id, beta.id);

        let other_game = generate_game_id();
        pool.assign(beta.id, other_game).await.unwrap();
        assert!(pool.get_free_server().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_release_restores_availability() {
        let (pool, _) = pool_with_mock();
        let alpha = pool.add_server(descriptor("alpha")).await.unwrap();
        let game = generate_game_id();
        pool.assign(alpha.id, game).await.unwrap();
        assert!(pool.get_free_server().await.unwrap().is_none());

        pool.release(game).await;
        assert!(pool.get_free_server().await.unwrap().is_some());
        assert!(pool.get_assigned_game(alpha.id).await.is_none());

        // Releasing again is harmless
        pool.release(game).await;
    }

    #[tokio::test]
    async fn test_double_assignment_is_rejected() {
        let (pool, _) = pool_with_mock();
        let alpha = pool.add_server(descriptor("alpha")).await.unwrap();
        pool.assign(alpha.id, generate_game_id()).await.unwrap();
        assert!(pool.assign(alpha.id, generate_game_id()).await.is_err());
    }

    #[tokio::test]
    async fn test_assignment_lookup_both_directions() {
        let (pool, _) = pool_with_mock();
        let alpha = pool.add_server(descriptor("alpha")).await.unwrap();
        let game = generate_game_id();
        pool.assign(alpha.id, game).await.unwrap();

        assert_eq!(pool.get_assigned_game(alpha.id).await, Some(game));
        assert_eq!(
            pool.get_assigned_server(game).await.map(|s| s.id),
            Some(alpha.id)
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_skipped_and_marked_offline() {
        let (pool, connector) = pool_with_mock();
        let alpha = pool.add_server(descriptor("alpha")).await.unwrap();

        connector.set_refuse_connections(true);
        assert!(pool.get_free_server().await.unwrap().is_none());
        assert!(!pool.find(alpha.id).await.unwrap().is_online);
    }

    #[tokio::test]
    async fn test_find_by_event_source() {
        let (pool, _) = pool_with_mock();
        let alpha = pool.add_server(descriptor("alpha")).await.unwrap();

        let found = pool.find_by_event_source("127.0.0.1").await.unwrap();
        assert_eq!(found.id, alpha.id);
        assert!(pool.find_by_event_source("10.0.0.9").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_server() {
        let (pool, _) = pool_with_mock();
        let alpha = pool.add_server(descriptor("alpha")).await.unwrap();
        pool.remove_server(alpha.id).await.unwrap();
        assert!(pool.all().await.is_empty());
        assert!(pool.remove_server(alpha.id).await.is_err());
    }
}
