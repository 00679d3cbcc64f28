//! Remote control of game servers over the Source RCON protocol
//!
//! Connections are short-lived: the pool or orchestrator opens a session,
//! sends a handful of console commands and closes it again. The connector
//! trait keeps the transport swappable for tests.

use crate::error::{PickupError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const PACKET_TYPE_AUTH: i32 = 3;
const PACKET_TYPE_AUTH_RESPONSE: i32 = 2;
const PACKET_TYPE_EXEC: i32 = 2;
const PACKET_TYPE_RESPONSE: i32 = 0;

/// Maximum accepted body size of a single inbound packet
const MAX_PACKET_SIZE: i32 = 4096;

/// Opens authenticated control sessions to game servers
#[async_trait]
pub trait ControlConnector: Send + Sync {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        secret: &str,
        timeout: Duration,
    ) -> Result<Box<dyn ControlSession>>;
}

/// An authenticated console session on one game server
#[async_trait]
pub trait ControlSession: Send {
    /// Execute one console command and return the server's reply
    async fn send(&mut self, command: &str) -> Result<String>;

    /// Close the session
    async fn close(self: Box<Self>) -> Result<()>;
}

/// TCP connector speaking the Source RCON protocol
#[derive(Debug, Default, Clone)]
pub struct RconConnector;

impl RconConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ControlConnector for RconConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        secret: &str,
        timeout: Duration,
    ) -> Result<Box<dyn ControlSession>> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| PickupError::ServerControl {
                message: format!("Connection to {}:{} timed out", host, port),
            })?
            .map_err(|e| PickupError::ServerControl {
                message: format!("Failed to connect to {}:{}: {}", host, port, e),
            })?;

        let mut session = RconSession {
            stream,
            timeout,
            next_id: 1,
        };
        session.authenticate(secret).await?;
        debug!("Opened control session to {}:{}", host, port);
        Ok(Box::new(session))
    }
}

/// One authenticated RCON connection
pub struct RconSession {
    stream: TcpStream,
    timeout: Duration,
    next_id: i32,
}

impl RconSession {
    async fn authenticate(&mut self, secret: &str) -> Result<()> {
        let id = self.write_packet(PACKET_TYPE_AUTH, secret).await?;

        // The server may send an empty response value before the auth
        // response itself
        loop {
            let (reply_id, reply_type, _) = self.read_packet().await?;
            if reply_type != PACKET_TYPE_AUTH_RESPONSE {
                continue;
            }
            if reply_id == -1 {
                return Err(PickupError::ServerControl {
                    message: "Authentication rejected".to_string(),
                }
                .into());
            }
            if reply_id == id {
                return Ok(());
            }
        }
    }

    async fn write_packet(&mut self, packet_type: i32, body: &str) -> Result<i32> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);

        // size = id + type + body + two trailing nulls
        let size = (4 + 4 + body.len() + 2) as i32;
        let mut frame = Vec::with_capacity(size as usize + 4);
        frame.extend_from_slice(&size.to_le_bytes());
        frame.extend_from_slice(&id.to_le_bytes());
        frame.extend_from_slice(&packet_type.to_le_bytes());
        frame.extend_from_slice(body.as_bytes());
        frame.extend_from_slice(&[0, 0]);

        tokio::time::timeout(self.timeout, self.stream.write_all(&frame))
            .await
            .map_err(|_| PickupError::ServerControl {
                message: "Timed out writing control packet".to_string(),
            })?
            .map_err(|e| PickupError::ServerControl {
                message: format!("Failed to write control packet: {}", e),
            })?;
        Ok(id)
    }

    async fn read_packet(&mut self) -> Result<(i32, i32, String)> {
        let mut header = [0u8; 12];
        tokio::time::timeout(self.timeout, self.stream.read_exact(&mut header))
            .await
            .map_err(|_| PickupError::ServerControl {
                message: "Timed out reading control packet".to_string(),
            })?
            .map_err(|e| PickupError::ServerControl {
                message: format!("Failed to read control packet: {}", e),
            })?;

        let size = i32::from_le_bytes(header[0..4].try_into().unwrap());
        let id = i32::from_le_bytes(header[4..8].try_into().unwrap());
        let packet_type = i32::from_le_bytes(header[8..12].try_into().unwrap());

        let body_len = size - 8;
        if !(2..=MAX_PACKET_SIZE).contains(&body_len) {
            return Err(PickupError::ServerControl {
                message: format!("Invalid control packet size {}", size),
            }
            .into());
        }

        let mut body = vec![0u8; body_len as usize];
        tokio::time::timeout(self.timeout, self.stream.read_exact(&mut body))
            .await
            .map_err(|_| PickupError::ServerControl {
                message: "Timed out reading control packet body".to_string(),
            })?
            .map_err(|e| PickupError::ServerControl {
                message: format!("Failed to read control packet body: {}", e),
            })?;

        // Strip the two trailing nulls
        body.truncate(body.len().saturating_sub(2));
        let text = String::from_utf8_lossy(&body).into_owned();
        Ok((id, packet_type, text))
    }
}

#[async_trait]
impl ControlSession for RconSession {
    async fn send(&mut self, command: &str) -> Result<String> {
        let id = self.write_packet(PACKET_TYPE_EXEC, command).await?;
        loop {
            let (reply_id, reply_type, body) = self.read_packet().await?;
            if reply_type == PACKET_TYPE_RESPONSE && reply_id == id {
                return Ok(body);
            }
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut stream = self.stream;
        stream
            .shutdown()
            .await
            .map_err(|e| PickupError::ServerControl {
                message: format!("Failed to close control session: {}", e),
            })?;
        Ok(())
    }
}

/// Scriptable control connector recording every command, for tests
#[derive(Debug, Default)]
pub struct MockControlConnector {
    commands: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
    refuse_connections: std::sync::Arc<std::sync::atomic::AtomicBool>,
    command_delay_ms: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl MockControlConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command sent over any session, in order
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut commands) = self.commands.lock() {
            commands.clear();
        }
    }

    /// Make subsequent connection attempts fail
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.refuse_connections
            .store(refuse, std::sync::atomic::Ordering::SeqCst);
    }

    /// Stall every command by the given duration after recording it
    pub fn set_command_delay(&self, delay: Duration) {
        self.command_delay_ms
            .store(delay.as_millis() as u64, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl ControlConnector for MockControlConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        _secret: &str,
        _timeout: Duration,
    ) -> Result<Box<dyn ControlSession>> {
        if self
            .refuse_connections
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(PickupError::ServerControl {
                message: format!("Connection to {}:{} refused", host, port),
            }
            .into());
        }
        Ok(Box::new(MockControlSession {
            commands: self.commands.clone(),
            command_delay_ms: self.command_delay_ms.clone(),
        }))
    }
}

struct MockControlSession {
    commands: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
    command_delay_ms: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

#[async_trait]
impl ControlSession for MockControlSession {
    async fn send(&mut self, command: &str) -> Result<String> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.to_string());
        }
        let delay = self
            .command_delay_ms
            .load(std::sync::atomic::Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(String::new())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
