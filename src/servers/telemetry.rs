//! UDP match telemetry listener
//!
//! Game servers forward their console log lines to this listener over UDP.
//! Three line shapes matter: round start, game over and the log-archive
//! upload notice. Everything else is dropped. Events are attributed to a
//! registered server by the datagram's source IP.

use crate::servers::pool::ServerPool;
use crate::types::ServerId;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

static ROUND_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^[\d/\s\-:]+World triggered "Round_Start"$"#).unwrap());
static GAME_OVER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^[\d/\s\-:]+World triggered "Game_Over" reason "(.*)"$"#).unwrap());
static LOGS_UPLOADED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^[\d/\s\-:]+\[TFTrue\].+\shttp://logs\.tf/(\d+)\..*$"#).unwrap());

/// A match event attributed to a registered server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TelemetryEvent {
    MatchStarted { server_id: ServerId },
    MatchEnded { server_id: ServerId },
    LogsUploaded { server_id: ServerId, logs_url: String },
}

/// What a single log line means, before server attribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    MatchStarted,
    MatchEnded,
    LogsUploaded { logs_url: String },
}

/// Classify a single forwarded log line
pub fn classify_line(line: &str) -> Option<LineKind> {
    if ROUND_START.is_match(line) {
        return Some(LineKind::MatchStarted);
    }
    if GAME_OVER.is_match(line) {
        return Some(LineKind::MatchEnded);
    }
    if let Some(captures) = LOGS_UPLOADED.captures(line) {
        let id = captures.get(1)?.as_str();
        return Some(LineKind::LogsUploaded {
            logs_url: format!("http://logs.tf/{}", id),
        });
    }
    None
}

/// Strip the log-packet preamble and decode the line
fn decode_datagram(data: &[u8]) -> String {
    // Source log packets open with 0xFFFFFFFF and a packet-kind byte
    let payload = match data {
        [0xff, 0xff, 0xff, 0xff, b'R' | b'S', rest @ ..] => rest,
        _ => data,
    };
    String::from_utf8_lossy(payload)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

/// Listens for forwarded log lines and emits [`TelemetryEvent`]s
pub struct TelemetryListener {
    socket: UdpSocket,
    pool: ServerPool,
    sender: mpsc::Sender<TelemetryEvent>,
}

impl TelemetryListener {
    /// Bind the UDP socket and return the listener with its event stream
    pub async fn bind(
        bind_address: &str,
        pool: ServerPool,
    ) -> crate::error::Result<(Self, mpsc::Receiver<TelemetryEvent>)> {
        let socket = UdpSocket::bind(bind_address).await.map_err(|e| {
            crate::error::PickupError::ConfigurationError {
                message: format!("Failed to bind telemetry socket on {}: {}", bind_address, e),
            }
        })?;
        info!("Telemetry listener bound on {}", bind_address);

        let (sender, receiver) = mpsc::channel(256);
        Ok((
            Self {
                socket,
                pool,
                sender,
            },
            receiver,
        ))
    }

    /// The address the UDP socket actually bound to
    pub fn local_addr(&self) -> crate::error::Result<std::net::SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Telemetry socket has no local address: {}", e))
    }

    /// Receive datagrams until the event stream is dropped
    pub async fn run(self) {
        let mut buffer = vec![0u8; 4096];
        loop {
            let (len, source) = match self.socket.recv_from(&mut buffer).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("Telemetry receive failed: {}", e);
                    continue;
                }
            };

            let line = decode_datagram(&buffer[..len]);
            let Some(kind) = classify_line(&line) else {
                continue;
            };

            let source_ip = source.ip().to_string();
            let Some(server) = self.pool.find_by_event_source(&source_ip).await else {
                debug!("Dropping telemetry from unknown source {}", source_ip);
                continue;
            };

            let event = match kind {
                LineKind::MatchStarted => TelemetryEvent::MatchStarted {
                    server_id: server.id,
                },
                LineKind::MatchEnded => TelemetryEvent::MatchEnded {
                    server_id: server.id,
                },
                LineKind::LogsUploaded { logs_url } => TelemetryEvent::LogsUploaded {
                    server_id: server.id,
                    logs_url,
                },
            };

            debug!("Telemetry from {}: {:?}", server.name, event);
            if self.sender.send(event).await.is_err() {
                info!("Telemetry consumer gone, stopping listener");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servers::control::MockControlConnector;
    use crate::servers::model::ServerDescriptor;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_round_start_line() {
        let line = r#"01/15/2026 - 22:31:04: World triggered "Round_Start""#;
        assert_eq!(classify_line(line), Some(LineKind::MatchStarted));
    }

    #[test]
    fn test_game_over_line() {
        let line = r#"01/15/2026 - 23:05:12: World triggered "Game_Over" reason "Reached Win Limit""#;
        assert_eq!(classify_line(line), Some(LineKind::MatchEnded));
    }

    #[test]
    fn test_logs_uploaded_line() {
        let line = "01/15/2026 - 23:05:44: [TFTrue] The log is available here: http://logs.tf/2458915. Type !log to view it.";
        assert_eq!(
            classify_line(line),
            Some(LineKind::LogsUploaded {
                logs_url: "http://logs.tf/2458915".to_string()
            })
        );
    }

    #[test]
    fn test_unrelated_lines_are_ignored() {
        assert_eq!(classify_line(""), None);
        assert_eq!(
            classify_line(r#"01/15/2026 - 22:31:04: "player<3><[U:1:1234]><Blue>" say "gg""#),
            None
        );
        assert_eq!(
            classify_line(r#"World triggered "Round_Start" with no timestamp prefix"#),
            None
        );
    }

    #[test]
    fn test_datagram_preamble_is_stripped() {
        let mut data = vec![0xff, 0xff, 0xff, 0xff, b'R'];
        data.extend_from_slice(b"hello world\n");
        assert_eq!(decode_datagram(&data), "hello world");
        assert_eq!(decode_datagram(b"plain line"), "plain line");
    }

    #[tokio::test]
    async fn test_events_are_attributed_by_source_ip() {
        let connector = Arc::new(MockControlConnector::new());
        let pool = ServerPool::new(connector, Duration::from_secs(1));
        let server = pool
            .add_server(ServerDescriptor {
                name: "alpha".to_string(),
                address: "127.0.0.1".to_string(),
                port: 27015,
                control_secret: "secret".to_string(),
                voice_channel_tag: "alpha".to_string(),
            })
            .await
            .unwrap();

        let (listener, mut events) = TelemetryListener::bind("127.0.0.1:0", pool).await.unwrap();
        let bound = listener.local_addr().unwrap();
        tokio::spawn(listener.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut datagram = vec![0xff, 0xff, 0xff, 0xff, b'R'];
        datagram
            .extend_from_slice(br#"01/15/2026 - 22:31:04: World triggered "Round_Start""#);
        client.send_to(&datagram, bound).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            TelemetryEvent::MatchStarted {
                server_id: server.id
            }
        );
    }
}
