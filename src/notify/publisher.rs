//! AMQP-backed push channel for outbound client events

use crate::config::AmqpSettings;
use crate::error::{PickupError, Result};
use crate::utils::current_timestamp;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    connection::{Connection, OpenConnectionArguments},
    BasicProperties,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// Trait for pushing real-time events to connected clients
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Broadcast an event to every connected client
    async fn broadcast(&self, event: &str, payload: serde_json::Value) -> Result<()>;

    /// Send an event to a single player
    async fn send_to_player(
        &self,
        player_id: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<()>;
}

/// Wire envelope for push events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub event: String,
    pub payload: serde_json::Value,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
}

impl PushEnvelope {
    pub fn new(event: &str, payload: serde_json::Value) -> Self {
        Self {
            event: event.to_string(),
            payload,
            correlation_id: Uuid::new_v4().to_string(),
            timestamp: current_timestamp(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            PickupError::InternalError {
                message: format!("Failed to serialize push envelope: {}", e),
            }
            .into()
        })
    }
}

/// AMQP topic-exchange push channel
pub struct AmqpPushChannel {
    channel: Channel,
    exchange: String,
}

impl AmqpPushChannel {
    /// Open a broker connection and set up the events exchange
    pub async fn connect(settings: &AmqpSettings) -> Result<Self> {
        let mut args = OpenConnectionArguments::new(
            &settings.host,
            settings.port,
            &settings.username,
            &settings.password,
        );
        args.virtual_host(&settings.vhost);

        let connection =
            Connection::open(&args)
                .await
                .map_err(|e| PickupError::BrokerFailed {
                    message: format!("Failed to open AMQP connection: {}", e),
                })?;

        let channel =
            connection
                .open_channel(None)
                .await
                .map_err(|e| PickupError::BrokerFailed {
                    message: format!("Failed to open AMQP channel: {}", e),
                })?;

        let push = Self::new(channel, settings.exchange_name.clone()).await?;
        info!("Connected push channel to AMQP broker");
        Ok(push)
    }

    /// Build a push channel on an existing AMQP channel
    pub async fn new(channel: Channel, exchange: String) -> Result<Self> {
        let args = ExchangeDeclareArguments::new(&exchange, "topic");
        channel
            .exchange_declare(args)
            .await
            .map_err(|e| PickupError::BrokerFailed {
                message: format!("Failed to declare events exchange: {}", e),
            })?;

        Ok(Self { channel, exchange })
    }

    async fn publish(&self, routing_key: &str, envelope: &PushEnvelope) -> Result<()> {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.exchange, routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| PickupError::BrokerFailed {
                message: format!("Failed to publish push event: {}", e),
            })?;

        debug!(
            "Published push event {} with routing key {}",
            envelope.correlation_id, routing_key
        );
        Ok(())
    }
}

#[async_trait]
impl PushChannel for AmqpPushChannel {
    async fn broadcast(&self, event: &str, payload: serde_json::Value) -> Result<()> {
        let envelope = PushEnvelope::new(event, payload);
        self.publish(event, &envelope).await
    }

    async fn send_to_player(
        &self,
        player_id: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        let envelope = PushEnvelope::new(event, payload);
        let routing_key = format!("player.{}.{}", player_id, event);
        self.publish(&routing_key, &envelope).await
    }
}

/// Mock push channel for testing
#[derive(Debug, Default)]
pub struct MockPushChannel {
    events: std::sync::Mutex<Vec<(String, serde_json::Value)>>,
}

impl MockPushChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded (event, payload) pairs
    pub fn events(&self) -> Vec<(String, serde_json::Value)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Recorded payloads for a specific event name
    pub fn events_named(&self, name: &str) -> Vec<serde_json::Value> {
        self.events()
            .into_iter()
            .filter(|(event, _)| event == name)
            .map(|(_, payload)| payload)
            .collect()
    }

    /// Clear recorded events
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl PushChannel for MockPushChannel {
    async fn broadcast(&self, event: &str, payload: serde_json::Value) -> Result<()> {
        if let Ok(mut events) = self.events.lock() {
            events.push((event.to_string(), payload));
        }
        Ok(())
    }

    async fn send_to_player(
        &self,
        player_id: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        if let Ok(mut events) = self.events.lock() {
            events.push((format!("player.{}.{}", player_id, event), payload));
        }
        Ok(())
    }
}
