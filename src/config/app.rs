//! Main application configuration
//!
//! This module defines the primary configuration structures for the pickup-hub
//! service, including environment variable loading and validation.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub amqp: AmqpSettings,
    pub telemetry: TelemetrySettings,
    pub pool: PoolSettings,
    pub orchestrator: OrchestratorSettings,
    pub voice: VoiceSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Service name for logging
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Queue format preset loaded at startup
    pub queue_preset: String,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// AMQP connection settings for the real-time push channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmqpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub vhost: String,
    /// Exchange name for outbound push events
    pub exchange_name: String,
    /// Connection timeout in seconds
    pub connection_timeout_seconds: u64,
}

/// Match telemetry (log relay) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySettings {
    /// Local UDP address the listener binds to
    pub bind_address: String,
    /// Address game servers are told to forward logs to
    pub public_address: String,
}

/// Game-server pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Interval between background liveness probes, in seconds
    pub health_sweep_interval_seconds: u64,
    /// Timeout for control-protocol sessions, in seconds
    pub control_timeout_seconds: u64,
}

/// Game orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Initial delay between launch attempts, in milliseconds
    pub launch_retry_delay_ms: u64,
    /// Maximum number of launch attempts before interrupting the game
    pub launch_max_attempts: u32,
    /// Delay before cleaning up and releasing a server after a match ends,
    /// in seconds (tolerates late log uploads)
    pub cleanup_delay_seconds: u64,
}

/// Voice channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSettings {
    /// Voice server URL
    pub server_url: String,
    /// Top-level channel name
    pub channel: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "pickup-hub".to_string(),
            log_level: "info".to_string(),
            queue_preset: "sixes".to_string(),
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for AmqpSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            username: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            exchange_name: "pickup.events".to_string(),
            connection_timeout_seconds: 30,
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9871".to_string(),
            public_address: "127.0.0.1:9871".to_string(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            health_sweep_interval_seconds: 30,
            control_timeout_seconds: 30,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            launch_retry_delay_ms: 10_000,
            launch_max_attempts: 30,
            cleanup_delay_seconds: 2 * 60,
        }
    }
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            server_url: "voice.localhost".to_string(),
            channel: "Pickups".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            config.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.service.log_level = log_level;
        }
        if let Ok(preset) = env::var("QUEUE_PRESET") {
            config.service.queue_preset = preset;
        }
        if let Ok(timeout) = env::var("SHUTDOWN_TIMEOUT_SECONDS") {
            config.service.shutdown_timeout_seconds = timeout
                .parse()
                .map_err(|_| anyhow!("Invalid SHUTDOWN_TIMEOUT_SECONDS value: {}", timeout))?;
        }

        // AMQP settings
        if let Ok(host) = env::var("AMQP_HOST") {
            config.amqp.host = host;
        }
        if let Ok(port) = env::var("AMQP_PORT") {
            config.amqp.port = port
                .parse()
                .map_err(|_| anyhow!("Invalid AMQP_PORT value: {}", port))?;
        }
        if let Ok(username) = env::var("AMQP_USERNAME") {
            config.amqp.username = username;
        }
        if let Ok(password) = env::var("AMQP_PASSWORD") {
            config.amqp.password = password;
        }
        if let Ok(vhost) = env::var("AMQP_VHOST") {
            config.amqp.vhost = vhost;
        }
        if let Ok(exchange) = env::var("AMQP_EXCHANGE_NAME") {
            config.amqp.exchange_name = exchange;
        }
        if let Ok(timeout) = env::var("AMQP_CONNECTION_TIMEOUT_SECONDS") {
            config.amqp.connection_timeout_seconds = timeout.parse().map_err(|_| {
                anyhow!("Invalid AMQP_CONNECTION_TIMEOUT_SECONDS value: {}", timeout)
            })?;
        }

        // Telemetry settings
        if let Ok(bind) = env::var("TELEMETRY_BIND_ADDRESS") {
            config.telemetry.bind_address = bind;
        }
        if let Ok(public) = env::var("TELEMETRY_PUBLIC_ADDRESS") {
            config.telemetry.public_address = public;
        }

        // Pool settings
        if let Ok(interval) = env::var("HEALTH_SWEEP_INTERVAL_SECONDS") {
            config.pool.health_sweep_interval_seconds = interval.parse().map_err(|_| {
                anyhow!("Invalid HEALTH_SWEEP_INTERVAL_SECONDS value: {}", interval)
            })?;
        }
        if let Ok(timeout) = env::var("CONTROL_TIMEOUT_SECONDS") {
            config.pool.control_timeout_seconds = timeout
                .parse()
                .map_err(|_| anyhow!("Invalid CONTROL_TIMEOUT_SECONDS value: {}", timeout))?;
        }

        // Orchestrator settings
        if let Ok(delay) = env::var("LAUNCH_RETRY_DELAY_MS") {
            config.orchestrator.launch_retry_delay_ms = delay
                .parse()
                .map_err(|_| anyhow!("Invalid LAUNCH_RETRY_DELAY_MS value: {}", delay))?;
        }
        if let Ok(attempts) = env::var("LAUNCH_MAX_ATTEMPTS") {
            config.orchestrator.launch_max_attempts = attempts
                .parse()
                .map_err(|_| anyhow!("Invalid LAUNCH_MAX_ATTEMPTS value: {}", attempts))?;
        }
        if let Ok(delay) = env::var("CLEANUP_DELAY_SECONDS") {
            config.orchestrator.cleanup_delay_seconds = delay
                .parse()
                .map_err(|_| anyhow!("Invalid CLEANUP_DELAY_SECONDS value: {}", delay))?;
        }

        // Voice settings
        if let Ok(url) = env::var("VOICE_SERVER_URL") {
            config.voice.server_url = url;
        }
        if let Ok(channel) = env::var("VOICE_CHANNEL") {
            config.voice.channel = channel;
        }

        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;
        let config: Self = toml::from_str(&contents).context("Failed to parse config file")?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get control-session timeout as Duration
    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.pool.control_timeout_seconds)
    }

    /// Get the health sweep interval as Duration
    pub fn health_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.pool.health_sweep_interval_seconds)
    }
}

impl OrchestratorSettings {
    /// Initial launch retry delay as Duration
    pub fn launch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.launch_retry_delay_ms)
    }

    /// Post-match cleanup delay as Duration
    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_secs(self.cleanup_delay_seconds)
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    // Validate timeouts
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }
    if config.amqp.connection_timeout_seconds == 0 {
        return Err(anyhow!("AMQP connection timeout must be greater than 0"));
    }
    if config.pool.control_timeout_seconds == 0 {
        return Err(anyhow!("Control timeout must be greater than 0"));
    }
    if config.pool.health_sweep_interval_seconds == 0 {
        return Err(anyhow!("Health sweep interval must be greater than 0"));
    }

    // Validate AMQP settings
    if config.amqp.host.is_empty() {
        return Err(anyhow!("AMQP host cannot be empty"));
    }
    if config.amqp.exchange_name.is_empty() {
        return Err(anyhow!("AMQP exchange name cannot be empty"));
    }

    // Validate telemetry settings
    if config.telemetry.bind_address.is_empty() {
        return Err(anyhow!("Telemetry bind address cannot be empty"));
    }
    if config.telemetry.public_address.is_empty() {
        return Err(anyhow!("Telemetry public address cannot be empty"));
    }

    // Validate orchestrator settings
    if config.orchestrator.launch_max_attempts == 0 {
        return Err(anyhow!("Launch attempt count must be greater than 0"));
    }

    Ok(())
}
