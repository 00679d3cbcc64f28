//! Configuration management for the pickup-hub service
//!
//! This module handles all configuration loading from environment variables,
//! validation, and default values, plus the queue presets that define the
//! available pickup formats.

pub mod app;
pub mod queue;

// Re-export commonly used types
pub use app::{
    validate_config, AmqpSettings, AppConfig, OrchestratorSettings, PoolSettings, ServiceSettings,
    TelemetrySettings, VoiceSettings,
};
pub use queue::{ClassSpec, QueueConfig};
