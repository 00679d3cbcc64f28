//! Pickup Hub - Matchmaking and game-server orchestration for pickup games
//!
//! This crate provides the matchmaking queue, skill-based team balancing,
//! game lifecycle orchestration and the game-server pool with its control
//! protocol and match telemetry ingestion.

pub mod balance;
pub mod config;
pub mod error;
pub mod game;
pub mod notify;
pub mod players;
pub mod queue;
pub mod servers;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{PickupError, Result};
pub use types::*;

// Re-export key components
pub use game::GameOrchestrator;
pub use notify::PushChannel;
pub use queue::QueueService;
pub use servers::ServerPool;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
