//! Matchmaking queue for pickup games
//!
//! Players take per-class slots, ready up once the queue fills, and the
//! completed roster is handed to the game orchestrator. Map voting and
//! friend requests are handled here as well.

pub mod engine;
pub mod service;
pub mod slot;

// Re-export commonly used types
pub use engine::{EngineUpdate, QueueEngine, QueueState, StateTransition};
pub use service::{GameLauncher, QueueService};
pub use slot::{build_slots, QueueSlot};
