//! Game model, persistence and lifecycle orchestration

pub mod model;
pub mod orchestrator;
pub mod store;

// Re-export commonly used types
pub use model::{Game, GameState};
pub use orchestrator::GameOrchestrator;
pub use store::{GameStore, InMemoryGameStore};
