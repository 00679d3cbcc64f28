//! Error types for the pickup service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific pickup scenarios
#[derive(Debug, thiserror::Error)]
pub enum PickupError {
    #[error("No such player: {player_id}")]
    UnknownPlayer { player_id: String },

    #[error("Player {player_id} is banned from joining the queue")]
    PlayerBanned { player_id: String },

    #[error("Player {player_id} is involved in a currently active game")]
    PlayerInActiveGame { player_id: String },

    #[error("No such slot: {slot_id}")]
    UnknownSlot { slot_id: u32 },

    #[error("Slot {slot_id} is already taken")]
    SlotTaken { slot_id: u32 },

    #[error("Cannot unready while the queue is committed")]
    CannotUnready,

    #[error("Queue is not in the ready-up phase")]
    QueueNotReady,

    #[error("Player {player_id} is not in the queue")]
    NotInQueue { player_id: String },

    #[error("Friends cannot be marked while the queue is launching")]
    FriendMarkingClosed,

    #[error("Class {game_class} cannot mark friends")]
    FriendMarkingNotAllowed { game_class: String },

    #[error("Player {player_id} cannot be marked as a friend")]
    InvalidFriendTarget { player_id: String },

    #[error("Invalid game class: {game_class}")]
    InvalidGameClass { game_class: String },

    #[error("Cannot create a game with the queue not being full")]
    RosterIncomplete,

    #[error("Game not found: {game_id}")]
    GameNotFound { game_id: String },

    #[error("Player {player_id} is not a member of this game")]
    PlayerNotInGame { player_id: String },

    #[error("Player {player_id} has already been replaced")]
    PlayerAlreadyReplaced { player_id: String },

    #[error("No free game server available")]
    NoFreeServer,

    #[error("Game server not found: {server_id}")]
    ServerNotFound { server_id: String },

    #[error("Server control failed: {message}")]
    ServerControl { message: String },

    #[error("Server {server_id} already has an active assignment")]
    AssignmentConflict { server_id: String },

    #[error("Broker connection failed: {message}")]
    BrokerFailed { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}
