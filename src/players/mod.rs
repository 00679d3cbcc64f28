//! Player identity and skill resolution
//!
//! Identity issuance and skill persistence live outside this service; the
//! core only consumes them through the provider traits defined here.

pub mod provider;

// Re-export commonly used types
pub use provider::{
    InMemoryPlayerDirectory, PlayerDirectory, SkillProvider, StaticSkillProvider, DEFAULT_SKILL,
};
