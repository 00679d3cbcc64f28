//! Real-time push channel for client notifications
//!
//! Queue slot updates, queue state changes and game updates are pushed to
//! clients through the [`PushChannel`] trait; the production implementation
//! publishes to an AMQP topic exchange.

pub mod publisher;

// Re-export commonly used types
pub use publisher::{AmqpPushChannel, MockPushChannel, PushChannel};
