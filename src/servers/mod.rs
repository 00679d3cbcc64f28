//! Game server pool, remote control and match telemetry

pub mod control;
pub mod model;
pub mod pool;
pub mod telemetry;

// Re-export commonly used types
pub use control::{ControlConnector, ControlSession, MockControlConnector, RconConnector};
pub use model::{GameServer, ServerAssignment, ServerDescriptor};
pub use pool::ServerPool;
pub use telemetry::{classify_line, LineKind, TelemetryEvent, TelemetryListener};
