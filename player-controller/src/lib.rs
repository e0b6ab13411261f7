pub mod arbiter;
pub mod config;
pub mod controller;
pub mod publisher;
pub mod surface;
#[cfg(test)]
mod testing;
pub mod transport;

pub use arbiter::{ArbiterSnapshot, ArbiterState, RetryBudget, TransportArbiter};
pub use config::ControllerSettings;
pub use controller::{ControllerHandle, StreamController};
pub use publisher::StatusPublisher;
pub use surface::{max_concurrent_bindings, RenderSurface, SurfaceAudit, SurfaceLease};
pub use transport::{
    cache_bust, ArbiterEvent, EngineInstance, EventSink, LowLatencyConnector, LowLatencySession,
    SegmentedEngine, SessionId, StatusSink,
};
