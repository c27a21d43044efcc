// Core infrastructure shared by the engine, the queues and units of work

pub mod config;
pub mod errors;
pub mod telemetry;

// Re-export commonly used types
pub use config::{EngineConfig, EngineConfigBuilder, QueueConfig, DEFAULT_QUEUE};
pub use errors::{EngineError, Result};
pub use telemetry::init_tracing;
