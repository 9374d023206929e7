// Library crate - market-structure analysis and trade-decision engine

pub mod analysis;
pub mod config;
pub mod engine;
pub mod feeds;
pub mod gateway;
pub mod options;
pub mod types;

// Re-export commonly used types
pub use config::{ConfigHandle, Credentials, EngineConfig};
pub use engine::{CycleOutcome, Engine, EngineState};
pub use types::*;
