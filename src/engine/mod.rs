//! The decision engine: market-hours gating, execution and reconciliation,
//! and the orchestrator state machine that ties analysis to trading.

pub mod execution;
pub mod market_hours;
pub mod orchestrator;

pub use orchestrator::{AnalysisSnapshot, CycleOutcome, Engine, EngineState};
