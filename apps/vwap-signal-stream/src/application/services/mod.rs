//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `TickPipeline`: decode, resolve, aggregate and trigger for one frame
//! - `StreamEngine`: single ingestion loop joining frames with dispatch
//!   outcomes

mod engine;
mod pipeline;

pub use engine::{EngineExit, StreamEngine};
pub use pipeline::{
    PipelineConfig, PipelineStats, PipelineStatsSnapshot, ProcessedTick, TickOutcome,
    TickPipeline,
};
