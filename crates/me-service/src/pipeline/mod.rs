//! Queue consumer: persistence, mapping, reconciliation and broadcast.

pub mod processor;
pub mod stats;

pub use processor::{run_pipeline, EventProcessor, PipelineConfig, PipelineReport, ProcessResult};
pub use stats::{EngineStatistics, ProcessingStats};
