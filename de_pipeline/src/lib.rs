//! Prepares RNA-seq gene counts for differential-expression testing, runs an external
//! engine per comparison, merges the results and draws MA plots.

pub mod analysis;
pub mod config;
pub mod data_handling;
pub mod engine;
pub mod error;
pub mod helper_functions;
pub mod models;
pub mod pipeline;
pub mod workspace;

pub use config::PipelineConfig;
pub use engine::{CommandEngine, DeEngine, EngineJob};
pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, RunSummary};
