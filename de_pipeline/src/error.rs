//! Error types for the differential-expression pipeline

use std::path::PathBuf;

use polars::error::PolarsError;
use thiserror::Error;

/// Every failure the pipeline can report.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot load count table {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("comparison '{comparison}': {reason}")]
    Selection { comparison: String, reason: String },

    #[error("differential-expression engine failed: {reason}")]
    Engine { reason: String },

    #[error("cannot merge results: {reason}")]
    Merge { reason: String },

    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("cannot render MA plot: {reason}")]
    Plot { reason: String },

    #[error("comparison '{name}' failed: {source}")]
    Comparison {
        name: String,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("data frame error: {0}")]
    Polars(#[from] PolarsError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub(crate) fn load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PipelineError::Load { path: path.into(), reason: reason.to_string() }
    }

    pub(crate) fn engine(reason: impl ToString) -> Self {
        PipelineError::Engine { reason: reason.to_string() }
    }

    pub(crate) fn merge(reason: impl ToString) -> Self {
        PipelineError::Merge { reason: reason.to_string() }
    }

    pub(crate) fn config(reason: impl ToString) -> Self {
        PipelineError::Config { reason: reason.to_string() }
    }

    pub(crate) fn plot(reason: impl ToString) -> Self {
        PipelineError::Plot { reason: reason.to_string() }
    }

    /// Attach the name of the comparison that was running when `self` happened.
    pub fn in_comparison(self, name: &str) -> Self {
        match self {
            already @ PipelineError::Comparison { .. } => already,
            other => PipelineError::Comparison { name: name.to_string(), source: Box::new(other) },
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
