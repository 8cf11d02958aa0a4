use nvml_wrapper::error::NvmlError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Conditions that stop nvtreemon before or during a monitoring run.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("NVML not available: {0}")]
    HardwareUnavailable(String),

    #[error("cannot open output file '{}': {source}", .path.display())]
    OutputSinkUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for root process: {0}")]
    Wait(#[source] io::Error),

    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),

    #[error("failed to write JSON summary: {0}")]
    Summary(#[from] serde_json::Error),

    #[error("failed to install termination handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

/// Outcome of a single hardware counter query that did not produce data.
///
/// None of these ever ends a cycle: the collector logs them and moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The result buffer was too small; carries the required entry count when known.
    #[error("insufficient buffer size (required: {0:?})")]
    InsufficientSize(Option<usize>),

    /// Nothing to report, e.g. no utilization samples newer than the cursor.
    #[error("no data available")]
    NotFound,

    #[error("{0}")]
    Failed(String),
}

impl From<NvmlError> for QueryError {
    fn from(err: NvmlError) -> Self {
        match err {
            NvmlError::InsufficientSize(required) => QueryError::InsufficientSize(required),
            NvmlError::NotFound => QueryError::NotFound,
            other => QueryError::Failed(other.to_string()),
        }
    }
}
