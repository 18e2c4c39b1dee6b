//! Error taxonomy for a batch run.
//!
//! Worker failures are collected by the scheduler and only surface here
//! once the batch has fully drained. An empty chunk set is not an error;
//! it is reported through [`crate::models::BatchState::Empty`].

use crate::models::OutputKind;
use std::path::PathBuf;

/// Errors that end a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Required binary not found: {name}")]
    MissingBinary { name: String },

    #[error("Failed to list chunks in {}: {source}", .dir.display())]
    ChunkListing {
        dir: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("{} chunk(s) failed: {}", .chunks.len(), .chunks.join(", "))]
    WorkerFailure { chunks: Vec<String> },

    #[error("No {0} outputs found to merge")]
    MissingOutputs(OutputKind),

    #[error("Failed to merge {kind} outputs: {source}")]
    MergeFailure {
        kind: OutputKind,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload of {} failed: {message}", .path.display())]
    Upload { path: PathBuf, message: String },

    /// The scheduler owns its gate and never closes it, so a closed gate
    /// means the admission path itself is broken.
    #[error("Concurrency gate closed while admitting {chunk}")]
    GateClosed { chunk: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::WorkerFailure { .. } => 2,
            PipelineError::MissingOutputs(_) | PipelineError::MergeFailure { .. } => 3,
            PipelineError::MissingBinary { .. } => 4,
            _ => 1,
        }
    }
}
