//! Result aggregation.
//!
//! After a batch succeeds, every declared output kind is collected from
//! the chunks of that batch and merged into one artifact in the output
//! directory. Only the paths derived for this batch's chunks are read, so
//! leftovers from other runs in the working directory are never merged.
//! A chunk missing any declared kind is fatal.

pub mod merge;

use crate::chunks::ChunkSet;
use crate::error::PipelineError;
use crate::models::{MergedArtifact, OutputKind};
use std::path::PathBuf;
use tracing::{debug, info, warn};

pub use merge::{concat_raw, stack_tables};

/// Per-chunk files of one kind, in chunk order.
#[derive(Debug, Default)]
pub struct LocatedOutputs {
    pub present: Vec<PathBuf>,
    /// Names of chunks whose file is absent.
    pub missing: Vec<String>,
}

/// Locate the expected output of `kind` for every chunk in the batch.
pub fn locate_outputs(chunks: &ChunkSet, kind: OutputKind) -> LocatedOutputs {
    let mut located = LocatedOutputs::default();
    for chunk in chunks.iter() {
        let path = chunk.outputs.path(kind);
        if path.is_file() {
            located.present.push(path.to_path_buf());
        } else {
            located.missing.push(chunk.name.clone());
        }
    }
    located
}

/// Merges per-chunk outputs into one artifact per declared kind.
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    output_dir: PathBuf,
    kinds: Vec<OutputKind>,
}

impl ResultAggregator {
    pub fn new(output_dir: PathBuf, kinds: Vec<OutputKind>) -> Self {
        Self { output_dir, kinds }
    }

    /// Destination of the merged artifact for a kind.
    pub fn destination(&self, kind: OutputKind) -> PathBuf {
        self.output_dir.join(kind.merged_file_name())
    }

    /// Merge every declared kind over the chunks of one batch.
    ///
    /// All kinds are located before anything is written, so a missing
    /// output leaves no merged artifacts behind.
    pub fn aggregate(&self, chunks: &ChunkSet) -> Result<Vec<MergedArtifact>, PipelineError> {
        let mut located = Vec::with_capacity(self.kinds.len());
        for &kind in &self.kinds {
            let outputs = locate_outputs(chunks, kind);
            debug!("Found {} {} file(s)", outputs.present.len(), kind);
            if !outputs.missing.is_empty() {
                warn!(
                    "No {} output for {} chunk(s): {}",
                    kind,
                    outputs.missing.len(),
                    outputs.missing.join(", ")
                );
                return Err(PipelineError::MissingOutputs(kind));
            }
            if outputs.present.is_empty() {
                return Err(PipelineError::MissingOutputs(kind));
            }
            located.push((kind, outputs.present));
        }

        let mut artifacts = Vec::with_capacity(located.len());
        for (kind, files) in located {
            artifacts.push(self.merge_kind(kind, &files)?);
        }
        Ok(artifacts)
    }

    fn merge_kind(&self, kind: OutputKind, files: &[PathBuf]) -> Result<MergedArtifact, PipelineError> {
        let dest = self.destination(kind);
        let units = if kind.is_tabular() {
            stack_tables(files, &dest)
        } else {
            concat_raw(files, &dest)
        }
        .map_err(|source| PipelineError::MergeFailure { kind, source })?;

        info!(
            "Merged {} {} file(s) into {}",
            files.len(),
            kind,
            dest.display()
        );

        Ok(MergedArtifact {
            kind,
            path: dest,
            inputs: files.len(),
            units,
        })
    }
}
