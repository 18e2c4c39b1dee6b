//! Chunk discovery.
//!
//! This module lists the pre-split input chunks in a directory and
//! derives each chunk's output locations.

use crate::error::PipelineError;
use crate::models::{Chunk, OutputKind};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Configuration for chunk discovery.
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Directory holding the chunk files.
    pub chunks_dir: PathBuf,
    /// Extension of chunk files (without dot), e.g. "fasta".
    pub extension: String,
    /// Directory where per-chunk outputs are written.
    pub work_dir: PathBuf,
}

/// The set of chunks in one batch, in enumeration order.
#[derive(Debug, Clone, Default)]
pub struct ChunkSet {
    chunks: Vec<Chunk>,
}

impl ChunkSet {
    /// List the chunk files in `config.chunks_dir`.
    ///
    /// Only regular files directly inside the directory with the configured
    /// extension are taken. Hidden files are skipped. The order is sorted by
    /// file name so dispatch order is stable across runs. Per-chunk outputs
    /// (e.g. `chunk_0001.aligned.fasta`) are never taken as input.
    ///
    /// Two files that would produce the same chunk name are rejected, since
    /// their workers would write to the same output paths.
    pub fn discover(config: &ChunkConfig) -> Result<Self, PipelineError> {
        let mut chunks = Vec::new();
        let mut seen: HashMap<String, PathBuf> = HashMap::new();

        for entry in WalkDir::new(&config.chunks_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|source| PipelineError::ChunkListing {
                dir: config.chunks_dir.clone(),
                source,
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if !matches_extension(path, &config.extension) {
                continue;
            }
            if is_chunk_output(path) {
                debug!("Skipping per-chunk output: {}", path.display());
                continue;
            }

            let Some(name) = chunk_name(path) else {
                debug!("Skipping unnamed chunk file: {}", path.display());
                continue;
            };

            if let Some(previous) = seen.insert(name.clone(), path.to_path_buf()) {
                return Err(PipelineError::Configuration(format!(
                    "chunk name '{}' is shared by {} and {}",
                    name,
                    previous.display(),
                    path.display()
                )));
            }

            chunks.push(Chunk::new(name, path.to_path_buf(), &config.work_dir));
        }

        debug!(
            "Found {} chunk(s) in {}",
            chunks.len(),
            config.chunks_dir.display()
        );
        Ok(Self { chunks })
    }

    #[cfg(test)]
    pub fn from_chunks(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }
}

fn matches_extension(path: &Path, extension: &str) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };
    if name.starts_with('.') {
        return false;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension.trim_start_matches('.')))
        .unwrap_or(false)
}

fn is_chunk_output(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| OutputKind::ALL.iter().any(|kind| kind.matches_file_name(name)))
        .unwrap_or(false)
}

fn chunk_name(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &Path) -> ChunkConfig {
        ChunkConfig {
            chunks_dir: dir.to_path_buf(),
            extension: "fasta".to_string(),
            work_dir: dir.join("work"),
        }
    }

    #[test]
    fn test_discover_sorted_and_filtered() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        std::fs::write(dir.join("chunk_0002.fasta"), ">b\nACGT\n").unwrap();
        std::fs::write(dir.join("chunk_0001.fasta"), ">a\nACGT\n").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignore").unwrap();
        std::fs::write(dir.join(".hidden.fasta"), "").unwrap();
        std::fs::create_dir(dir.join("nested.fasta")).unwrap();

        let set = ChunkSet::discover(&config(dir)).unwrap();
        let names: Vec<&str> = set.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["chunk_0001", "chunk_0002"]);

        let first = set.iter().next().unwrap();
        assert_eq!(
            first.outputs.table,
            dir.join("work").join("chunk_0001.nextclade.tsv")
        );
    }

    #[test]
    fn test_discover_empty_directory() {
        let temp = TempDir::new().unwrap();
        let set = ChunkSet::discover(&config(temp.path())).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_discover_missing_directory() {
        let temp = TempDir::new().unwrap();
        let result = ChunkSet::discover(&config(&temp.path().join("absent")));
        assert!(matches!(result, Err(PipelineError::ChunkListing { .. })));
    }

    #[test]
    fn test_duplicate_chunk_names_rejected() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        std::fs::write(dir.join("chunk_0001.fasta"), ">a\nACGT\n").unwrap();
        std::fs::write(dir.join("chunk_0001.FASTA"), ">a\nACGT\n").unwrap();

        let result = ChunkSet::discover(&config(dir));
        match result {
            Err(PipelineError::Configuration(message)) => {
                assert!(message.contains("chunk_0001"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_outputs_in_chunks_dir_are_not_chunks() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        std::fs::write(dir.join("chunk_0001.fasta"), ">a\nACGT\n").unwrap();
        std::fs::write(dir.join("chunk_0001.aligned.fasta"), ">a\nACGT\n").unwrap();
        let mut config = config(dir);
        config.work_dir = dir.to_path_buf();

        let set = ChunkSet::discover(&config).unwrap();
        let names: Vec<&str> = set.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["chunk_0001"]);
    }

    #[test]
    fn test_extension_with_leading_dot() {
        assert!(matches_extension(Path::new("a.FASTA"), ".fasta"));
        assert!(!matches_extension(Path::new("a.fa"), "fasta"));
    }
}
