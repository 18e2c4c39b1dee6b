//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// cladebatch - run Nextclade over pre-split chunks and merge the results
///
/// Runs one Nextclade process per chunk, never more at once than the
/// processor budget allows, and merges the per-chunk tables and
/// alignments into single artifacts.
///
/// Examples:
///   cladebatch --chunks-dir ./chunks --dataset ./sars-cov-2 --output-dir ./results
///   cladebatch --chunks-dir ./chunks --dataset ./sars-cov-2 -p 32 -t 8
///   cladebatch --chunks-dir ./chunks --dry-run
///   cladebatch --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Directory holding the pre-split chunk files
    ///
    /// Overrides [general].chunks_dir from the configuration file.
    #[arg(short = 'i', long, value_name = "DIR")]
    pub chunks_dir: Option<PathBuf>,

    /// Directory for the merged artifacts
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Directory for per-chunk outputs
    #[arg(short, long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Nextclade reference dataset directory
    #[arg(short, long, value_name = "DIR")]
    pub dataset: Option<PathBuf>,

    /// Analysis tool binary
    #[arg(long, value_name = "PROGRAM", env = "CLADEBATCH_TOOL")]
    pub tool: Option<String>,

    /// Total processors the batch may use
    ///
    /// Defaults to the number of logical CPUs.
    #[arg(short, long, value_name = "NUM", env = "CLADEBATCH_PROCESSORS")]
    pub processors: Option<usize>,

    /// Threads given to each worker process
    #[arg(short, long, value_name = "NUM")]
    pub threads_per_worker: Option<usize>,

    /// Extension of chunk files (without dot)
    #[arg(long, value_name = "EXT")]
    pub chunk_extension: Option<String>,

    /// Kill a worker that runs longer than this many seconds
    #[arg(long, value_name = "SECS")]
    pub worker_timeout: Option<u64>,

    /// Remote destination for merged artifacts
    ///
    /// Requires an upload command in the configuration file.
    #[arg(long, value_name = "DEST")]
    pub upload_to: Option<String>,

    /// Write a JSON run report to this path
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .cladebatch.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// List the chunks and worker slots without running anything
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .cladebatch.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.threads_per_worker == Some(0) {
            return Err("Threads per worker must be at least 1".to_string());
        }

        if self.worker_timeout == Some(0) {
            return Err("Worker timeout must be at least 1 second".to_string());
        }

        if let Some(ref dir) = self.chunks_dir {
            if !dir.exists() {
                return Err(format!("Chunks directory does not exist: {}", dir.display()));
            }
            if !dir.is_dir() {
                return Err(format!("Chunks path is not a directory: {}", dir.display()));
            }
        }

        if let Some(ref ext) = self.chunk_extension {
            if ext.trim_start_matches('.').is_empty() {
                return Err("Chunk extension must not be empty".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
