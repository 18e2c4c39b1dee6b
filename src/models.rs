//! Data models for a batch run.
//!
//! This module contains the core data structures shared by the chunk
//! listing, the scheduler and the aggregator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Category of per-chunk output that gets merged into one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputKind {
    /// Nextclade results table (TSV).
    PrimaryTable,
    /// Aligned sequences (FASTA).
    AlignedOutput,
    /// Derived per-chunk summary table (TSV).
    PerChunkSummary,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKind::PrimaryTable => write!(f, "primary-table"),
            OutputKind::AlignedOutput => write!(f, "aligned-output"),
            OutputKind::PerChunkSummary => write!(f, "per-chunk-summary"),
        }
    }
}

impl OutputKind {
    /// All kinds, in merge order.
    pub const ALL: [OutputKind; 3] = [
        OutputKind::PrimaryTable,
        OutputKind::AlignedOutput,
        OutputKind::PerChunkSummary,
    ];

    /// File name suffix that identifies a per-chunk output of this kind.
    pub fn suffix(&self) -> &'static str {
        match self {
            OutputKind::PrimaryTable => ".nextclade.tsv",
            OutputKind::AlignedOutput => ".aligned.fasta",
            OutputKind::PerChunkSummary => ".summary.tsv",
        }
    }

    /// File name of the merged artifact.
    pub fn merged_file_name(&self) -> &'static str {
        match self {
            OutputKind::PrimaryTable => "nextclade.tsv",
            OutputKind::AlignedOutput => "aligned.fasta",
            OutputKind::PerChunkSummary => "summary.tsv",
        }
    }

    /// Whether outputs of this kind carry a header row.
    pub fn is_tabular(&self) -> bool {
        !matches!(self, OutputKind::AlignedOutput)
    }

    /// Path of this kind's output for the named chunk.
    pub fn chunk_path(&self, work_dir: &Path, chunk_name: &str) -> PathBuf {
        work_dir.join(format!("{}{}", chunk_name, self.suffix()))
    }

    /// Whether a file name is a per-chunk output of this kind.
    pub fn matches_file_name(&self, name: &str) -> bool {
        name.len() > self.suffix().len() && name.ends_with(self.suffix())
    }
}

/// Output locations a worker writes for one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkOutputs {
    pub table: PathBuf,
    pub aligned: PathBuf,
    pub summary: PathBuf,
    /// Per-record output directory for the tool's remaining files.
    pub scratch_dir: PathBuf,
}

impl ChunkOutputs {
    /// Derive every output path for a chunk from the working directory.
    pub fn derive(work_dir: &Path, chunk_name: &str) -> Self {
        Self {
            table: OutputKind::PrimaryTable.chunk_path(work_dir, chunk_name),
            aligned: OutputKind::AlignedOutput.chunk_path(work_dir, chunk_name),
            summary: OutputKind::PerChunkSummary.chunk_path(work_dir, chunk_name),
            scratch_dir: work_dir.join(format!("{}_output", chunk_name)),
        }
    }

    /// Where this chunk's output of `kind` lives.
    pub fn path(&self, kind: OutputKind) -> &Path {
        match kind {
            OutputKind::PrimaryTable => &self.table,
            OutputKind::AlignedOutput => &self.aligned,
            OutputKind::PerChunkSummary => &self.summary,
        }
    }
}

/// One partition of the input dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable name taken from the input file stem.
    pub name: String,
    /// Path to the chunk's input file.
    pub input: PathBuf,
    /// Where the worker writes this chunk's outputs.
    pub outputs: ChunkOutputs,
}

impl Chunk {
    pub fn new(name: String, input: PathBuf, work_dir: &Path) -> Self {
        let outputs = ChunkOutputs::derive(work_dir, &name);
        Self {
            name,
            input,
            outputs,
        }
    }
}

/// Terminal status of one worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerExit {
    /// Exit code, absent when the process was killed by a signal or timed out.
    pub code: Option<i32>,
    /// The process was killed after exceeding the worker timeout.
    pub timed_out: bool,
}

impl WorkerExit {
    pub fn from_code(code: Option<i32>) -> Self {
        Self {
            code,
            timed_out: false,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            code: None,
            timed_out: true,
        }
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.timed_out, self.code) {
            (true, _) => write!(f, "timed out"),
            (false, Some(code)) => write!(f, "exit code {}", code),
            (false, None) => write!(f, "terminated by signal"),
        }
    }
}

/// Result of one reaped worker task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub chunk: String,
    /// Exit status, absent if the process could not be started at all.
    pub exit: Option<WorkerExit>,
    /// Launch or runtime error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_seconds: f64,
}

impl TaskOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.exit.map(|e| e.success()).unwrap_or(false)
    }
}

/// Lifecycle of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Idle,
    Dispatching,
    Draining,
    Succeeded,
    Failed,
    /// No chunks were found. Terminal, and not an error.
    Empty,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchState::Succeeded | BatchState::Failed | BatchState::Empty
        )
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchState::Idle => "idle",
            BatchState::Dispatching => "dispatching",
            BatchState::Draining => "draining",
            BatchState::Succeeded => "succeeded",
            BatchState::Failed => "failed",
            BatchState::Empty => "empty",
        };
        write!(f, "{}", name)
    }
}

/// Aggregate over every worker task in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub state: BatchState,
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Names of failed chunks, sorted.
    pub failed_chunks: Vec<String>,
    /// Gate capacity the batch ran under.
    pub slots: usize,
    /// Highest number of simultaneously admitted workers.
    pub peak_concurrency: usize,
    pub outcomes: Vec<TaskOutcome>,
}

impl BatchResult {
    /// Result for a batch with nothing to do.
    pub fn empty(slots: usize) -> Self {
        Self {
            state: BatchState::Empty,
            submitted: 0,
            succeeded: 0,
            failed: 0,
            failed_chunks: Vec::new(),
            slots,
            peak_concurrency: 0,
            outcomes: Vec::new(),
        }
    }

    /// Judge a drained batch from its task outcomes.
    pub fn from_outcomes(outcomes: Vec<TaskOutcome>, slots: usize, peak: usize) -> Self {
        if outcomes.is_empty() {
            return Self::empty(slots);
        }

        let mut failed_chunks: Vec<String> = outcomes
            .iter()
            .filter(|o| !o.succeeded())
            .map(|o| o.chunk.clone())
            .collect();
        failed_chunks.sort();

        let submitted = outcomes.len();
        let failed = failed_chunks.len();
        let state = if failed == 0 {
            BatchState::Succeeded
        } else {
            BatchState::Failed
        };

        Self {
            state,
            submitted,
            succeeded: submitted - failed,
            failed,
            failed_chunks,
            slots,
            peak_concurrency: peak,
            outcomes,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == BatchState::Succeeded
    }
}

/// A merged artifact written by the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedArtifact {
    pub kind: OutputKind,
    pub path: PathBuf,
    /// Number of per-chunk files that went into it.
    pub inputs: usize,
    /// Data rows for tabular kinds, bytes for the sequence kind.
    pub units: u64,
}
