//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.cladebatch.toml` files.

use crate::error::PipelineError;
use crate::models::OutputKind;
use crate::scheduler::Budget;
use crate::worker::{SummaryCommand, ToolInvocation};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = ".cladebatch.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Processor budget.
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Analysis tool settings.
    #[serde(default)]
    pub tool: ToolConfig,

    /// Optional per-chunk summary step.
    #[serde(default)]
    pub summary: SummaryConfig,

    /// Optional upload of merged artifacts.
    #[serde(default)]
    pub upload: UploadConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory with the pre-split chunks.
    #[serde(default)]
    pub chunks_dir: Option<PathBuf>,

    /// Directory for per-chunk outputs.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Directory for merged artifacts.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Extension of chunk files.
    #[serde(default = "default_chunk_extension")]
    pub chunk_extension: String,

    /// Where to write the JSON run report.
    #[serde(default)]
    pub report: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            chunks_dir: None,
            work_dir: default_work_dir(),
            output_dir: default_output_dir(),
            chunk_extension: default_chunk_extension(),
            report: None,
        }
    }
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("tmp")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_chunk_extension() -> String {
    "fasta".to_string()
}

/// Processor budget settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Total processors; the number of logical CPUs when unset.
    #[serde(default)]
    pub processors: Option<usize>,

    /// Threads per worker process.
    #[serde(default = "default_threads_per_worker")]
    pub threads_per_worker: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            processors: None,
            threads_per_worker: default_threads_per_worker(),
        }
    }
}

fn default_threads_per_worker() -> usize {
    8
}

/// Analysis tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Tool binary, a name on PATH or a path.
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Arguments before the generated flags.
    #[serde(default = "default_leading_args")]
    pub leading_args: Vec<String>,

    /// Reference dataset directory.
    #[serde(default = "default_dataset")]
    pub dataset: PathBuf,

    /// Extra arguments passed to every invocation.
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Per-worker timeout in seconds; no timeout when unset.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            leading_args: default_leading_args(),
            dataset: default_dataset(),
            extra_args: Vec::new(),
            timeout_seconds: None,
        }
    }
}

fn default_binary() -> String {
    "nextclade".to_string()
}

fn default_leading_args() -> Vec<String> {
    vec!["run".to_string()]
}

fn default_dataset() -> PathBuf {
    PathBuf::from("data/sars-cov-2")
}

/// External command deriving the per-chunk summary from the alignment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryConfig {
    /// Program to run; the summary step is skipped when unset.
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments before the aligned and summary paths.
    #[serde(default)]
    pub args: Vec<String>,
}

/// External upload command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Program to run; nothing is uploaded when unset.
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments before the local and remote paths.
    #[serde(default)]
    pub args: Vec<String>,

    /// Remote destination prefix.
    #[serde(default)]
    pub destination: Option<String>,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref dir) = args.chunks_dir {
            self.general.chunks_dir = Some(dir.clone());
        }
        if let Some(ref dir) = args.work_dir {
            self.general.work_dir = dir.clone();
        }
        if let Some(ref dir) = args.output_dir {
            self.general.output_dir = dir.clone();
        }
        if let Some(ref ext) = args.chunk_extension {
            self.general.chunk_extension = ext.trim_start_matches('.').to_string();
        }
        if let Some(ref report) = args.report {
            self.general.report = Some(report.clone());
        }

        if let Some(processors) = args.processors {
            self.budget.processors = Some(processors);
        }
        if let Some(threads) = args.threads_per_worker {
            self.budget.threads_per_worker = threads;
        }

        if let Some(ref tool) = args.tool {
            self.tool.binary = tool.clone();
        }
        if let Some(ref dataset) = args.dataset {
            self.tool.dataset = dataset.clone();
        }
        if let Some(timeout) = args.worker_timeout {
            self.tool.timeout_seconds = Some(timeout);
        }

        if let Some(ref dest) = args.upload_to {
            self.upload.destination = Some(dest.clone());
        }
    }

    /// Build the immutable processor budget.
    pub fn budget(&self) -> Result<Budget, PipelineError> {
        let processors = self.budget.processors.unwrap_or_else(num_cpus::get);
        Budget::new(processors, self.budget.threads_per_worker)
    }

    /// Directory holding the chunks.
    pub fn chunks_dir(&self) -> Result<&Path, PipelineError> {
        self.general
            .chunks_dir
            .as_deref()
            .ok_or_else(|| PipelineError::Configuration("no chunks directory given".to_string()))
    }

    pub fn tool_invocation(&self) -> ToolInvocation {
        ToolInvocation {
            program: PathBuf::from(&self.tool.binary),
            leading_args: self.tool.leading_args.clone(),
            dataset: self.tool.dataset.clone(),
            extra_args: self.tool.extra_args.clone(),
        }
    }

    pub fn summary_command(&self) -> Option<SummaryCommand> {
        self.summary.command.as_ref().map(|program| SummaryCommand {
            program: PathBuf::from(program),
            args: self.summary.args.clone(),
        })
    }

    pub fn worker_timeout(&self) -> Option<Duration> {
        self.tool.timeout_seconds.map(Duration::from_secs)
    }

    /// Output kinds every run must produce.
    ///
    /// The summary kind is only expected when a summary command is set.
    pub fn output_kinds(&self) -> Vec<OutputKind> {
        let with_summary = self.summary.command.is_some();
        OutputKind::ALL
            .into_iter()
            .filter(|kind| with_summary || *kind != OutputKind::PerChunkSummary)
            .collect()
    }

    /// Programs that must exist before dispatch.
    pub fn required_binaries(&self) -> Vec<String> {
        let mut binaries = vec![self.tool.binary.clone()];
        if let Some(ref summary) = self.summary.command {
            binaries.push(summary.clone());
        }
        if self.upload_target().is_some() {
            if let Some(ref upload) = self.upload.command {
                binaries.push(upload.clone());
            }
        }
        binaries
    }

    /// Upload program and destination, if uploading is fully configured.
    pub fn upload_target(&self) -> Option<(&str, &str)> {
        match (&self.upload.command, &self.upload.destination) {
            (Some(command), Some(dest)) => Some((command.as_str(), dest.as_str())),
            _ => None,
        }
    }

    /// Reject settings that cannot produce a runnable batch.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.budget()?;
        let chunks_dir = self.chunks_dir()?;
        if !chunks_dir.is_dir() {
            return Err(PipelineError::Configuration(format!(
                "chunks directory does not exist: {}",
                chunks_dir.display()
            )));
        }
        if same_dir(chunks_dir, &self.general.work_dir) {
            return Err(PipelineError::Configuration(format!(
                "work directory must differ from the chunks directory: {}",
                chunks_dir.display()
            )));
        }
        if self.tool.binary.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "tool binary must not be empty".to_string(),
            ));
        }
        if self.upload.destination.is_some() && self.upload.command.is_none() {
            return Err(PipelineError::Configuration(
                "an upload destination needs [upload].command".to_string(),
            ));
        }
        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
