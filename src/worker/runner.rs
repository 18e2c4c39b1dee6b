//! Running the analysis tool for one chunk.

use crate::models::{Chunk, WorkerExit};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Stderr lines kept when a worker fails.
const STDERR_TAIL_LINES: usize = 5;

/// Runs the analysis for a single chunk.
///
/// A non-zero exit is returned as data in [`WorkerExit`]. `Err` is reserved
/// for failures to start or wait on the process.
#[async_trait]
pub trait ChunkRunner: Send + Sync + 'static {
    async fn run(&self, chunk: &Chunk, threads: usize) -> Result<WorkerExit>;
}

/// How the analysis tool is invoked.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Program to execute.
    pub program: PathBuf,
    /// Arguments placed before the generated flags (the tool's subcommand).
    pub leading_args: Vec<String>,
    /// Reference dataset directory.
    pub dataset: PathBuf,
    /// Extra arguments appended before the input path.
    pub extra_args: Vec<String>,
}

impl ToolInvocation {
    /// Build the full argument list for one chunk.
    pub fn args_for(&self, chunk: &Chunk, threads: usize) -> Vec<OsString> {
        let outputs = &chunk.outputs;
        let mut args: Vec<OsString> = self.leading_args.iter().map(OsString::from).collect();

        args.push("--input-dataset".into());
        args.push(self.dataset.clone().into());
        args.push("--output-tsv".into());
        args.push(outputs.table.clone().into());
        args.push("--output-fasta".into());
        args.push(outputs.aligned.clone().into());
        args.push("--output-all".into());
        args.push(outputs.scratch_dir.clone().into());
        args.push("--output-basename".into());
        args.push(chunk.name.clone().into());
        args.push("--jobs".into());
        args.push(threads.max(1).to_string().into());
        args.push("--in-order".into());
        args.push("--quiet".into());
        args.extend(self.extra_args.iter().map(OsString::from));
        args.push(chunk.input.clone().into());

        args
    }
}

/// External command that derives the per-chunk summary from the aligned output.
///
/// Invoked as `program args... <aligned.fasta> <summary.tsv>`.
#[derive(Debug, Clone)]
pub struct SummaryCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Runs Nextclade (and the optional summary step) as child processes.
#[derive(Debug, Clone)]
pub struct NextcladeRunner {
    tool: ToolInvocation,
    summary: Option<SummaryCommand>,
    timeout: Option<Duration>,
}

impl NextcladeRunner {
    pub fn new(tool: ToolInvocation) -> Self {
        Self {
            tool,
            summary: None,
            timeout: None,
        }
    }

    pub fn with_summary(mut self, summary: Option<SummaryCommand>) -> Self {
        self.summary = summary;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run_tool(&self, chunk: &Chunk, threads: usize) -> Result<WorkerExit> {
        let mut cmd = Command::new(&self.tool.program);
        cmd.args(self.tool.args_for(chunk, threads));
        self.execute(cmd, &chunk.name, "analysis").await
    }

    async fn run_summary(&self, summary: &SummaryCommand, chunk: &Chunk) -> Result<WorkerExit> {
        let mut cmd = Command::new(&summary.program);
        cmd.args(&summary.args)
            .arg(&chunk.outputs.aligned)
            .arg(&chunk.outputs.summary);
        self.execute(cmd, &chunk.name, "summary").await
    }

    async fn execute(&self, mut cmd: Command, chunk: &str, step: &str) -> Result<WorkerExit> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("[{}] starting {} step: {:?}", chunk, step, cmd.as_std());

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
                Ok(output) => output,
                Err(_) => {
                    warn!(
                        "[{}] {} step exceeded {}s and was killed",
                        chunk,
                        step,
                        limit.as_secs()
                    );
                    return Ok(WorkerExit::timed_out());
                }
            },
            None => cmd.output().await,
        }
        .with_context(|| format!("Failed to run {} step for chunk {}", step, chunk))?;

        let exit = WorkerExit::from_code(output.status.code());
        if !exit.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(STDERR_TAIL_LINES).collect();
            warn!(
                "[{}] {} step failed ({}): {}",
                chunk,
                step,
                exit,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            );
        }

        Ok(exit)
    }
}

#[async_trait]
impl ChunkRunner for NextcladeRunner {
    async fn run(&self, chunk: &Chunk, threads: usize) -> Result<WorkerExit> {
        let exit = self.run_tool(chunk, threads).await?;
        if !exit.success() {
            return Ok(exit);
        }

        match &self.summary {
            Some(summary) => self.run_summary(summary, chunk).await,
            None => Ok(exit),
        }
    }
}
