//! End-to-end batch pipeline.
//!
//! Stages run in order: binary check, chunk discovery, scheduling,
//! aggregation, upload. An empty chunk set stops after discovery with a
//! successful outcome. Any failure stops the pipeline before upload.

use crate::aggregate::ResultAggregator;
use crate::chunks::{ChunkConfig, ChunkSet};
use crate::error::PipelineError;
use crate::handoff::{publish_all, Publisher};
use crate::models::{BatchResult, MergedArtifact, OutputKind};
use crate::report::BatchReport;
use crate::scheduler::{BatchScheduler, Budget};
use crate::worker::{resolve_binary, ChunkRunner};
use std::path::PathBuf;
use tracing::{info, warn};

/// Fixed inputs of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub chunks: ChunkConfig,
    pub output_dir: PathBuf,
    pub budget: Budget,
    /// Output kinds that must be merged.
    pub kinds: Vec<OutputKind>,
    /// Programs that must exist before anything is dispatched.
    pub required_binaries: Vec<String>,
    pub show_progress: bool,
}

/// Successful end states of a run.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// No chunks were found; nothing was merged or uploaded.
    NothingToDo,
    Completed {
        batch: BatchResult,
        artifacts: Vec<MergedArtifact>,
        uploaded: usize,
    },
}

/// A finished run: the report plus how it ended.
#[derive(Debug)]
pub struct PipelineRun {
    pub report: BatchReport,
    pub result: Result<PipelineOutcome, PipelineError>,
}

impl PipelineRun {
    pub fn exit_code(&self) -> i32 {
        match &self.result {
            Ok(_) => 0,
            Err(e) => e.exit_code(),
        }
    }
}

pub struct Pipeline<R: ChunkRunner> {
    settings: PipelineSettings,
    runner: R,
    publisher: Option<Box<dyn Publisher>>,
}

impl<R: ChunkRunner> Pipeline<R> {
    pub fn new(settings: PipelineSettings, runner: R) -> Self {
        Self {
            settings,
            runner,
            publisher: None,
        }
    }

    pub fn with_publisher(mut self, publisher: Option<Box<dyn Publisher>>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Run every stage and return the report alongside the result.
    pub async fn run(self) -> PipelineRun {
        let mut report = BatchReport::new(self.settings.budget);
        let result = self.run_stages(&mut report).await;

        if let Err(ref e) = result {
            report.error = Some(e.to_string());
        }
        report.finish();

        PipelineRun { report, result }
    }

    async fn run_stages(self, report: &mut BatchReport) -> Result<PipelineOutcome, PipelineError> {
        let Pipeline {
            settings,
            runner,
            publisher,
        } = self;

        for binary in &settings.required_binaries {
            let resolved = resolve_binary(binary)?;
            info!("Using {}", resolved.display());
        }

        let chunks = ChunkSet::discover(&settings.chunks)?;
        let mut scheduler =
            BatchScheduler::new(settings.budget, runner).with_progress(settings.show_progress);

        if chunks.is_empty() {
            let batch = scheduler.run(chunks).await?;
            report.record_batch(&batch);
            warn!(
                "No .{} chunks in {}; nothing to do",
                settings.chunks.extension,
                settings.chunks.chunks_dir.display()
            );
            return Ok(PipelineOutcome::NothingToDo);
        }

        std::fs::create_dir_all(&settings.chunks.work_dir)?;
        remove_stale_outputs(&chunks)?;

        let batch = scheduler.run(chunks.clone()).await?;
        report.record_batch(&batch);
        info!("Batch {}", scheduler.state());
        if !batch.is_success() {
            return Err(PipelineError::WorkerFailure {
                chunks: batch.failed_chunks.clone(),
            });
        }

        let aggregator = ResultAggregator::new(settings.output_dir.clone(), settings.kinds.clone());
        let artifacts = aggregator.aggregate(&chunks)?;
        report.artifacts = artifacts.clone();

        let uploaded = match publisher {
            Some(publisher) => publish_all(publisher.as_ref(), &artifacts).await?,
            None => 0,
        };
        report.uploaded = uploaded;

        Ok(PipelineOutcome::Completed {
            batch,
            artifacts,
            uploaded,
        })
    }
}

/// Delete per-chunk outputs a previous run left at this batch's paths, so
/// a worker that writes nothing cannot be mistaken for one that succeeded.
fn remove_stale_outputs(chunks: &ChunkSet) -> Result<(), PipelineError> {
    let mut removed = 0usize;
    for chunk in chunks.iter() {
        for kind in OutputKind::ALL {
            match std::fs::remove_file(chunk.outputs.path(kind)) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    if removed > 0 {
        warn!("Removed {} stale output file(s) from a previous run", removed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BatchState, Chunk, WorkerExit};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Writes table and alignment outputs like the real tool would.
    struct FileWritingRunner {
        write_outputs: bool,
        fail: Option<String>,
    }

    #[async_trait]
    impl ChunkRunner for FileWritingRunner {
        async fn run(&self, chunk: &Chunk, _threads: usize) -> Result<WorkerExit> {
            if self.fail.as_deref() == Some(chunk.name.as_str()) {
                return Ok(WorkerExit::from_code(Some(1)));
            }
            if self.write_outputs {
                std::fs::write(
                    &chunk.outputs.table,
                    format!("seqName\tclade\n{0}_1\t21K\n{0}_2\t22B\n", chunk.name),
                )?;
                std::fs::write(&chunk.outputs.aligned, format!(">{}_1\nACGT\n", chunk.name))?;
            }
            Ok(WorkerExit::from_code(Some(0)))
        }
    }

    #[derive(Clone, Default)]
    struct CountingPublisher {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Publisher for CountingPublisher {
        async fn publish(&self, _artifact: &MergedArtifact) -> Result<(), PipelineError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn settings(root: &Path) -> PipelineSettings {
        PipelineSettings {
            chunks: ChunkConfig {
                chunks_dir: root.join("chunks"),
                extension: "fasta".to_string(),
                work_dir: root.join("work"),
            },
            output_dir: root.join("out"),
            budget: Budget::new(4, 2).unwrap(),
            kinds: vec![OutputKind::PrimaryTable, OutputKind::AlignedOutput],
            required_binaries: Vec::new(),
            show_progress: false,
        }
    }

    fn make_chunks(root: &Path, count: usize) {
        let dir = root.join("chunks");
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..count {
            std::fs::write(dir.join(format!("chunk_{:04}.fasta", i)), ">s\nACGT\n").unwrap();
        }
    }

    fn pipeline(
        root: &Path,
        runner: FileWritingRunner,
        publisher: &CountingPublisher,
    ) -> Pipeline<FileWritingRunner> {
        Pipeline::new(settings(root), runner).with_publisher(Some(Box::new(publisher.clone())))
    }

    #[tokio::test]
    async fn test_empty_batch_short_circuits() {
        let temp = TempDir::new().unwrap();
        make_chunks(temp.path(), 0);
        let publisher = CountingPublisher::default();
        let runner = FileWritingRunner {
            write_outputs: true,
            fail: None,
        };

        let run = pipeline(temp.path(), runner, &publisher).run().await;

        assert!(matches!(run.result, Ok(PipelineOutcome::NothingToDo)));
        assert_eq!(run.exit_code(), 0);
        assert_eq!(run.report.state, BatchState::Empty);
        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 0);
        assert!(!temp.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_successful_run_merges_and_uploads() {
        let temp = TempDir::new().unwrap();
        make_chunks(temp.path(), 3);
        let publisher = CountingPublisher::default();
        let runner = FileWritingRunner {
            write_outputs: true,
            fail: None,
        };

        let run = pipeline(temp.path(), runner, &publisher).run().await;

        assert_eq!(run.exit_code(), 0);
        match run.result {
            Ok(PipelineOutcome::Completed {
                batch,
                artifacts,
                uploaded,
            }) => {
                assert_eq!(batch.submitted, 3);
                assert_eq!(artifacts.len(), 2);
                assert_eq!(artifacts[0].units, 6);
                assert_eq!(uploaded, 2);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        let table = std::fs::read_to_string(temp.path().join("out/nextclade.tsv")).unwrap();
        assert_eq!(table.lines().count(), 7);
        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(run.report.artifacts.len(), 2);
    }

    #[tokio::test]
    async fn test_worker_failure_skips_merge_and_upload() {
        let temp = TempDir::new().unwrap();
        make_chunks(temp.path(), 4);
        let publisher = CountingPublisher::default();
        let runner = FileWritingRunner {
            write_outputs: true,
            fail: Some("chunk_0002".to_string()),
        };

        let run = pipeline(temp.path(), runner, &publisher).run().await;

        assert_eq!(run.exit_code(), 2);
        assert_eq!(run.report.state, BatchState::Failed);
        assert_eq!(run.report.failed_chunks, vec!["chunk_0002"]);
        assert_eq!(run.report.succeeded, 3);
        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 0);
        assert!(!temp.path().join("out/nextclade.tsv").exists());
    }

    #[tokio::test]
    async fn test_silent_worker_crash_is_missing_outputs() {
        let temp = TempDir::new().unwrap();
        make_chunks(temp.path(), 2);
        let publisher = CountingPublisher::default();
        let runner = FileWritingRunner {
            write_outputs: false,
            fail: None,
        };

        let run = pipeline(temp.path(), runner, &publisher).run().await;

        assert!(matches!(
            run.result,
            Err(PipelineError::MissingOutputs(OutputKind::PrimaryTable))
        ));
        assert_eq!(run.exit_code(), 3);
        assert_eq!(run.report.state, BatchState::Succeeded);
        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 0);
        assert!(!temp.path().join("out/nextclade.tsv").exists());
    }

    fn leave_previous_outputs(root: &Path, chunk: &str) {
        let work = root.join("work");
        std::fs::create_dir_all(&work).unwrap();
        std::fs::write(
            work.join(format!("{}.nextclade.tsv", chunk)),
            "seqName\tclade\nstale\t19A\n",
        )
        .unwrap();
        std::fs::write(work.join(format!("{}.aligned.fasta", chunk)), ">stale\nACGT\n").unwrap();
    }

    #[tokio::test]
    async fn test_previous_run_outputs_do_not_hide_crash() {
        let temp = TempDir::new().unwrap();
        make_chunks(temp.path(), 2);
        leave_previous_outputs(temp.path(), "chunk_0099");
        let publisher = CountingPublisher::default();
        let runner = FileWritingRunner {
            write_outputs: false,
            fail: None,
        };

        let run = pipeline(temp.path(), runner, &publisher).run().await;

        assert!(matches!(
            run.result,
            Err(PipelineError::MissingOutputs(OutputKind::PrimaryTable))
        ));
        assert_eq!(run.exit_code(), 3);
        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 0);
        assert!(!temp.path().join("out/nextclade.tsv").exists());
    }

    #[tokio::test]
    async fn test_stale_outputs_of_batch_chunk_are_cleared() {
        let temp = TempDir::new().unwrap();
        make_chunks(temp.path(), 2);
        leave_previous_outputs(temp.path(), "chunk_0001");
        let publisher = CountingPublisher::default();
        let runner = FileWritingRunner {
            write_outputs: false,
            fail: None,
        };

        let run = pipeline(temp.path(), runner, &publisher).run().await;

        assert_eq!(run.exit_code(), 3);
        assert!(!temp.path().join("work/chunk_0001.nextclade.tsv").exists());
        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rerun_merges_only_current_batch() {
        let temp = TempDir::new().unwrap();
        make_chunks(temp.path(), 2);
        leave_previous_outputs(temp.path(), "chunk_0099");
        let publisher = CountingPublisher::default();
        let runner = FileWritingRunner {
            write_outputs: true,
            fail: None,
        };

        let run = pipeline(temp.path(), runner, &publisher).run().await;

        assert_eq!(run.exit_code(), 0);
        let table = std::fs::read_to_string(temp.path().join("out/nextclade.tsv")).unwrap();
        assert!(!table.contains("stale"));
        assert_eq!(table.lines().count(), 5);
        let fasta = std::fs::read_to_string(temp.path().join("out/aligned.fasta")).unwrap();
        assert_eq!(fasta.matches('>').count(), 2);
    }

    #[tokio::test]
    async fn test_missing_binary_stops_before_dispatch() {
        let temp = TempDir::new().unwrap();
        make_chunks(temp.path(), 2);
        let mut settings = settings(temp.path());
        settings.required_binaries = vec!["definitely-not-a-real-tool-4821".to_string()];
        let runner = FileWritingRunner {
            write_outputs: true,
            fail: None,
        };

        let run = Pipeline::new(settings, runner).run().await;

        assert_eq!(run.exit_code(), 4);
        assert_eq!(run.report.state, BatchState::Idle);
        assert!(!temp.path().join("work").exists());
        assert!(run.report.error.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_end_to_end_with_shell_tool() {
        use crate::worker::{NextcladeRunner, SummaryCommand, ToolInvocation};

        let temp = TempDir::new().unwrap();
        make_chunks(temp.path(), 5);

        let script = r#"
while [ $# -gt 0 ]; do
  case "$1" in
    --output-tsv) shift; printf 'seqName\tclade\nx\t21K\ny\t22B\n' > "$1" ;;
    --output-fasta) shift; printf '>x\nACGT\n>y\nACGA\n' > "$1" ;;
    --output-all) shift; mkdir -p "$1" ;;
  esac
  shift
done
"#;
        let tool = ToolInvocation {
            program: PathBuf::from("sh"),
            leading_args: vec!["-c".to_string(), script.to_string(), "nextclade".to_string()],
            dataset: temp.path().join("dataset"),
            extra_args: Vec::new(),
        };
        let summary = SummaryCommand {
            program: PathBuf::from("sh"),
            args: vec![
                "-c".to_string(),
                "printf 'seqName\\tmutations\\nx\\t4\\n' > \"$2\"".to_string(),
                "summarize".to_string(),
            ],
        };
        let runner = NextcladeRunner::new(tool).with_summary(Some(summary));

        let mut settings = settings(temp.path());
        settings.kinds = OutputKind::ALL.to_vec();
        settings.required_binaries = vec!["sh".to_string()];
        settings.budget = Budget::new(2, 1).unwrap();

        let run = Pipeline::new(settings, runner).run().await;

        assert_eq!(run.exit_code(), 0, "error: {:?}", run.report.error);
        assert_eq!(run.report.chunks, 5);
        assert!(run.report.peak_concurrency <= 3);

        let out = temp.path().join("out");
        let table = std::fs::read_to_string(out.join("nextclade.tsv")).unwrap();
        assert_eq!(table.lines().count(), 11);
        let summary = std::fs::read_to_string(out.join("summary.tsv")).unwrap();
        assert_eq!(summary.lines().count(), 6);
        let fasta = std::fs::read_to_string(out.join("aligned.fasta")).unwrap();
        assert_eq!(fasta.matches('>').count(), 10);
    }
}
