//! Batch scheduler: dispatch every chunk through the gate, then drain.
//!
//! Failures are recorded, never retried, and never cancel siblings. The
//! batch is judged only after every dispatched worker has been reaped.

use crate::chunks::ChunkSet;
use crate::error::PipelineError;
use crate::models::{BatchResult, BatchState, Chunk, TaskOutcome};
use crate::scheduler::gate::{Budget, ConcurrencyGate};
use crate::worker::ChunkRunner;
use futures::FutureExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Drives a chunk set through a [`ChunkRunner`] under a [`ConcurrencyGate`].
pub struct BatchScheduler<R: ChunkRunner> {
    budget: Budget,
    gate: Arc<ConcurrencyGate>,
    runner: Arc<R>,
    show_progress: bool,
    state: BatchState,
}

impl<R: ChunkRunner> BatchScheduler<R> {
    pub fn new(budget: Budget, runner: R) -> Self {
        Self {
            budget,
            gate: Arc::new(ConcurrencyGate::from_budget(&budget)),
            runner: Arc::new(runner),
            show_progress: false,
            state: BatchState::Idle,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    fn transition(&mut self, next: BatchState) {
        debug!("Batch state: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Run every chunk to completion and judge the batch.
    ///
    /// Returns `Err` only if the gate stops admitting. Worker failures are
    /// reported through [`BatchResult`].
    pub async fn run(&mut self, chunks: ChunkSet) -> Result<BatchResult, PipelineError> {
        if chunks.is_empty() {
            info!("No chunks to process");
            self.transition(BatchState::Empty);
            return Ok(BatchResult::empty(self.gate.slots()));
        }

        let total = chunks.len();
        let threads = self.budget.threads_per_worker;
        info!(
            "Dispatching {} chunk(s), {} at a time, {} thread(s) each",
            total,
            self.gate.slots(),
            threads
        );

        let progress = self.progress_bar(total as u64);
        let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();
        let mut outcomes: Vec<TaskOutcome> = Vec::with_capacity(total);

        self.transition(BatchState::Dispatching);
        for chunk in chunks.into_chunks() {
            let permit = match self.gate.admit().await {
                Ok(permit) => permit,
                Err(_) => {
                    // Unreachable while the gate stays private to this
                    // scheduler. Reap what already started before giving up.
                    drain(&mut tasks, &mut outcomes, &progress).await;
                    return Err(PipelineError::GateClosed { chunk: chunk.name });
                }
            };

            // Collect anything that finished while we waited for the slot.
            while let Some(joined) = tasks.try_join_next() {
                record(joined, &mut outcomes, &progress);
            }

            debug!("[{}] admitted ({} occupied)", chunk.name, self.gate.occupied());
            let runner = Arc::clone(&self.runner);
            let gate = Arc::clone(&self.gate);
            tasks.spawn(async move {
                let outcome = run_chunk(runner.as_ref(), &chunk, threads).await;
                gate.release(permit);
                outcome
            });
        }

        self.transition(BatchState::Draining);
        drain(&mut tasks, &mut outcomes, &progress).await;
        progress.finish_and_clear();

        let result = BatchResult::from_outcomes(outcomes, self.gate.slots(), self.gate.peak());
        self.transition(result.state);
        debug_assert!(self.state.is_terminal());

        if result.is_success() {
            info!("All {} chunk(s) succeeded", result.submitted);
        } else {
            error!(
                "{} of {} chunk(s) failed: {}",
                result.failed,
                result.submitted,
                result.failed_chunks.join(", ")
            );
        }

        Ok(result)
    }

    fn progress_bar(&self, total: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}

async fn run_chunk<R: ChunkRunner>(runner: &R, chunk: &Chunk, threads: usize) -> TaskOutcome {
    let start = Instant::now();
    let result = AssertUnwindSafe(runner.run(chunk, threads))
        .catch_unwind()
        .await;
    let duration_seconds = start.elapsed().as_secs_f64();

    let (exit, error) = match result {
        Ok(Ok(exit)) => (Some(exit), None),
        Ok(Err(e)) => (None, Some(format!("{:#}", e))),
        Err(_) => (None, Some("worker panicked".to_string())),
    };

    TaskOutcome {
        chunk: chunk.name.clone(),
        exit,
        error,
        duration_seconds,
    }
}

async fn drain(
    tasks: &mut JoinSet<TaskOutcome>,
    outcomes: &mut Vec<TaskOutcome>,
    progress: &ProgressBar,
) {
    while let Some(joined) = tasks.join_next().await {
        record(joined, outcomes, progress);
    }
}

fn record(
    joined: Result<TaskOutcome, tokio::task::JoinError>,
    outcomes: &mut Vec<TaskOutcome>,
    progress: &ProgressBar,
) {
    progress.inc(1);
    match joined {
        Ok(outcome) => {
            if outcome.succeeded() {
                debug!(
                    "[{}] finished in {:.1}s",
                    outcome.chunk, outcome.duration_seconds
                );
            } else if let Some(ref e) = outcome.error {
                warn!("[{}] could not run: {}", outcome.chunk, e);
            } else if let Some(exit) = outcome.exit {
                warn!("[{}] failed: {}", outcome.chunk, exit);
            }
            outcomes.push(outcome);
        }
        Err(e) => {
            // Tasks catch their own panics, so this only happens on abort.
            error!("Worker task was lost: {}", e);
            outcomes.push(TaskOutcome {
                chunk: "<unknown>".to_string(),
                exit: None,
                error: Some(e.to_string()),
                duration_seconds: 0.0,
            });
        }
    }
}
