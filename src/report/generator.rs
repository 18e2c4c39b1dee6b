//! JSON run report and console summary.
//!
//! The report is written for every run that gets past configuration,
//! including empty and failed batches, so operators can see which chunks
//! need attention before re-running.

use crate::models::{BatchResult, BatchState, MergedArtifact, TaskOutcome};
use crate::scheduler::Budget;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Everything recorded about one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub budget: Budget,
    pub slots: usize,
    pub state: BatchState,
    pub chunks: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failed_chunks: Vec<String>,
    pub peak_concurrency: usize,
    pub artifacts: Vec<MergedArtifact>,
    pub uploaded: usize,
    /// Error that ended the run, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tasks: Vec<TaskOutcome>,
}

impl BatchReport {
    pub fn new(budget: Budget) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            duration_seconds: 0.0,
            budget,
            slots: budget.concurrency_slots(),
            state: BatchState::Idle,
            chunks: 0,
            succeeded: 0,
            failed: 0,
            failed_chunks: Vec::new(),
            peak_concurrency: 0,
            artifacts: Vec::new(),
            uploaded: 0,
            error: None,
            tasks: Vec::new(),
        }
    }

    /// Copy the scheduler's verdict into the report.
    pub fn record_batch(&mut self, batch: &BatchResult) {
        self.state = batch.state;
        self.chunks = batch.submitted;
        self.succeeded = batch.succeeded;
        self.failed = batch.failed;
        self.failed_chunks = batch.failed_chunks.clone();
        self.slots = batch.slots;
        self.peak_concurrency = batch.peak_concurrency;
        self.tasks = batch.outcomes.clone();
        self.tasks.sort_by(|a, b| a.chunk.cmp(&b.chunk));
    }

    pub fn finish(&mut self) {
        let now = Utc::now();
        self.duration_seconds = (now - self.started_at).num_milliseconds() as f64 / 1000.0;
        self.finished_at = Some(now);
    }
}

/// Serialize a report to pretty JSON.
pub fn generate_json_report(report: &BatchReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("Failed to serialize run report")
}

/// Write a report to disk.
pub fn write_report(report: &BatchReport, path: &Path) -> Result<()> {
    let json = generate_json_report(report)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

/// Print a human-readable summary to stdout.
pub fn print_summary(report: &BatchReport) {
    println!("\n📊 Batch Summary:");
    println!("   State: {}", report.state);
    println!(
        "   Chunks: {} | ✅ Succeeded: {} | ❌ Failed: {}",
        report.chunks, report.succeeded, report.failed
    );
    println!(
        "   Workers: {} slot(s), peak {}",
        report.slots, report.peak_concurrency
    );
    if !report.failed_chunks.is_empty() {
        println!("   Failed chunks: {}", report.failed_chunks.join(", "));
    }
    for artifact in &report.artifacts {
        println!(
            "   📄 {} ({} from {} file(s))",
            artifact.path.display(),
            artifact.kind,
            artifact.inputs
        );
    }
    if report.uploaded > 0 {
        println!("   Uploaded: {}", report.uploaded);
    }
    println!("   Duration: {:.1}s", report.duration_seconds);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkerExit;

    #[test]
    fn test_record_batch() {
        let budget = Budget::new(16, 8).unwrap();
        let mut report = BatchReport::new(budget);
        assert_eq!(report.slots, 3);

        let batch = BatchResult::from_outcomes(
            vec![
                TaskOutcome {
                    chunk: "c2".to_string(),
                    exit: Some(WorkerExit::from_code(Some(1))),
                    error: None,
                    duration_seconds: 1.0,
                },
                TaskOutcome {
                    chunk: "c1".to_string(),
                    exit: Some(WorkerExit::from_code(Some(0))),
                    error: None,
                    duration_seconds: 2.0,
                },
            ],
            3,
            2,
        );
        report.record_batch(&batch);
        report.finish();

        assert_eq!(report.state, BatchState::Failed);
        assert_eq!(report.failed_chunks, vec!["c2"]);
        assert_eq!(report.tasks[0].chunk, "c1");
        assert!(report.finished_at.is_some());
    }

    #[test]
    fn test_json_report() {
        let report = BatchReport::new(Budget::new(4, 2).unwrap());
        let json = generate_json_report(&report).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["state"], "idle");
        assert_eq!(value["budget"]["threads_per_worker"], 2);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_write_report() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("reports").join("run.json");
        write_report(&BatchReport::new(Budget::new(1, 1).unwrap()), &path).unwrap();
        assert!(path.exists());
    }
}
