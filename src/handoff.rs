//! Handoff of merged artifacts to remote storage.
//!
//! Uploading itself is an external command; this module only decides the
//! remote name and runs the command once per artifact.

use crate::error::PipelineError;
use crate::models::MergedArtifact;
use async_trait::async_trait;
use futures::future::join_all;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Accepts a merged artifact for publication.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, artifact: &MergedArtifact) -> Result<(), PipelineError>;
}

/// Uploads via an external command: `program args... <local> <destination>/<file name>`.
#[derive(Debug, Clone)]
pub struct UploadCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub destination: String,
}

impl UploadCommand {
    /// Remote identifier for an artifact.
    pub fn remote_for(&self, artifact: &MergedArtifact) -> String {
        let file_name = artifact
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        format!("{}/{}", self.destination.trim_end_matches('/'), file_name)
    }
}

#[async_trait]
impl Publisher for UploadCommand {
    async fn publish(&self, artifact: &MergedArtifact) -> Result<(), PipelineError> {
        let remote = self.remote_for(artifact);
        debug!("Uploading {} to {}", artifact.path.display(), remote);

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&artifact.path)
            .arg(&remote)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PipelineError::Upload {
                path: artifact.path.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(PipelineError::Upload {
                path: artifact.path.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!("Uploaded {} to {}", artifact.path.display(), remote);
        Ok(())
    }
}

/// Publish every artifact concurrently. The first error is returned
/// after all uploads have finished.
pub async fn publish_all(
    publisher: &dyn Publisher,
    artifacts: &[MergedArtifact],
) -> Result<usize, PipelineError> {
    let results = join_all(artifacts.iter().map(|a| publisher.publish(a))).await;
    let mut published = 0;
    let mut first_error = None;
    for result in results {
        match result {
            Ok(()) => published += 1,
            Err(e) if first_error.is_none() => first_error = Some(e),
            Err(_) => {}
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(published),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutputKind;

    fn artifact(path: &str) -> MergedArtifact {
        MergedArtifact {
            kind: OutputKind::PrimaryTable,
            path: PathBuf::from(path),
            inputs: 2,
            units: 4,
        }
    }

    #[test]
    fn test_remote_for() {
        let upload = UploadCommand {
            program: PathBuf::from("aws"),
            args: vec!["s3".to_string(), "cp".to_string()],
            destination: "s3://bucket/run-42/".to_string(),
        };
        assert_eq!(
            upload.remote_for(&artifact("/out/nextclade.tsv")),
            "s3://bucket/run-42/nextclade.tsv"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_upload_command_copies() {
        let temp = tempfile::TempDir::new().unwrap();
        let local = temp.path().join("nextclade.tsv");
        std::fs::write(&local, "h\nx\n").unwrap();
        let remote_dir = temp.path().join("remote");
        std::fs::create_dir(&remote_dir).unwrap();

        let upload = UploadCommand {
            program: PathBuf::from("cp"),
            args: Vec::new(),
            destination: remote_dir.to_string_lossy().to_string(),
        };
        let artifacts = vec![artifact(local.to_str().unwrap())];
        let published = publish_all(&upload, &artifacts).await.unwrap();

        assert_eq!(published, 1);
        assert!(remote_dir.join("nextclade.tsv").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_upload_failure_reported() {
        let upload = UploadCommand {
            program: PathBuf::from("false"),
            args: Vec::new(),
            destination: "remote".to_string(),
        };
        let result = publish_all(&upload, &[artifact("/out/aligned.fasta")]).await;
        assert!(matches!(result, Err(PipelineError::Upload { .. })));
    }
}
