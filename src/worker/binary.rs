//! Locating external binaries before a batch starts.

use crate::error::PipelineError;
use std::path::{Path, PathBuf};

/// Resolve a program name to an existing file.
///
/// Names containing a path separator are checked as given. Bare names are
/// looked up in each directory of `PATH`.
pub fn resolve_binary(program: &str) -> Result<PathBuf, PipelineError> {
    let missing = || PipelineError::MissingBinary {
        name: program.to_string(),
    };

    if program.is_empty() {
        return Err(missing());
    }

    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return if is_executable(candidate) {
            Ok(candidate.to_path_buf())
        } else {
            Err(missing())
        };
    }

    let path_var = std::env::var_os("PATH").ok_or_else(missing)?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|path| is_executable(path))
        .ok_or_else(missing)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
