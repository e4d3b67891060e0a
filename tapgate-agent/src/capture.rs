//! Screenshot capture through an external program.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::ExecutionError;

/// Produces one encoded screenshot.
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    /// Captures the screen, bounded by `timeout`.
    async fn capture(&self, timeout: Duration) -> Result<Vec<u8>, ExecutionError>;
}

/// Runs a capture program and returns whatever it writes to stdout.
#[derive(Clone, Debug)]
pub struct CommandScreenCapture {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandScreenCapture {
    /// Creates a capture adapter invoking `program --stdout`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self::with_args(program, vec!["--stdout".to_string()])
    }

    /// Creates a capture adapter with explicit arguments.
    pub fn with_args(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl ScreenCapture for CommandScreenCapture {
    async fn capture(&self, timeout: Duration) -> Result<Vec<u8>, ExecutionError> {
        let program = self.program.display().to_string();
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                program: program.clone(),
                source,
            })?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ExecutionError::TimedOut { after: timeout })?
            .map_err(|source| ExecutionError::Spawn { program, source })?;

        if !output.status.success() {
            return Err(ExecutionError::Failed {
                status: output.status,
                output: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(output.stdout)
    }
}
