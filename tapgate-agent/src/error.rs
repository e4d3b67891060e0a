//! Error types surfaced at the parser, dispatcher and executor seams.

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::model::ActionKind;

/// Validation failures for raw command text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("invalid {kind} command format, expected: {usage}")]
    Format {
        kind: ActionKind,
        usage: &'static str,
    },
    #[error("invalid {field} '{token}'")]
    Integer { field: &'static str, token: String },
    #[error("invalid amount")]
    Amount,
    #[error("invalid delay")]
    Delay,
    #[error("invalid duration")]
    Duration,
    #[error("empty text")]
    EmptyText,
}

/// Backpressure rejections from the admission limiter and the action queue.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum DispatchError {
    #[error("server busy")]
    Busy,
    #[error("queue full")]
    QueueFull,
    #[error("dispatcher is shut down")]
    Closed,
}

/// Failures reported by a device executor or the capture adapter.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("timed out after {}ms", .after.as_millis())]
    TimedOut { after: Duration },
    #[error("{status} output:{output}")]
    Failed { status: ExitStatus, output: String },
    #[error("failed to write {}: {source}", .path.display())]
    Device {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("executor panicked")]
    Panicked,
}
