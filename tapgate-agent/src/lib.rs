//! Command parsing, bounded dispatch, device executors, and HTTP handlers for Tapgate.

pub mod capture;
pub mod command;
pub mod error;
pub mod executors;
pub mod http;
pub mod model;
pub mod runtime;
pub mod settings;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use capture::{CommandScreenCapture, ScreenCapture};
pub use error::{CommandError, DispatchError, ExecutionError};
pub use executors::{DeviceExecutor, EvdevTouchExecutor, InputCommandExecutor, TouchScale};
pub use http::{AppState, build_router};
pub use model::{
    ActionKind, Command, KeyCommand, Point, Repeat, SwipeCommand, TapCommand, TextCommand,
};
pub use runtime::{
    AdmissionPermit, Deadlines, Delivery, DispatchConfig, Dispatcher, ExecutionTimeouts,
    PendingReply, Raced, ReplySlot, Submission, race_deadline,
};
pub use settings::{AgentSettings, LogFormat};
