use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::ExecutionError;
use crate::model::Point;

/// Performs physical input on the target device.
///
/// Every call is bounded by the supplied timeout so a hung backend can never
/// hold a worker forever.
#[async_trait]
pub trait DeviceExecutor: Send + Sync {
    /// Performs one touch at a point.
    async fn touch(&self, at: Point, timeout: Duration) -> Result<(), ExecutionError>;

    /// Performs one timed swipe segment.
    async fn swipe(
        &self,
        from: Point,
        to: Point,
        duration_ms: u64,
        timeout: Duration,
    ) -> Result<(), ExecutionError>;

    /// Sends one key event.
    async fn key(&self, keycode: &str, timeout: Duration) -> Result<(), ExecutionError>;

    /// Injects one text payload.
    async fn text(&self, payload: &str, timeout: Duration) -> Result<(), ExecutionError>;
}

/// Runs the platform `input` tool once per call.
///
/// Arguments are always passed as a vector; caller-supplied text never goes
/// through a shell.
#[derive(Clone, Debug)]
pub struct InputCommandExecutor {
    program: PathBuf,
    leading_args: Vec<String>,
    class_path: Option<String>,
}

impl InputCommandExecutor {
    /// Default launcher for the Android input tool.
    pub const DEFAULT_PROGRAM: &'static str = "/system/bin/app_process";
    /// Default class path exported for the launcher.
    pub const DEFAULT_CLASS_PATH: &'static str = "/system/framework/input.jar";

    /// Creates an executor that invokes `program` with `leading_args` before
    /// each subcommand.
    pub fn new(program: impl Into<PathBuf>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
            class_path: None,
        }
    }

    /// Launches the input class through `app_process`.
    pub fn android(program: impl Into<PathBuf>, class_path: impl Into<String>) -> Self {
        Self::new(
            program,
            vec![
                "/system/bin".to_string(),
                "com.android.commands.input.Input".to_string(),
            ],
        )
        .with_class_path(class_path)
    }

    /// Exports `CLASSPATH` to the child process.
    pub fn with_class_path(mut self, class_path: impl Into<String>) -> Self {
        self.class_path = Some(class_path.into());
        self
    }

    async fn run(&self, params: &[String], timeout: Duration) -> Result<(), ExecutionError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .args(params)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(class_path) = &self.class_path {
            command.env("CLASSPATH", class_path);
        }

        debug!(program = %self.program.display(), ?params, "running input command");
        let child = command.spawn().map_err(|source| ExecutionError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;

        // Dropping the pending future on timeout kills the child.
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ExecutionError::TimedOut { after: timeout })?
            .map_err(|source| ExecutionError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if output.status.success() {
            return Ok(());
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Err(ExecutionError::Failed {
            status: output.status,
            output: combined,
        })
    }
}

impl Default for InputCommandExecutor {
    fn default() -> Self {
        Self::android(Self::DEFAULT_PROGRAM, Self::DEFAULT_CLASS_PATH)
    }
}

#[async_trait]
impl DeviceExecutor for InputCommandExecutor {
    async fn touch(&self, at: Point, timeout: Duration) -> Result<(), ExecutionError> {
        let params = ["tap".to_string(), at.x.to_string(), at.y.to_string()];
        self.run(&params, timeout).await
    }

    async fn swipe(
        &self,
        from: Point,
        to: Point,
        duration_ms: u64,
        timeout: Duration,
    ) -> Result<(), ExecutionError> {
        let params = [
            "swipe".to_string(),
            from.x.to_string(),
            from.y.to_string(),
            to.x.to_string(),
            to.y.to_string(),
            duration_ms.to_string(),
        ];
        self.run(&params, timeout).await
    }

    async fn key(&self, keycode: &str, timeout: Duration) -> Result<(), ExecutionError> {
        let params = ["keyevent".to_string(), keycode.to_string()];
        self.run(&params, timeout).await
    }

    async fn text(&self, payload: &str, timeout: Duration) -> Result<(), ExecutionError> {
        let params = ["text".to_string(), payload.to_string()];
        self.run(&params, timeout).await
    }
}

const EV_SYN: u16 = 0x00;
const EV_KEY: u16 = 0x01;
const EV_ABS: u16 = 0x03;
const SYN_REPORT: u16 = 0x00;
const BTN_TOUCH: u16 = 0x14a;
const ABS_MT_POSITION_X: u16 = 0x35;
const ABS_MT_POSITION_Y: u16 = 0x36;
const ABS_MT_TRACKING_ID: u16 = 0x39;

/// Per-axis multipliers from caller coordinates to device units.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TouchScale {
    pub x: i32,
    pub y: i32,
}

impl Default for TouchScale {
    fn default() -> Self {
        Self { x: 1, y: 1 }
    }
}

/// Writes multi-touch tap sequences straight to an evdev node.
///
/// Only touches go to the device; swipes, keys and text are delegated to the
/// fallback executor.
pub struct EvdevTouchExecutor {
    device: PathBuf,
    scale: TouchScale,
    tracking_id: AtomicI32,
    fallback: Arc<dyn DeviceExecutor>,
}

impl EvdevTouchExecutor {
    /// Creates a touch writer for `device`.
    pub fn new(
        device: impl Into<PathBuf>,
        scale: TouchScale,
        fallback: Arc<dyn DeviceExecutor>,
    ) -> Self {
        Self {
            device: device.into(),
            scale,
            tracking_id: AtomicI32::new(0),
            fallback,
        }
    }

    fn tap_events(&self, at: Point) -> Vec<u8> {
        let tracking_id = self.tracking_id.fetch_add(1, Ordering::Relaxed) & 0xffff;
        let x = at.x.saturating_mul(self.scale.x);
        let y = at.y.saturating_mul(self.scale.y);

        let events = [
            (EV_ABS, ABS_MT_TRACKING_ID, tracking_id),
            (EV_ABS, ABS_MT_POSITION_X, x),
            (EV_ABS, ABS_MT_POSITION_Y, y),
            (EV_KEY, BTN_TOUCH, 1),
            (EV_SYN, SYN_REPORT, 0),
            (EV_ABS, ABS_MT_TRACKING_ID, -1),
            (EV_KEY, BTN_TOUCH, 0),
            (EV_SYN, SYN_REPORT, 0),
        ];

        let mut bytes = Vec::with_capacity(events.len() * INPUT_EVENT_SIZE);
        for (kind, code, value) in events {
            encode_input_event(&mut bytes, kind, code, value);
        }
        bytes
    }

    async fn write_events(&self, bytes: &[u8]) -> Result<(), ExecutionError> {
        let device_error = |source| ExecutionError::Device {
            path: self.device.clone(),
            source,
        };
        let mut device = OpenOptions::new()
            .write(true)
            .open(&self.device)
            .await
            .map_err(device_error)?;
        device.write_all(bytes).await.map_err(device_error)?;
        device.flush().await.map_err(device_error)
    }
}

/// Size of `struct input_event` on 64-bit Linux.
const INPUT_EVENT_SIZE: usize = 24;

fn encode_input_event(buffer: &mut Vec<u8>, kind: u16, code: u16, value: i32) {
    // The kernel stamps its own time on injected events.
    buffer.extend_from_slice(&0i64.to_ne_bytes());
    buffer.extend_from_slice(&0i64.to_ne_bytes());
    buffer.extend_from_slice(&kind.to_ne_bytes());
    buffer.extend_from_slice(&code.to_ne_bytes());
    buffer.extend_from_slice(&value.to_ne_bytes());
}

#[async_trait]
impl DeviceExecutor for EvdevTouchExecutor {
    async fn touch(&self, at: Point, timeout: Duration) -> Result<(), ExecutionError> {
        let bytes = self.tap_events(at);
        tokio::time::timeout(timeout, self.write_events(&bytes))
            .await
            .map_err(|_| ExecutionError::TimedOut { after: timeout })?
    }

    async fn swipe(
        &self,
        from: Point,
        to: Point,
        duration_ms: u64,
        timeout: Duration,
    ) -> Result<(), ExecutionError> {
        self.fallback.swipe(from, to, duration_ms, timeout).await
    }

    async fn key(&self, keycode: &str, timeout: Duration) -> Result<(), ExecutionError> {
        self.fallback.key(keycode, timeout).await
    }

    async fn text(&self, payload: &str, timeout: Duration) -> Result<(), ExecutionError> {
        self.fallback.text(payload, timeout).await
    }
}
