use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tapgate_common::{
    DEFAULT_CONCURRENCY_LIMIT, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_QUEUE_SIZE, DEFAULT_WORKERS,
};

use crate::capture::{CommandScreenCapture, ScreenCapture};
use crate::executors::{DeviceExecutor, EvdevTouchExecutor, InputCommandExecutor, TouchScale};
use crate::runtime::{Deadlines, DispatchConfig, ExecutionTimeouts};

/// Log output encoding.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable single-line records.
    #[default]
    Compact,
    /// One JSON object per record.
    Json,
}

/// Startup settings, read from flags with environment fallbacks.
#[derive(Clone, Debug, Parser)]
#[command(name = "tapgate-agent", version, about = "HTTP control surface for device input")]
pub struct AgentSettings {
    /// Address to listen on.
    #[arg(long, env = "HOST", default_value = DEFAULT_HOST)]
    pub host: IpAddr,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Number of worker tasks executing actions.
    #[arg(long, env = "WORKERS", default_value_t = DEFAULT_WORKERS, value_parser = worker_count)]
    pub workers: usize,

    /// Capacity of the pending action queue.
    #[arg(long, env = "QUEUE_SIZE", default_value_t = DEFAULT_QUEUE_SIZE, value_parser = queue_size)]
    pub queue_size: usize,

    /// Number of requests handled at once before answering "server busy".
    #[arg(
        long,
        env = "CONCURRENCY_LIMIT",
        default_value_t = DEFAULT_CONCURRENCY_LIMIT,
        value_parser = concurrency_limit
    )]
    pub concurrency_limit: usize,

    /// Milliseconds a tap request waits for its result.
    #[arg(long, env = "TAP_DEADLINE_MS", default_value_t = 150)]
    pub tap_deadline_ms: u64,

    /// Milliseconds a swipe request waits for its result.
    #[arg(long, env = "SWIPE_DEADLINE_MS", default_value_t = 200)]
    pub swipe_deadline_ms: u64,

    /// Milliseconds a key request waits for its result.
    #[arg(long, env = "KEY_DEADLINE_MS", default_value_t = 150)]
    pub key_deadline_ms: u64,

    /// Milliseconds a text request waits for its result.
    #[arg(long, env = "TEXT_DEADLINE_MS", default_value_t = 150)]
    pub text_deadline_ms: u64,

    /// Timeout for one tap, swipe or key execution.
    #[arg(long, env = "INPUT_TIMEOUT_MS", default_value_t = 3000)]
    pub input_timeout_ms: u64,

    /// Timeout for one text injection.
    #[arg(long, env = "TEXT_TIMEOUT_MS", default_value_t = 5000)]
    pub text_timeout_ms: u64,

    /// Launcher used to run the input tool.
    #[arg(long, env = "INPUT_PROGRAM", default_value = InputCommandExecutor::DEFAULT_PROGRAM)]
    pub input_program: PathBuf,

    /// CLASSPATH exported to the input tool.
    #[arg(long, env = "INPUT_CLASSPATH", default_value = InputCommandExecutor::DEFAULT_CLASS_PATH)]
    pub input_classpath: String,

    /// Write taps directly to this evdev node instead of running the input tool.
    #[arg(long, env = "TOUCH_DEVICE")]
    pub touch_device: Option<PathBuf>,

    /// Horizontal multiplier applied to taps written to the touch device.
    #[arg(long, env = "TOUCH_SCALE_X", default_value_t = 1)]
    pub touch_scale_x: i32,

    /// Vertical multiplier applied to taps written to the touch device.
    #[arg(long, env = "TOUCH_SCALE_Y", default_value_t = 1)]
    pub touch_scale_y: i32,

    /// Screenshot program served on /cap; the route is disabled when unset.
    #[arg(long, env = "CAPTURE_PROGRAM")]
    pub capture_program: Option<PathBuf>,

    /// Timeout for one screenshot.
    #[arg(long, env = "CAPTURE_TIMEOUT_MS", default_value_t = 5000)]
    pub capture_timeout_ms: u64,

    /// Tracing filter directive.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,

    /// Log output encoding.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
}

/// Upper bound for `--workers`.
pub const MAX_WORKERS: usize = 1024;
/// Upper bound for `--queue-size`; the queue preallocates its slots.
pub const MAX_QUEUE_SIZE: usize = 65_536;
/// Upper bound for `--concurrency-limit`.
pub const MAX_CONCURRENCY_LIMIT: usize = 65_536;

fn worker_count(raw: &str) -> Result<usize, String> {
    bounded(raw, MAX_WORKERS)
}

fn queue_size(raw: &str) -> Result<usize, String> {
    bounded(raw, MAX_QUEUE_SIZE)
}

fn concurrency_limit(raw: &str) -> Result<usize, String> {
    bounded(raw, MAX_CONCURRENCY_LIMIT)
}

fn bounded(raw: &str, max: usize) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(value) if (1..=max).contains(&value) => Ok(value),
        _ => Err(format!("expected an integer between 1 and {max}, got '{raw}'")),
    }
}

impl AgentSettings {
    /// Socket address the HTTP server binds.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Dispatcher sizing and timing.
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            workers: self.workers,
            queue_size: self.queue_size,
            concurrency_limit: self.concurrency_limit,
            deadlines: Deadlines {
                tap: Duration::from_millis(self.tap_deadline_ms),
                swipe: Duration::from_millis(self.swipe_deadline_ms),
                key: Duration::from_millis(self.key_deadline_ms),
                text: Duration::from_millis(self.text_deadline_ms),
            },
            timeouts: ExecutionTimeouts {
                input: Duration::from_millis(self.input_timeout_ms),
                text: Duration::from_millis(self.text_timeout_ms),
            },
        }
    }

    /// Builds the device executor selected by these settings.
    pub fn device_executor(&self) -> Arc<dyn DeviceExecutor> {
        let input: Arc<dyn DeviceExecutor> = Arc::new(InputCommandExecutor::android(
            &self.input_program,
            self.input_classpath.clone(),
        ));
        match &self.touch_device {
            Some(device) => Arc::new(EvdevTouchExecutor::new(
                device,
                TouchScale {
                    x: self.touch_scale_x,
                    y: self.touch_scale_y,
                },
                input,
            )),
            None => input,
        }
    }

    /// Builds the screenshot adapter, if one is configured.
    pub fn screen_capture(&self) -> Option<Arc<dyn ScreenCapture>> {
        self.capture_program.as_ref().map(|program| {
            Arc::new(CommandScreenCapture::new(program)) as Arc<dyn ScreenCapture>
        })
    }

    /// Timeout for one screenshot.
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}
