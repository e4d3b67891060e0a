//! Test doubles for the device executor.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::ExecutionError;
use crate::executors::DeviceExecutor;
use crate::model::Point;

/// Records every call it completes and can be slowed, gated or made to fail.
#[derive(Default)]
pub(crate) struct RecordingExecutor {
    calls: Mutex<Vec<String>>,
    started: AtomicUsize,
    latency: Duration,
    gate: Option<Arc<Semaphore>>,
    fail_prefix: Option<String>,
    panic_prefix: Option<String>,
}

impl RecordingExecutor {
    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every call waits for one permit from `gate` before completing.
    pub(crate) fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn failing_on(mut self, prefix: impl Into<String>) -> Self {
        self.fail_prefix = Some(prefix.into());
        self
    }

    pub(crate) fn panicking_on(mut self, prefix: impl Into<String>) -> Self {
        self.panic_prefix = Some(prefix.into());
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub(crate) fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Polls until at least `count` calls have started.
    pub(crate) async fn wait_started(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.started() < count {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("executor calls should start in time");
    }

    /// Polls until at least `count` calls have completed.
    pub(crate) async fn wait_completed(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls().len() < count {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("executor calls should complete in time");
    }

    async fn record(&self, label: String) -> Result<(), ExecutionError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .expect("test gate should stay open")
                .forget();
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self
            .panic_prefix
            .as_deref()
            .is_some_and(|prefix| label.starts_with(prefix))
        {
            panic!("recording executor told to panic on {label}");
        }
        let fails = self
            .fail_prefix
            .as_deref()
            .is_some_and(|prefix| label.starts_with(prefix));
        self.calls
            .lock()
            .expect("calls lock should not be poisoned")
            .push(label);
        if fails {
            return Err(ExecutionError::Device {
                path: PathBuf::from("/dev/fake-input"),
                source: io::Error::other("injected failure"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceExecutor for RecordingExecutor {
    async fn touch(&self, at: Point, _timeout: Duration) -> Result<(), ExecutionError> {
        self.record(format!("tap {} {}", at.x, at.y)).await
    }

    async fn swipe(
        &self,
        from: Point,
        to: Point,
        duration_ms: u64,
        _timeout: Duration,
    ) -> Result<(), ExecutionError> {
        self.record(format!(
            "swipe {} {} {} {} {duration_ms}",
            from.x, from.y, to.x, to.y
        ))
        .await
    }

    async fn key(&self, keycode: &str, _timeout: Duration) -> Result<(), ExecutionError> {
        self.record(format!("key {keycode}")).await
    }

    async fn text(&self, payload: &str, _timeout: Duration) -> Result<(), ExecutionError> {
        self.record(format!("text {payload}")).await
    }
}
