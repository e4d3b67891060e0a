use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tapgate_common::{
    CAPTURE_ROUTE, DispatchMetrics, HEALTH_ROUTE, HealthStatus, KEY_ROUTE, MAX_BODY_BYTES,
    METRICS_ROUTE, ReplyLine, SWIPE_ROUTE, TAP_ROUTE, TEXT_ROUTE,
};
use tracing::warn;

use crate::capture::ScreenCapture;
use crate::command;
use crate::error::DispatchError;
use crate::model::ActionKind;
use crate::runtime::{Dispatcher, Submission};

/// Shared HTTP state for the action handlers.
#[derive(Clone)]
pub struct AppState {
    /// Dispatcher shared by every request.
    pub dispatcher: Arc<Dispatcher>,
    capture: Option<Arc<dyn ScreenCapture>>,
    capture_timeout: Duration,
}

impl AppState {
    /// Creates application state with screenshots disabled.
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            capture: None,
            capture_timeout: Duration::from_secs(5),
        }
    }

    /// Serves screenshots from `capture` on the capture route.
    pub fn with_capture(mut self, capture: Arc<dyn ScreenCapture>, timeout: Duration) -> Self {
        self.capture = Some(capture);
        self.capture_timeout = timeout;
        self
    }
}

/// Builds the action, capture, health and metrics routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(TAP_ROUTE, post(tap_handler))
        .route(SWIPE_ROUTE, post(swipe_handler))
        .route(KEY_ROUTE, post(key_handler))
        .route(TEXT_ROUTE, post(text_handler))
        .route(CAPTURE_ROUTE, get(capture_handler))
        .route(HEALTH_ROUTE, get(health_handler))
        .route(METRICS_ROUTE, get(metrics_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Handles `<x> <y> [amount] [delay]`.
pub async fn tap_handler(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    dispatch_action(&state, ActionKind::Tap, body).await
}

/// Handles `<x1> <y1> <x2> <y2> <duration> [amount] [delay]`.
pub async fn swipe_handler(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    dispatch_action(&state, ActionKind::Swipe, body).await
}

/// Handles `<keycode> [amount] [delay]`.
pub async fn key_handler(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    dispatch_action(&state, ActionKind::Key, body).await
}

/// Handles a raw text body.
pub async fn text_handler(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    dispatch_action(&state, ActionKind::Text, body).await
}

/// Returns one screenshot while holding an admission permit.
pub async fn capture_handler(State(state): State<AppState>) -> Response {
    let _permit = match state.dispatcher.try_admit() {
        Ok(permit) => permit,
        Err(error) => return dispatch_rejection(error),
    };

    let Some(capture) = &state.capture else {
        return reply(StatusCode::NOT_FOUND, ReplyLine::error("capture disabled"));
    };

    match capture.capture(state.capture_timeout).await {
        Ok(image) => ([(header::CONTENT_TYPE, "image/bmp")], image).into_response(),
        Err(error) => {
            warn!(%error, "screen capture failed");
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                ReplyLine::error(error.to_string()),
            )
        }
    }
}

/// Returns process health.
pub async fn health_handler() -> Json<HealthStatus> {
    Json(HealthStatus::ok())
}

/// Returns dispatcher counters.
pub async fn metrics_handler(State(state): State<AppState>) -> Json<DispatchMetrics> {
    Json(state.dispatcher.metrics())
}

async fn dispatch_action(
    state: &AppState,
    kind: ActionKind,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => return body_rejection(rejection),
    };

    let _permit = match state.dispatcher.try_admit() {
        Ok(permit) => permit,
        Err(error) => return dispatch_rejection(error),
    };

    let text = String::from_utf8_lossy(&body);
    let command = match command::parse(kind, &text) {
        Ok(command) => command,
        Err(error) => {
            state.dispatcher.record_invalid();
            return reply(StatusCode::OK, ReplyLine::error(error.to_string()));
        }
    };

    match state.dispatcher.submit(command).await {
        Ok(Submission::Completed(line)) => reply(StatusCode::OK, line),
        Ok(accepted) => reply(StatusCode::ACCEPTED, accepted.reply_line()),
        Err(error) => dispatch_rejection(error),
    }
}

fn reply(status: StatusCode, line: ReplyLine) -> Response {
    (status, line.to_string()).into_response()
}

fn dispatch_rejection(error: DispatchError) -> Response {
    reply(
        StatusCode::SERVICE_UNAVAILABLE,
        ReplyLine::error(error.to_string()),
    )
}

fn body_rejection(rejection: BytesRejection) -> Response {
    let status = rejection.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return reply(status, ReplyLine::error("request body too large"));
    }
    reply(status, ReplyLine::error(rejection.body_text()))
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::capture::CommandScreenCapture;
    use crate::executors::DeviceExecutor;
    use crate::runtime::DispatchConfig;
    use crate::testing::RecordingExecutor;

    async fn serve(state: AppState) -> String {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("ephemeral port should bind");
        let addr = listener.local_addr().expect("listener should have an address");
        tokio::spawn(async move {
            axum::serve(listener, build_router(state))
                .await
                .expect("server should run");
        });
        format!("http://{addr}")
    }

    fn state_with(config: DispatchConfig, executor: Arc<dyn DeviceExecutor>) -> AppState {
        AppState::new(Arc::new(Dispatcher::start(config, executor)))
    }

    async fn post(base: &str, path: &str, body: impl Into<reqwest::Body>) -> (StatusCode, String) {
        let response = reqwest::Client::new()
            .post(format!("{base}{path}"))
            .body(body)
            .send()
            .await
            .expect("request should complete");
        let status = StatusCode::from_u16(response.status().as_u16())
            .expect("status should be valid");
        let text = response.text().await.expect("body should be text");
        (status, text)
    }

    #[tokio::test]
    async fn fast_tap_returns_worker_result() {
        let base = serve(state_with(
            DispatchConfig::default(),
            Arc::new(RecordingExecutor::default()),
        ))
        .await;

        let (status, body) = post(&base, TAP_ROUTE, "10 20").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK|tapped 10 20 1 0");
    }

    #[tokio::test]
    async fn slow_tap_is_acknowledged_and_still_executes() {
        let executor =
            Arc::new(RecordingExecutor::default().with_latency(Duration::from_millis(400)));
        let base = serve(state_with(DispatchConfig::default(), executor.clone())).await;

        let (status, body) = post(&base, TAP_ROUTE, "10 20").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, "OK|tap enqueued");
        assert!(executor.calls().is_empty());

        executor.wait_completed(1).await;
        assert_eq!(executor.calls(), vec!["tap 10 20".to_string()]);
    }

    #[tokio::test]
    async fn every_action_route_renders_its_summary() {
        let base = serve(state_with(
            DispatchConfig::default(),
            Arc::new(RecordingExecutor::default()),
        ))
        .await;

        let (_, swipe) = post(&base, SWIPE_ROUTE, "0 0 100 100 300").await;
        assert_eq!(swipe, "OK|swiped 0 0 100 100 300 1 0");
        let (_, key) = post(&base, KEY_ROUTE, "KEYCODE_ENTER 2 0").await;
        assert_eq!(key, "OK|key KEYCODE_ENTER x2 delay=0");
        let (_, text) = post(&base, TEXT_ROUTE, "hello world").await;
        assert_eq!(text, "OK|text sent len=11");
    }

    #[tokio::test]
    async fn validation_errors_are_application_level() {
        let base = serve(state_with(
            DispatchConfig::default(),
            Arc::new(RecordingExecutor::default()),
        ))
        .await;

        let (status, body) = post(&base, TAP_ROUTE, "10 20 0 50").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ERROR|invalid amount");

        let (status, body) = post(&base, TEXT_ROUTE, "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ERROR|empty text");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let base = serve(state_with(
            DispatchConfig::default(),
            Arc::new(RecordingExecutor::default()),
        ))
        .await;

        let (status, body) = post(&base, TEXT_ROUTE, "a".repeat(MAX_BODY_BYTES + 1)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body, "ERROR|request body too large");
    }

    #[tokio::test]
    async fn exhausted_limiter_answers_server_busy() {
        let state = state_with(
            DispatchConfig {
                concurrency_limit: 1,
                ..DispatchConfig::default()
            },
            Arc::new(RecordingExecutor::default()),
        );
        let held = state.dispatcher.try_admit().expect("permit should be free");
        let base = serve(state.clone()).await;

        let (status, body) = post(&base, TAP_ROUTE, "1 1").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "ERROR|server busy");

        drop(held);
        let (status, _) = post(&base, TAP_ROUTE, "1 1").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn full_queue_answers_queue_full_and_releases_permit() {
        let gate = Arc::new(Semaphore::new(0));
        let executor = Arc::new(RecordingExecutor::default().gated(gate.clone()));
        let state = state_with(
            DispatchConfig {
                workers: 1,
                queue_size: 1,
                concurrency_limit: 2,
                ..DispatchConfig::default()
            },
            executor.clone(),
        );
        let tap = command::parse(ActionKind::Tap, "1 1").expect("tap should parse");
        let _running = state
            .dispatcher
            .try_enqueue(tap.clone())
            .expect("first action should queue");
        executor.wait_started(1).await;
        let _waiting = state
            .dispatcher
            .try_enqueue(tap)
            .expect("queue should have one slot");
        let base = serve(state.clone()).await;

        let (status, body) = post(&base, TAP_ROUTE, "2 2").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "ERROR|queue full");
        assert_eq!(state.dispatcher.metrics().available_permits, 2);

        gate.add_permits(2);
        executor.wait_completed(2).await;
    }

    #[tokio::test]
    async fn capture_route_is_disabled_without_a_program() {
        let base = serve(state_with(
            DispatchConfig::default(),
            Arc::new(RecordingExecutor::default()),
        ))
        .await;

        let response = reqwest::get(format!("{base}{CAPTURE_ROUTE}"))
            .await
            .expect("request should complete");
        assert_eq!(response.status().as_u16(), 404);
        assert_eq!(
            response.text().await.expect("body should be text"),
            "ERROR|capture disabled"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn capture_route_streams_program_output() {
        let state = state_with(
            DispatchConfig::default(),
            Arc::new(RecordingExecutor::default()),
        )
        .with_capture(
            Arc::new(CommandScreenCapture::with_args(
                "printf",
                vec!["BM".to_string()],
            )),
            Duration::from_secs(5),
        );
        let base = serve(state).await;

        let response = reqwest::get(format!("{base}{CAPTURE_ROUTE}"))
            .await
            .expect("request should complete");
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(
            response
                .headers()
                .get("content-type")
                .and_then(|value| value.to_str().ok()),
            Some("image/bmp")
        );
        assert_eq!(
            response.bytes().await.expect("body should be readable").as_ref(),
            b"BM"
        );
    }

    #[tokio::test]
    async fn health_and_metrics_are_served_as_json() {
        let base = serve(state_with(
            DispatchConfig::default(),
            Arc::new(RecordingExecutor::default()),
        ))
        .await;
        post(&base, TAP_ROUTE, "3 4").await;
        post(&base, TAP_ROUTE, "bad").await;

        let health = reqwest::get(format!("{base}{HEALTH_ROUTE}"))
            .await
            .expect("request should complete")
            .text()
            .await
            .expect("body should be text");
        assert_eq!(health, r#"{"status":"ok"}"#);

        let metrics = reqwest::get(format!("{base}{METRICS_ROUTE}"))
            .await
            .expect("request should complete")
            .text()
            .await
            .expect("body should be text");
        let metrics: DispatchMetrics =
            serde_json::from_str(&metrics).expect("metrics should be valid json");
        assert_eq!(metrics.admitted, 2);
        assert_eq!(metrics.rejected_invalid, 1);
        assert_eq!(metrics.succeeded, 1);
        assert_eq!(metrics.workers, 4);
    }
}
