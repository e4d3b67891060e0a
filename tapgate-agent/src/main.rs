use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tapgate_agent::{AgentSettings, AppState, Dispatcher, build_router, telemetry};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = AgentSettings::parse();
    telemetry::initialise(&settings.log_filter, settings.log_format)
        .context("failed to initialise logging")?;

    let config = settings.dispatch_config();
    let dispatcher = Arc::new(Dispatcher::start(
        config,
        settings.device_executor(),
    ));

    let mut state = AppState::new(dispatcher.clone());
    match settings.screen_capture() {
        Some(capture) => state = state.with_capture(capture, settings.capture_timeout()),
        None => info!("screen capture disabled; set CAPTURE_PROGRAM to enable it"),
    }

    let bind_addr = settings.bind_addr();
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    info!(
        addr = %bind_addr,
        workers = config.workers,
        queue_size = config.queue_size,
        concurrency_limit = config.concurrency_limit,
        "tapgate agent listening"
    );

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    info!("http server stopped; draining queued actions");
    dispatcher.shutdown_and_wait().await;
    info!("tapgate agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
