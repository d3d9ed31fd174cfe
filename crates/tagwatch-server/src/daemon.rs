//! Process lifecycle: event consumption, signals and orderly shutdown.

use std::time::Duration;

use anyhow::Context;
use tagwatch_core::{ApiConfig, MonitorHandle, ReaderEvent};
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::display::format_event;
use crate::state::SharedState;

/// Prints every event to stdout and remembers it for the API.
///
/// Returns once every sender has been dropped.
pub async fn consume_events(mut rx: UnboundedReceiver<ReaderEvent>, state: SharedState) {
    while let Some(event) = rx.recv().await {
        println!("{}", format_event(&event));
        state.write().await.record_event(event);
    }
    debug!("Event channel closed");
}

/// Binds the status API listener, or returns `None` when the API is disabled.
///
/// Called before any monitor starts so a taken port fails startup cleanly.
///
/// # Errors
///
/// Returns an error if `api.bind` is not `ip:port` or cannot be bound.
pub async fn bind_api(config: &ApiConfig) -> anyhow::Result<Option<TcpListener>> {
    if !config.enabled {
        return Ok(None);
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding status API to {addr}"))?;
    info!("Status API listening on {}", addr);
    Ok(Some(listener))
}

/// Completes on SIGINT (Ctrl+C) or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
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
}

/// Stops every monitor and waits up to `grace` for all of them to exit.
///
/// Returns the names of monitors still running when the grace period ended.
pub async fn stop_monitors(handles: Vec<MonitorHandle>, grace: Duration) -> Vec<String> {
    for handle in &handles {
        handle.stop();
    }

    let deadline = tokio::time::Instant::now() + grace;
    let mut stragglers = Vec::new();
    for handle in handles {
        let name = handle.name().to_string();
        match tokio::time::timeout_at(deadline, handle.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(reader = %name, error = %e, "Monitor exited abnormally"),
            Err(_) => stragglers.push(name),
        }
    }
    stragglers
}
