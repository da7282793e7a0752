//! Signal handling and the shutdown sequence

use crate::server::registry::{ConnectionRegistry, DrainReport};
use crate::server::ServerContext;
use crate::{EchoLogError, Result};
use std::io;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Listen for SIGINT and SIGTERM and request termination on each delivery.
///
/// Registration happens before this returns, so failures surface at startup.
/// Repeated signals are logged and otherwise ignored.
#[cfg(unix)]
pub fn spawn_signal_listener(context: Arc<ServerContext>) -> io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            };
            if context.request_shutdown() {
                info!(signal = name, "Caught signal, exiting");
            } else {
                info!(signal = name, "Shutdown already in progress");
            }
        }
    }))
}

/// Listen for Ctrl+C and request termination on each delivery.
#[cfg(not(unix))]
pub fn spawn_signal_listener(context: Arc<ServerContext>) -> io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if context.request_shutdown() {
                info!("Caught Ctrl+C, exiting");
            } else {
                info!("Shutdown already in progress");
            }
        }
    }))
}

/// Runs the ordered teardown once the acceptor has stopped
pub struct ShutdownCoordinator {
    context: Arc<ServerContext>,
}

impl ShutdownCoordinator {
    /// Create a coordinator for the given server context
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }

    /// Drain workers, join the timestamp writer and remove the log file.
    ///
    /// Expects the termination flag to be set and the listener to be closed
    /// already; sets the flag itself if it is not.
    pub async fn complete(
        self,
        mut registry: ConnectionRegistry,
        timestamp: Option<JoinHandle<()>>,
    ) -> Result<DrainReport> {
        self.context.request_shutdown();

        let grace = self.context.config().drain_grace();
        let live = registry.len();
        let report = registry.drain(grace).await;
        info!(
            live,
            joined = report.joined,
            aborted = report.aborted,
            failed = report.failed,
            "connections drained"
        );

        if let Some(handle) = timestamp {
            if let Err(e) = handle.await {
                error!(error = %e, "timestamp writer could not be joined");
            }
        }

        let store = self.context.store();
        store.destroy().await.map_err(|e| {
            EchoLogError::Shutdown(format!(
                "Failed to remove log file {}: {}",
                store.path().display(),
                e
            ))
        })?;
        info!(path = %store.path().display(), "log file removed");

        Ok(report)
    }
}
