//! TCP acceptor loop

use crate::server::registry::{ConnectionRecord, ConnectionRegistry};
use crate::server::ServerContext;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

/// Period of the idle reap pass
const REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Pause after a failed accept; errors such as EMFILE persist until descriptors are freed
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Owns the listening socket and the registry of live connections
pub struct Acceptor {
    listener: TcpListener,
    context: Arc<ServerContext>,
    registry: ConnectionRegistry,
}

impl Acceptor {
    /// Create an acceptor over a bound listener
    pub fn new(listener: TcpListener, context: Arc<ServerContext>) -> Self {
        Self {
            listener,
            context,
            registry: ConnectionRegistry::new(),
        }
    }

    /// Accept connections until termination is requested.
    ///
    /// Each iteration accepts at most one connection, then reaps every
    /// finished worker. On termination the listener is closed and the
    /// registry, still holding unfinished workers, is handed back for draining.
    pub async fn run(mut self) -> ConnectionRegistry {
        let shutdown = self.context.shutdown_token().clone();
        let mut reap_tick = interval(REAP_INTERVAL);
        reap_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!(peer = %peer, "Accepted connection from {}", peer);
                        let record = ConnectionRecord::start(stream, peer, &self.context);
                        let id = self.registry.insert(record);
                        debug!(conn = %id, live = self.registry.len(), "worker started");
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        sleep(ACCEPT_BACKOFF).await;
                    }
                },
                _ = reap_tick.tick() => {}
            }

            let reaped = self.registry.reap_completed().await;
            if reaped > 0 {
                debug!(reaped, live = self.registry.len(), "reaped finished workers");
            }
        }

        drop(self.listener);
        info!(live = self.registry.len(), "listener closed");
        self.registry
    }
}
