//! Shared server context

use crate::config::ServerConfig;
use crate::server::LogStore;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// State shared by the acceptor, every connection worker and the timestamp writer
#[derive(Debug)]
pub struct ServerContext {
    config: ServerConfig,
    store: LogStore,
    shutdown: CancellationToken,
    shutdown_requested: AtomicBool,
}

impl ServerContext {
    /// Build the context around an already created log store
    pub fn new(config: ServerConfig, store: LogStore) -> Self {
        Self {
            config,
            store,
            shutdown: CancellationToken::new(),
            shutdown_requested: AtomicBool::new(false),
        }
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The shared log store
    pub fn store(&self) -> &LogStore {
        &self.store
    }

    /// Token cancelled once termination has been requested
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Whether termination has been requested
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Set the termination flag. Returns `true` only for the first request.
    pub fn request_shutdown(&self) -> bool {
        if self.shutdown_requested.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shutdown.cancel();
        true
    }
}
