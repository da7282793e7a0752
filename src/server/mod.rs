//! echolog server implementation

pub mod acceptor;
pub mod context;
pub mod registry;
pub mod shutdown;
pub mod storage;
pub mod timestamp;
pub mod worker;

use crate::config::ServerConfig;
use crate::{EchoLogError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub use acceptor::Acceptor;
pub use context::ServerContext;
pub use registry::{ConnectionRecord, ConnectionRegistry, DrainReport};
pub use shutdown::ShutdownCoordinator;
pub use storage::{LogFile, LogStore};
pub use timestamp::TimestampWriter;
pub use worker::{ConnectionWorker, WorkerExit, WorkerOutcome};

/// Main echolog server that coordinates all components
pub struct EchoLogServer {
    context: Arc<ServerContext>,
    listener: TcpListener,
}

impl EchoLogServer {
    /// Bind the configured address and create the log store
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = bind_listener(&config)?;
        Self::from_std(config, listener).await
    }

    /// Build the server around a listener bound earlier, e.g. before daemonizing
    pub async fn from_std(config: ServerConfig, listener: std::net::TcpListener) -> Result<Self> {
        let server = Self::new(config, listener)?;
        server.create_log().await?;
        Ok(server)
    }

    /// Wrap a bound listener without touching the log file yet.
    ///
    /// Must be called inside a tokio runtime. Call [`create_log`](Self::create_log)
    /// before [`run`](Self::run).
    pub fn new(config: ServerConfig, listener: std::net::TcpListener) -> Result<Self> {
        config.validate()?;

        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;

        let store = LogStore::new(&config.storage.data_file);
        Ok(Self {
            context: Arc::new(ServerContext::new(config, store)),
            listener,
        })
    }

    /// Create the log file, or truncate a leftover one
    pub async fn create_log(&self) -> Result<()> {
        let store = self.context.store();
        store.reset().await.map_err(|e| {
            EchoLogError::Server(format!(
                "Failed to create log file {}: {}",
                store.path().display(),
                e
            ))
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared context; request shutdown through it
    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.context)
    }

    /// Serve until termination is requested, then run the shutdown sequence
    pub async fn run(self) -> Result<DrainReport> {
        let context = self.context;
        info!(addr = %self.listener.local_addr()?, "echolog server listening");

        let timestamp = context
            .config()
            .timestamp
            .enabled
            .then(|| TimestampWriter::new(Arc::clone(&context)).spawn());

        let registry = Acceptor::new(self.listener, Arc::clone(&context)).run().await;

        ShutdownCoordinator::new(context)
            .complete(registry, timestamp)
            .await
    }

    /// Serve until `signal` resolves or termination is requested otherwise
    pub async fn run_until<F>(self, signal: F) -> Result<DrainReport>
    where
        F: std::future::Future<Output = ()>,
    {
        let context = self.context();
        let run = self.run();
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => result,
            _ = signal => {
                context.request_shutdown();
                run.await
            }
        }
    }
}

/// Bind a blocking listener for the configured address
pub fn bind_listener(config: &ServerConfig) -> Result<std::net::TcpListener> {
    config.validate()?;
    let addr = config.listen_addr();
    std::net::TcpListener::bind(addr)
        .map_err(|e| EchoLogError::Server(format!("Failed to bind {}: {}", addr, e)))
}
