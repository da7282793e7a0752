//! # echolog - Concurrent TCP Log-Echo Server
//!
//! echolog accepts TCP clients, appends each newline-terminated message they
//! send to one shared log file, and answers with the full accumulated log.
//! A background task appends a timestamp line on a fixed period.
//!
//! ## Features
//!
//! - **Serialized Log Store**: a single async mutex orders every append and read-back
//! - **Self-Inclusive Echo**: append and read-back share one critical section
//! - **Task Per Connection**: workers are tracked in a registry and reaped by the acceptor
//! - **Graceful Shutdown**: SIGINT/SIGTERM drain workers and remove the log file
//!
//! ## Quick Start
//!
//! ### Server
//! ```no_run
//! use echolog::config::ServerConfig;
//! use echolog::server::shutdown::spawn_signal_listener;
//! use echolog::server::EchoLogServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::from_file("config/server.toml")?;
//!     let server = EchoLogServer::bind(config).await?;
//!     let _signals = spawn_signal_listener(server.context())?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ### Client
//! ```no_run
//! use echolog::client::EchoClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let log = EchoClient::new("127.0.0.1:9000").send_line("hello").await?;
//!     println!("{}", String::from_utf8_lossy(&log));
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod server;
pub mod types;

/// Common error types used throughout echolog
pub mod error {
    use std::fmt;

    /// echolog error types
    #[derive(Debug)]
    pub enum EchoLogError {
        /// I/O operation failed
        Io(std::io::Error),
        /// Configuration error
        Config(String),
        /// Server startup or runtime error
        Server(String),
        /// Client connection error
        Connection(String),
        /// Error raised while shutting down
        Shutdown(String),
    }

    impl fmt::Display for EchoLogError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                EchoLogError::Io(e) => write!(f, "I/O error: {}", e),
                EchoLogError::Config(e) => write!(f, "Configuration error: {}", e),
                EchoLogError::Server(e) => write!(f, "Server error: {}", e),
                EchoLogError::Connection(e) => write!(f, "Connection error: {}", e),
                EchoLogError::Shutdown(e) => write!(f, "Shutdown error: {}", e),
            }
        }
    }

    impl std::error::Error for EchoLogError {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            match self {
                EchoLogError::Io(e) => Some(e),
                _ => None,
            }
        }
    }

    impl From<std::io::Error> for EchoLogError {
        fn from(err: std::io::Error) -> Self {
            EchoLogError::Io(err)
        }
    }

    /// Result type alias for echolog operations
    pub type Result<T> = std::result::Result<T, EchoLogError>;
}

pub use error::{EchoLogError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::EchoClient;
    pub use crate::config::ServerConfig;
    pub use crate::server::{EchoLogServer, LogStore};
    pub use crate::types::ConnectionId;
    pub use crate::{EchoLogError, Result};
}
