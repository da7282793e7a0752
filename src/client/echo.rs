//! echolog client for sending one message and collecting the echoed log

use crate::{EchoLogError, Result};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

/// Client for a running echolog server
#[derive(Debug, Clone)]
pub struct EchoClient {
    addr: String,
    timeout: Duration,
}

impl EchoClient {
    /// Create a client for `addr` (`host:port`)
    pub fn new<A: Into<String>>(addr: A) -> Self {
        Self {
            addr: addr.into(),
            timeout: Duration::from_secs(5),
        }
    }

    /// Bound connect and read time; defaults to five seconds
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send `line`, adding the trailing newline if missing, and return the log
    pub async fn send_line<S: AsRef<str>>(&self, line: S) -> Result<Bytes> {
        let mut message = line.as_ref().as_bytes().to_vec();
        if message.last() != Some(&b'\n') {
            message.push(b'\n');
        }
        self.send(&message).await
    }

    /// Send raw bytes, close the write half and read until the server closes.
    ///
    /// Without a newline in `bytes` the server logs nothing and the returned
    /// content is empty.
    pub async fn send(&self, bytes: &[u8]) -> Result<Bytes> {
        let mut stream = self.connect().await?;
        stream.write_all(bytes).await?;
        stream.shutdown().await?;

        let mut content = Vec::new();
        timeout(self.timeout, stream.read_to_end(&mut content))
            .await
            .map_err(|_| EchoLogError::Connection("Timed out waiting for echo".to_string()))??;
        Ok(Bytes::from(content))
    }

    async fn connect(&self) -> Result<TcpStream> {
        timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| EchoLogError::Connection("Connection timeout".to_string()))?
            .map_err(|e| EchoLogError::Connection(format!("Failed to connect: {}", e)))
    }
}
