//! Per-connection worker
//!
//! A worker reads one newline-terminated message, appends it to the log store
//! and sends the whole log back, all under a single hold of the store mutex.
//! It never closes its own socket: the stream is handed back through
//! [`WorkerExit`] and closed by whoever joins the worker.

use crate::server::ServerContext;
use crate::types::{ConnectionId, WorkerState};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a worker finished without an I/O failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// A message was appended and the log echoed back
    Echoed {
        /// Bytes appended to the log, newline included
        appended: usize,
        /// Bytes of log content sent to the client
        echoed: usize,
    },
    /// The peer closed before sending a newline; nothing was appended
    Discarded {
        /// Bytes received and dropped
        pending: usize,
    },
}

/// I/O failure that ended a worker, with the stage it happened in
#[derive(Debug)]
pub struct WorkerFailure {
    /// Stage that failed
    pub state: WorkerState,
    /// Underlying error
    pub error: io::Error,
}

impl WorkerFailure {
    fn at(state: WorkerState) -> impl FnOnce(io::Error) -> Self {
        move |error| Self { state, error }
    }
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.state, self.error)
    }
}

impl std::error::Error for WorkerFailure {}

/// What a finished worker hands back to its joiner
#[derive(Debug)]
pub struct WorkerExit<S> {
    /// Connection the worker served
    pub id: ConnectionId,
    /// The client socket, still open
    pub stream: S,
    /// Protocol result
    pub result: std::result::Result<WorkerOutcome, WorkerFailure>,
}

impl<S> WorkerExit<S> {
    /// Terminal state the worker reached
    pub fn state(&self) -> WorkerState {
        match self.result {
            Ok(_) => WorkerState::Done,
            Err(_) => WorkerState::Error,
        }
    }
}

/// Sets the completion flag when the worker returns, panics included
struct CompletionGuard(Arc<AtomicBool>);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

enum Received {
    Complete(Vec<u8>),
    Closed { pending: usize },
}

/// Receive/append/echo protocol for one client connection
pub struct ConnectionWorker<S> {
    id: ConnectionId,
    peer: SocketAddr,
    stream: S,
    context: Arc<ServerContext>,
    abort: CancellationToken,
    complete: Arc<AtomicBool>,
}

impl<S> ConnectionWorker<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a worker for an accepted stream
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        stream: S,
        context: Arc<ServerContext>,
        abort: CancellationToken,
        complete: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            peer,
            stream,
            context,
            abort,
            complete,
        }
    }

    /// Run the protocol to completion and hand the stream back
    pub async fn run(mut self) -> WorkerExit<S> {
        let _complete = CompletionGuard(Arc::clone(&self.complete));
        let result = self.serve().await;

        match &result {
            Ok(WorkerOutcome::Echoed { appended, echoed }) => {
                info!(conn = %self.id, peer = %self.peer, appended, echoed, "message logged and echoed");
            }
            Ok(WorkerOutcome::Discarded { pending }) => {
                info!(conn = %self.id, peer = %self.peer, pending, "peer closed before newline, nothing logged");
            }
            Err(failure) => {
                warn!(conn = %self.id, peer = %self.peer, error = %failure, "connection ended with error");
            }
        }

        WorkerExit {
            id: self.id,
            stream: self.stream,
            result,
        }
    }

    async fn serve(&mut self) -> std::result::Result<WorkerOutcome, WorkerFailure> {
        let chunk_size = self.context.config().server.recv_chunk_size;
        let message = match receive(&mut self.stream, &self.abort, chunk_size)
            .await
            .map_err(WorkerFailure::at(WorkerState::Receiving))?
        {
            Received::Complete(message) => message,
            Received::Closed { pending } => return Ok(WorkerOutcome::Discarded { pending }),
        };
        debug!(conn = %self.id, bytes = message.len(), "message received");

        // One critical section covers append, read-back and send.
        let mut log = tokio::select! {
            biased;
            _ = self.abort.cancelled() => Err(aborted()),
            log = self.context.store().lock() => Ok(log),
        }
        .map_err(WorkerFailure::at(WorkerState::Appending))?;
        log.append(&message)
            .await
            .map_err(WorkerFailure::at(WorkerState::Appending))?;
        let content = log
            .read_all()
            .await
            .map_err(WorkerFailure::at(WorkerState::Echoing))?;
        send_all(&mut self.stream, &self.abort, &content)
            .await
            .map_err(WorkerFailure::at(WorkerState::Echoing))?;
        drop(log);

        Ok(WorkerOutcome::Echoed {
            appended: message.len(),
            echoed: content.len(),
        })
    }
}

fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "connection aborted by shutdown")
}

async fn receive<S>(
    stream: &mut S,
    abort: &CancellationToken,
    chunk_size: usize,
) -> io::Result<Received>
where
    S: AsyncRead + Unpin,
{
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; chunk_size];

    loop {
        let n = tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(aborted()),
            read = stream.read(&mut chunk) => read?,
        };
        if n == 0 {
            return Ok(Received::Closed {
                pending: pending.len(),
            });
        }

        // Anything after the first newline in this chunk is ignored.
        let newline = chunk[..n].iter().position(|&b| b == b'\n');
        let take = newline.map_or(n, |pos| pos + 1);

        pending
            .try_reserve(take)
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
        pending.extend_from_slice(&chunk[..take]);

        if newline.is_some() {
            return Ok(Received::Complete(pending));
        }
    }
}

async fn send_all<S>(stream: &mut S, abort: &CancellationToken, content: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    tokio::select! {
        biased;
        _ = abort.cancelled() => Err(aborted()),
        sent = async {
            stream.write_all(content).await?;
            stream.flush().await?;
            // Half-close so the client sees end-of-stream after the log.
            stream.shutdown().await
        } => sent,
    }
}
