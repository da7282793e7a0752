//! Live connection registry
//!
//! Only the acceptor task owns the registry, so it needs no lock. Workers
//! communicate with it solely through their atomic completion flag. A record
//! leaves the registry only after its worker was joined and its socket closed.

use crate::server::worker::{ConnectionWorker, WorkerExit};
use crate::server::ServerContext;
use crate::types::{ConnectionId, WorkerState};
use crate::{EchoLogError, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Bookkeeping for one accepted connection and its worker task
#[derive(Debug)]
pub struct ConnectionRecord<S = TcpStream> {
    id: ConnectionId,
    peer: SocketAddr,
    handle: JoinHandle<WorkerExit<S>>,
    complete: Arc<AtomicBool>,
    abort: CancellationToken,
}

impl<S> ConnectionRecord<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Spawn a worker for `stream` and return its record
    pub fn start(stream: S, peer: SocketAddr, context: &Arc<ServerContext>) -> Self {
        let id = ConnectionId::new();
        let complete = Arc::new(AtomicBool::new(false));
        let abort = CancellationToken::new();

        let worker = ConnectionWorker::new(
            id,
            peer,
            stream,
            Arc::clone(context),
            abort.clone(),
            Arc::clone(&complete),
        );
        let handle = tokio::spawn(worker.run());

        Self {
            id,
            peer,
            handle,
            complete,
            abort,
        }
    }
}

impl<S> ConnectionRecord<S> {
    /// Connection identifier
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address of the client
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the worker has reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Force the worker's pending socket I/O to return with an error
    pub fn abort(&self) {
        self.abort.cancel();
    }

    /// Join the worker, then close its socket
    pub async fn close(mut self) -> Result<WorkerState> {
        let joined = (&mut self.handle).await;
        self.finish(joined)
    }

    fn finish(self, joined: std::result::Result<WorkerExit<S>, JoinError>) -> Result<WorkerState> {
        let exit = joined.map_err(|e| {
            EchoLogError::Server(format!("worker {} could not be joined: {}", self.id, e))
        })?;
        let state = exit.state();
        drop(exit.stream);
        info!(conn = %self.id, peer = %self.peer, %state, "Closed connection from {}", self.peer);
        Ok(state)
    }
}

/// Counters describing a completed drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Workers joined successfully
    pub joined: usize,
    /// Workers whose sockets had to be aborted after the grace period
    pub aborted: usize,
    /// Workers whose join failed
    pub failed: usize,
}

/// Collection of live connection records keyed by connection id
#[derive(Debug)]
pub struct ConnectionRegistry<S = TcpStream> {
    records: HashMap<ConnectionId, ConnectionRecord<S>>,
}

impl<S> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
        }
    }
}

impl<S> ConnectionRegistry<S> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a started worker
    pub fn insert(&mut self, record: ConnectionRecord<S>) -> ConnectionId {
        let id = record.id();
        self.records.insert(id, record);
        id
    }

    /// Stop tracking a record and hand it to the caller
    pub fn remove(&mut self, id: &ConnectionId) -> Option<ConnectionRecord<S>> {
        self.records.remove(id)
    }

    /// Iterate over live records
    pub fn iter(&self) -> impl Iterator<Item = &ConnectionRecord<S>> {
        self.records.values()
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records are tracked
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Join, close and remove every record whose worker has completed
    pub async fn reap_completed(&mut self) -> usize {
        let finished: Vec<ConnectionId> = self
            .iter()
            .filter(|record| record.is_complete())
            .map(|record| record.id())
            .collect();

        let mut reaped = 0;
        for id in finished {
            if let Some(record) = self.remove(&id) {
                match record.close().await {
                    Ok(_) => reaped += 1,
                    Err(e) => warn!(conn = %id, error = %e, "failed to reap worker"),
                }
            }
        }
        reaped
    }

    /// Join every remaining worker. Workers still running at the grace
    /// deadline are all aborted before any of them is joined, so a worker
    /// waiting on the store lock never waits on a holder that was not told
    /// to stop. Join failures are logged and the drain carries on.
    pub async fn drain(&mut self, grace: Duration) -> DrainReport {
        let deadline = Instant::now() + grace;
        let mut report = DrainReport::default();

        let records: Vec<(ConnectionId, ConnectionRecord<S>)> = self.records.drain().collect();
        let mut overdue = Vec::new();
        for (id, mut record) in records {
            match timeout_at(deadline, &mut record.handle).await {
                Ok(joined) => report.tally(id, record.finish(joined)),
                Err(_) => overdue.push((id, record)),
            }
        }

        for (id, record) in &overdue {
            debug!(conn = %id, peer = %record.peer, "grace period over, aborting connection");
            record.abort();
        }
        report.aborted = overdue.len();

        for (id, mut record) in overdue {
            let joined = (&mut record.handle).await;
            report.tally(id, record.finish(joined));
        }

        report
    }
}

impl DrainReport {
    fn tally(&mut self, id: ConnectionId, closed: Result<WorkerState>) {
        match closed {
            Ok(_) => self.joined += 1,
            Err(e) => {
                error!(conn = %id, error = %e, "failed to join worker during drain");
                self.failed += 1;
            }
        }
    }
}
