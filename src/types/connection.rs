//! Connection identity and worker state types

use std::fmt;
use uuid::Uuid;

/// Opaque identifier of one accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first group is enough to tell connections apart in diagnostics.
        let simple = self.0.simple().to_string();
        write!(f, "{}", &simple[..8])
    }
}

/// Protocol stage of a connection worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Reading from the client until a newline arrives
    Receiving,
    /// Appending the completed message to the log store
    Appending,
    /// Sending the full log back to the client
    Echoing,
    /// Protocol finished, possibly without an append
    Done,
    /// An unrecoverable I/O failure ended the connection
    Error,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Receiving => write!(f, "RECEIVING"),
            WorkerState::Appending => write!(f, "APPENDING"),
            WorkerState::Echoing => write!(f, "ECHOING"),
            WorkerState::Done => write!(f, "DONE"),
            WorkerState::Error => write!(f, "ERROR"),
        }
    }
}
