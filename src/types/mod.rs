//! Shared types for echolog

pub mod connection;

pub use connection::{ConnectionId, WorkerState};
