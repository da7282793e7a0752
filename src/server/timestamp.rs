//! Periodic timestamp writer

use crate::server::ServerContext;
use chrono::{DateTime, Local, TimeZone};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, error};

/// Template for timestamp records, RFC 2822 style
pub const TIMESTAMP_FORMAT: &str = "timestamp:%a, %d %b %Y %H:%M:%S %z";

/// Render one timestamp record, newline included
pub fn format_timestamp<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("{}\n", now.format(TIMESTAMP_FORMAT))
}

/// Background task appending a timestamp record to the log store every interval
pub struct TimestampWriter {
    context: Arc<ServerContext>,
    interval: Duration,
}

impl TimestampWriter {
    /// Create a writer using the configured interval
    pub fn new(context: Arc<ServerContext>) -> Self {
        let interval = context.config().timestamp_interval();
        Self { context, interval }
    }

    /// Spawn the writer; the handle resolves once termination is requested
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Write timestamps until the termination flag is set
    pub async fn run(self) {
        let shutdown = self.context.shutdown_token().clone();
        debug!(interval_ms = self.interval.as_millis() as u64, "timestamp writer started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.interval) => {}
            }
            if shutdown.is_cancelled() {
                break;
            }

            let record = format_timestamp(&Local::now());
            let mut log = self.context.store().lock().await;
            match log.append(record.as_bytes()).await {
                Ok(()) => debug!(record = record.trim_end(), "timestamp appended"),
                Err(e) => error!(error = %e, "failed to append timestamp"),
            }
        }

        debug!("timestamp writer stopped");
    }
}
