//! Persistence boundary for samples and outages.
//!
//! The monitoring core writes through the `Storage` trait; the SQLite store
//! is the production implementation and `MemoryStore` backs the tests.
//! Writes are fire-and-forget from the state machine's perspective: a
//! storage error is logged by the caller and never rolls back live state.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{Outage, Sample};

/// Storage error types.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("migration error: {0}")]
    Migration(String),
    #[error("outage {0} not found")]
    OutageNotFound(i64),
}

/// Append-only persistence for samples plus outage lifecycle writes.
pub trait Storage: Send + Sync {
    /// Append one probe sample.
    fn append_sample(&self, sample: &Sample) -> Result<(), StorageError>;

    /// Persist a newly opened outage and assign its id.
    fn insert_outage(&self, outage: &mut Outage) -> Result<i64, StorageError>;

    /// Persist the closing fields of an outage (end time and durations).
    fn update_outage_closed(&self, outage: &Outage) -> Result<(), StorageError>;

    /// All outages still open (no end time), for ledger hydration on startup.
    fn get_open_outages(&self) -> Result<Vec<Outage>, StorageError>;

    /// Outages, newest first, optionally filtered by channel and start time.
    fn list_outages(
        &self,
        channel_id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Outage>, StorageError>;

    /// Most recent samples for a channel, newest first.
    fn list_samples(&self, channel_id: &str, limit: u32) -> Result<Vec<Sample>, StorageError>;
}
