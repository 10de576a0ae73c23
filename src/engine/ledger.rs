//! Outage ledger: the only legal mutation surface for outage records.
//!
//! Enforces the one-open-outage-per-channel invariant and computes both
//! duration fields on close. Storage failures are logged and absorbed;
//! the in-memory ledger stays authoritative for live state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::Outage;
use crate::storage::Storage;

/// Ledger error types. `AlreadyOpen` indicates a logic bug upstream and the
/// offending operation is dropped by the caller.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("outage already open for channel {0}")]
    AlreadyOpen(String),
    #[error("no open outage for channel {0}")]
    NotFound(String),
}

/// Tracks the open outage per channel and forwards records to storage.
pub struct OutageLedger {
    storage: Arc<dyn Storage>,
    open: Mutex<HashMap<String, Outage>>,
}

impl OutageLedger {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Reload open outages from storage, e.g. after a restart mid-outage.
    pub fn hydrate(&self) {
        match self.storage.get_open_outages() {
            Ok(outages) => {
                let mut open = self.lock_open();
                for outage in outages {
                    tracing::info!(
                        channel_id = %outage.channel_id,
                        start_time = %outage.start_time,
                        "resuming open outage from storage"
                    );
                    open.insert(outage.channel_id.clone(), outage);
                }
            }
            Err(e) => tracing::error!("failed to hydrate open outages: {}", e),
        }
    }

    /// Open an outage at the moment the failure threshold is crossed.
    pub fn open(
        &self,
        channel_id: &str,
        first_failure_time: DateTime<Utc>,
        confirmed_at: DateTime<Utc>,
        reason: &str,
        failure_count: u32,
    ) -> Result<Outage, LedgerError> {
        let mut open = self.lock_open();
        if open.contains_key(channel_id) {
            return Err(LedgerError::AlreadyOpen(channel_id.to_string()));
        }

        let mut outage = Outage {
            id: 0,
            channel_id: channel_id.to_string(),
            reason: reason.to_string(),
            failure_count,
            first_failure_time,
            start_time: confirmed_at,
            confirmed_at,
            end_time: None,
            duration_ms: None,
            actual_duration_ms: None,
        };

        if let Err(e) = self.storage.insert_outage(&mut outage) {
            tracing::error!(%channel_id, "failed to persist opened outage: {}", e);
        }

        open.insert(channel_id.to_string(), outage.clone());
        Ok(outage)
    }

    /// Close the channel's open outage and compute both duration fields.
    ///
    /// `duration` measures from confirmation; `actual_duration` from the
    /// first failing sample. Replaying a close is a no-op error.
    pub fn close(&self, channel_id: &str, end_time: DateTime<Utc>) -> Result<Outage, LedgerError> {
        let mut outage = {
            let mut open = self.lock_open();
            open.remove(channel_id)
                .ok_or_else(|| LedgerError::NotFound(channel_id.to_string()))?
        };

        outage.end_time = Some(end_time);
        outage.duration_ms = Some((end_time - outage.start_time).num_milliseconds().max(0));
        outage.actual_duration_ms = Some(
            (end_time - outage.first_failure_time)
                .num_milliseconds()
                .max(0),
        );

        if let Err(e) = self.storage.update_outage_closed(&outage) {
            tracing::error!(%channel_id, "failed to persist closed outage: {}", e);
        }

        Ok(outage)
    }

    /// The channel's currently open outage, if any.
    pub fn get_open(&self, channel_id: &str) -> Option<Outage> {
        self.lock_open().get(channel_id).cloned()
    }

    fn lock_open(&self) -> std::sync::MutexGuard<'_, HashMap<String, Outage>> {
        self.open.lock().unwrap_or_else(|e| e.into_inner())
    }
}
