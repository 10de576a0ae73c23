//! In-memory store for tests and ephemeral runs.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::model::{Outage, Sample};

use super::{Storage, StorageError};

#[derive(Default)]
struct Inner {
    samples: Vec<Sample>,
    outages: Vec<Outage>,
    next_id: i64,
}

/// Storage backed by plain vectors behind a mutex.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of recorded samples (test helper).
    pub fn sample_count(&self) -> usize {
        self.lock().samples.len()
    }

    /// Samples for one channel in insertion order (test helper).
    pub fn samples_for(&self, channel_id: &str) -> Vec<Sample> {
        self.lock()
            .samples
            .iter()
            .filter(|s| s.channel_id == channel_id)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Storage for MemoryStore {
    fn append_sample(&self, sample: &Sample) -> Result<(), StorageError> {
        self.lock().samples.push(sample.clone());
        Ok(())
    }

    fn insert_outage(&self, outage: &mut Outage) -> Result<i64, StorageError> {
        let mut inner = self.lock();
        inner.next_id += 1;
        outage.id = inner.next_id;
        inner.outages.push(outage.clone());
        Ok(outage.id)
    }

    fn update_outage_closed(&self, outage: &Outage) -> Result<(), StorageError> {
        let mut inner = self.lock();
        match inner
            .outages
            .iter_mut()
            .find(|o| o.id == outage.id && o.is_open())
        {
            Some(stored) => {
                *stored = outage.clone();
                Ok(())
            }
            None => Err(StorageError::OutageNotFound(outage.id)),
        }
    }

    fn get_open_outages(&self) -> Result<Vec<Outage>, StorageError> {
        Ok(self
            .lock()
            .outages
            .iter()
            .filter(|o| o.is_open())
            .cloned()
            .collect())
    }

    fn list_outages(
        &self,
        channel_id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Outage>, StorageError> {
        let mut outages: Vec<Outage> = self
            .lock()
            .outages
            .iter()
            .filter(|o| channel_id.map_or(true, |id| o.channel_id == id))
            .filter(|o| since.map_or(true, |t| o.start_time >= t))
            .cloned()
            .collect();
        outages.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(outages)
    }

    fn list_samples(&self, channel_id: &str, limit: u32) -> Result<Vec<Sample>, StorageError> {
        let inner = self.lock();
        let mut samples: Vec<Sample> = inner
            .samples
            .iter()
            .filter(|s| s.channel_id == channel_id)
            .cloned()
            .collect();
        samples.sort_by(|a, b| b.time.cmp(&a.time));
        samples.truncate(limit as usize);
        Ok(samples)
    }
}
