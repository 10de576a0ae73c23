//! SQLite storage implementation.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, Result as SqlResult, Row};

use crate::model::{Outage, Sample, SampleOutcome};

use super::{Storage, StorageError};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Thread-safe SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// In-memory database, handy for local runs without persistence.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations (embedded SQL).
    fn init(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| StorageError::Migration(format!("migration 1 failed: {}", e)))?;
        Ok(())
    }
}

impl Storage for SqliteStore {
    fn append_sample(&self, sample: &Sample) -> Result<(), StorageError> {
        let (outcome, latency_ms, error) = match &sample.outcome {
            SampleOutcome::Success { latency_ms } => ("success", Some(*latency_ms), None),
            SampleOutcome::Failure { error } => ("failure", None, Some(error.as_str())),
            SampleOutcome::Skipped => ("skipped", None, None),
        };

        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO samples (channel_id, time, outcome, latency_ms, error) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                sample.channel_id,
                sample.time.format(TIME_FORMAT).to_string(),
                outcome,
                latency_ms,
                error,
            ],
        )?;
        Ok(())
    }

    fn insert_outage(&self, outage: &mut Outage) -> Result<i64, StorageError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO outages (channel_id, reason, failure_count, first_failure_time, start_time, confirmed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                outage.channel_id,
                outage.reason,
                outage.failure_count,
                outage.first_failure_time.format(TIME_FORMAT).to_string(),
                outage.start_time.format(TIME_FORMAT).to_string(),
                outage.confirmed_at.format(TIME_FORMAT).to_string(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        outage.id = id;
        Ok(id)
    }

    fn update_outage_closed(&self, outage: &Outage) -> Result<(), StorageError> {
        let end_time = outage
            .end_time
            .map(|t| t.format(TIME_FORMAT).to_string());

        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let changed = conn.execute(
            "UPDATE outages SET end_time=?1, duration_ms=?2, actual_duration_ms=?3 WHERE id=?4 AND end_time IS NULL",
            params![end_time, outage.duration_ms, outage.actual_duration_ms, outage.id],
        )?;
        if changed == 0 {
            return Err(StorageError::OutageNotFound(outage.id));
        }
        Ok(())
    }

    fn get_open_outages(&self) -> Result<Vec<Outage>, StorageError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT id, channel_id, reason, failure_count, first_failure_time, start_time, confirmed_at, end_time, duration_ms, actual_duration_ms
             FROM outages WHERE end_time IS NULL ORDER BY start_time ASC",
        )?;
        let outages = stmt
            .query_map([], outage_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(outages)
    }

    fn list_outages(
        &self,
        channel_id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Outage>, StorageError> {
        let channel_filter = channel_id.unwrap_or("");
        let since_filter = since
            .map(|t| t.format(TIME_FORMAT).to_string())
            .unwrap_or_default();

        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT id, channel_id, reason, failure_count, first_failure_time, start_time, confirmed_at, end_time, duration_ms, actual_duration_ms
             FROM outages
             WHERE (?1 = '' OR channel_id = ?1) AND (?2 = '' OR start_time >= ?2)
             ORDER BY start_time DESC",
        )?;
        let outages = stmt
            .query_map(params![channel_filter, since_filter], outage_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(outages)
    }

    fn list_samples(&self, channel_id: &str, limit: u32) -> Result<Vec<Sample>, StorageError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT channel_id, time, outcome, latency_ms, error FROM samples
             WHERE channel_id = ?1 ORDER BY time DESC LIMIT ?2",
        )?;
        let samples = stmt
            .query_map(params![channel_id, limit], |row| {
                let time_str: String = row.get(1)?;
                let outcome_str: String = row.get(2)?;
                let outcome = match outcome_str.as_str() {
                    "success" => SampleOutcome::Success {
                        latency_ms: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                    },
                    "failure" => SampleOutcome::Failure {
                        error: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    },
                    _ => SampleOutcome::Skipped,
                };
                Ok(Sample {
                    channel_id: row.get(0)?,
                    time: parse_db_time(&time_str).unwrap_or_else(Utc::now),
                    outcome,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(samples)
    }
}

fn outage_from_row(row: &Row<'_>) -> SqlResult<Outage> {
    let first_failure: String = row.get(4)?;
    let start: String = row.get(5)?;
    let confirmed: String = row.get(6)?;
    let end: Option<String> = row.get(7)?;

    Ok(Outage {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        reason: row.get(2)?,
        failure_count: row.get(3)?,
        first_failure_time: parse_db_time(&first_failure).unwrap_or_else(Utc::now),
        start_time: parse_db_time(&start).unwrap_or_else(Utc::now),
        confirmed_at: parse_db_time(&confirmed).unwrap_or_else(Utc::now),
        end_time: end.as_deref().and_then(parse_db_time),
        duration_ms: row.get(8)?,
        actual_duration_ms: row.get(9)?,
    })
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        "%Y-%m-%d %H:%M:%S%.9f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    fn sample(channel_id: &str, secs: i64, outcome: SampleOutcome) -> Sample {
        Sample {
            channel_id: channel_id.to_string(),
            time: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            outcome,
        }
    }

    fn open_outage(channel_id: &str) -> Outage {
        let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        Outage {
            id: 0,
            channel_id: channel_id.to_string(),
            reason: "connection refused".into(),
            failure_count: 3,
            first_failure_time: t,
            start_time: t + chrono::Duration::seconds(20),
            confirmed_at: t + chrono::Duration::seconds(20),
            end_time: None,
            duration_ms: None,
            actual_duration_ms: None,
        }
    }

    #[test]
    fn samples_round_trip() {
        let tmp = NamedTempFile::new().unwrap();
        let store = SqliteStore::new(tmp.path()).unwrap();

        store
            .append_sample(&sample("web", 0, SampleOutcome::Success { latency_ms: 12.5 }))
            .unwrap();
        store
            .append_sample(&sample(
                "web",
                10,
                SampleOutcome::Failure {
                    error: "timeout".into(),
                },
            ))
            .unwrap();
        store
            .append_sample(&sample("web", 20, SampleOutcome::Skipped))
            .unwrap();

        let samples = store.list_samples("web", 10).unwrap();
        assert_eq!(samples.len(), 3);
        // Newest first.
        assert!(samples[0].is_skipped());
        assert!(samples[1].is_failure());
        assert!(samples[2].is_success());
    }

    #[test]
    fn outage_insert_close_and_list() {
        let store = SqliteStore::open_in_memory().unwrap();

        let mut outage = open_outage("web");
        let id = store.insert_outage(&mut outage).unwrap();
        assert!(id > 0);
        assert_eq!(outage.id, id);

        let open = store.get_open_outages().unwrap();
        assert_eq!(open.len(), 1);
        assert!(open[0].is_open());

        outage.end_time = Some(outage.start_time + chrono::Duration::seconds(10));
        outage.duration_ms = Some(10_000);
        outage.actual_duration_ms = Some(30_000);
        store.update_outage_closed(&outage).unwrap();

        assert!(store.get_open_outages().unwrap().is_empty());

        let all = store.list_outages(None, None).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].duration_ms, Some(10_000));
        assert_eq!(all[0].actual_duration_ms, Some(30_000));
    }

    #[test]
    fn closing_twice_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();

        let mut outage = open_outage("web");
        store.insert_outage(&mut outage).unwrap();

        outage.end_time = Some(outage.start_time);
        outage.duration_ms = Some(0);
        outage.actual_duration_ms = Some(20_000);
        store.update_outage_closed(&outage).unwrap();

        let err = store.update_outage_closed(&outage).unwrap_err();
        assert!(matches!(err, StorageError::OutageNotFound(_)));
    }

    #[test]
    fn list_outages_filters() {
        let store = SqliteStore::open_in_memory().unwrap();

        let mut a = open_outage("a");
        store.insert_outage(&mut a).unwrap();
        let mut b = open_outage("b");
        b.start_time = b.start_time + chrono::Duration::seconds(100);
        store.insert_outage(&mut b).unwrap();

        assert_eq!(store.list_outages(Some("a"), None).unwrap().len(), 1);
        assert_eq!(store.list_outages(None, None).unwrap().len(), 2);

        let since = Utc.timestamp_opt(1_700_000_050, 0).unwrap();
        let recent = store.list_outages(None, Some(since)).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].channel_id, "b");
    }

    #[test]
    fn parse_db_time_formats() {
        assert!(parse_db_time("2024-01-02 03:04:05.123456789").is_some());
        assert!(parse_db_time("2024-01-02 03:04:05").is_some());
        assert!(parse_db_time("not a time").is_none());
    }
}
