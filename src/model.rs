//! Core data model: channels, runtime state, samples, outages, events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Static configuration for one monitored channel.
///
/// Immutable during a run; the whole set is swapped on config reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub probe_type: String,
    pub target: String,
    #[serde(default = "default_interval")]
    pub interval_secs: f64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: f64,
    #[serde(default = "default_threshold")]
    pub failure_threshold: u32,
    /// Fractional jitter applied to scheduled runs, e.g. 0.1 for ±10%.
    #[serde(default = "default_jitter")]
    pub jitter_pct: f64,
    #[serde(default)]
    pub guards: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_interval() -> f64 {
    60.0
}

fn default_timeout() -> f64 {
    5.0
}

fn default_threshold() -> u32 {
    3
}

fn default_jitter() -> f64 {
    0.1
}

fn default_enabled() -> bool {
    true
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            probe_type: "http".to_string(),
            target: String::new(),
            interval_secs: default_interval(),
            timeout_secs: default_timeout(),
            failure_threshold: default_threshold(),
            jitter_pct: default_jitter(),
            guards: Vec::new(),
            enabled: default_enabled(),
        }
    }
}

/// Health state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Unknown,
    Online,
    Offline,
}

/// Verdict of one probe attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SampleOutcome {
    Success { latency_ms: f64 },
    Failure { error: String },
    /// A guard denied the run; no success/failure verdict.
    Skipped,
}

/// Immutable record of one probe attempt. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub channel_id: String,
    pub time: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: SampleOutcome,
}

impl Sample {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, SampleOutcome::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, SampleOutcome::Failure { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, SampleOutcome::Skipped)
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            SampleOutcome::Failure { error } => Some(error),
            _ => None,
        }
    }
}

/// Per-channel execution state, owned by the channel runner.
#[derive(Debug, Clone)]
pub struct ChannelRuntime {
    pub state: ChannelState,
    pub consecutive_failures: u32,
    /// Set on the first failure of the current failure run, cleared on recovery.
    pub first_failure_time: Option<DateTime<Utc>>,
    pub last_sample: Option<Sample>,
    /// Consecutive backoff extensions applied while offline.
    pub backoff_step: u32,
    pub is_paused: bool,
    pub is_running: bool,
}

impl Default for ChannelRuntime {
    fn default() -> Self {
        Self {
            state: ChannelState::Unknown,
            consecutive_failures: 0,
            first_failure_time: None,
            last_sample: None,
            backoff_step: 0,
            is_paused: false,
            is_running: false,
        }
    }
}

/// Read-only view of a channel's runtime state for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelSnapshot {
    pub channel_id: String,
    pub state: ChannelState,
    pub consecutive_failures: u32,
    pub first_failure_time: Option<DateTime<Utc>>,
    pub last_sample: Option<Sample>,
    pub backoff_step: u32,
    pub is_paused: bool,
    pub is_running: bool,
}

impl ChannelSnapshot {
    pub fn from_runtime(channel_id: &str, rt: &ChannelRuntime) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            state: rt.state,
            consecutive_failures: rt.consecutive_failures,
            first_failure_time: rt.first_failure_time,
            last_sample: rt.last_sample.clone(),
            backoff_step: rt.backoff_step,
            is_paused: rt.is_paused,
            is_running: rt.is_running,
        }
    }
}

/// One confirmed incident for a channel.
///
/// `start_time` is when the failure threshold was crossed (kept as the legacy
/// duration base); `first_failure_time` is when the impact actually began.
/// `confirmed_at` equals `start_time` and is carried separately for clarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outage {
    #[serde(default)]
    pub id: i64,
    pub channel_id: String,
    pub reason: String,
    pub failure_count: u32,
    pub first_failure_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub confirmed_at: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub actual_duration_ms: Option<i64>,
}

impl Outage {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

/// Event published on the monitor bus. State-changes only: "still online"
/// and "still offline" runs produce no events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    StateChanged {
        channel_id: String,
        from: ChannelState,
        to: ChannelState,
        at: DateTime<Utc>,
    },
    OutageOpened {
        outage: Outage,
    },
    OutageClosed {
        outage: Outage,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_defaults() {
        let ch = Channel::default();
        assert_eq!(ch.interval_secs, 60.0);
        assert_eq!(ch.failure_threshold, 3);
        assert!(ch.enabled);
    }

    #[test]
    fn channel_deserializes_with_defaults() {
        let ch: Channel =
            serde_json::from_str(r#"{"id":"web","probe_type":"http","target":"example.com"}"#)
                .unwrap();
        assert_eq!(ch.id, "web");
        assert_eq!(ch.timeout_secs, 5.0);
        assert!(ch.guards.is_empty());
    }

    #[test]
    fn runtime_starts_unknown() {
        let rt = ChannelRuntime::default();
        assert_eq!(rt.state, ChannelState::Unknown);
        assert_eq!(rt.consecutive_failures, 0);
        assert!(rt.first_failure_time.is_none());
    }

    #[test]
    fn sample_outcome_accessors() {
        let ok = Sample {
            channel_id: "a".into(),
            time: Utc::now(),
            outcome: SampleOutcome::Success { latency_ms: 12.0 },
        };
        assert!(ok.is_success());
        assert!(ok.error().is_none());

        let bad = Sample {
            channel_id: "a".into(),
            time: Utc::now(),
            outcome: SampleOutcome::Failure {
                error: "connection refused".into(),
            },
        };
        assert!(bad.is_failure());
        assert_eq!(bad.error(), Some("connection refused"));
    }

    #[test]
    fn outage_open_until_end_time_set() {
        let now = Utc::now();
        let mut outage = Outage {
            id: 1,
            channel_id: "a".into(),
            reason: "timeout".into(),
            failure_count: 3,
            first_failure_time: now,
            start_time: now,
            confirmed_at: now,
            end_time: None,
            duration_ms: None,
            actual_duration_ms: None,
        };
        assert!(outage.is_open());
        outage.end_time = Some(now);
        assert!(!outage.is_open());
    }
}
