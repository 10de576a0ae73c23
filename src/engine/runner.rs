//! Channel runner: interprets probe outcomes into state transitions and
//! outage lifecycle events. Never loops or polls itself; the scheduler
//! drives it one run at a time.
//!
//! All probe- and guard-layer errors are absorbed here. `run_once` always
//! completes without returning an error, so the scheduler can keep ticking
//! a channel no matter how a single run went.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock};

use crate::bus::EventBus;
use crate::config::MonitorPolicy;
use crate::guard::GuardEvaluator;
use crate::model::{
    Channel, ChannelRuntime, ChannelSnapshot, ChannelState, MonitorEvent, Sample, SampleOutcome,
};
use crate::probe::ProbeGateway;
use crate::storage::Storage;

use super::ledger::OutageLedger;

/// State transition produced by one probe outcome.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Transition {
    Recovered {
        from: ChannelState,
        at: DateTime<Utc>,
    },
    Confirmed {
        from: ChannelState,
        first_failure_time: DateTime<Utc>,
        confirmed_at: DateTime<Utc>,
        failure_count: u32,
        reason: String,
    },
}

/// Owns per-channel runtime state and the interpretation of probe results.
pub struct ChannelRunner {
    probes: Arc<dyn ProbeGateway>,
    guards: Arc<dyn GuardEvaluator>,
    storage: Arc<dyn Storage>,
    ledger: Arc<OutageLedger>,
    bus: EventBus,
    policy: MonitorPolicy,
    states: RwLock<HashMap<String, ChannelRuntime>>,
}

impl ChannelRunner {
    pub fn new(
        probes: Arc<dyn ProbeGateway>,
        guards: Arc<dyn GuardEvaluator>,
        storage: Arc<dyn Storage>,
        ledger: Arc<OutageLedger>,
        bus: EventBus,
        policy: MonitorPolicy,
    ) -> Self {
        Self {
            probes,
            guards,
            storage,
            ledger,
            bus,
            policy,
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Execute one probe run for the channel.
    ///
    /// `pause_rx` carries the channel's pause flag; flipping it to `true`
    /// cancels an in-flight probe so a stale result can never be applied
    /// after a resume.
    pub async fn run_once(&self, channel: &Channel, pause_rx: &mut watch::Receiver<bool>) {
        if *pause_rx.borrow() {
            return;
        }

        {
            let mut states = self.states.write().await;
            let rt = states.entry(channel.id.clone()).or_default();
            if rt.is_paused {
                return;
            }
            if rt.is_running {
                tracing::warn!(channel_id = %channel.id, "previous run still in flight, skipping");
                return;
            }
            rt.is_running = true;
        }

        self.execute(channel, pause_rx).await;

        let mut states = self.states.write().await;
        if let Some(rt) = states.get_mut(&channel.id) {
            rt.is_running = false;
        }
    }

    async fn execute(&self, channel: &Channel, pause_rx: &mut watch::Receiver<bool>) {
        match self.guards.is_eligible(channel) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(channel_id = %channel.id, "guard denied, skipping run");
                self.record_skipped(channel).await;
                return;
            }
            Err(e) => {
                tracing::warn!(channel_id = %channel.id, "guard evaluation failed, skipping run: {}", e);
                self.record_skipped(channel).await;
                return;
            }
        }

        let outcome = tokio::select! {
            outcome = self.probes.probe(channel) => outcome,
            _ = pause_signal(pause_rx) => {
                tracing::debug!(channel_id = %channel.id, "probe cancelled by pause");
                return;
            }
        };

        // A pause can still land between probe completion and here.
        if *pause_rx.borrow() {
            tracing::debug!(channel_id = %channel.id, "discarding probe result received while paused");
            return;
        }

        let sample = Sample {
            channel_id: channel.id.clone(),
            time: Utc::now(),
            outcome: if outcome.success {
                SampleOutcome::Success {
                    latency_ms: outcome.latency_ms,
                }
            } else {
                SampleOutcome::Failure {
                    error: outcome
                        .error
                        .unwrap_or_else(|| "probe failed".to_string()),
                }
            },
        };

        let transition = {
            let mut states = self.states.write().await;
            let rt = states.entry(channel.id.clone()).or_default();
            observe(rt, channel.failure_threshold, &sample)
        };

        self.apply_transition(channel, transition);

        if let Err(e) = self.storage.append_sample(&sample) {
            tracing::error!(channel_id = %channel.id, "failed to persist sample: {}", e);
        }
    }

    async fn record_skipped(&self, channel: &Channel) {
        let sample = Sample {
            channel_id: channel.id.clone(),
            time: Utc::now(),
            outcome: SampleOutcome::Skipped,
        };

        if self.policy.skipped_updates_recency {
            let mut states = self.states.write().await;
            let rt = states.entry(channel.id.clone()).or_default();
            rt.last_sample = Some(sample.clone());
        }

        if let Err(e) = self.storage.append_sample(&sample) {
            tracing::error!(channel_id = %channel.id, "failed to persist sample: {}", e);
        }
    }

    fn apply_transition(&self, channel: &Channel, transition: Option<Transition>) {
        match transition {
            Some(Transition::Recovered { from, at }) => {
                tracing::info!(channel_id = %channel.id, ?from, "channel recovered");
                if from == ChannelState::Offline {
                    match self.ledger.close(&channel.id, at) {
                        Ok(outage) => self.bus.publish(MonitorEvent::OutageClosed { outage }),
                        Err(e) => {
                            tracing::warn!(channel_id = %channel.id, "outage close dropped: {}", e)
                        }
                    }
                }
                self.bus.publish(MonitorEvent::StateChanged {
                    channel_id: channel.id.clone(),
                    from,
                    to: ChannelState::Online,
                    at,
                });
            }
            Some(Transition::Confirmed {
                from,
                first_failure_time,
                confirmed_at,
                failure_count,
                reason,
            }) => {
                tracing::warn!(
                    channel_id = %channel.id,
                    failures = failure_count,
                    %reason,
                    "outage confirmed"
                );
                match self.ledger.open(
                    &channel.id,
                    first_failure_time,
                    confirmed_at,
                    &reason,
                    failure_count,
                ) {
                    Ok(outage) => self.bus.publish(MonitorEvent::OutageOpened { outage }),
                    Err(e) => {
                        tracing::warn!(channel_id = %channel.id, "outage open dropped: {}", e)
                    }
                }
                self.bus.publish(MonitorEvent::StateChanged {
                    channel_id: channel.id.clone(),
                    from,
                    to: ChannelState::Offline,
                    at: confirmed_at,
                });
            }
            None => {}
        }
    }

    /// Mirror the pause flag into the runtime state for snapshots.
    pub async fn set_paused(&self, channel_id: &str, paused: bool) {
        let mut states = self.states.write().await;
        let rt = states.entry(channel_id.to_string()).or_default();
        rt.is_paused = paused;
    }

    /// Runtime state of one channel, if it has ever been scheduled.
    pub async fn runtime(&self, channel_id: &str) -> Option<ChannelRuntime> {
        self.states.read().await.get(channel_id).cloned()
    }

    /// Read-only snapshot of one channel.
    pub async fn channel_state(&self, channel_id: &str) -> Option<ChannelSnapshot> {
        self.states
            .read()
            .await
            .get(channel_id)
            .map(|rt| ChannelSnapshot::from_runtime(channel_id, rt))
    }

    /// Read-only snapshot of all channels, ordered by id.
    pub async fn snapshot(&self) -> Vec<ChannelSnapshot> {
        let states = self.states.read().await;
        let mut snapshots: Vec<ChannelSnapshot> = states
            .iter()
            .map(|(id, rt)| ChannelSnapshot::from_runtime(id, rt))
            .collect();
        snapshots.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        snapshots
    }

    /// Drop runtime state for channels removed by a config reload.
    pub async fn retain_channels(&self, keep: &HashSet<String>) {
        let mut states = self.states.write().await;
        states.retain(|id, _| keep.contains(id));
    }
}

/// Resolves when the pause flag flips to `true`; stays pending otherwise.
async fn pause_signal(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone; nothing can pause us anymore.
            std::future::pending::<()>().await;
        }
    }
}

/// Apply one sample to a channel's runtime state.
///
/// Pure state machine: `unknown → online` on first success, `unknown/online
/// → offline` when consecutive failures reach the threshold, `offline →
/// online` on the first success. Timestamps come from the sample so the
/// machine is fully deterministic under test.
pub(crate) fn observe(
    rt: &mut ChannelRuntime,
    threshold: u32,
    sample: &Sample,
) -> Option<Transition> {
    match &sample.outcome {
        SampleOutcome::Success { .. } => {
            rt.last_sample = Some(sample.clone());
            let from = rt.state;
            rt.consecutive_failures = 0;
            rt.first_failure_time = None;
            rt.backoff_step = 0;
            rt.state = ChannelState::Online;
            if from != ChannelState::Online {
                Some(Transition::Recovered {
                    from,
                    at: sample.time,
                })
            } else {
                None
            }
        }
        SampleOutcome::Failure { error } => {
            rt.last_sample = Some(sample.clone());
            rt.consecutive_failures += 1;
            if rt.consecutive_failures == 1 {
                rt.first_failure_time = Some(sample.time);
            }

            if rt.consecutive_failures >= threshold && rt.state != ChannelState::Offline {
                let from = rt.state;
                rt.state = ChannelState::Offline;
                Some(Transition::Confirmed {
                    from,
                    first_failure_time: rt.first_failure_time.unwrap_or(sample.time),
                    confirmed_at: sample.time,
                    failure_count: rt.consecutive_failures,
                    reason: error.clone(),
                })
            } else {
                if rt.state == ChannelState::Offline {
                    // Still offline: extend the backoff, no further events.
                    rt.backoff_step += 1;
                }
                None
            }
        }
        SampleOutcome::Skipped => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{AllowAll, StaticGuards};
    use crate::probe::{BoxFuture, ProbeOutcome};
    use crate::storage::MemoryStore;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn failure(secs: i64) -> Sample {
        Sample {
            channel_id: "web".into(),
            time: at(secs),
            outcome: SampleOutcome::Failure {
                error: "connection refused".into(),
            },
        }
    }

    fn success(secs: i64) -> Sample {
        Sample {
            channel_id: "web".into(),
            time: at(secs),
            outcome: SampleOutcome::Success { latency_ms: 10.0 },
        }
    }

    // --- Pure state machine ---

    #[test]
    fn failure_counter_and_first_failure_move_together() {
        let mut rt = ChannelRuntime::default();
        assert!(rt.first_failure_time.is_none());

        observe(&mut rt, 3, &failure(0));
        assert_eq!(rt.consecutive_failures, 1);
        assert_eq!(rt.first_failure_time, Some(at(0)));

        observe(&mut rt, 3, &failure(10));
        assert_eq!(rt.consecutive_failures, 2);
        // First-failure timestamp sticks to the start of the run.
        assert_eq!(rt.first_failure_time, Some(at(0)));

        observe(&mut rt, 3, &success(20));
        assert_eq!(rt.consecutive_failures, 0);
        assert!(rt.first_failure_time.is_none());
    }

    #[test]
    fn first_success_moves_unknown_to_online() {
        let mut rt = ChannelRuntime::default();
        let transition = observe(&mut rt, 3, &success(0));
        assert_eq!(rt.state, ChannelState::Online);
        assert_eq!(
            transition,
            Some(Transition::Recovered {
                from: ChannelState::Unknown,
                at: at(0),
            })
        );
    }

    #[test]
    fn repeated_success_emits_nothing() {
        let mut rt = ChannelRuntime::default();
        observe(&mut rt, 3, &success(0));
        assert!(observe(&mut rt, 3, &success(10)).is_none());
        assert!(observe(&mut rt, 3, &success(20)).is_none());
    }

    #[test]
    fn threshold_cross_confirms_exactly_once() {
        let mut rt = ChannelRuntime::default();
        assert!(observe(&mut rt, 3, &failure(0)).is_none());
        assert!(observe(&mut rt, 3, &failure(10)).is_none());

        let transition = observe(&mut rt, 3, &failure(20));
        match transition {
            Some(Transition::Confirmed {
                first_failure_time,
                confirmed_at,
                failure_count,
                ..
            }) => {
                assert_eq!(first_failure_time, at(0));
                assert_eq!(confirmed_at, at(20));
                assert_eq!(failure_count, 3);
            }
            other => panic!("expected confirmation, got {:?}", other),
        }
        assert_eq!(rt.state, ChannelState::Offline);

        // Further failures stay silent.
        assert!(observe(&mut rt, 3, &failure(30)).is_none());
        assert!(observe(&mut rt, 3, &failure(40)).is_none());
    }

    #[test]
    fn backoff_step_grows_only_while_offline() {
        let mut rt = ChannelRuntime::default();
        observe(&mut rt, 3, &failure(0));
        observe(&mut rt, 3, &failure(10));
        assert_eq!(rt.backoff_step, 0);

        observe(&mut rt, 3, &failure(20)); // confirmation
        assert_eq!(rt.backoff_step, 0);

        observe(&mut rt, 3, &failure(30));
        assert_eq!(rt.backoff_step, 1);
        observe(&mut rt, 3, &failure(40));
        assert_eq!(rt.backoff_step, 2);

        observe(&mut rt, 3, &success(50));
        assert_eq!(rt.backoff_step, 0);
    }

    #[test]
    fn threshold_one_confirms_on_first_failure() {
        let mut rt = ChannelRuntime::default();
        let transition = observe(&mut rt, 1, &failure(0));
        match transition {
            Some(Transition::Confirmed {
                first_failure_time,
                confirmed_at,
                ..
            }) => {
                assert_eq!(first_failure_time, confirmed_at);
            }
            other => panic!("expected confirmation, got {:?}", other),
        }
    }

    #[test]
    fn recovery_after_outage_reports_offline_origin() {
        let mut rt = ChannelRuntime::default();
        for i in 0..3 {
            observe(&mut rt, 3, &failure(i * 10));
        }
        assert_eq!(rt.state, ChannelState::Offline);

        let transition = observe(&mut rt, 3, &success(30));
        assert_eq!(
            transition,
            Some(Transition::Recovered {
                from: ChannelState::Offline,
                at: at(30),
            })
        );
        assert_eq!(rt.state, ChannelState::Online);
    }

    #[test]
    fn skipped_sample_changes_nothing() {
        let mut rt = ChannelRuntime::default();
        observe(&mut rt, 3, &failure(0));

        let skipped = Sample {
            channel_id: "web".into(),
            time: at(10),
            outcome: SampleOutcome::Skipped,
        };
        assert!(observe(&mut rt, 3, &skipped).is_none());
        assert_eq!(rt.consecutive_failures, 1);
        assert_eq!(rt.state, ChannelState::Unknown);
    }

    // --- run_once against fakes ---

    /// Gateway that replays a scripted sequence of outcomes.
    struct ScriptedGateway {
        outcomes: Mutex<VecDeque<ProbeOutcome>>,
    }

    impl ScriptedGateway {
        fn new(outcomes: Vec<ProbeOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
            }
        }
    }

    impl ProbeGateway for ScriptedGateway {
        fn probe<'a>(&'a self, _channel: &'a Channel) -> BoxFuture<'a, ProbeOutcome> {
            Box::pin(async move {
                self.outcomes
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| ProbeOutcome::failed("script exhausted"))
            })
        }
    }

    /// Gateway that takes a long time, for cancellation tests.
    struct SlowGateway;

    impl ProbeGateway for SlowGateway {
        fn probe<'a>(&'a self, _channel: &'a Channel) -> BoxFuture<'a, ProbeOutcome> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                ProbeOutcome::ok(1.0)
            })
        }
    }

    struct Harness {
        runner: Arc<ChannelRunner>,
        storage: Arc<MemoryStore>,
        ledger: Arc<OutageLedger>,
        bus: EventBus,
    }

    fn harness(probes: Arc<dyn ProbeGateway>, guards: Arc<dyn GuardEvaluator>) -> Harness {
        let storage = Arc::new(MemoryStore::new());
        let ledger = Arc::new(OutageLedger::new(storage.clone()));
        let bus = EventBus::new(64);
        let runner = Arc::new(ChannelRunner::new(
            probes,
            guards,
            storage.clone(),
            ledger.clone(),
            bus.clone(),
            MonitorPolicy::default(),
        ));
        Harness {
            runner,
            storage,
            ledger,
            bus,
        }
    }

    fn test_channel(threshold: u32) -> Channel {
        Channel {
            id: "web".into(),
            probe_type: "http".into(),
            target: "example.com".into(),
            failure_threshold: threshold,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn failure_run_opens_one_outage_and_success_closes_it() {
        let probes = Arc::new(ScriptedGateway::new(vec![
            ProbeOutcome::failed("refused"),
            ProbeOutcome::failed("refused"),
            ProbeOutcome::failed("refused"),
            ProbeOutcome::failed("refused"),
            ProbeOutcome::ok(8.0),
        ]));
        let h = harness(probes, Arc::new(AllowAll));
        let channel = test_channel(3);
        let (_pause_tx, mut pause_rx) = watch::channel(false);

        for _ in 0..4 {
            h.runner.run_once(&channel, &mut pause_rx).await;
        }
        assert!(h.ledger.get_open("web").is_some());
        let rt = h.runner.runtime("web").await.unwrap();
        assert_eq!(rt.state, ChannelState::Offline);
        assert_eq!(rt.consecutive_failures, 4);

        // Single success closes exactly one outage and resets the counter.
        h.runner.run_once(&channel, &mut pause_rx).await;
        assert!(h.ledger.get_open("web").is_none());

        let rt = h.runner.runtime("web").await.unwrap();
        assert_eq!(rt.state, ChannelState::Online);
        assert_eq!(rt.consecutive_failures, 0);
        assert!(rt.first_failure_time.is_none());
        assert_eq!(rt.backoff_step, 0);

        let outages = h.storage.list_outages(Some("web"), None).unwrap();
        assert_eq!(outages.len(), 1);
        assert!(!outages[0].is_open());
        assert!(outages[0].actual_duration_ms.unwrap() >= outages[0].duration_ms.unwrap());
    }

    #[tokio::test]
    async fn events_are_state_changes_only() {
        let probes = Arc::new(ScriptedGateway::new(vec![
            ProbeOutcome::ok(5.0),
            ProbeOutcome::ok(5.0),
            ProbeOutcome::failed("refused"),
            ProbeOutcome::failed("refused"),
            ProbeOutcome::failed("refused"),
        ]));
        let h = harness(probes, Arc::new(AllowAll));
        let channel = test_channel(2);
        let mut rx = h.bus.subscribe();
        let (_pause_tx, mut pause_rx) = watch::channel(false);

        for _ in 0..5 {
            h.runner.run_once(&channel, &mut pause_rx).await;
        }

        // unknown→online, then outage open + online→offline. The second
        // success and the third failure are silent.
        let mut state_changes = 0;
        let mut opened = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                MonitorEvent::StateChanged { .. } => state_changes += 1,
                MonitorEvent::OutageOpened { .. } => opened += 1,
                MonitorEvent::OutageClosed { .. } => panic!("no close expected"),
            }
        }
        assert_eq!(state_changes, 2);
        assert_eq!(opened, 1);
    }

    #[tokio::test]
    async fn guard_denial_records_skipped_sample_without_side_effects() {
        let probes = Arc::new(ScriptedGateway::new(vec![ProbeOutcome::failed("refused")]));
        let guards = Arc::new(StaticGuards::new());
        guards.set("vpn", false);

        let h = harness(probes, guards);
        let mut channel = test_channel(1);
        channel.guards = vec!["vpn".into()];
        let (_pause_tx, mut pause_rx) = watch::channel(false);

        h.runner.run_once(&channel, &mut pause_rx).await;

        let samples = h.storage.samples_for("web");
        assert_eq!(samples.len(), 1);
        assert!(samples[0].is_skipped());

        // No state movement, no outage, even at threshold 1.
        let rt = h.runner.runtime("web").await.unwrap();
        assert_eq!(rt.state, ChannelState::Unknown);
        assert_eq!(rt.consecutive_failures, 0);
        assert!(h.ledger.get_open("web").is_none());
    }

    #[tokio::test]
    async fn guard_error_counts_as_skip() {
        let probes = Arc::new(ScriptedGateway::new(vec![ProbeOutcome::ok(1.0)]));
        let guards = Arc::new(StaticGuards::new()); // "vpn" never registered
        let h = harness(probes, guards);
        let mut channel = test_channel(3);
        channel.guards = vec!["vpn".into()];
        let (_pause_tx, mut pause_rx) = watch::channel(false);

        h.runner.run_once(&channel, &mut pause_rx).await;

        let samples = h.storage.samples_for("web");
        assert_eq!(samples.len(), 1);
        assert!(samples[0].is_skipped());
    }

    #[tokio::test]
    async fn pause_cancels_in_flight_probe() {
        let h = harness(Arc::new(SlowGateway), Arc::new(AllowAll));
        let channel = test_channel(1);
        let (pause_tx, mut pause_rx) = watch::channel(false);

        let runner = h.runner.clone();
        let handle = tokio::spawn(async move {
            runner.run_once(&channel, &mut pause_rx).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        pause_tx.send(true).unwrap();

        // Cancelled run returns long before the 5s probe would finish.
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("run_once did not cancel on pause")
            .unwrap();

        // Nothing was recorded, nothing changed.
        assert_eq!(h.storage.sample_count(), 0);
        let rt = h.runner.runtime("web").await.unwrap();
        assert_eq!(rt.state, ChannelState::Unknown);
        assert!(!rt.is_running);
    }

    #[tokio::test]
    async fn paused_channel_does_not_probe() {
        let probes = Arc::new(ScriptedGateway::new(vec![ProbeOutcome::ok(1.0)]));
        let h = harness(probes, Arc::new(AllowAll));
        let channel = test_channel(1);
        let (_pause_tx, mut pause_rx) = watch::channel(true);

        h.runner.run_once(&channel, &mut pause_rx).await;
        assert_eq!(h.storage.sample_count(), 0);
        assert!(h.runner.runtime("web").await.is_none());
    }
}
