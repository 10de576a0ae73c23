//! Monitoring engine: wires the scheduler, channel runner, and outage
//! ledger together and exposes the host-facing control and snapshot API.

mod ledger;
mod runner;
mod scheduler;

pub use ledger::{LedgerError, OutageLedger};
pub use runner::ChannelRunner;
pub use scheduler::{AlwaysOwner, OwnerGate, Scheduler};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::bus::EventBus;
use crate::config::MonitorPolicy;
use crate::guard::GuardEvaluator;
use crate::model::{Channel, ChannelSnapshot, MonitorEvent, Outage};
use crate::probe::ProbeGateway;
use crate::storage::{Storage, StorageError};

/// The assembled monitoring engine.
pub struct Engine {
    runner: Arc<ChannelRunner>,
    scheduler: Scheduler,
    ledger: Arc<OutageLedger>,
    storage: Arc<dyn Storage>,
    bus: EventBus,
}

impl Engine {
    pub fn new(
        probes: Arc<dyn ProbeGateway>,
        guards: Arc<dyn GuardEvaluator>,
        storage: Arc<dyn Storage>,
        owner: Arc<dyn OwnerGate>,
        policy: MonitorPolicy,
    ) -> Self {
        let bus = EventBus::default();
        let ledger = Arc::new(OutageLedger::new(storage.clone()));
        let runner = Arc::new(ChannelRunner::new(
            probes,
            guards,
            storage.clone(),
            ledger.clone(),
            bus.clone(),
            policy,
        ));
        let scheduler = Scheduler::new(runner.clone(), owner, policy.backoff);

        Self {
            runner,
            scheduler,
            ledger,
            storage,
            bus,
        }
    }

    /// Resume any open outages from storage and schedule the channel set.
    pub async fn start(&self, channels: Vec<Channel>) {
        self.ledger.hydrate();
        self.scheduler.start(channels).await;
    }

    // --- Control surface ---

    pub async fn pause(&self, channel_id: &str) -> bool {
        self.scheduler.pause(channel_id).await
    }

    pub async fn resume(&self, channel_id: &str) -> bool {
        self.scheduler.resume(channel_id).await
    }

    pub async fn run_now(&self, channel_id: &str) -> bool {
        self.scheduler.run_now(channel_id).await
    }

    pub async fn stop_all(&self) {
        self.scheduler.stop_all().await;
    }

    pub async fn reload(&self, channels: Vec<Channel>) {
        self.scheduler.reload(channels).await;
    }

    // --- Read-only snapshots ---

    pub async fn channel_state(&self, channel_id: &str) -> Option<ChannelSnapshot> {
        self.runner.channel_state(channel_id).await
    }

    pub async fn snapshot(&self) -> Vec<ChannelSnapshot> {
        self.runner.snapshot().await
    }

    pub fn open_outage(&self, channel_id: &str) -> Option<Outage> {
        self.ledger.get_open(channel_id)
    }

    pub fn list_outages(
        &self,
        channel_id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Outage>, StorageError> {
        self.storage.list_outages(channel_id, since)
    }

    /// Subscribe to state-change and outage events (push, no polling).
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.bus.subscribe()
    }
}
