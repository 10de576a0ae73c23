//! Scheduler: one logical timer per enabled channel.
//!
//! Each channel gets its own task that sleeps, fires the runner, and
//! computes the next delay: a jittered interval while the channel is
//! online or unknown, a capped backoff multiple of the interval while it
//! is offline. Pause stops the timer and cancels any in-flight probe via
//! the pause watch; resume restarts the timer from a fresh jittered delay.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;

use crate::config::BackoffPolicy;
use crate::model::{Channel, ChannelState};

use super::runner::ChannelRunner;

/// Multi-process coordination boundary: only the elected owner's scheduler
/// fires timers. The election mechanism lives outside this crate.
pub trait OwnerGate: Send + Sync {
    fn is_owner(&self) -> bool;
}

/// Gate for single-process deployments: always the owner.
pub struct AlwaysOwner;

impl OwnerGate for AlwaysOwner {
    fn is_owner(&self) -> bool {
        true
    }
}

#[derive(Debug)]
enum Command {
    RunNow,
    Stop,
}

struct Slot {
    cmd_tx: mpsc::Sender<Command>,
    pause_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns the per-channel timer tasks.
pub struct Scheduler {
    runner: Arc<ChannelRunner>,
    owner: Arc<dyn OwnerGate>,
    backoff: BackoffPolicy,
    slots: RwLock<HashMap<String, Slot>>,
}

impl Scheduler {
    pub fn new(runner: Arc<ChannelRunner>, owner: Arc<dyn OwnerGate>, backoff: BackoffPolicy) -> Self {
        Self {
            runner,
            owner,
            backoff,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Schedule every enabled channel. First runs are jittered so channels
    /// configured with the same interval don't probe in lockstep.
    pub async fn start(&self, channels: Vec<Channel>) {
        tracing::info!("starting scheduler with {} channels", channels.len());
        for channel in channels {
            if channel.enabled {
                self.spawn_channel(channel).await;
            } else {
                tracing::debug!(channel_id = %channel.id, "channel disabled, not scheduled");
            }
        }
    }

    async fn spawn_channel(&self, channel: Channel) {
        let mut slots = self.slots.write().await;
        if slots.contains_key(&channel.id) {
            return; // Already running
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (pause_tx, pause_rx) = watch::channel(false);

        tracing::info!(channel_id = %channel.id, interval_secs = channel.interval_secs, "scheduling channel");

        let runner = self.runner.clone();
        let owner = self.owner.clone();
        let backoff = self.backoff;
        let id = channel.id.clone();

        let handle = tokio::spawn(async move {
            run_channel_loop(channel, runner, owner, backoff, cmd_rx, pause_rx).await;
        });

        slots.insert(
            id,
            Slot {
                cmd_tx,
                pause_tx,
                handle,
            },
        );
    }

    /// Pause a channel: stop its timer and abort any in-flight probe.
    /// Runtime state is preserved. Returns false for unknown channels.
    pub async fn pause(&self, channel_id: &str) -> bool {
        let slots = self.slots.read().await;
        match slots.get(channel_id) {
            Some(slot) => {
                let _ = slot.pause_tx.send(true);
                self.runner.set_paused(channel_id, true).await;
                tracing::info!(%channel_id, "channel paused");
                true
            }
            None => false,
        }
    }

    /// Resume a paused channel; its timer restarts from a fresh jittered
    /// delay. Returns false for unknown channels.
    pub async fn resume(&self, channel_id: &str) -> bool {
        let slots = self.slots.read().await;
        match slots.get(channel_id) {
            Some(slot) => {
                let _ = slot.pause_tx.send(false);
                self.runner.set_paused(channel_id, false).await;
                tracing::info!(%channel_id, "channel resumed");
                true
            }
            None => false,
        }
    }

    /// Trigger an out-of-band run. The regular timer is reset relative to
    /// this run so the channel isn't probed twice in a short window.
    pub async fn run_now(&self, channel_id: &str) -> bool {
        let slots = self.slots.read().await;
        match slots.get(channel_id) {
            Some(slot) => slot.cmd_tx.send(Command::RunNow).await.is_ok(),
            None => false,
        }
    }

    /// Cancel every timer. In-flight probes finish but nothing reschedules.
    pub async fn stop_all(&self) {
        let drained: Vec<(String, Slot)> = self.slots.write().await.drain().collect();
        for (id, slot) in drained {
            stop_slot(slot).await;
            tracing::debug!(channel_id = %id, "timer cancelled");
        }
        tracing::info!("all channel timers stopped");
    }

    /// Atomically swap the channel set. Channels absent from the new set
    /// stop (in-flight runs finish); present ones restart under the new
    /// config, keeping their runtime state.
    pub async fn reload(&self, channels: Vec<Channel>) {
        let keep: HashSet<String> = channels
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.id.clone())
            .collect();

        let drained: Vec<(String, Slot)> = self.slots.write().await.drain().collect();
        for (id, slot) in drained {
            if !keep.contains(&id) {
                tracing::info!(channel_id = %id, "channel removed by reload");
            }
            stop_slot(slot).await;
        }

        self.runner.retain_channels(&keep).await;

        for channel in channels {
            if channel.enabled {
                self.spawn_channel(channel).await;
            }
        }
        tracing::info!("configuration reloaded");
    }

    /// Channel ids with live timers.
    pub async fn scheduled_channels(&self) -> Vec<String> {
        self.slots.read().await.keys().cloned().collect()
    }
}

/// Stop one channel task and wait for its in-flight run to finish.
async fn stop_slot(slot: Slot) {
    // Closing the command channel ends the loop at its next await point.
    let _ = slot.cmd_tx.try_send(Command::Stop);
    drop(slot.cmd_tx);
    drop(slot.pause_tx);
    if slot.handle.await.is_err() {
        tracing::warn!("channel timer task panicked during shutdown");
    }
}

/// Timer loop for a single channel.
async fn run_channel_loop(
    channel: Channel,
    runner: Arc<ChannelRunner>,
    owner: Arc<dyn OwnerGate>,
    backoff: BackoffPolicy,
    mut cmd_rx: mpsc::Receiver<Command>,
    mut pause_rx: watch::Receiver<bool>,
) {
    let mut delay = jittered(channel.interval_secs, channel.jitter_pct);

    loop {
        if *pause_rx.borrow_and_update() {
            // Paused: no timer runs until resumed or stopped.
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    None | Some(Command::Stop) => break,
                    Some(Command::RunNow) => {} // ignored while paused
                },
                changed = pause_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if !*pause_rx.borrow() {
                        delay = jittered(channel.interval_secs, channel.jitter_pct);
                    }
                }
            }
            continue;
        }

        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                None | Some(Command::Stop) => break,
                Some(Command::RunNow) => {
                    fire(&channel, &runner, &owner, &mut pause_rx).await;
                    delay = next_delay(&channel, &runner, &backoff).await;
                }
            },
            changed = pause_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                // Loop around; the paused branch takes over.
            }
            _ = tokio::time::sleep(delay) => {
                fire(&channel, &runner, &owner, &mut pause_rx).await;
                delay = next_delay(&channel, &runner, &backoff).await;
            }
        }
    }

    tracing::debug!(channel_id = %channel.id, "channel timer loop exited");
}

async fn fire(
    channel: &Channel,
    runner: &ChannelRunner,
    owner: &Arc<dyn OwnerGate>,
    pause_rx: &mut watch::Receiver<bool>,
) {
    if !owner.is_owner() {
        tracing::debug!(channel_id = %channel.id, "not the scheduler owner, skipping fire");
        return;
    }
    runner.run_once(channel, pause_rx).await;
}

/// Delay until the channel's next run.
async fn next_delay(channel: &Channel, runner: &ChannelRunner, backoff: &BackoffPolicy) -> Duration {
    let interval = channel.interval_secs.max(0.001);
    match runner.runtime(&channel.id).await {
        Some(rt) if rt.state == ChannelState::Offline => {
            // No jitter while backing off, so delays grow monotonically.
            Duration::from_secs_f64(interval * backoff.multiplier(rt.backoff_step))
        }
        _ => jittered(interval, channel.jitter_pct),
    }
}

/// Interval with a uniform offset in ±jitter, e.g. 60s ±10%.
fn jittered(interval_secs: f64, jitter_pct: f64) -> Duration {
    let base = interval_secs.max(0.001);
    if jitter_pct <= 0.0 {
        return Duration::from_secs_f64(base);
    }
    let offset: f64 = rand::thread_rng().gen_range(-jitter_pct..=jitter_pct);
    Duration::from_secs_f64(base * (1.0 + offset))
}
