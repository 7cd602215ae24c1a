//! Presence monitor: evicts members that stopped signalling.
//!
//! A background tokio task wakes up every `sweep_interval` and removes any
//! member idle for longer than `timeout`, through the same path an explicit
//! leave takes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcaster::{Departure, remove_member};
use crate::registry::RoomRegistry;
use crate::types::{RoomId, UserId};

pub struct PresenceMonitor {
    registry: Arc<RoomRegistry>,
    sweep_interval: Duration,
    timeout: Duration,
    evicted_total: AtomicU64,
}

impl PresenceMonitor {
    pub fn new(registry: Arc<RoomRegistry>, sweep_interval: Duration, timeout: Duration) -> Self {
        Self {
            registry,
            sweep_interval,
            timeout,
            evicted_total: AtomicU64::new(0),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Members evicted since start.
    pub fn evicted_total(&self) -> u64 {
        self.evicted_total.load(Ordering::Relaxed)
    }

    /// Evict every member idle for longer than the timeout at `now`.
    pub async fn sweep(&self, now: Instant) -> Vec<(RoomId, UserId)> {
        let mut evicted = Vec::new();
        for (room_id, handle) in self.registry.handles() {
            let mut room = handle.lock().await;
            if room.is_reclaimed() {
                continue;
            }
            for user_id in room.idle_members(now, self.timeout) {
                warn!(room_id = %room_id, user_id = %user_id, timeout = ?self.timeout, "Evicting idle user");
                if remove_member(&mut room, &user_id, Departure::TimedOut) {
                    evicted.push((room_id.clone(), user_id));
                }
            }
        }
        self.evicted_total
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        evicted
    }

    /// Start the sweep loop. It stops when `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval = ?self.sweep_interval,
                timeout = ?self.timeout,
                "Presence monitor started"
            );
            let mut interval = tokio::time::interval(self.sweep_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let evicted = self.sweep(Instant::now()).await;
                        if !evicted.is_empty() {
                            debug!(count = evicted.len(), "Presence sweep evicted users");
                        }
                    }
                }
            }
            info!("Presence monitor stopped");
        })
    }
}
