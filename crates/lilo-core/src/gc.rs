//! Room garbage collector.
//!
//! Empty rooms are reclaimed on the first sweep that sees them empty, with
//! no grace period. Rooms still in use get their operation log trimmed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::RoomRegistry;
use crate::types::RoomId;

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcReport {
    pub reclaimed: Vec<RoomId>,
    /// Log entries discarded across all rooms.
    pub trimmed: usize,
}

pub struct RoomCollector {
    registry: Arc<RoomRegistry>,
    interval: Duration,
    reclaimed_total: AtomicU64,
}

impl RoomCollector {
    pub fn new(registry: Arc<RoomRegistry>, interval: Duration) -> Self {
        Self {
            registry,
            interval,
            reclaimed_total: AtomicU64::new(0),
        }
    }

    /// Rooms reclaimed since start.
    pub fn reclaimed_total(&self) -> u64 {
        self.reclaimed_total.load(Ordering::Relaxed)
    }

    pub async fn sweep(&self) -> GcReport {
        let mut report = GcReport::default();
        for (room_id, handle) in self.registry.handles() {
            let mut room = handle.lock().await;
            if room.is_reclaimed() {
                continue;
            }
            if room.is_empty() {
                if self.registry.retire(&room_id, &handle, &mut room) {
                    info!(room_id = %room_id, "Reclaimed empty room");
                    report.reclaimed.push(room_id);
                }
                continue;
            }
            let trimmed = room.log_mut().trim();
            if trimmed > 0 {
                debug!(room_id = %room_id, trimmed, "Trimmed operation log");
                report.trimmed += trimmed;
            }
        }
        self.reclaimed_total
            .fetch_add(report.reclaimed.len() as u64, Ordering::Relaxed);
        report
    }

    /// Start the sweep loop. It stops when `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.interval, "Room collector started");
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let report = self.sweep().await;
                        debug!(
                            reclaimed = report.reclaimed.len(),
                            trimmed = report.trimmed,
                            rooms = self.registry.len(),
                            "Room sweep finished"
                        );
                    }
                }
            }
            info!("Room collector stopped");
        })
    }
}
