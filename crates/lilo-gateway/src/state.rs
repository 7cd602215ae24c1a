//! Gateway shared state.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use lilo_core::broadcaster::Broadcaster;
use lilo_core::config::Config;
use lilo_core::gc::RoomCollector;
use lilo_core::presence::PresenceMonitor;
use lilo_core::registry::RoomRegistry;

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub registry: Arc<RoomRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub presence: Arc<PresenceMonitor>,
    pub collector: Arc<RoomCollector>,
    connections: AtomicUsize,
    #[cfg(feature = "metrics")]
    pub metrics_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl GatewayState {
    /// Build the room engine described by `config`.
    pub fn new(config: Arc<Config>) -> Self {
        let registry = Arc::new(RoomRegistry::new(config.log_limits()));
        let broadcaster = Arc::new(
            Broadcaster::new(registry.clone()).with_max_room_id_len(config.max_room_id_len()),
        );
        let presence = Arc::new(PresenceMonitor::new(
            registry.clone(),
            config.presence_sweep_interval(),
            config.presence_timeout(),
        ));
        let collector = Arc::new(RoomCollector::new(registry.clone(), config.gc_interval()));

        Self {
            config,
            registry,
            broadcaster,
            presence,
            collector,
            connections: AtomicUsize::new(0),
            #[cfg(feature = "metrics")]
            metrics_handle: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Count a new socket; returns the number now open.
    pub fn connection_opened(&self) -> usize {
        self.connections.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn connection_closed(&self) -> usize {
        self.connections.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}
