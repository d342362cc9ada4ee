//! Periodic detection ticker for the flow shield.
//!
//! This module drives the [`DetectionEngine`] at a fixed cadence, keeps the
//! latest tick report for observers and publishes traffic metrics.

use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::sync::{watch, RwLock};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::core::detection::{DetectionEngine, TickReport};
use crate::core::events::FirewallEvent;

/// Default interval between two detection ticks
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Holds the report of the most recent detection tick
#[derive(Clone, Default)]
pub struct TrafficMonitor {
    latest: Arc<RwLock<Option<TickReport>>>,
}

impl TrafficMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report of the most recent tick, if any tick has run yet
    pub async fn latest(&self) -> Option<TickReport> {
        self.latest.read().await.clone()
    }

    /// Tick `engine` every `period` until `shutdown` becomes `true`.
    ///
    /// A tick that has started always completes before the loop exits. The
    /// first tick happens one full period after start.
    pub async fn run(self, mut engine: DetectionEngine, period: Duration, mut shutdown: watch::Receiver<bool>) {
        info!("Starting detection ticker (interval {:?})", period);
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = engine.tick();
                    publish_metrics(&report, engine.windows().len());
                    *self.latest.write().await = Some(report);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Detection ticker stopped after {} ticks", engine.ticks());
    }
}

fn publish_metrics(report: &TickReport, tracked_sources: usize) {
    metrics::gauge!("flow_shield_inbound_rps", report.inbound as f64);
    metrics::gauge!("flow_shield_served_rps", report.served as f64);
    metrics::gauge!("flow_shield_blocked_sources", report.blocked.len() as f64);
    metrics::gauge!("flow_shield_tracked_sources", tracked_sources as f64);
    for event in &report.transitions {
        match event {
            FirewallEvent::Blocked { .. } => metrics::increment_counter!("flow_shield_blocks_total"),
            FirewallEvent::Unblocked { .. } => metrics::increment_counter!("flow_shield_unblocks_total"),
            FirewallEvent::CaptureFailure { .. } => {}
        }
    }
}
