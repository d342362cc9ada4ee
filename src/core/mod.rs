//! Core functionality for the flow shield.
//!
//! This module contains the detection pipeline: per-source counters, rolling
//! statistics, the block/unblock state machine, the blocked-source registry,
//! the observation capture pipeline and the periodic ticker driving it all.

pub mod admission;
pub mod block_registry;
pub mod capture;
pub mod detection;
pub mod events;
pub mod ledger;
pub mod monitoring;
pub mod rolling_window;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::DetectionConfig;

pub use admission::{Admission, AdmissionGate};
pub use block_registry::BlockRegistry;
pub use capture::{parse_source, CaptureError, CapturePipeline};
pub use detection::{evaluate, DetectionEngine, SourceState, TickReport, Transition, WindowBook};
pub use events::{ConsoleSink, EventSink, FanoutSink, FileSink, FirewallEvent, RecentEvents};
pub use ledger::{SourceCounters, SourceLedger};
pub use monitoring::TrafficMonitor;
pub use rolling_window::{RollingWindow, WindowStats};

/// Default absolute per-tick ceiling
pub const DEFAULT_HARD_LIMIT: i64 = 369;
/// Default floor below which no block decision is made
pub const DEFAULT_MIN_LIMIT: i64 = 1;

/// Values of both limits as read at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSnapshot {
    pub hard_limit: i64,
    pub min_limit: i64,
}

/// Detection limits that can be changed while the service runs.
///
/// Each field is individually atomic; there is no guarantee that a reader
/// sees both fields of a concurrent two-field update.
#[derive(Debug)]
pub struct Limits {
    hard_limit: AtomicI64,
    min_limit: AtomicI64,
}

impl Default for Limits {
    fn default() -> Self {
        Self::new(DEFAULT_HARD_LIMIT, DEFAULT_MIN_LIMIT)
    }
}

impl From<&DetectionConfig> for Limits {
    fn from(config: &DetectionConfig) -> Self {
        Self::new(config.hard_limit, config.min_limit)
    }
}

impl Limits {
    pub fn new(hard_limit: i64, min_limit: i64) -> Self {
        Self {
            hard_limit: AtomicI64::new(hard_limit),
            min_limit: AtomicI64::new(min_limit),
        }
    }

    pub fn hard_limit(&self) -> i64 {
        self.hard_limit.load(Ordering::Relaxed)
    }

    pub fn min_limit(&self) -> i64 {
        self.min_limit.load(Ordering::Relaxed)
    }

    pub fn set_hard_limit(&self, value: i64) {
        self.hard_limit.store(value, Ordering::Relaxed);
    }

    pub fn set_min_limit(&self, value: i64) {
        self.min_limit.store(value, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LimitSnapshot {
        LimitSnapshot {
            hard_limit: self.hard_limit(),
            min_limit: self.min_limit(),
        }
    }
}

/// Shared state of one protected service.
///
/// Both the admission path and the detection ticker are built from the same
/// `FlowGuard`, so they see the same counters, registry and limits.
pub struct FlowGuard {
    ledger: Arc<SourceLedger>,
    registry: Arc<BlockRegistry>,
    limits: Arc<Limits>,
    sink: Arc<dyn EventSink>,
}

impl FlowGuard {
    pub fn new(limits: Limits, sink: Arc<dyn EventSink>) -> Self {
        Self {
            ledger: Arc::new(SourceLedger::new()),
            registry: Arc::new(BlockRegistry::new()),
            limits: Arc::new(limits),
            sink,
        }
    }

    pub fn ledger(&self) -> &Arc<SourceLedger> {
        &self.ledger
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    pub fn limits(&self) -> &Arc<Limits> {
        &self.limits
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Build the detection engine driving this guard's registry
    pub fn detection_engine(&self) -> DetectionEngine {
        DetectionEngine::new(
            self.ledger.clone(),
            self.registry.clone(),
            self.limits.clone(),
            self.sink.clone(),
        )
    }

    /// Build the per-request admission gate reading this guard's registry
    pub fn admission_gate(&self) -> AdmissionGate {
        AdmissionGate::new(self.ledger.clone(), self.registry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_defaults_and_updates() {
        let limits = Limits::default();
        assert_eq!(limits.snapshot(), LimitSnapshot { hard_limit: 369, min_limit: 1 });

        limits.set_hard_limit(50);
        limits.set_min_limit(-3);
        assert_eq!(limits.snapshot(), LimitSnapshot { hard_limit: 50, min_limit: -3 });
    }

    #[test]
    fn test_guard_shares_state_between_gate_and_engine() {
        let guard = FlowGuard::new(Limits::new(10, 1), Arc::new(RecentEvents::new(4)));
        let gate = guard.admission_gate();
        let mut engine = guard.detection_engine();

        for _ in 0..20 {
            gate.admit("198.51.100.1");
        }
        engine.tick();
        assert!(guard.registry().contains("198.51.100.1"));
        assert!(!gate.admit("198.51.100.1").is_served());
    }
}
