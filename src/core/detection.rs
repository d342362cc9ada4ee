//! Per-source flood detection.
//!
//! Once per tick the engine turns each source's attempt counter into a delta,
//! compares it against an absolute ceiling and an adaptive ceiling
//! (`mean + 2 * stddev` of that source's previous deltas), and moves the
//! source between the unblocked and blocked states. Unblocking requires
//! [`COOLDOWN_TICKS`] consecutive clear ticks.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Local};
use dashmap::DashMap;
use log::debug;
use serde::Serialize;

use crate::core::block_registry::BlockRegistry;
use crate::core::events::{emit, EventSink, FirewallEvent};
use crate::core::ledger::SourceLedger;
use crate::core::rolling_window::{RollingWindow, WindowStats};
use crate::core::{LimitSnapshot, Limits};

/// Consecutive clear ticks needed before a blocked source is released
pub const COOLDOWN_TICKS: u32 = 3;

/// Rolling windows keyed by source, shared read-only with observers
pub type WindowBook = Arc<DashMap<String, RollingWindow>>;

/// Detection state of a single source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Unblocked,
    /// Blocked, with the number of consecutive clear ticks seen so far
    Blocked { clear_streak: u32 },
}

/// Outcome of evaluating one tick for one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Block,
    Unblock,
    Stay(SourceState),
}

/// Decide the transition for one source given this tick's delta and the
/// statistics of its history strictly before this tick.
///
/// `adaptive` disables the `mean + 2 * stddev` trigger while the window is
/// still warming up; the hard ceiling always applies.
pub fn evaluate(
    state: SourceState,
    delta: u64,
    history: &WindowStats,
    limits: &LimitSnapshot,
    adaptive: bool,
) -> Transition {
    let rate = i64::try_from(delta).unwrap_or(i64::MAX);
    let upper = history.mean + 2.0 * history.stddev;
    let above_upper = adaptive && (delta as f64) > upper;

    match state {
        SourceState::Unblocked => {
            if rate >= limits.min_limit && (rate > limits.hard_limit || above_upper) {
                Transition::Block
            } else {
                Transition::Stay(state)
            }
        }
        SourceState::Blocked { clear_streak } => {
            let clear = rate <= limits.hard_limit && (delta as f64) <= upper;
            let clear_streak = if clear { clear_streak.saturating_add(1) } else { 0 };
            if clear_streak >= COOLDOWN_TICKS {
                Transition::Unblock
            } else {
                Transition::Stay(SourceState::Blocked { clear_streak })
            }
        }
    }
}

/// Traffic rate of a single source during one tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRate {
    pub source: String,
    pub rps: u64,
}

/// Summary of one detection tick
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub at: DateTime<Local>,
    /// Attempts observed across all sources since the previous tick
    pub inbound: u64,
    /// Requests served across all sources since the previous tick
    pub served: u64,
    pub top_source: Option<SourceRate>,
    pub blocked: Vec<String>,
    pub under_attack: bool,
    pub transitions: Vec<FirewallEvent>,
}

/// Tick-driven block/unblock state machine
pub struct DetectionEngine {
    ledger: Arc<SourceLedger>,
    registry: Arc<BlockRegistry>,
    limits: Arc<Limits>,
    sink: Arc<dyn EventSink>,
    windows: WindowBook,
    previous: HashMap<String, u64>,
    clear_streaks: HashMap<String, u32>,
    last_total_attempted: u64,
    last_total_served: u64,
    warmup_samples: usize,
    ticks: u64,
}

impl DetectionEngine {
    pub fn new(
        ledger: Arc<SourceLedger>,
        registry: Arc<BlockRegistry>,
        limits: Arc<Limits>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            ledger,
            registry,
            limits,
            sink,
            windows: Arc::new(DashMap::new()),
            previous: HashMap::new(),
            clear_streaks: HashMap::new(),
            last_total_attempted: 0,
            last_total_served: 0,
            warmup_samples: 0,
            ticks: 0,
        }
    }

    /// Only consider the adaptive ceiling once a source's window holds at
    /// least `samples` deltas. Zero keeps the empty-window ceiling of 0 active.
    pub fn with_warmup_samples(mut self, samples: usize) -> Self {
        self.warmup_samples = samples;
        self
    }

    /// Read handle on the per-source rolling windows
    pub fn windows(&self) -> WindowBook {
        self.windows.clone()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    fn state_of(&self, source: &str) -> SourceState {
        if self.registry.contains(source) {
            SourceState::Blocked {
                clear_streak: self.clear_streaks.get(source).copied().unwrap_or(0),
            }
        } else {
            SourceState::Unblocked
        }
    }

    /// Run one detection pass over every source observed so far
    pub fn tick(&mut self) -> TickReport {
        self.ticks += 1;
        let limits = self.limits.snapshot();
        let current = self.ledger.attempts_snapshot();
        let mut transitions = Vec::new();
        let mut top_source: Option<SourceRate> = None;

        for (source, &attempts) in &current {
            let delta = attempts.saturating_sub(self.previous.get(source).copied().unwrap_or(0));

            if delta > top_source.as_ref().map_or(0, |top| top.rps) {
                top_source = Some(SourceRate { source: source.clone(), rps: delta });
            }

            let window = self.windows.entry(source.clone()).or_default();
            let history = window.stats();
            let adaptive = history.samples >= self.warmup_samples;

            match evaluate(self.state_of(source), delta, &history, &limits, adaptive) {
                Transition::Block => {
                    self.registry.add(source);
                    self.clear_streaks.remove(source);
                    debug!(
                        "Blocking {} (delta={}, mean={:.2}, stddev={:.2}, hard_limit={})",
                        source, delta, history.mean, history.stddev, limits.hard_limit
                    );
                    transitions.push(FirewallEvent::Blocked { source: source.clone(), rps: delta });
                }
                Transition::Unblock => {
                    self.registry.remove(source);
                    self.clear_streaks.remove(source);
                    debug!("Unblocking {} after {} clear ticks", source, COOLDOWN_TICKS);
                    transitions.push(FirewallEvent::Unblocked { source: source.clone() });
                }
                Transition::Stay(SourceState::Blocked { clear_streak }) => {
                    self.clear_streaks.insert(source.clone(), clear_streak);
                }
                Transition::Stay(SourceState::Unblocked) => {}
            }

            window.record(delta as f64);
        }

        for event in &transitions {
            emit(self.sink.as_ref(), event);
        }
        self.previous = current;

        let total_attempted = self.ledger.total_attempted();
        let total_served = self.ledger.total_served();
        let inbound = total_attempted.saturating_sub(self.last_total_attempted);
        let served = total_served.saturating_sub(self.last_total_served);
        self.last_total_attempted = total_attempted;
        self.last_total_served = total_served;

        let mut blocked = self.registry.snapshot();
        blocked.sort();

        TickReport {
            tick: self.ticks,
            at: Local::now(),
            inbound,
            served,
            top_source,
            under_attack: !blocked.is_empty(),
            blocked,
            transitions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::{MockEventSink, RecentEvents};

    struct Harness {
        ledger: Arc<SourceLedger>,
        registry: Arc<BlockRegistry>,
        events: Arc<RecentEvents>,
        engine: DetectionEngine,
    }

    fn harness(hard_limit: i64, min_limit: i64) -> Harness {
        let ledger = Arc::new(SourceLedger::new());
        let registry = Arc::new(BlockRegistry::new());
        let events = Arc::new(RecentEvents::new(64));
        let engine = DetectionEngine::new(
            ledger.clone(),
            registry.clone(),
            Arc::new(Limits::new(hard_limit, min_limit)),
            events.clone(),
        );
        Harness { ledger, registry, events, engine }
    }

    fn attempts(ledger: &SourceLedger, source: &str, count: u64) {
        for _ in 0..count {
            ledger.record_attempt(source);
        }
    }

    fn stripped(lines: Vec<String>) -> Vec<String> {
        lines
            .into_iter()
            .map(|line| line.split_once("] ").map(|(_, msg)| msg.to_string()).unwrap_or(line))
            .collect()
    }

    #[test]
    fn test_burst_blocks_then_cools_down() {
        let mut h = harness(369, 1);

        attempts(&h.ledger, "X", 500);
        let report = h.engine.tick();
        assert!(h.registry.contains("X"));
        assert_eq!(report.top_source, Some(SourceRate { source: "X".into(), rps: 500 }));
        assert!(report.under_attack);

        for _ in 2..=3 {
            h.engine.tick();
            assert!(h.registry.contains("X"), "released before cooldown elapsed");
        }

        let report = h.engine.tick();
        assert!(!h.registry.contains("X"));
        assert_eq!(report.transitions, vec![FirewallEvent::Unblocked { source: "X".into() }]);
        assert_eq!(
            stripped(h.events.recent()),
            vec!["Blocked X (rps=500)".to_string(), "Unblocked X".to_string()]
        );
    }

    #[test]
    fn test_renewed_traffic_resets_cooldown() {
        let mut h = harness(369, 1);
        attempts(&h.ledger, "X", 500);
        h.engine.tick();

        h.engine.tick();
        h.engine.tick();
        // Still above the hard limit: streak goes back to zero
        attempts(&h.ledger, "X", 400);
        h.engine.tick();
        h.engine.tick();
        h.engine.tick();
        assert!(h.registry.contains("X"));
        h.engine.tick();
        assert!(!h.registry.contains("X"));
    }

    #[test]
    fn test_steady_traffic_never_blocked_after_warmup() {
        let mut h = harness(369, 1);
        h.engine = h.engine.with_warmup_samples(1);

        for _ in 0..70 {
            attempts(&h.ledger, "Y", 50);
            let report = h.engine.tick();
            assert!(report.transitions.is_empty());
            assert!(!h.registry.contains("Y"));
        }

        let windows = h.engine.windows();
        let stats = windows.get("Y").unwrap().stats();
        assert_eq!(stats.samples, 60);
        assert_eq!(stats.mean, 50.0);
        assert_eq!(stats.stddev, 0.0);
    }

    #[test]
    fn test_steady_traffic_with_empty_window_ceiling() {
        let mut h = harness(369, 1);

        let mut blocked_ticks = Vec::new();
        for tick in 1..=70 {
            attempts(&h.ledger, "Y", 50);
            h.engine.tick();
            if h.registry.contains("Y") {
                blocked_ticks.push(tick);
            }
        }
        // The first delta trivially exceeds the empty window's ceiling of 0;
        // after that the source is released and never blocked again.
        assert_eq!(blocked_ticks, vec![1, 2, 3]);
    }

    #[test]
    fn test_min_limit_shields_low_traffic() {
        let mut h = harness(369, 10);
        attempts(&h.ledger, "quiet", 5);
        h.engine.tick();
        assert!(!h.registry.contains("quiet"));

        attempts(&h.ledger, "quiet", 10);
        h.engine.tick();
        assert!(h.registry.contains("quiet"));
    }

    #[test]
    fn test_first_tick_delta_is_total_attempts() {
        let mut h = harness(100, 1);
        h.engine = h.engine.with_warmup_samples(60);
        attempts(&h.ledger, "late", 150);
        let report = h.engine.tick();
        assert_eq!(report.inbound, 150);
        assert!(h.registry.contains("late"));
    }

    #[test]
    fn test_report_totals_are_deltas() {
        let mut h = harness(369, 1);
        attempts(&h.ledger, "a", 3);
        h.ledger.record_served("a");
        let first = h.engine.tick();
        assert_eq!((first.inbound, first.served), (3, 1));

        let second = h.engine.tick();
        assert_eq!((second.inbound, second.served), (0, 0));
        assert_eq!(second.top_source, None);
        assert_eq!(second.tick, 2);
    }

    #[test]
    fn test_limits_take_effect_next_tick() {
        let ledger = Arc::new(SourceLedger::new());
        let registry = Arc::new(BlockRegistry::new());
        let limits = Arc::new(Limits::new(369, 1));
        let mut engine = DetectionEngine::new(
            ledger.clone(),
            registry.clone(),
            limits.clone(),
            Arc::new(RecentEvents::new(8)),
        )
        .with_warmup_samples(usize::MAX);

        attempts(&ledger, "Z", 200);
        engine.tick();
        assert!(!registry.contains("Z"));

        limits.set_hard_limit(100);
        attempts(&ledger, "Z", 200);
        engine.tick();
        assert!(registry.contains("Z"));
    }

    #[test]
    fn test_events_reach_sink() {
        let ledger = Arc::new(SourceLedger::new());
        let mut sink = MockEventSink::new();
        sink.expect_log_event()
            .withf(|line: &str| line.ends_with("] Blocked 203.0.113.7 (rps=1000)"))
            .times(1)
            .return_const(());
        let mut engine = DetectionEngine::new(
            ledger.clone(),
            Arc::new(BlockRegistry::new()),
            Arc::new(Limits::default()),
            Arc::new(sink),
        );
        attempts(&ledger, "203.0.113.7", 1000);
        engine.tick();
    }

    #[test]
    fn test_evaluate_hysteresis() {
        let limits = LimitSnapshot { hard_limit: 369, min_limit: 1 };
        let history = WindowStats { samples: 1, mean: 500.0, stddev: 0.0 };

        let mut state = SourceState::Blocked { clear_streak: 0 };
        for expected in 1..COOLDOWN_TICKS {
            match evaluate(state, 0, &history, &limits, true) {
                Transition::Stay(next) => {
                    assert_eq!(next, SourceState::Blocked { clear_streak: expected });
                    state = next;
                }
                other => panic!("unexpected transition {:?}", other),
            }
        }
        assert_eq!(evaluate(state, 0, &history, &limits, true), Transition::Unblock);
    }

    #[test]
    fn test_evaluate_below_both_ceilings_stays_unblocked() {
        let limits = LimitSnapshot { hard_limit: 369, min_limit: 1 };
        let history = WindowStats { samples: 10, mean: 80.0, stddev: 15.0 };
        for delta in [0, 1, 50, 110] {
            assert_eq!(
                evaluate(SourceState::Unblocked, delta, &history, &limits, true),
                Transition::Stay(SourceState::Unblocked)
            );
        }
        assert_eq!(
            evaluate(SourceState::Unblocked, 111, &history, &limits, true),
            Transition::Block
        );
    }

    #[test]
    fn test_evaluate_is_total_for_odd_limits() {
        let history = WindowStats { samples: 0, mean: 0.0, stddev: 0.0 };
        let negative = LimitSnapshot { hard_limit: -5, min_limit: -10 };
        assert_eq!(
            evaluate(SourceState::Unblocked, 0, &history, &negative, true),
            Transition::Block
        );

        let inverted = LimitSnapshot { hard_limit: 10, min_limit: 1000 };
        assert_eq!(
            evaluate(SourceState::Unblocked, 999, &history, &inverted, true),
            Transition::Stay(SourceState::Unblocked)
        );
        assert_eq!(
            evaluate(SourceState::Unblocked, u64::MAX, &history, &inverted, true),
            Transition::Block
        );
    }
}
