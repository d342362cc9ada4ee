//! Per-source attempt and served counters.
//!
//! Counters only ever grow and entries are never removed for the lifetime of
//! the process, so memory grows with the number of distinct sources seen.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Default)]
struct CounterState {
    attempts: AtomicU64,
    served: AtomicU64,
}

/// Counter values for a single source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceCounters {
    pub attempts: u64,
    pub served: u64,
}

/// Concurrent counters keyed by source identity
#[derive(Debug, Default)]
pub struct SourceLedger {
    sources: DashMap<String, CounterState>,
    total_attempted: AtomicU64,
    total_served: AtomicU64,
}

impl SourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self, id: &str, field: impl Fn(&CounterState) -> &AtomicU64) {
        // Fast path avoids allocating the key for sources already known.
        if let Some(state) = self.sources.get(id) {
            field(state.value()).fetch_add(1, Ordering::Relaxed);
            return;
        }
        let state = self.sources.entry(id.to_owned()).or_default();
        field(state.value()).fetch_add(1, Ordering::Relaxed);
    }

    /// Count a connection attempt from `id`
    pub fn record_attempt(&self, id: &str) {
        self.bump(id, |s| &s.attempts);
        self.total_attempted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a request from `id` that was actually served
    pub fn record_served(&self, id: &str) {
        self.bump(id, |s| &s.served);
        self.total_served.fetch_add(1, Ordering::Relaxed);
    }

    /// Attempts per source. Each value is individually consistent; the map as
    /// a whole is not an atomic cut across sources.
    pub fn attempts_snapshot(&self) -> HashMap<String, u64> {
        self.sources
            .iter()
            .map(|entry| (entry.key().clone(), entry.attempts.load(Ordering::Relaxed)))
            .collect()
    }

    pub fn counters(&self, id: &str) -> Option<SourceCounters> {
        self.sources.get(id).map(|state| SourceCounters {
            attempts: state.attempts.load(Ordering::Relaxed),
            served: state.served.load(Ordering::Relaxed),
        })
    }

    pub fn total_attempted(&self) -> u64 {
        self.total_attempted.load(Ordering::Relaxed)
    }

    pub fn total_served(&self) -> u64 {
        self.total_served.load(Ordering::Relaxed)
    }

    /// Number of distinct sources ever observed
    pub fn tracked_sources(&self) -> usize {
        self.sources.len()
    }
}
