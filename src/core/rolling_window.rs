//! Fixed-capacity sliding window of per-tick samples.
//!
//! Running sum and sum of squares are maintained on every insert and
//! eviction so that mean and standard deviation are O(1).

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

/// Number of samples a window retains (one per tick, so one minute of history).
pub const WINDOW_CAPACITY: usize = 60;

/// Point-in-time statistics of a window, read under a single lock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowStats {
    /// Number of samples currently held
    pub samples: usize,
    /// Mean of the held samples, 0 when empty
    pub mean: f64,
    /// Population standard deviation of the held samples, 0 when empty
    pub stddev: f64,
}

#[derive(Debug)]
struct WindowInner {
    samples: VecDeque<f64>,
    sum: f64,
    sum_sq: f64,
    capacity: usize,
}

impl WindowInner {
    fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.sum / self.samples.len() as f64
        }
    }

    fn stddev(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        // Rounding in the running sums can push the variance slightly below zero.
        let variance = self.sum_sq / self.samples.len() as f64 - mean * mean;
        variance.max(0.0).sqrt()
    }
}

/// Rolling window with internally serialized access.
#[derive(Debug)]
pub struct RollingWindow {
    inner: Mutex<WindowInner>,
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::with_capacity(WINDOW_CAPACITY)
    }
}

impl RollingWindow {
    /// Create a window holding [`WINDOW_CAPACITY`] samples
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a window holding at most `capacity` samples (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(WindowInner {
                samples: VecDeque::with_capacity(capacity + 1),
                sum: 0.0,
                sum_sq: 0.0,
                capacity,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindowInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a sample, evicting the oldest one once capacity is exceeded
    pub fn record(&self, value: f64) {
        let mut inner = self.lock();
        inner.samples.push_back(value);
        inner.sum += value;
        inner.sum_sq += value * value;
        if inner.samples.len() > inner.capacity {
            if let Some(old) = inner.samples.pop_front() {
                inner.sum -= old;
                inner.sum_sq -= old * old;
            }
        }
    }

    pub fn mean(&self) -> f64 {
        self.lock().mean()
    }

    pub fn stddev(&self) -> f64 {
        self.lock().stddev()
    }

    pub fn len(&self) -> usize {
        self.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().samples.is_empty()
    }

    /// Mean and standard deviation taken together, consistent with each other
    pub fn stats(&self) -> WindowStats {
        let inner = self.lock();
        WindowStats {
            samples: inner.samples.len(),
            mean: inner.mean(),
            stddev: inner.stddev(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_stats(values: &[f64]) -> (f64, f64) {
        if values.is_empty() {
            return (0.0, 0.0);
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        (mean, variance.sqrt())
    }

    #[test]
    fn test_empty_window_is_zero() {
        let window = RollingWindow::new();
        assert_eq!(window.mean(), 0.0);
        assert_eq!(window.stddev(), 0.0);
        assert!(window.is_empty());
    }

    #[test]
    fn test_matches_direct_recomputation() {
        let window = RollingWindow::new();
        let mut history = Vec::new();
        for i in 0..150u64 {
            // Irregular but deterministic traffic shape
            let value = ((i * 37) % 101) as f64 + if i % 13 == 0 { 400.0 } else { 0.0 };
            window.record(value);
            history.push(value);

            let start = history.len().saturating_sub(WINDOW_CAPACITY);
            let (mean, stddev) = direct_stats(&history[start..]);
            assert_eq!(window.len(), history.len().min(WINDOW_CAPACITY));
            assert!((window.mean() - mean).abs() < 1e-6, "mean drifted at sample {}", i);
            assert!((window.stddev() - stddev).abs() < 1e-4, "stddev drifted at sample {}", i);
        }
    }

    #[test]
    fn test_eviction_keeps_latest_samples() {
        let window = RollingWindow::with_capacity(3);
        for value in [10.0, 20.0, 30.0, 40.0] {
            window.record(value);
        }
        let stats = window.stats();
        assert_eq!(stats.samples, 3);
        assert_eq!(stats.mean, 30.0);
    }

    #[test]
    fn test_constant_samples_have_zero_stddev() {
        let window = RollingWindow::new();
        for _ in 0..70 {
            window.record(50.0);
        }
        let stats = window.stats();
        assert_eq!(stats.samples, WINDOW_CAPACITY);
        assert_eq!(stats.mean, 50.0);
        assert_eq!(stats.stddev, 0.0);
    }

    #[test]
    fn test_population_variance() {
        let window = RollingWindow::new();
        window.record(0.0);
        window.record(500.0);
        assert_eq!(window.mean(), 250.0);
        assert_eq!(window.stddev(), 250.0);
    }
}
