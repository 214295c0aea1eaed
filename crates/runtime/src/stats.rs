//! Bounded sample windows and summary statistics.

use std::collections::VecDeque;

/// Fixed-capacity FIFO of recent samples. The oldest sample is evicted once
/// the window is full.
#[derive(Clone, Debug)]
pub struct RollingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Percentile in `[0, 100]`, linearly interpolated between closest ranks.
    pub fn percentile(&self, pct: f64) -> f64 {
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        percentile_sorted(&sorted, pct)
    }

    pub fn summary(&self) -> LatencySummary {
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        LatencySummary {
            avg_ms: self.mean(),
            p50_ms: percentile_sorted(&sorted, 50.0),
            p95_ms: percentile_sorted(&sorted, 95.0),
            p99_ms: percentile_sorted(&sorted, 99.0),
            min_ms: sorted.first().copied().unwrap_or(0.0),
            max_ms: sorted.last().copied().unwrap_or(0.0),
            count: sorted.len(),
        }
    }
}

/// Latency distribution over a window, in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize)]
pub struct LatencySummary {
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub count: usize,
}

fn percentile_sorted(sorted: &[f64], pct: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (pct.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let weight = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * weight
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_evicts_oldest() {
        let mut window = RollingWindow::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            window.push(v);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.mean(), 3.0);
    }

    #[test]
    fn percentile_interpolates() {
        let mut window = RollingWindow::new(10);
        for v in 1..=5 {
            window.push(v as f64);
        }
        assert_eq!(window.percentile(50.0), 3.0);
        assert_eq!(window.percentile(0.0), 1.0);
        assert_eq!(window.percentile(100.0), 5.0);
        assert!((window.percentile(95.0) - 4.8).abs() < 1e-9);
    }

    #[test]
    fn empty_window_summarizes_to_zero() {
        let summary = RollingWindow::new(4).summary();
        assert_eq!(summary.count, 0);
        assert_eq!(summary.p95_ms, 0.0);
    }
}
