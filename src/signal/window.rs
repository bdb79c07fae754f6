//! Time-bounded sliding window of timestamped samples.

use std::collections::VecDeque;

/// Insertion-ordered buffer bounded by a time horizon rather than a count.
/// Entries older than `horizon_ms` relative to the newest insert are purged
/// on every insert.
#[derive(Debug, Clone)]
pub struct SlidingWindow<T> {
    horizon_ms: u64,
    entries: VecDeque<(u64, T)>,
}

impl<T> SlidingWindow<T> {
    pub fn new(horizon_ms: u64) -> Self {
        Self { horizon_ms, entries: VecDeque::new() }
    }

    /// Append a value and purge everything outside the horizon
    pub fn push(&mut self, at_ms: u64, value: T) {
        self.entries.push_back((at_ms, value));
        self.prune(at_ms);
    }

    /// Drop entries older than `now_ms - horizon`
    pub fn prune(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.horizon_ms);
        while let Some((t, _)) = self.entries.front() {
            if *t < cutoff {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &(u64, T)> {
        self.entries.iter()
    }

    /// Entries strictly after `after_ms` and no later than `until_ms`
    pub fn between(&self, after_ms: u64, until_ms: u64) -> impl Iterator<Item = &(u64, T)> {
        self.entries.iter().filter(move |(t, _)| *t > after_ms && *t <= until_ms)
    }
}

impl SlidingWindow<f64> {
    pub fn mean(&self) -> Option<f64> {
        mean(self.entries.iter().map(|(_, v)| *v))
    }

    /// Median, robust to single spikes
    pub fn median(&self) -> Option<f64> {
        median(self.entries.iter().map(|(_, v)| *v))
    }

    pub fn max(&self) -> Option<f64> {
        self.entries.iter().map(|(_, v)| *v).fold(None, |acc, v| match acc {
            Some(m) if m >= v => Some(m),
            _ => Some(v),
        })
    }
}

pub fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

pub fn median(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sorted: Vec<f64> = values.collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prunes_by_time_not_count() {
        let mut w = SlidingWindow::new(400);
        for t in (0..=1000).step_by(100) {
            w.push(t, t as f64);
        }
        // 600..=1000 survive
        assert_eq!(w.len(), 5);
        assert_eq!(w.iter().next().map(|(t, _)| *t), Some(600));
    }

    #[test]
    fn test_median_ignores_single_spike() {
        let mut w = SlidingWindow::new(2000);
        for (i, v) in [0.1, 0.2, 9.0, 0.15, 0.1].iter().enumerate() {
            w.push(i as u64 * 10, *v);
        }
        assert!((w.median().unwrap() - 0.15).abs() < 1e-9);
        assert_eq!(w.max(), Some(9.0));
        assert!(w.mean().unwrap() > 1.0);
    }

    #[test]
    fn test_empty_window_stats() {
        let w: SlidingWindow<f64> = SlidingWindow::new(100);
        assert!(w.is_empty());
        assert_eq!(w.mean(), None);
        assert_eq!(w.median(), None);
        assert_eq!(w.max(), None);
    }

    #[test]
    fn test_between_excludes_lower_bound() {
        let mut w = SlidingWindow::new(5000);
        w.push(100, 1.0);
        w.push(200, 2.0);
        w.push(300, 3.0);
        let picked: Vec<f64> = w.between(100, 300).map(|(_, v)| *v).collect();
        assert_eq!(picked, vec![2.0, 3.0]);
    }

    #[test]
    fn test_even_median() {
        assert_eq!(median([4.0, 1.0, 3.0, 2.0].into_iter()), Some(2.5));
    }
}
