//! Tap-sequence gesture detection.
//!
//! A tap is a short, mostly vertical jolt of moderate strength while the
//! device is not rotating. Five accepted taps inside a rolling three-second
//! window complete the gesture.

use std::collections::VecDeque;
use tracing::{debug, info};

use crate::signal::window::SlidingWindow;
use crate::signal::ConditionedSample;

/// Tap recognition parameters
#[derive(Debug, Clone)]
pub struct TapConfig {
    /// Minimum linear magnitude of a tap candidate
    pub min_magnitude: f64,
    /// Maximum linear magnitude of a tap candidate
    pub max_magnitude: f64,
    /// Required |z| / magnitude ratio
    pub min_z_dominance: f64,
    /// Relaxed ratio when the device lies flat
    pub min_z_dominance_flat: f64,
    /// |gravity z| above which the device counts as lying flat
    pub flat_gravity_z: f64,
    /// Median rotation above which a candidate is vetoed
    pub max_rotation: f64,
    /// Horizon of the rotation window
    pub rotation_window_ms: u64,
    /// Debounce between accepted taps
    pub min_gap_ms: u64,
    /// Horizon of the accepted-tap list
    pub window_ms: u64,
    /// Taps needed to complete the gesture
    pub required_taps: usize,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            min_magnitude: 3.5,
            max_magnitude: 12.0,
            min_z_dominance: 0.60,
            min_z_dominance_flat: 0.50,
            flat_gravity_z: 8.0,
            max_rotation: 0.8,
            rotation_window_ms: 400,
            min_gap_ms: 150,
            window_ms: 3000,
            required_taps: 5,
        }
    }
}

const EPSILON: f64 = 1e-6;

/// Why a candidate was not counted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapRejection {
    OutOfRange,
    NotVertical,
    Rotating,
    Debounced,
}

/// Result of an accepted tap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapOutcome {
    /// UI feedback only, carries no dispatch obligation
    Progress { count: usize },
    /// The tap that completed the gesture; still counts as progress
    GestureComplete { count: usize },
}

pub struct TapDetector {
    config: TapConfig,
    rotation: SlidingWindow<f64>,
    taps: VecDeque<u64>,
    last_tap_ms: Option<u64>,
}

impl TapDetector {
    pub fn new(config: TapConfig) -> Self {
        let rotation = SlidingWindow::new(config.rotation_window_ms);
        Self {
            config,
            rotation,
            taps: VecDeque::new(),
            last_tap_ms: None,
        }
    }

    /// Feed a rotation magnitude from the gyroscope stream
    pub fn observe_rotation(&mut self, magnitude: f64, now_ms: u64) {
        self.rotation.push(now_ms, magnitude);
    }

    /// Feed a conditioned accelerometer sample
    pub fn observe(&mut self, sample: &ConditionedSample, now_ms: u64) -> Option<TapOutcome> {
        if let Err(reason) = self.check_candidate(sample, now_ms) {
            if reason != TapRejection::OutOfRange {
                debug!("Tap candidate rejected: {:?} (|a|={:.2})", reason, sample.magnitude);
            }
            return None;
        }

        self.taps.push_back(now_ms);
        self.last_tap_ms = Some(now_ms);
        let cutoff = now_ms.saturating_sub(self.config.window_ms);
        while matches!(self.taps.front(), Some(t) if *t < cutoff) {
            self.taps.pop_front();
        }

        let count = self.taps.len();
        if count >= self.config.required_taps {
            info!("👆 Tap gesture complete ({} taps)", count);
            self.clear();
            return Some(TapOutcome::GestureComplete { count });
        }

        debug!("👆 Tap {}/{}", count, self.config.required_taps);
        Some(TapOutcome::Progress { count })
    }

    fn check_candidate(&mut self, sample: &ConditionedSample, now_ms: u64) -> Result<(), TapRejection> {
        let c = &self.config;
        let magnitude = sample.magnitude;
        if magnitude < c.min_magnitude || magnitude > c.max_magnitude {
            return Err(TapRejection::OutOfRange);
        }

        let z_dominance = sample.signed_z().abs() / (magnitude + EPSILON);
        let lying_flat = sample.gravity.z.abs() > c.flat_gravity_z;
        let required = if lying_flat { c.min_z_dominance_flat } else { c.min_z_dominance };
        if z_dominance < required {
            return Err(TapRejection::NotVertical);
        }

        self.rotation.prune(now_ms);
        if let Some(median) = self.rotation.median() {
            if median > self.config.max_rotation {
                return Err(TapRejection::Rotating);
            }
        }

        if let Some(last) = self.last_tap_ms {
            if now_ms.saturating_sub(last) < self.config.min_gap_ms {
                return Err(TapRejection::Debounced);
            }
        }

        Ok(())
    }

    /// Number of taps currently counted towards the gesture
    pub fn tap_count(&self) -> usize {
        self.taps.len()
    }

    pub fn last_tap_ms(&self) -> Option<u64> {
        self.last_tap_ms
    }

    pub fn clear(&mut self) {
        self.taps.clear();
        self.last_tap_ms = None;
    }

    /// Drop all state including rotation history
    pub fn reset(&mut self) {
        self.clear();
        self.rotation.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vec3;

    fn vertical(magnitude: f64) -> ConditionedSample {
        ConditionedSample {
            linear: Vec3::new(0.0, 0.0, magnitude),
            magnitude,
            gravity: Vec3::new(0.0, 3.0, 9.3),
        }
    }

    #[test]
    fn test_five_taps_complete_gesture() {
        let mut d = TapDetector::new(TapConfig::default());
        for (i, t) in [0u64, 200, 400, 600].iter().enumerate() {
            assert_eq!(d.observe(&vertical(6.0), *t), Some(TapOutcome::Progress { count: i + 1 }));
        }
        assert_eq!(d.observe(&vertical(6.0), 800), Some(TapOutcome::GestureComplete { count: 5 }));
        assert_eq!(d.tap_count(), 0);
        assert_eq!(d.last_tap_ms(), None);
    }

    #[test]
    fn test_every_accepted_tap_reports_its_count() {
        let mut d = TapDetector::new(TapConfig::default());
        let counts: Vec<usize> = [0u64, 200, 400, 600, 800]
            .iter()
            .filter_map(|t| match d.observe(&vertical(6.0), *t) {
                Some(TapOutcome::Progress { count }) | Some(TapOutcome::GestureComplete { count }) => Some(count),
                None => None,
            })
            .collect();
        assert_eq!(counts, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_magnitude_above_max_never_counts() {
        let mut d = TapDetector::new(TapConfig::default());
        for i in 0..10 {
            assert_eq!(d.observe(&vertical(13.0), i * 300), None);
        }
        assert_eq!(d.tap_count(), 0);
    }

    #[test]
    fn test_horizontal_jolt_rejected() {
        let mut d = TapDetector::new(TapConfig::default());
        let sample = ConditionedSample {
            linear: Vec3::new(5.0, 0.0, 2.0),
            magnitude: Vec3::new(5.0, 0.0, 2.0).magnitude(),
            gravity: Vec3::new(0.0, 9.8, 0.0),
        };
        assert_eq!(d.observe(&sample, 0), None);
    }

    #[test]
    fn test_flat_device_relaxes_z_dominance() {
        // z-dominance ≈ 0.55: rejected upright, accepted lying flat
        let linear = Vec3::new(0.0, 5.0 * 0.835, 5.0 * 0.55);
        let magnitude = linear.magnitude();
        let upright = ConditionedSample { linear, magnitude, gravity: Vec3::new(0.0, 9.8, 0.5) };
        let flat = ConditionedSample { linear, magnitude, gravity: Vec3::new(0.0, 0.5, 9.8) };

        let mut d = TapDetector::new(TapConfig::default());
        assert_eq!(d.observe(&upright, 0), None);
        assert_eq!(d.observe(&flat, 0), Some(TapOutcome::Progress { count: 1 }));
    }

    #[test]
    fn test_rotation_median_vetoes_tap() {
        let mut d = TapDetector::new(TapConfig::default());
        for t in [100u64, 150, 200] {
            d.observe_rotation(1.5, t);
        }
        assert_eq!(d.observe(&vertical(6.0), 250), None);

        // A single spike among calm readings does not veto
        let mut d = TapDetector::new(TapConfig::default());
        for (t, r) in [(100u64, 0.1), (150, 4.0), (200, 0.2)] {
            d.observe_rotation(r, t);
        }
        assert!(d.observe(&vertical(6.0), 250).is_some());
    }

    #[test]
    fn test_stale_rotation_does_not_veto() {
        let mut d = TapDetector::new(TapConfig::default());
        d.observe_rotation(3.0, 0);
        assert!(d.observe(&vertical(6.0), 1000).is_some());
    }

    #[test]
    fn test_debounce() {
        let mut d = TapDetector::new(TapConfig::default());
        assert!(d.observe(&vertical(6.0), 1000).is_some());
        assert_eq!(d.observe(&vertical(6.0), 1100), None);
        assert_eq!(d.observe(&vertical(6.0), 1150), Some(TapOutcome::Progress { count: 2 }));
    }

    #[test]
    fn test_old_taps_fall_out_of_window() {
        let mut d = TapDetector::new(TapConfig::default());
        for t in [0u64, 500, 1000, 1500] {
            d.observe(&vertical(6.0), t);
        }
        // Taps at 0 and 500 are older than 3000 ms at t=3600
        assert_eq!(d.observe(&vertical(6.0), 3600), Some(TapOutcome::Progress { count: 3 }));
    }
}
