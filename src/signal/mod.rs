//! Signal conditioning: gravity separation and magnitude extraction.
//!
//! The gravity estimate is seeded by a plain average of the first few
//! accelerometer samples, then tracked with an exponential moving average.
//! Subtracting it leaves the linear (motion) acceleration, which is what
//! both detectors consume.

pub mod window;

use serde::Serialize;
use tracing::debug;

use crate::types::Vec3;

/// Parameters for gravity separation
#[derive(Debug, Clone)]
pub struct SignalConfig {
    /// Number of samples averaged before any output is produced
    pub warmup_samples: usize,
    /// EMA smoothing factor: g = α·g + (1-α)·raw
    pub gravity_alpha: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            warmup_samples: 10,
            gravity_alpha: 0.8,
        }
    }
}

/// Per-axis gravity estimate for one sensor session
#[derive(Debug, Clone)]
pub enum GravityEstimate {
    /// Accumulating the warm-up sum
    WarmingUp { sum: Vec3, count: usize },
    Ready(Vec3),
}

impl GravityEstimate {
    pub fn current(&self) -> Option<Vec3> {
        match self {
            GravityEstimate::WarmingUp { .. } => None,
            GravityEstimate::Ready(g) => Some(*g),
        }
    }
}

/// A gravity-corrected accelerometer sample
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConditionedSample {
    pub linear: Vec3,
    pub magnitude: f64,
    pub gravity: Vec3,
}

impl ConditionedSample {
    /// Signed vertical component of linear acceleration
    pub fn signed_z(&self) -> f64 {
        self.linear.z
    }
}

/// Turns raw accelerometer and gyroscope readings into the signals the
/// detectors work on. Owns the gravity state exclusively.
pub struct SignalConditioner {
    config: SignalConfig,
    gravity: GravityEstimate,
}

impl SignalConditioner {
    pub fn new(config: SignalConfig) -> Self {
        Self {
            config,
            gravity: GravityEstimate::WarmingUp { sum: Vec3::default(), count: 0 },
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.gravity, GravityEstimate::Ready(_))
    }

    pub fn gravity(&self) -> Option<Vec3> {
        self.gravity.current()
    }

    /// Condition an accelerometer reading. Returns `None` while warming up.
    pub fn condition(&mut self, raw: Vec3) -> Option<ConditionedSample> {
        match &mut self.gravity {
            GravityEstimate::WarmingUp { sum, count } => {
                sum.x += raw.x;
                sum.y += raw.y;
                sum.z += raw.z;
                *count += 1;
                if *count >= self.config.warmup_samples.max(1) {
                    let n = *count as f64;
                    let seeded = Vec3::new(sum.x / n, sum.y / n, sum.z / n);
                    debug!(
                        "Gravity seeded after {} samples: ({:.3}, {:.3}, {:.3})",
                        count, seeded.x, seeded.y, seeded.z
                    );
                    self.gravity = GravityEstimate::Ready(seeded);
                }
                None
            }
            GravityEstimate::Ready(g) => {
                let a = self.config.gravity_alpha;
                g.x = a * g.x + (1.0 - a) * raw.x;
                g.y = a * g.y + (1.0 - a) * raw.y;
                g.z = a * g.z + (1.0 - a) * raw.z;

                let linear = Vec3::new(raw.x - g.x, raw.y - g.y, raw.z - g.z);
                Some(ConditionedSample {
                    linear,
                    magnitude: linear.magnitude(),
                    gravity: *g,
                })
            }
        }
    }

    /// Rotation samples are not filtered
    pub fn rotation_magnitude(raw: Vec3) -> f64 {
        raw.magnitude()
    }

    /// Forget the gravity estimate (new sensor session)
    pub fn reset(&mut self) {
        self.gravity = GravityEstimate::WarmingUp { sum: Vec3::default(), count: 0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warmup_seeds_arithmetic_mean() {
        let mut c = SignalConditioner::new(SignalConfig::default());
        let mut sum = Vec3::default();
        for i in 0..10 {
            let raw = Vec3::new(0.1 * i as f64, -0.2, 9.5 + 0.05 * i as f64);
            sum.x += raw.x;
            sum.y += raw.y;
            sum.z += raw.z;
            assert!(c.condition(raw).is_none(), "no output during warm-up (sample {})", i);
        }
        let g = c.gravity().expect("gravity ready after 10 samples");
        assert!((g.x - sum.x / 10.0).abs() < 1e-9);
        assert!((g.y - sum.y / 10.0).abs() < 1e-9);
        assert!((g.z - sum.z / 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_ema_update_and_linear_output() {
        let mut c = SignalConditioner::new(SignalConfig::default());
        for _ in 0..10 {
            c.condition(Vec3::new(0.0, 0.0, 9.8));
        }
        let out = c.condition(Vec3::new(0.0, 0.0, 19.8)).unwrap();
        // g.z = 0.8 * 9.8 + 0.2 * 19.8 = 11.8
        assert!((out.gravity.z - 11.8).abs() < 1e-9);
        assert!((out.linear.z - 8.0).abs() < 1e-9);
        assert!((out.magnitude - 8.0).abs() < 1e-9);
        assert!(out.signed_z() > 0.0);
    }

    #[test]
    fn test_device_at_rest_has_no_linear_motion() {
        let mut c = SignalConditioner::new(SignalConfig::default());
        for _ in 0..10 {
            c.condition(Vec3::new(0.0, 0.0, 9.81));
        }
        let out = c.condition(Vec3::new(0.0, 0.0, 9.81)).unwrap();
        assert!(out.magnitude < 1e-9);
    }

    #[test]
    fn test_rotation_is_plain_norm() {
        let m = SignalConditioner::rotation_magnitude(Vec3::new(3.0, 4.0, 0.0));
        assert!((m - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_reset_restarts_warmup() {
        let mut c = SignalConditioner::new(SignalConfig::default());
        for _ in 0..10 {
            c.condition(Vec3::new(0.0, 0.0, 9.8));
        }
        assert!(c.is_ready());
        c.reset();
        assert!(!c.is_ready());
        assert!(c.condition(Vec3::new(0.0, 0.0, 9.8)).is_none());
    }
}
