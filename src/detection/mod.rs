//! Detection engine: one owned value per execution context holding the
//! conditioner, both detectors, their buffers and the shared cooldown.

pub mod fall;
pub mod risk;
pub mod tap;

use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::signal::{SignalConditioner, SignalConfig};
use crate::types::{DetectedEvent, EventKind, SensorKind, SensorSample, Severity};
use fall::{DetectionMode, FallConfig, FallDetector, FallOutcome, TimerRequest};
use tap::{TapConfig, TapDetector, TapOutcome};

/// Configuration for the detection engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub signal: SignalConfig,
    pub tap: TapConfig,
    pub fall: FallConfig,
    /// Minimum spacing between fired fall/double-jerk events
    pub cooldown_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            signal: SignalConfig::default(),
            tap: TapConfig::default(),
            fall: FallConfig::default(),
            cooldown_ms: 60_000,
        }
    }
}

impl EngineConfig {
    pub fn for_mode(mode: DetectionMode) -> Self {
        Self {
            fall: FallConfig::for_mode(mode),
            ..Default::default()
        }
    }
}

/// Suppresses a new event while `now - last < window`.
///
/// Clones share the last-trigger slot, so an engine rebuilt after a crash
/// keeps the window of the one it replaces.
#[derive(Debug, Clone)]
pub struct CooldownTimer {
    window_ms: u64,
    last_trigger_ms: Arc<Mutex<Option<u64>>>,
}

impl CooldownTimer {
    pub fn new(window_ms: u64) -> Self {
        Self { window_ms, last_trigger_ms: Arc::new(Mutex::new(None)) }
    }

    fn remaining_after(&self, last: Option<u64>, now_ms: u64) -> u64 {
        match last {
            Some(last) => self.window_ms.saturating_sub(now_ms.saturating_sub(last)),
            None => 0,
        }
    }

    /// Milliseconds left before another event may fire
    pub fn remaining(&self, now_ms: u64) -> u64 {
        let last = *self.last_trigger_ms.lock().unwrap_or_else(|e| e.into_inner());
        self.remaining_after(last, now_ms)
    }

    /// Claim the slot if the window has elapsed
    pub fn try_fire(&self, now_ms: u64) -> bool {
        let mut last = self.last_trigger_ms.lock().unwrap_or_else(|e| e.into_inner());
        if self.remaining_after(*last, now_ms) > 0 {
            return false;
        }
        *last = Some(now_ms);
        true
    }
}

/// What the engine hands to its host
#[derive(Debug, Clone)]
pub enum EngineOutput {
    /// An accepted tap; UI feedback only
    TapProgress { count: usize },
    /// A detected event cleared for dispatch
    Event(DetectedEvent),
    /// A timed check the host should deliver back via [`Engine::on_timer`]
    Schedule(TimerRequest),
}

pub struct Engine {
    conditioner: SignalConditioner,
    tap: TapDetector,
    fall: FallDetector,
    cooldown: CooldownTimer,
    last_sample_ms: u64,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let cooldown = CooldownTimer::new(config.cooldown_ms);
        Self::with_cooldown(config, cooldown)
    }

    /// Build an engine around an existing cooldown; `config.cooldown_ms`
    /// is ignored in favour of the timer's own window
    pub fn with_cooldown(config: EngineConfig, cooldown: CooldownTimer) -> Self {
        Self {
            conditioner: SignalConditioner::new(config.signal),
            tap: TapDetector::new(config.tap),
            fall: FallDetector::new(config.fall),
            cooldown,
            last_sample_ms: 0,
        }
    }

    pub fn conditioner(&self) -> &SignalConditioner {
        &self.conditioner
    }

    pub fn tap(&self) -> &TapDetector {
        &self.tap
    }

    pub fn fall(&self) -> &FallDetector {
        &self.fall
    }

    /// Process one sensor sample. Non-finite readings are dropped.
    pub fn on_sample(&mut self, sample: &SensorSample) -> Vec<EngineOutput> {
        if !sample.reading.is_finite() {
            warn!("Dropping non-finite {:?} sample at {}ms", sample.kind, sample.timestamp_ms);
            return Vec::new();
        }
        let now = sample.timestamp_ms;
        self.last_sample_ms = self.last_sample_ms.max(now);

        match sample.kind {
            SensorKind::Gyroscope => {
                let rotation = SignalConditioner::rotation_magnitude(sample.reading);
                self.tap.observe_rotation(rotation, now);
                self.fall.observe_rotation(rotation, now);
                Vec::new()
            }
            SensorKind::Accelerometer => {
                let Some(conditioned) = self.conditioner.condition(sample.reading) else {
                    return Vec::new();
                };

                let mut out = Vec::new();
                match self.tap.observe(&conditioned, now) {
                    Some(TapOutcome::Progress { count }) => out.push(EngineOutput::TapProgress { count }),
                    Some(TapOutcome::GestureComplete { count }) => {
                        out.push(EngineOutput::TapProgress { count });
                        out.push(EngineOutput::Event(DetectedEvent::new(
                            EventKind::TapSos,
                            Severity::Sos,
                            None,
                            now,
                        )));
                    }
                    None => {}
                }

                let fall_outcomes = self.fall.on_sample(conditioned.magnitude, now);
                self.absorb(fall_outcomes, &mut out);
                out
            }
        }
    }

    /// Deliver a timer previously requested through [`EngineOutput::Schedule`]
    pub fn on_timer(&mut self, timer: TimerRequest) -> Vec<EngineOutput> {
        let mut out = Vec::new();
        let outcomes = self.fall.fire_timer(timer);
        self.absorb(outcomes, &mut out);
        out
    }

    /// Cancel pending timers and drop all detector state
    pub fn stop(&mut self) {
        self.fall.cancel_pending();
        self.fall.reset(self.last_sample_ms);
        self.tap.reset();
        self.conditioner.reset();
        info!("Detection engine stopped");
    }

    fn absorb(&mut self, outcomes: Vec<FallOutcome>, out: &mut Vec<EngineOutput>) {
        for outcome in outcomes {
            match outcome {
                FallOutcome::Schedule(timer) => out.push(EngineOutput::Schedule(timer)),
                FallOutcome::FallConfirmed(risk) => {
                    debug!("Confirmed fall scored {} ({:?})", risk.total, risk.factors);
                }
                FallOutcome::FalseAlarm => {
                    info!("Fall dropped after movement resumed");
                }
                FallOutcome::Detected { kind, severity, risk, at_ms } => {
                    if self.cooldown.try_fire(at_ms) {
                        info!("🚨 {} ({:?}, score {})", kind.as_str(), severity, risk.total);
                        out.push(EngineOutput::Event(DetectedEvent::new(kind, severity, Some(risk), at_ms)));
                    } else {
                        info!(
                            "⏸️ {} suppressed by cooldown ({}ms left)",
                            kind.as_str(),
                            self.cooldown.remaining(at_ms)
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SensorSample;

    const G: f64 = 9.81;

    fn rest(t: u64) -> SensorSample {
        SensorSample::accelerometer(t, 0.0, 0.0, G)
    }

    fn jolt(t: u64, dz: f64) -> SensorSample {
        SensorSample::accelerometer(t, 0.0, 0.0, G + dz)
    }

    fn warm_up(engine: &mut Engine) {
        for t in 0..10 {
            assert!(engine.on_sample(&rest(t * 20)).is_empty());
        }
    }

    fn events(outputs: &[EngineOutput]) -> Vec<&DetectedEvent> {
        outputs
            .iter()
            .filter_map(|o| match o {
                EngineOutput::Event(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    /// Rest samples every 20ms in [from, to), with two jolts 200ms apart at `at`
    fn double_jerk_run(engine: &mut Engine, from: u64, to: u64, at: u64) -> Vec<EngineOutput> {
        let mut out = Vec::new();
        for t in (from..to).step_by(20) {
            let sample = if t == at || t == at + 200 { jolt(t, 30.0) } else { rest(t) };
            out.extend(engine.on_sample(&sample));
        }
        out
    }

    #[test]
    fn test_cooldown_timer() {
        let c = CooldownTimer::new(60_000);
        assert!(c.try_fire(1_000));
        assert!(!c.try_fire(11_000));
        assert_eq!(c.remaining(11_000), 50_000);
        assert!(c.try_fire(61_000));
    }

    #[test]
    fn test_tap_gesture_through_pipeline() {
        let mut engine = Engine::new(EngineConfig::default());
        warm_up(&mut engine);

        let mut out = Vec::new();
        for t in (200..=1100).step_by(20) {
            let sample = if (t - 200) % 200 == 0 { jolt(t, 7.0) } else { rest(t) };
            out.extend(engine.on_sample(&sample));
        }

        let progress: Vec<usize> = out
            .iter()
            .filter_map(|o| match o {
                EngineOutput::TapProgress { count } => Some(*count),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![1, 2, 3, 4, 5]);

        // Progress for the fifth tap precedes the gesture event
        let last_progress = out.iter().rposition(|o| matches!(o, EngineOutput::TapProgress { .. }));
        let event = out.iter().position(|o| matches!(o, EngineOutput::Event(_)));
        assert!(last_progress < event);

        let fired = events(&out);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, EventKind::TapSos);
        assert_eq!(fired[0].at_ms, 1000);
        assert_eq!(engine.tap().tap_count(), 0);
    }

    #[test]
    fn test_double_jerk_fires_sos() {
        let mut engine = Engine::new(EngineConfig::default());
        warm_up(&mut engine);
        let out = double_jerk_run(&mut engine, 200, 2000, 1000);
        let fired = events(&out);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, EventKind::DoubleJerk);
        assert_eq!(fired[0].severity, Severity::Sos);
        assert_eq!(fired[0].at_ms, 1200);
    }

    #[test]
    fn test_two_sos_events_ten_seconds_apart_fire_once() {
        let mut engine = Engine::new(EngineConfig::default());
        warm_up(&mut engine);
        let mut out = double_jerk_run(&mut engine, 200, 5000, 1000);
        out.extend(double_jerk_run(&mut engine, 5000, 15_000, 11_000));
        assert_eq!(events(&out).len(), 1);

        // After the window a new episode fires again
        let later = double_jerk_run(&mut engine, 15_000, 63_000, 62_000);
        assert_eq!(events(&later).len(), 1);
    }

    #[test]
    fn test_rebuilt_engine_keeps_cooldown() {
        let cooldown = CooldownTimer::new(60_000);
        let mut first = Engine::with_cooldown(EngineConfig::default(), cooldown.clone());
        warm_up(&mut first);
        assert_eq!(events(&double_jerk_run(&mut first, 200, 2000, 1000)).len(), 1);

        // A replacement engine, as built after a crash, inherits the window
        let mut second = Engine::with_cooldown(EngineConfig::default(), cooldown.clone());
        warm_up(&mut second);
        assert!(events(&double_jerk_run(&mut second, 200, 12_000, 10_000)).is_empty());
        assert!(cooldown.remaining(12_000) > 0);

        // An engine with its own timer would have fired
        let mut fresh = Engine::new(EngineConfig::default());
        warm_up(&mut fresh);
        assert_eq!(events(&double_jerk_run(&mut fresh, 200, 12_000, 10_000)).len(), 1);
    }

    #[test]
    fn test_tap_gesture_ignores_fall_cooldown() {
        let mut engine = Engine::new(EngineConfig::default());
        warm_up(&mut engine);
        let mut out = double_jerk_run(&mut engine, 200, 2000, 1000);
        for t in (2000..=3000).step_by(20) {
            let sample = if (t - 2000) % 200 == 0 { jolt(t, 7.0) } else { rest(t) };
            out.extend(engine.on_sample(&sample));
        }
        let kinds: Vec<EventKind> = events(&out).iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::DoubleJerk, EventKind::TapSos]);
    }

    #[test]
    fn test_non_finite_sample_dropped() {
        let mut engine = Engine::new(EngineConfig::default());
        let bad = SensorSample::accelerometer(0, f64::NAN, 0.0, G);
        assert!(engine.on_sample(&bad).is_empty());
        assert!(!engine.conditioner().is_ready());
    }

    #[test]
    fn test_stop_cancels_pending_timers() {
        let mut engine = Engine::new(EngineConfig::default());
        warm_up(&mut engine);
        // Free-fall-level readings, then a single hard impact
        let mut out = Vec::new();
        out.extend(engine.on_sample(&rest(200)));
        out.extend(engine.on_sample(&jolt(400, 30.0)));
        let scheduled = out.iter().any(|o| matches!(o, EngineOutput::Schedule(_)));
        assert!(scheduled);
        assert!(!engine.fall().pending_timers().is_empty());

        engine.stop();
        assert!(engine.fall().pending_timers().is_empty());
        assert_eq!(engine.fall().state(), fall::FallState::Idle);
    }
}
