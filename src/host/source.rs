//! Sensor sources feeding the pipeline.
//!
//! A live source hands out two independent streams, one per sensor. A
//! recording hands out a single stream that keeps the order it was captured
//! in. Each call to [`SensorSource::open`] starts fresh producers so the
//! pipeline can be restarted; producers stop once the receiving side is
//! dropped.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::HostError;
use crate::types::{current_time_ms, SensorSample};

const STANDARD_GRAVITY: f64 = 9.81;
const STREAM_CAPACITY: usize = 256;

pub enum SensorStreams {
    /// One channel per sensor, consumed as samples arrive
    Live {
        accel: mpsc::Receiver<SensorSample>,
        gyro: mpsc::Receiver<SensorSample>,
    },
    /// Both sensors on one channel in recorded order
    Recorded(mpsc::Receiver<SensorSample>),
}

pub trait SensorSource: Send + Sync {
    fn name(&self) -> &str;

    /// Start producing samples
    fn open(&self) -> Result<SensorStreams, HostError>;
}

/// Scripted motion injected by the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    TapBurst,
    DoubleJerk,
    Fall,
}

impl Scenario {
    fn duration_ms(&self) -> u64 {
        match self {
            Scenario::TapBurst => 1_000,
            Scenario::DoubleJerk => 400,
            Scenario::Fall => 12_000,
        }
    }

    /// Extra vertical acceleration at `offset_ms` into the scenario
    fn jolt(&self, offset_ms: u64, tick_ms: u64) -> f64 {
        let on = |at: u64| offset_ms >= at && offset_ms < at + tick_ms;
        match self {
            Scenario::TapBurst if (0..5).any(|i| on(i * 200)) => 7.0,
            Scenario::DoubleJerk if on(0) || on(200) => 30.0,
            Scenario::Fall if on(0) => 25.0,
            _ => 0.0,
        }
    }
}

/// Phone lying still with sensor noise, optionally interrupted by random
/// scenarios at a fixed interval
pub struct SimulatedSource {
    pub rate_hz: u32,
    pub scenario_interval: Option<Duration>,
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self { rate_hz: 50, scenario_interval: None }
    }
}

impl SensorSource for SimulatedSource {
    fn name(&self) -> &str {
        "simulated"
    }

    fn open(&self) -> Result<SensorStreams, HostError> {
        if self.rate_hz == 0 {
            return Err(HostError::Sensor("sample rate must be positive".into()));
        }
        let (accel_tx, accel) = mpsc::channel(STREAM_CAPACITY);
        let (gyro_tx, gyro) = mpsc::channel(STREAM_CAPACITY);
        let tick_ms = (1_000 / self.rate_hz as u64).max(1);
        let scenario_every_ms = self
            .scenario_interval
            .map(|d| d.as_millis() as u64)
            .filter(|&ms| ms > 0);

        tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
            // Wall-clock based so a reopened simulation continues the clock
            let mut t = current_time_ms();
            let mut active: Option<(Scenario, u64)> = None;

            info!("🎭 Starting sensor simulation ({}ms ticks)", tick_ms);
            loop {
                interval.tick().await;
                t += tick_ms;

                if let Some(every) = scenario_every_ms {
                    if active.is_none() && t % every < tick_ms {
                        let scenario = match rng.gen_range(0..3) {
                            0 => Scenario::TapBurst,
                            1 => Scenario::DoubleJerk,
                            _ => Scenario::Fall,
                        };
                        info!("🎭 Simulating {:?}", scenario);
                        active = Some((scenario, t));
                    }
                }

                let mut jolt = 0.0;
                if let Some((scenario, started)) = active {
                    let offset = t - started;
                    if offset >= scenario.duration_ms() {
                        active = None;
                    } else {
                        jolt = scenario.jolt(offset, tick_ms);
                    }
                }

                let accel = SensorSample::accelerometer(
                    t,
                    rng.gen_range(-0.05..0.05),
                    rng.gen_range(-0.05..0.05),
                    STANDARD_GRAVITY + jolt + rng.gen_range(-0.05..0.05),
                );
                let gyro = SensorSample::gyroscope(
                    t,
                    rng.gen_range(-0.02..0.02),
                    rng.gen_range(-0.02..0.02),
                    rng.gen_range(-0.02..0.02),
                );
                if accel_tx.send(accel).await.is_err() || gyro_tx.send(gyro).await.is_err() {
                    debug!("Simulation stopped: pipeline gone");
                    break;
                }
            }
        });

        Ok(SensorStreams::Live { accel, gyro })
    }
}

/// Replays newline-delimited JSON samples from a file, as fast as the
/// pipeline consumes them
pub struct NdjsonSource {
    pub path: PathBuf,
}

impl NdjsonSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SensorSource for NdjsonSource {
    fn name(&self) -> &str {
        "replay"
    }

    fn open(&self) -> Result<SensorStreams, HostError> {
        if !self.path.is_file() {
            return Err(HostError::Sensor(format!("replay file not found: {}", self.path.display())));
        }
        let (tx, samples) = mpsc::channel(STREAM_CAPACITY);
        let path = self.path.clone();

        tokio::spawn(async move {
            let file = match tokio::fs::File::open(&path).await {
                Ok(file) => file,
                Err(e) => {
                    warn!("Failed to open {}: {}", path.display(), e);
                    return;
                }
            };
            let mut lines = BufReader::new(file).lines();
            let mut line_no = 0usize;
            let mut replayed = 0usize;

            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Replay read error: {}", e);
                        break;
                    }
                };
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }
                let sample: SensorSample = match serde_json::from_str(&line) {
                    Ok(sample) => sample,
                    Err(e) => {
                        warn!("Skipping malformed sample on line {}: {}", line_no, e);
                        continue;
                    }
                };
                if tx.send(sample).await.is_err() {
                    return;
                }
                replayed += 1;
            }
            info!("📼 Replay finished: {} samples", replayed);
        });

        Ok(SensorStreams::Recorded(samples))
    }
}

/// Serialize samples in the replay format
#[cfg(test)]
pub(crate) fn to_ndjson(samples: &[SensorSample]) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    for sample in samples {
        out.push_str(&serde_json::to_string(sample)?);
        out.push('\n');
    }
    Ok(out)
}

/// Rest readings at `from..to` every `step` ms
#[cfg(test)]
pub(crate) fn resting_samples(from: u64, to: u64, step: usize) -> Vec<SensorSample> {
    (from..to)
        .step_by(step)
        .map(|t| SensorSample::accelerometer(t, 0.0, 0.0, STANDARD_GRAVITY))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SensorKind;
    use std::io::Write;

    #[tokio::test]
    async fn test_replay_keeps_file_order_and_skips_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut samples = resting_samples(0, 60, 20);
        samples.insert(2, SensorSample::gyroscope(30, 0.1, 0.0, 0.0));
        file.write_all(to_ndjson(&samples).unwrap().as_bytes()).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file).unwrap();

        let source = NdjsonSource::new(file.path());
        let SensorStreams::Recorded(mut rx) = source.open().unwrap() else {
            panic!("replay should yield a recorded stream");
        };

        let mut seen = Vec::new();
        while let Some(s) = rx.recv().await {
            seen.push((s.kind, s.timestamp_ms));
        }
        assert_eq!(
            seen,
            vec![
                (SensorKind::Accelerometer, 0),
                (SensorKind::Accelerometer, 20),
                (SensorKind::Gyroscope, 30),
                (SensorKind::Accelerometer, 40),
            ]
        );
    }

    #[test]
    fn test_missing_replay_file() {
        let source = NdjsonSource::new("/nonexistent/samples.ndjson");
        assert!(matches!(source.open(), Err(HostError::Sensor(_))));
    }

    #[tokio::test]
    async fn test_simulation_emits_both_sensors() {
        let source = SimulatedSource { rate_hz: 100, scenario_interval: None };
        let SensorStreams::Live { mut accel, mut gyro } = source.open().unwrap() else {
            panic!("simulation should yield live streams");
        };
        let a = accel.recv().await.unwrap();
        let g = gyro.recv().await.unwrap();
        assert_eq!(a.kind, SensorKind::Accelerometer);
        assert_eq!(g.kind, SensorKind::Gyroscope);
        assert!((a.reading.magnitude() - STANDARD_GRAVITY).abs() < 0.5);
    }

    #[test]
    fn test_scenario_profiles() {
        let taps = (0..1_000).step_by(20).filter(|&t| Scenario::TapBurst.jolt(t, 20) > 0.0).count();
        assert_eq!(taps, 5);
        assert_eq!(Scenario::DoubleJerk.jolt(200, 20), 30.0);
        assert_eq!(Scenario::Fall.jolt(300, 20), 0.0);
    }
}
