//! Detection pipeline: sensor streams in, signals out.
//!
//! One task owns the engine and feeds it samples from both sensors plus the
//! timers it asked for. Live sensors are consumed as their samples arrive;
//! a recording is consumed strictly in file order so every replay of it
//! gives the same detections. Timers are sleeping tasks scheduled against
//! the sensor clock; a newer request of the same kind aborts the older one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::source::{SensorSource, SensorStreams};
use super::HostError;
use crate::api::websocket::SignalMessage;
use crate::detection::fall::{TimerKind, TimerRequest};
use crate::detection::{CooldownTimer, Engine, EngineConfig, EngineOutput};
use crate::types::SensorSample;

/// Why a pipeline run ended normally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineExit {
    /// Shutdown was requested
    Stopped,
    /// Both sensor streams closed
    SourceExhausted,
}

/// Restart policy after abnormal termination
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub backoff_ms: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self { max_restarts: 5, backoff_ms: 1_000 }
    }
}

struct TimerSet {
    tx: mpsc::UnboundedSender<TimerRequest>,
    handles: HashMap<TimerKind, JoinHandle<()>>,
}

impl TimerSet {
    fn new(tx: mpsc::UnboundedSender<TimerRequest>) -> Self {
        Self { tx, handles: HashMap::new() }
    }

    fn schedule(&mut self, timer: TimerRequest, now_ms: u64) {
        let delay = Duration::from_millis(timer.due_ms.saturating_sub(now_ms));
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(timer);
        });
        if let Some(previous) = self.handles.insert(timer.kind, handle) {
            previous.abort();
        }
        debug!("⏱️ {:?} timer (gen {}) in {:?}", timer.kind, timer.generation, delay);
    }

    fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

struct Pipeline {
    engine: Engine,
    timers: TimerSet,
    signals: mpsc::UnboundedSender<SignalMessage>,
    clock_ms: u64,
}

impl Pipeline {
    fn on_sample(&mut self, sample: &SensorSample) -> Result<(), HostError> {
        self.clock_ms = self.clock_ms.max(sample.timestamp_ms);
        let outputs = self.engine.on_sample(sample);
        self.handle(outputs)
    }

    fn handle(&mut self, outputs: Vec<EngineOutput>) -> Result<(), HostError> {
        for output in outputs {
            let signal = match output {
                EngineOutput::Schedule(timer) => {
                    self.timers.schedule(timer, self.clock_ms);
                    continue;
                }
                EngineOutput::TapProgress { count } => SignalMessage::TapProgress { count },
                EngineOutput::Event(event) => SignalMessage::Detected { event },
            };
            self.signals.send(signal).map_err(|_| HostError::SignalChannelClosed)?;
        }
        Ok(())
    }

    /// Streams ended: let every outstanding check run as if the sensors
    /// had gone quiet
    fn drain_timers(&mut self) -> Result<(), HostError> {
        self.timers.cancel_all();
        loop {
            let mut pending = self.engine.fall().pending_timers();
            pending.sort_by_key(|t| t.due_ms);
            let Some(next) = pending.first().copied() else {
                return Ok(());
            };
            self.clock_ms = self.clock_ms.max(next.due_ms);
            let outputs = self.engine.on_timer(next);
            self.handle(outputs)?;
            self.timers.cancel_all();
        }
    }
}

type Stream = Option<mpsc::Receiver<SensorSample>>;

/// Next sample from a stream that is still open; a closed one never yields
async fn next_sample(stream: &mut Stream) -> Option<SensorSample> {
    match stream {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Run one pipeline until shutdown or until the source runs dry
pub async fn run_pipeline(
    engine: Engine,
    source: Arc<dyn SensorSource>,
    signals: mpsc::UnboundedSender<SignalMessage>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<PipelineExit, HostError> {
    let (mut accel, mut gyro, mut recorded): (Stream, Stream, Stream) = match source.open()? {
        SensorStreams::Live { accel, gyro } => (Some(accel), Some(gyro), None),
        SensorStreams::Recorded(samples) => (None, None, Some(samples)),
    };
    let (timer_tx, mut timer_rx) = mpsc::unbounded_channel();
    let mut pipeline = Pipeline {
        engine,
        timers: TimerSet::new(timer_tx),
        signals,
        clock_ms: 0,
    };

    info!("▶️ Detection pipeline started ({} source)", source.name());

    let exit = loop {
        if *shutdown.borrow() {
            break PipelineExit::Stopped;
        }
        if accel.is_none() && gyro.is_none() && recorded.is_none() {
            pipeline.drain_timers()?;
            break PipelineExit::SourceExhausted;
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break PipelineExit::Stopped;
                }
            }
            sample = next_sample(&mut accel), if accel.is_some() => match sample {
                Some(sample) => pipeline.on_sample(&sample)?,
                None => accel = None,
            },
            sample = next_sample(&mut gyro), if gyro.is_some() => match sample {
                Some(sample) => pipeline.on_sample(&sample)?,
                None => gyro = None,
            },
            sample = next_sample(&mut recorded), if recorded.is_some() => match sample {
                Some(sample) => pipeline.on_sample(&sample)?,
                None => recorded = None,
            },
            Some(timer) = timer_rx.recv() => {
                let outputs = pipeline.engine.on_timer(timer);
                pipeline.handle(outputs)?;
            }
        }
    };

    pipeline.engine.stop();
    pipeline.timers.cancel_all();
    info!("⏹️ Detection pipeline ended: {:?}", exit);
    Ok(exit)
}

/// Run the pipeline, restarting it after errors or panics. Every restart
/// gets a fresh engine that shares the previous one's cooldown.
pub async fn supervise(
    config: EngineConfig,
    source: Arc<dyn SensorSource>,
    signals: mpsc::UnboundedSender<SignalMessage>,
    mut shutdown: watch::Receiver<bool>,
    policy: RestartPolicy,
) -> Result<PipelineExit, HostError> {
    let cooldown = CooldownTimer::new(config.cooldown_ms);
    let mut restarts = 0u32;
    loop {
        let task = tokio::spawn(run_pipeline(
            Engine::with_cooldown(config.clone(), cooldown.clone()),
            source.clone(),
            signals.clone(),
            shutdown.clone(),
        ));
        match task.await {
            Ok(Ok(exit)) => return Ok(exit),
            Ok(Err(HostError::SignalChannelClosed)) => return Err(HostError::SignalChannelClosed),
            Ok(Err(e)) => warn!("Detection pipeline failed: {}", e),
            Err(e) => error!("Detection pipeline crashed: {}", e),
        }

        if *shutdown.borrow() {
            return Ok(PipelineExit::Stopped);
        }
        if restarts >= policy.max_restarts {
            return Err(HostError::RestartsExhausted(policy.max_restarts));
        }
        restarts += 1;
        info!("🔄 Restarting detection pipeline ({}/{})", restarts, policy.max_restarts);

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(policy.backoff_ms)) => {}
            _ = shutdown.changed() => return Ok(PipelineExit::Stopped),
        }
    }
}
