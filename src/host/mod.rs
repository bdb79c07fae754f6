//! Execution host: runs the detection pipeline inside a foreground or a
//! background context.
//!
//! The background context owns the store, serves the local bridge, holds the
//! keep-alive lock and dispatches alerts. The foreground context reports its
//! lifecycle over the bridge, consumes routed signals, and runs its own
//! engine for on-screen feedback. The two never share memory.

pub mod background;
pub mod foreground;
pub mod keepalive;
pub mod pipeline;
pub mod source;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use crate::detection::fall::DetectionMode;
use crate::detection::EngineConfig;
use crate::dispatch::DispatchConfig;
use pipeline::RestartPolicy;
use source::{NdjsonSource, SensorSource, SimulatedSource};

#[derive(Error, Debug)]
pub enum HostError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Sensor error: {0}")]
    Sensor(String),
    #[error("Signal consumer went away")]
    SignalChannelClosed,
    #[error("Pipeline gave up after {0} restarts")]
    RestartsExhausted(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostContext {
    Foreground,
    Background,
}

impl HostContext {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "foreground" => Some(HostContext::Foreground),
            "background" => Some(HostContext::Background),
            _ => None,
        }
    }
}

/// Where sensor samples come from
#[derive(Debug, Clone, PartialEq)]
pub enum SourceConfig {
    /// Generated samples; scripted scenarios every interval when set
    Simulated { scenario_interval: Option<Duration> },
    /// NDJSON replay file
    Replay(PathBuf),
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub context: HostContext,
    pub data_dir: PathBuf,
    /// Local bridge port (0 picks a free one)
    pub bridge_port: u16,
    /// Backend base URL to cache before monitoring starts
    pub base_url: Option<String>,
    pub mode: DetectionMode,
    pub source: SourceConfig,
    /// Only start if the previous background run ended abnormally
    pub restore: bool,
    pub restart: RestartPolicy,
    pub dispatch: DispatchConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            context: HostContext::Background,
            data_dir: PathBuf::from("./safewatch-data"),
            bridge_port: 7878,
            base_url: None,
            mode: DetectionMode::Standard,
            source: SourceConfig::Simulated { scenario_interval: None },
            restore: false,
            restart: RestartPolicy::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl HostConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::for_mode(self.mode)
    }

    pub fn sensor_source(&self) -> Arc<dyn SensorSource> {
        match &self.source {
            SourceConfig::Simulated { scenario_interval } => Arc::new(SimulatedSource {
                scenario_interval: *scenario_interval,
                ..Default::default()
            }),
            SourceConfig::Replay(path) => Arc::new(NdjsonSource::new(path.clone())),
        }
    }

    pub fn bridge_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.bridge_port)
    }
}

/// Run the configured context until `shutdown` flips to true
pub async fn run(config: HostConfig, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    match config.context {
        HostContext::Background => background::run(config, shutdown).await,
        HostContext::Foreground => foreground::run(config, shutdown).await,
    }
}
