//! SafeWatch Node
//!
//! Personal-safety monitoring: tap SOS gestures, fall detection, alert dispatch.
//!
//! Usage:
//!   safewatch-node run [OPTIONS]
//!   safewatch-node watch [--bridge <URL>]
//!
//! Run options:
//!   --context <CTX>      foreground | background (default: background)
//!   --data-dir <PATH>    Data directory (default: ./safewatch-data)
//!   --bridge-port <PORT> Local bridge port (default: 7878)
//!   --base-url <URL>     Backend base URL to cache
//!   --mode <MODE>        standard | sensitive | conservative (default: standard)
//!   --simulate           Inject simulated taps and falls every 30s
//!   --input <FILE>       Replay NDJSON sensor samples instead of simulating
//!   --restore            Start only if the last run ended abnormally

use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use safewatch_node::{
    api::client::BridgeClient,
    detection::fall::DetectionMode,
    host::{self, foreground, HostConfig, HostContext, SourceConfig},
};

const SCENARIO_INTERVAL: Duration = Duration::from_secs(30);

enum Command {
    Run(HostConfig),
    Watch { bridge: String },
}

fn parse_args() -> Command {
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("watch") => parse_watch(&args[2..]),
        Some("run") => Command::Run(parse_run(&args[2..])),
        _ => Command::Run(parse_run(args.get(1..).unwrap_or(&[]))),
    }
}

fn parse_run(args: &[String]) -> HostConfig {
    let mut config = HostConfig::default();
    let mut simulate = false;
    let mut input: Option<PathBuf> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--context" => {
                config.context = args.get(i + 1)
                    .and_then(|s| HostContext::parse(s))
                    .unwrap_or(HostContext::Background);
                i += 1;
            }
            "--data-dir" => {
                config.data_dir = args.get(i + 1)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./safewatch-data"));
                i += 1;
            }
            "--bridge-port" => {
                config.bridge_port = args.get(i + 1)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(7878);
                i += 1;
            }
            "--base-url" => {
                config.base_url = args.get(i + 1).cloned();
                i += 1;
            }
            "--mode" => {
                config.mode = args.get(i + 1)
                    .and_then(|s| DetectionMode::parse(s))
                    .unwrap_or_default();
                i += 1;
            }
            "--input" => {
                input = args.get(i + 1).map(PathBuf::from);
                i += 1;
            }
            "--simulate" => {
                simulate = true;
            }
            "--restore" => {
                config.restore = true;
            }
            other => warn!("Ignoring unknown argument {}", other),
        }
        i += 1;
    }

    config.source = match input {
        Some(path) => SourceConfig::Replay(path),
        None => SourceConfig::Simulated {
            scenario_interval: simulate.then_some(SCENARIO_INTERVAL),
        },
    };
    config
}

fn parse_watch(args: &[String]) -> Command {
    let mut bridge = HostConfig::default().bridge_url();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--bridge" {
            if let Some(url) = args.get(i + 1) {
                bridge = url.clone();
            }
            i += 1;
        }
        i += 1;
    }
    Command::Watch { bridge }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    match parse_args() {
        Command::Run(config) => run(config).await,
        Command::Watch { bridge } => watch(&bridge).await,
    }
}

async fn run(config: HostConfig) -> anyhow::Result<()> {
    println!(r#"
    ╔═══════════════════════════════════════════════════════════╗
    ║                                                           ║
    ║   🛡️  SAFEWATCH NODE                                      ║
    ║       Tap SOS · Fall Detection · Alert Dispatch           ║
    ║                                                           ║
    ╚═══════════════════════════════════════════════════════════╝
    "#);

    info!("Starting SafeWatch...");
    info!("  Context: {:?}", config.context);
    info!("  Data Dir: {}", config.data_dir.display());
    info!("  Bridge Port: {}", config.bridge_port);
    info!("  Mode: {:?}", config.mode);
    info!("  Source: {:?}", config.source);

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = stop.send(true);
        }
    });

    host::run(config, shutdown).await
}

/// Minimal foreground consumer: print every signal the bridge pushes
async fn watch(bridge_url: &str) -> anyhow::Result<()> {
    let client = BridgeClient::new(bridge_url)?;
    let mut subscription = client.subscribe().await?;
    info!("👀 Watching signals from {}", bridge_url);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            signal = subscription.next() => match signal {
                Some(Ok(signal)) => foreground::render_signal(foreground::SignalOrigin::Routed, &signal),
                Some(Err(e)) => warn!("Bad signal: {}", e),
                None => {
                    info!("Bridge closed the stream");
                    break;
                }
            },
        }
    }
    Ok(())
}
