//! Foreground context: the visible UI side of the application.

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use super::pipeline;
use super::HostConfig;
use crate::api::client::BridgeClient;
use crate::api::websocket::SignalMessage;
use crate::api::Lifecycle;

/// Where a signal shown on screen came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOrigin {
    /// This context's own engine
    Local,
    /// Routed from the background context
    Routed,
}

/// Render a signal the way the UI would surface it
pub fn render_signal(origin: SignalOrigin, signal: &SignalMessage) {
    match signal {
        SignalMessage::TapProgress { count } => {
            info!("👆 Tap {} registered ({:?})", count, origin);
        }
        SignalMessage::Detected { event } => {
            info!(
                "🚨 {} [{:?}] at {} ({:?})",
                event.kind.as_str(),
                event.severity,
                event.detected_at.to_rfc3339(),
                origin
            );
        }
    }
}

pub async fn run(config: HostConfig, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let bridge = BridgeClient::new(&config.bridge_url())?;

    bridge.report_lifecycle(Lifecycle::Visible).await?;
    // Subscribe before raising the flag so a routed event always has a reader
    let mut subscription = bridge.subscribe().await?;
    bridge.set_live_channel(true).await?;
    info!("📱 Foreground attached to bridge at {}", config.bridge_url());

    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
    let engine = tokio::spawn(pipeline::supervise(
        config.engine_config(),
        config.sensor_source(),
        signal_tx,
        shutdown.clone(),
        config.restart.clone(),
    ));

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            Some(signal) = signal_rx.recv() => render_signal(SignalOrigin::Local, &signal),
            routed = subscription.next() => match routed {
                Some(Ok(signal)) => render_signal(SignalOrigin::Routed, &signal),
                Some(Err(e)) => warn!("Bad signal from bridge: {}", e),
                None => {
                    warn!("Bridge closed the signal stream");
                    break;
                }
            },
        }
    }

    // Clear the flag first so no event is routed to a UI that is leaving
    if let Err(e) = bridge.set_live_channel(false).await {
        warn!("Failed to clear live channel flag: {}", e);
    }
    if let Err(e) = bridge.report_lifecycle(Lifecycle::Destroyed).await {
        warn!("Failed to report shutdown: {}", e);
    }

    engine.abort();
    info!("📱 Foreground detached");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::events::AlertLog;
    use crate::api::websocket::SignalBroadcaster;
    use crate::api::BridgeState;
    use crate::host::SourceConfig;
    use crate::liveness::{CredentialStore, LivenessRegistry};
    use crate::storage::{KeyValueStore, Storage};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_foreground_drives_liveness() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn KeyValueStore> = Arc::new(Storage::open(dir.path()).unwrap());
        let registry = LivenessRegistry::new(store.clone());
        let state = BridgeState {
            registry: registry.clone(),
            credentials: CredentialStore::new(store),
            signals: SignalBroadcaster::new(16),
            alerts: AlertLog::new(),
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(crate::api::serve(state, listener));

        let replay = tempfile::NamedTempFile::new().unwrap();
        let config = HostConfig {
            context: crate::host::HostContext::Foreground,
            bridge_port: port,
            source: SourceConfig::Replay(replay.path().to_path_buf()),
            ..Default::default()
        };

        let (stop, shutdown) = watch::channel(false);
        let task = tokio::spawn(run(config, shutdown));

        let mut active = false;
        for _ in 0..100 {
            if registry.is_foreground_channel_active() {
                active = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(active);
        assert!(registry.snapshot().process_alive);

        stop.send(true).unwrap();
        task.await.unwrap().unwrap();
        assert!(!registry.is_foreground_channel_active());
        assert!(!registry.snapshot().process_alive);
    }
}
