//! Background context: long-running monitoring that survives the UI.

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::keepalive::KeepAliveLock;
use super::pipeline::{self, PipelineExit};
use super::HostConfig;
use crate::api::events::AlertLog;
use crate::api::websocket::{SignalBroadcaster, SignalMessage};
use crate::api::{self, BridgeState};
use crate::dispatch::notify::{LogNotifier, Notification, Notifier};
use crate::dispatch::{AlertDispatcher, DispatchRecord};
use crate::liveness::{CredentialStore, LivenessRegistry};
use crate::storage::{keys, KeyValueStore, Storage};

const HISTORY_PRELOAD: usize = 200;

pub async fn run(config: HostConfig, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    run_with_notifier(config, shutdown, Arc::new(LogNotifier)).await
}

pub async fn run_with_notifier(
    config: HostConfig,
    shutdown: watch::Receiver<bool>,
    notifier: Arc<dyn Notifier>,
) -> anyhow::Result<()> {
    let storage = Arc::new(Storage::open(config.data_dir.join("db"))?);
    let store: Arc<dyn KeyValueStore> = storage.clone();

    if config.restore {
        if !store.get_bool(keys::MONITORING_ENABLED)?.unwrap_or(false) {
            info!("Nothing to restore: monitoring was stopped cleanly");
            return Ok(());
        }
        warn!("♻️ Restoring monitoring after abnormal termination");
    }

    let lock = KeepAliveLock::acquire(&config.data_dir)?;
    if lock.stale_owner().is_some() && !config.restore {
        warn!("Previous monitoring run did not shut down cleanly");
    }

    let registry = LivenessRegistry::new(store.clone());
    let credentials = CredentialStore::new(store.clone());
    if let Some(url) = &config.base_url {
        registry.set_base_url(url)?;
    }
    store.put_bool(keys::MONITORING_ENABLED, true)?;

    let signals = SignalBroadcaster::new(64);
    let alerts = AlertLog::new();
    alerts.preload(storage.recent_dispatches(HISTORY_PRELOAD)?).await;

    let dispatcher = Arc::new(AlertDispatcher::new(
        config.dispatch.clone(),
        registry.clone(),
        credentials.clone(),
        Arc::new(signals.clone()),
        notifier.clone(),
    )?);

    let listener = TcpListener::bind(("127.0.0.1", config.bridge_port)).await?;
    let bridge_state = BridgeState {
        registry,
        credentials,
        signals: signals.clone(),
        alerts: alerts.clone(),
    };
    let bridge = tokio::spawn(async move {
        if let Err(e) = api::serve(bridge_state, listener).await {
            warn!("Bridge stopped: {}", e);
        }
    });

    notifier.notify(Notification::MonitoringActive);
    info!("🛡️ Background monitoring started (mode {:?})", config.mode);

    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
    let consumer = {
        let storage = storage.clone();
        tokio::spawn(async move {
            let mut in_flight = JoinSet::new();
            while let Some(signal) = signal_rx.recv().await {
                match signal {
                    SignalMessage::TapProgress { .. } => {
                        signals.broadcast(signal);
                    }
                    SignalMessage::Detected { event } => {
                        let dispatcher = dispatcher.clone();
                        let storage = storage.clone();
                        let alerts = alerts.clone();
                        in_flight.spawn(async move {
                            let outcome = dispatcher.dispatch(&event).await;
                            let record = DispatchRecord::new(&event, outcome);
                            if let Err(e) = storage.save_dispatch(&record) {
                                warn!("Failed to persist dispatch record: {}", e);
                            }
                            alerts.push(record).await;
                        });
                    }
                }
            }
            while in_flight.join_next().await.is_some() {}
        })
    };

    let result = pipeline::supervise(
        config.engine_config(),
        config.sensor_source(),
        signal_tx,
        shutdown,
        config.restart.clone(),
    )
    .await;

    // The pipeline dropped its sender; wait for dispatches still in flight
    if let Err(e) = consumer.await {
        warn!("Signal consumer ended abnormally: {}", e);
    }
    bridge.abort();
    let _ = bridge.await;

    match result {
        Ok(exit) => {
            store.put_bool(keys::MONITORING_ENABLED, false)?;
            storage.flush()?;
            match exit {
                PipelineExit::Stopped => info!("👋 Background monitoring stopped"),
                PipelineExit::SourceExhausted => info!("👋 Sensor source exhausted, monitoring ended"),
            }
            Ok(())
        }
        Err(e) => {
            storage.flush()?;
            Err(e.into())
        }
    }
}
