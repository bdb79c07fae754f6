//! Alert dispatch: hand the event to the foreground UI when it is listening,
//! otherwise send it to the backend directly.
//!
//! Every call ends in exactly one observable outcome and at most one
//! network request. Nothing here retries; the detector cooldown is the only
//! throttle.
//!
//! An active live channel normally means no network call at all. The one
//! exception is a flag that reads active while no subscriber receives the
//! forwarded event: that event is sent directly instead of being dropped.
//!
//! The direct request is the backend's form-based SOS contract: flat
//! `trigger_type`, `event_type`, `app_state`, `timestamp` and optional
//! `latitude`/`longitude` fields, with `app_state` as free text.

pub mod notify;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::multipart::Form;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::liveness::{CredentialStore, LivenessRegistry};
use crate::types::{DetectedEvent, EventKind, TriggerType};
use notify::{Notification, Notifier};

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Used when no base URL is cached in the store
    pub default_base_url: String,
    pub endpoint_path: String,
    /// Upper bound on a single request, including connect
    pub timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_base_url: "http://127.0.0.1:8000".to_string(),
            endpoint_path: "/api/sos/with-voice".to_string(),
            timeout_ms: 15_000,
        }
    }
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Why a direct dispatch did not go through
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("missing credential")]
    MissingCredential,
    #[error("session expired")]
    SessionExpired,
    #[error("server returned {status}")]
    Http { status: u16 },
    #[error("network error: {message}")]
    Transport { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Handed to the foreground application
    Routed,
    /// Accepted by the backend
    Sent,
    Failed { reason: FailureReason },
}

/// One dispatch attempt, kept for the history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub event_type: EventKind,
    pub trigger_type: TriggerType,
    pub outcome: DispatchOutcome,
    pub at: DateTime<Utc>,
}

impl DispatchRecord {
    pub fn new(event: &DetectedEvent, outcome: DispatchOutcome) -> Self {
        Self {
            event_type: event.kind,
            trigger_type: event.trigger(),
            outcome,
            at: Utc::now(),
        }
    }
}

/// The foreground messaging channel
pub trait ForegroundChannel: Send + Sync {
    /// Returns false when nobody received the event
    fn forward(&self, event: &DetectedEvent) -> bool;
}

pub struct AlertDispatcher {
    config: DispatchConfig,
    client: reqwest::Client,
    registry: LivenessRegistry,
    credentials: CredentialStore,
    channel: Arc<dyn ForegroundChannel>,
    notifier: Arc<dyn Notifier>,
}

impl AlertDispatcher {
    pub fn new(
        config: DispatchConfig,
        registry: LivenessRegistry,
        credentials: CredentialStore,
        channel: Arc<dyn ForegroundChannel>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { config, client, registry, credentials, channel, notifier })
    }

    /// Route or send one event
    pub async fn dispatch(&self, event: &DetectedEvent) -> DispatchOutcome {
        if self.registry.is_foreground_channel_active() {
            if self.channel.forward(event) {
                info!("📲 {} routed to foreground", event.kind.as_str());
                return DispatchOutcome::Routed;
            }
            warn!("Live channel flagged active but nothing is listening, sending directly");
        }

        match self.send_direct(event).await {
            Ok(()) => {
                info!("📤 {} sent to backend", event.kind.as_str());
                self.notifier.notify(Notification::AlertSent { event_type: event.kind });
                DispatchOutcome::Sent
            }
            Err(reason) => {
                warn!("❌ {} dispatch failed: {}", event.kind.as_str(), reason);
                let notification = match &reason {
                    FailureReason::SessionExpired => Notification::SessionExpired,
                    other => Notification::AlertFailed { reason: other.to_string() },
                };
                self.notifier.notify(notification);
                DispatchOutcome::Failed { reason }
            }
        }
    }

    async fn send_direct(&self, event: &DetectedEvent) -> Result<(), FailureReason> {
        let token = self.credentials.token().ok_or(FailureReason::MissingCredential)?;

        let liveness = self.registry.snapshot();
        let base_url = liveness
            .base_url
            .clone()
            .unwrap_or_else(|| self.config.default_base_url.clone());
        let url = format!("{}{}", base_url.trim_end_matches('/'), self.config.endpoint_path);

        let mut form = Form::new()
            .text("trigger_type", event.trigger().as_str())
            .text("event_type", event.kind.as_str())
            .text("app_state", liveness.app_state().as_str())
            .text("timestamp", event.detected_at.to_rfc3339_opts(SecondsFormat::Millis, true));
        if let Some((lat, lng)) = self.registry.last_location() {
            form = form.text("latitude", lat.to_string()).text("longitude", lng.to_string());
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| FailureReason::Transport { message: e.to_string() })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::UNAUTHORIZED {
            if let Err(e) = self.credentials.invalidate() {
                warn!("Failed to clear rejected credential: {}", e);
            }
            Err(FailureReason::SessionExpired)
        } else {
            Err(FailureReason::Http { status: status.as_u16() })
        }
    }
}
