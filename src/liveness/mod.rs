//! Liveness flags and the cached dispatch credential.
//!
//! The foreground lifecycle writes the flags, the dispatcher reads them.
//! Reads are not atomic with respect to writes from another context, so a
//! flag may be stale during a fast foreground→background transition; any
//! doubt (missing flag, store error) reads as "channel inactive" so the
//! dispatcher falls back to the self-sufficient direct path.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::storage::{keys, KeyValueStore, StorageError};
use crate::types::AppState;

/// A point-in-time read of every liveness entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LivenessSnapshot {
    pub process_alive: bool,
    pub live_channel_active: bool,
    pub base_url: Option<String>,
    pub last_app_state: Option<AppState>,
}

impl LivenessSnapshot {
    /// Descriptor reported with a direct dispatch
    pub fn app_state(&self) -> AppState {
        if !self.process_alive {
            return AppState::Killed;
        }
        match self.last_app_state {
            // The live channel is inactive, so the UI cannot be in front
            Some(AppState::Foreground) | None => AppState::Background,
            Some(state) => state,
        }
    }
}

#[derive(Clone)]
pub struct LivenessRegistry {
    store: Arc<dyn KeyValueStore>,
}

impl LivenessRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Whether the foreground UI is consuming the live event stream.
    /// A live process with an inactive channel counts as inactive.
    pub fn is_foreground_channel_active(&self) -> bool {
        match self.store.get_bool(keys::LIVE_CHANNEL_ACTIVE) {
            Ok(Some(active)) => active,
            Ok(None) => false,
            Err(e) => {
                warn!("Liveness unreadable, assuming channel inactive: {}", e);
                false
            }
        }
    }

    pub fn snapshot(&self) -> LivenessSnapshot {
        let read_bool = |key: &str| match self.store.get_bool(key) {
            Ok(v) => v.unwrap_or(false),
            Err(e) => {
                warn!("Failed to read {}: {}", key, e);
                false
            }
        };
        let read_string = |key: &str| match self.store.get_string(key) {
            Ok(v) => v.filter(|s| !s.is_empty()),
            Err(e) => {
                warn!("Failed to read {}: {}", key, e);
                None
            }
        };

        LivenessSnapshot {
            process_alive: read_bool(keys::PROCESS_ALIVE),
            live_channel_active: read_bool(keys::LIVE_CHANNEL_ACTIVE),
            base_url: read_string(keys::BASE_URL),
            last_app_state: read_string(keys::LAST_APP_STATE).and_then(|s| AppState::parse(&s)),
        }
    }

    /// Last known location, if the location collaborator cached one
    pub fn last_location(&self) -> Option<(f64, f64)> {
        let lat = self.store.get_f64(keys::LAST_LATITUDE).ok().flatten()?;
        let lng = self.store.get_f64(keys::LAST_LONGITUDE).ok().flatten()?;
        Some((lat, lng))
    }

    // --- Writer side, driven by the foreground lifecycle ---

    /// UI became visible
    pub fn on_ui_visible(&self) -> Result<(), StorageError> {
        self.store.put_bool(keys::PROCESS_ALIVE, true)?;
        self.store.put_string(keys::LAST_APP_STATE, AppState::Foreground.as_str())?;
        debug!("Liveness: UI visible");
        Ok(())
    }

    /// UI stopped (backgrounded, screen locked). The process stays alive.
    pub fn on_ui_stopped(&self) -> Result<(), StorageError> {
        self.store.put_bool(keys::LIVE_CHANNEL_ACTIVE, false)?;
        self.store.put_string(keys::LAST_APP_STATE, AppState::Background.as_str())?;
        debug!("Liveness: UI stopped");
        Ok(())
    }

    /// UI fully destroyed
    pub fn on_ui_destroyed(&self) -> Result<(), StorageError> {
        self.store.put_bool(keys::LIVE_CHANNEL_ACTIVE, false)?;
        self.store.put_bool(keys::PROCESS_ALIVE, false)?;
        self.store.put_string(keys::LAST_APP_STATE, AppState::Killed.as_str())?;
        info!("Liveness: UI destroyed");
        Ok(())
    }

    /// Live stream consumption started or stopped
    pub fn set_live_channel(&self, active: bool) -> Result<(), StorageError> {
        self.store.put_bool(keys::LIVE_CHANNEL_ACTIVE, active)?;
        debug!("Liveness: live channel {}", if active { "active" } else { "inactive" });
        Ok(())
    }

    pub fn set_app_state(&self, state: AppState) -> Result<(), StorageError> {
        self.store.put_string(keys::LAST_APP_STATE, state.as_str())
    }

    pub fn set_base_url(&self, url: &str) -> Result<(), StorageError> {
        self.store.put_string(keys::BASE_URL, url)
    }

    pub fn set_location(&self, lat: f64, lng: f64) -> Result<(), StorageError> {
        self.store.put_f64(keys::LAST_LATITUDE, lat)?;
        self.store.put_f64(keys::LAST_LONGITUDE, lng)
    }
}

/// Cached bearer token. Issued elsewhere; only read and invalidated here.
#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The cached token; empty or unreadable counts as absent
    pub fn token(&self) -> Option<String> {
        match self.store.get_string(keys::AUTH_TOKEN) {
            Ok(token) => token.filter(|t| !t.trim().is_empty()),
            Err(e) => {
                warn!("Credential unreadable: {}", e);
                None
            }
        }
    }

    /// Written by the authentication collaborator
    pub fn save(&self, token: &str) -> Result<(), StorageError> {
        self.store.put_string(keys::AUTH_TOKEN, token)
    }

    /// Clear after an authorization rejection
    pub fn invalidate(&self) -> Result<(), StorageError> {
        info!("🔑 Cached credential invalidated");
        self.store.remove(keys::AUTH_TOKEN)
    }
}
