//! Durable key-value store shared by the execution contexts, backed by sled.
//!
//! Values are JSON-encoded so flags and strings keep their type. Writes are
//! flushed before returning, but readers in another context may still
//! observe the previous value for a short while: nothing here is
//! transactional across contexts.

use sled::{Db, Tree};
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::dispatch::DispatchRecord;

/// Keys written by the foreground lifecycle and the credential collaborator
pub mod keys {
    pub const AUTH_TOKEN: &str = "auth_token";
    pub const PROCESS_ALIVE: &str = "process_alive";
    pub const LIVE_CHANNEL_ACTIVE: &str = "live_channel_active";
    pub const BASE_URL: &str = "base_url";
    pub const LAST_APP_STATE: &str = "last_app_state";
    pub const LAST_LATITUDE: &str = "last_latitude";
    pub const LAST_LONGITUDE: &str = "last_longitude";
    /// Set while background monitoring should survive a process restart
    pub const MONITORING_ENABLED: &str = "monitoring_enabled";
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Eventually-consistent key-value interface used across contexts
pub trait KeyValueStore: Send + Sync {
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn put_raw(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    fn get_string(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.get_raw(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_bool(&self, key: &str) -> Result<Option<bool>, StorageError> {
        match self.get_raw(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_f64(&self, key: &str) -> Result<Option<f64>, StorageError> {
        match self.get_raw(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_string(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.put_raw(key, serde_json::to_vec(value)?)
    }

    fn put_bool(&self, key: &str, value: bool) -> Result<(), StorageError> {
        self.put_raw(key, serde_json::to_vec(&value)?)
    }

    fn put_f64(&self, key: &str, value: f64) -> Result<(), StorageError> {
        self.put_raw(key, serde_json::to_vec(&value)?)
    }
}

/// Persistent storage for flags, credentials and dispatch history
pub struct Storage {
    db: Db,
    settings: Tree,
    dispatches: Tree,
}

impl Storage {
    /// Open or create storage at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let settings = db.open_tree("settings")?;
        let dispatches = db.open_tree("dispatches")?;

        info!("💾 Storage opened");

        Ok(Self { db, settings, dispatches })
    }

    /// Append a dispatch attempt to the history
    pub fn save_dispatch(&self, record: &DispatchRecord) -> Result<(), StorageError> {
        let id = self.db.generate_id()?;
        let value = serde_json::to_vec(record)?;
        self.dispatches.insert(id.to_be_bytes(), value)?;
        self.db.flush()?;
        Ok(())
    }

    /// Most recent dispatch attempts, newest first
    pub fn recent_dispatches(&self, limit: usize) -> Result<Vec<DispatchRecord>, StorageError> {
        let mut records = Vec::new();
        for result in self.dispatches.iter().rev().take(limit) {
            let (_, value) = result?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

impl KeyValueStore for Storage {
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.settings.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn put_raw(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.settings.insert(key.as_bytes(), value)?;
        self.db.flush()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.settings.remove(key.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }
}
