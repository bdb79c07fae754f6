//! Recent dispatch attempts for the bridge's alert feed.
//! Ring buffer in front of the durable history.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::dispatch::DispatchRecord;

const MAX_RECORDS: usize = 200;

/// Thread-safe alert log with ring buffer
#[derive(Clone)]
pub struct AlertLog {
    records: Arc<RwLock<VecDeque<DispatchRecord>>>,
}

impl AlertLog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(VecDeque::with_capacity(MAX_RECORDS))),
        }
    }

    /// Seed from persisted history (given newest first)
    pub async fn preload(&self, newest_first: Vec<DispatchRecord>) {
        let mut records = self.records.write().await;
        for record in newest_first.into_iter().take(MAX_RECORDS).rev() {
            records.push_back(record);
        }
    }

    pub async fn push(&self, record: DispatchRecord) {
        let mut records = self.records.write().await;
        if records.len() >= MAX_RECORDS {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Latest N records, newest first
    pub async fn latest(&self, limit: usize) -> Vec<DispatchRecord> {
        let records = self.records.read().await;
        records.iter().rev().take(limit).cloned().collect()
    }
}

impl Default for AlertLog {
    fn default() -> Self {
        Self::new()
    }
}
