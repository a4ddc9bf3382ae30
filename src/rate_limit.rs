//! Daily passcode-send quota per approver identity.
//!
//! Buckets are keyed `identifier::YYYY-MM-DD` on the UTC calendar day.
//! Yesterday's bucket is simply never read again.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Monotonic counters. `increment` must be a single atomic read-modify-write.
pub trait CounterStore: Send + Sync {
    fn get(&self, key: &str) -> u32;
    fn increment(&self, key: &str) -> io::Result<u32>;
}

#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counts: DashMap<String, u32>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for MemoryCounterStore {
    fn get(&self, key: &str) -> u32 {
        self.counts.get(key).map(|c| *c.value()).unwrap_or(0)
    }

    fn increment(&self, key: &str) -> io::Result<u32> {
        // The entry guard holds the shard lock across read and write.
        let mut entry = self.counts.entry(key.to_string()).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }
}

/// Counters persisted as a pretty-printed JSON object. The whole map is
/// rewritten (temp file + rename) inside the same lock as the increment.
pub struct JsonCounterStore {
    path: PathBuf,
    counts: Mutex<HashMap<String, u32>>,
}

impl JsonCounterStore {
    /// Unreadable or malformed files start from an empty map.
    pub fn open(path: &Path) -> io::Result<Self> {
        let counts = match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("ignoring malformed rate-limit file {}: {e}", path.display());
                HashMap::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e),
        };
        Ok(Self {
            path: path.to_path_buf(),
            counts: Mutex::new(counts),
        })
    }

    fn persist(&self, counts: &HashMap<String, u32>) -> io::Result<()> {
        let tmp_path = self.path.with_extension("json.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        serde_json::to_writer_pretty(&mut writer, counts)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&tmp_path, &self.path)
    }
}

impl CounterStore for JsonCounterStore {
    fn get(&self, key: &str) -> u32 {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.get(key).copied().unwrap_or(0)
    }

    fn increment(&self, key: &str) -> io::Result<u32> {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = counts.clone();
        let value = next.entry(key.to_string()).or_insert(0);
        *value += 1;
        let value = *value;
        self.persist(&next)?;
        *counts = next;
        Ok(value)
    }
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    daily_limit: u32,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, daily_limit: u32) -> Self {
        Self { store, daily_limit }
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    /// `(allowed, remaining)` for today's bucket.
    pub fn can_send(&self, identifier: &str, now: DateTime<Utc>) -> (bool, u32) {
        let used = self.store.get(&bucket_key(identifier, now));
        (used < self.daily_limit, self.daily_limit.saturating_sub(used))
    }

    /// Count one confirmed send. Returns today's total. The increment may
    /// touch disk, so it runs on the blocking pool.
    pub async fn record_send(&self, identifier: &str, now: DateTime<Utc>) -> io::Result<u32> {
        let store = self.store.clone();
        let key = bucket_key(identifier, now);
        tokio::task::spawn_blocking(move || store.increment(&key))
            .await
            .map_err(io::Error::other)?
    }
}

pub fn bucket_key(identifier: &str, now: DateTime<Utc>) -> String {
    format!("{identifier}::{}", now.format("%Y-%m-%d"))
}
