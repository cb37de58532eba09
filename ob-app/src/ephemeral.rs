//! TTL-keyed in-memory stores for approval workflow state.
//!
//! Entries carry an absolute expiry. Expired entries are pruned on every
//! write and are reported exactly like missing ones. State is lost on restart.

use crate::clock::{Clock, IdGenerator};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

impl<V> Entry<V> {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

pub struct EphemeralStore<V> {
    name: &'static str,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    entries: Mutex<HashMap<String, Entry<V>>>,
}

impl<V: Clone> EphemeralStore<V> {
    pub fn new(
        name: &'static str,
        ttl: Duration,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            name,
            ttl,
            clock,
            ids,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Store under a freshly generated reference id.
    pub fn store(&self, value: V) -> String {
        let now = self.clock.now();
        let mut entries = self.lock();
        prune(&mut entries, now);
        let mut key = self.ids.next_id();
        while entries.contains_key(&key) {
            key = self.ids.next_id();
        }
        entries.insert(
            key.clone(),
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
        tracing::debug!(store = self.name, ref_id = %key, live = entries.len(), "ephemeral record stored");
        key
    }

    /// Store under a caller-chosen key, replacing any previous entry.
    pub fn store_at(&self, key: &str, value: V) {
        let now = self.clock.now();
        let mut entries = self.lock();
        prune(&mut entries, now);
        let replaced = entries
            .insert(
                key.to_string(),
                Entry {
                    value,
                    expires_at: now + self.ttl,
                },
            )
            .is_some();
        tracing::debug!(store = self.name, key, replaced, "ephemeral record stored");
    }

    /// Destructive read. Returns the record at most once.
    pub fn consume(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let entry = self.lock().remove(key)?;
        if entry.is_expired_at(now) {
            tracing::debug!(store = self.name, key, "ephemeral record expired");
            return None;
        }
        Some(entry.value)
    }

    /// Non-destructive read.
    pub fn peek(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        self.lock()
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.value.clone())
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.lock()
            .values()
            .filter(|entry| !entry.is_expired_at(now))
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry<V>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn prune<V>(entries: &mut HashMap<String, Entry<V>>, now: DateTime<Utc>) {
    entries.retain(|_, entry| !entry.is_expired_at(now));
}
