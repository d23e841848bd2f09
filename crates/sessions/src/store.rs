//! The expiring session store shared by every manager.
//!
//! A two-level map `partition → key → SessionRecord` behind a single
//! mutex.  Reads evict what they find expired, inside the same critical
//! section as the lookup, so two callers can never both observe a record
//! that a third is evicting.  No I/O happens while the lock is held.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

use ks_domain::Timestamp;

use crate::record::SessionRecord;

/// Thread-safe `(partition, key) → SessionRecord` map with lazy expiry.
///
/// Managers without a natural partition use `P = ()`.
pub struct ExpiringSessionStore<P, K, V> {
    partitions: Mutex<HashMap<P, HashMap<K, SessionRecord<V>>>>,
}

impl<P, K, V> Default for ExpiringSessionStore<P, K, V> {
    fn default() -> Self {
        Self {
            partitions: Mutex::new(HashMap::new()),
        }
    }
}

impl<P, K, V> ExpiringSessionStore<P, K, V>
where
    P: Eq + Hash + Clone,
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite.
    pub fn put(&self, partition: P, key: K, record: SessionRecord<V>) {
        self.partitions
            .lock()
            .entry(partition)
            .or_default()
            .insert(key, record);
    }

    /// Look up a live record.  An expired record is evicted and reported
    /// exactly like one that never existed.
    pub fn get(&self, partition: &P, key: &K, now: Timestamp) -> Option<SessionRecord<V>> {
        self.get_fresh(partition, key, now, 0)
    }

    /// Like [`get`](Self::get), but a record expiring within `margin`
    /// seconds is also treated as gone (and evicted).
    pub fn get_fresh(
        &self,
        partition: &P,
        key: &K,
        now: Timestamp,
        margin: i64,
    ) -> Option<SessionRecord<V>> {
        let mut partitions = self.partitions.lock();
        let sessions = partitions.get_mut(partition)?;

        let stale = sessions.get(key)?.is_stale(now, margin);
        if stale {
            sessions.remove(key);
            return None;
        }
        sessions.get(key).cloned()
    }

    /// Swap the subject of a live record, keeping its creation and expiry
    /// times.  Returns `false` (evicting anything expired) when there is no
    /// live record to refresh.
    pub fn replace_subject(&self, partition: &P, key: &K, subject: V, now: Timestamp) -> bool {
        let mut partitions = self.partitions.lock();
        let Some(sessions) = partitions.get_mut(partition) else {
            return false;
        };

        match sessions.get(key) {
            None => false,
            Some(record) if record.is_expired(now) => {
                sessions.remove(key);
                false
            }
            Some(record) => {
                let refreshed = record.with_subject(subject);
                sessions.insert(key.clone(), refreshed);
                true
            }
        }
    }

    /// Replace a live record with one expiring at `expires_at`.  Returns the
    /// new record, or `None` (evicting anything expired) when absent.
    pub fn renew(
        &self,
        partition: &P,
        key: &K,
        now: Timestamp,
        expires_at: Timestamp,
    ) -> Option<SessionRecord<V>> {
        let mut partitions = self.partitions.lock();
        let sessions = partitions.get_mut(partition)?;

        if sessions.get(key)?.is_expired(now) {
            sessions.remove(key);
            return None;
        }

        let renewed = {
            let current = sessions.get(key)?;
            SessionRecord {
                subject: current.subject.clone(),
                created_at: current.created_at,
                expires_at,
            }
        };
        sessions.insert(key.clone(), renewed.clone());
        Some(renewed)
    }

    /// Remove if present.  Returns whether anything was removed.
    pub fn delete(&self, partition: &P, key: &K) -> bool {
        let mut partitions = self.partitions.lock();
        let Some(sessions) = partitions.get_mut(partition) else {
            return false;
        };
        let removed = sessions.remove(key).is_some();
        if sessions.is_empty() {
            partitions.remove(partition);
        }
        removed
    }

    /// Remove every record matching `pred`.  Returns the number removed.
    pub fn remove_where<F>(&self, mut pred: F) -> usize
    where
        F: FnMut(&P, &K, &SessionRecord<V>) -> bool,
    {
        let mut partitions = self.partitions.lock();
        let mut removed = 0;
        for (partition, sessions) in partitions.iter_mut() {
            let before = sessions.len();
            sessions.retain(|key, record| !pred(partition, key, record));
            removed += before - sessions.len();
        }
        partitions.retain(|_, sessions| !sessions.is_empty());
        removed
    }

    /// Evict every expired record.  Returns the number evicted.
    pub fn sweep_expired(&self, now: Timestamp) -> usize {
        self.remove_where(|_, _, record| record.is_expired(now))
    }

    /// Whether a record is physically present, expired or not.
    pub fn contains(&self, partition: &P, key: &K) -> bool {
        self.partitions
            .lock()
            .get(partition)
            .is_some_and(|sessions| sessions.contains_key(key))
    }

    pub fn clear(&self) {
        self.partitions.lock().clear();
    }

    /// Atomically replace the whole contents.
    pub fn replace_all<I>(&self, records: I)
    where
        I: IntoIterator<Item = (P, K, SessionRecord<V>)>,
    {
        let mut fresh: HashMap<P, HashMap<K, SessionRecord<V>>> = HashMap::new();
        for (partition, key, record) in records {
            fresh.entry(partition).or_default().insert(key, record);
        }
        *self.partitions.lock() = fresh;
    }

    /// Records physically present, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.partitions.lock().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
