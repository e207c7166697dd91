//! Bounded, TTL'd, least-recently-used memo of classification results.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use serde::Serialize;

use atlas_planner::Classification;

pub const DEFAULT_CAPACITY: usize = 64;
pub const DEFAULT_TTL: Duration = Duration::from_millis(300_000);

/// Keys are cut to this many characters after normalization.
const MAX_KEY_CHARS: usize = 200;

/// Trimmed, lower-cased, at most 200 characters.
pub fn normalize_key(message: &str) -> String {
    message
        .trim()
        .to_lowercase()
        .chars()
        .take(MAX_KEY_CHARS)
        .collect()
}

struct Entry {
    value: Classification,
    stored_at: Instant,
    /// Position in `recency`; larger is more recent.
    tick: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// Exact LRU with a fixed TTL checked on lookup.
///
/// Expired entries are dropped when looked up, not in the background.
pub struct IntentCache {
    entries: HashMap<String, Entry>,
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    capacity: usize,
    ttl: Duration,
    stats: CacheStats,
}

impl IntentCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            recency: BTreeMap::new(),
            next_tick: 0,
            capacity: capacity.max(1),
            ttl,
            stats: CacheStats::default(),
        }
    }

    pub fn get(&mut self, message: &str) -> Option<Classification> {
        self.get_at(message, Instant::now())
    }

    pub fn get_at(&mut self, message: &str, now: Instant) -> Option<Classification> {
        let key = normalize_key(message);
        let Some(entry) = self.entries.get(&key) else {
            self.stats.misses += 1;
            return None;
        };

        if now.saturating_duration_since(entry.stored_at) > self.ttl {
            self.remove(&key);
            self.stats.expirations += 1;
            self.stats.misses += 1;
            return None;
        }

        let tick = self.bump();
        let entry = self.entries.get_mut(&key)?;
        self.recency.remove(&entry.tick);
        entry.tick = tick;
        self.recency.insert(tick, key);
        self.stats.hits += 1;
        Some(entry.value.clone())
    }

    pub fn set(&mut self, message: &str, value: Classification) {
        self.set_at(message, value, Instant::now());
    }

    pub fn set_at(&mut self, message: &str, value: Classification, now: Instant) {
        let key = normalize_key(message);
        let tick = self.bump();

        if let Some(entry) = self.entries.get_mut(&key) {
            self.recency.remove(&entry.tick);
            entry.value = value;
            entry.stored_at = now;
            entry.tick = tick;
            self.recency.insert(tick, key);
            return;
        }

        if self.entries.len() >= self.capacity {
            if let Some((_, oldest)) = self.recency.pop_first() {
                self.entries.remove(&oldest);
                self.stats.evictions += 1;
            }
        }

        self.recency.insert(tick, key.clone());
        self.entries.insert(
            key,
            Entry {
                value,
                stored_at: now,
                tick,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.recency.remove(&entry.tick);
        }
    }
}

impl Default for IntentCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}
