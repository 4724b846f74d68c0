// Pattern cache store
//
// Content-addressed map from diagnostic signature to a previously accepted
// fix. Capacity is enforced by least-recently-used eviction; a fix that
// keeps failing verification is poisoned out after three consecutive
// penalties so it is never offered again.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::ot::Edit;

/// Penalty streak that removes an entry.
const POISON_STRIKES: u8 = 3;

/// An accepted fix: the replacement text the backend produced and the edits
/// it was applied as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedFix {
    pub replacement: String,
    pub edits: Vec<Edit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    fix: CachedFix,
    /// Times this fix was applied without re-triggering the diagnostic.
    confidence: u32,
    last_used: DateTime<Utc>,
    /// Consecutive verification failures. Reset by `record`.
    strikes: u8,
    /// Monotonic touch counter; exact LRU order even when timestamps tie.
    #[serde(skip)]
    tick: u64,
}

/// Counters surfaced by `wren cache stats`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub poisoned: u64,
}

/// LRU-bounded signature → fix store.
#[derive(Debug)]
pub struct PatternCache {
    entries: HashMap<String, CacheEntry>,
    capacity: usize,
    clock: u64,
    stats: CacheStats,
}

impl PatternCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            clock: 0,
            stats: CacheStats::default(),
        }
    }

    /// Look up a fix. Refreshes recency on hit; a miss has no side effect
    /// beyond the counter.
    pub fn lookup(&mut self, key: &str) -> Option<CachedFix> {
        self.clock += 1;
        let clock = self.clock;
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.last_used = Utc::now();
                entry.tick = clock;
                self.stats.hits += 1;
                Some(entry.fix.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Insert or refresh an entry. Refreshing an existing signature bumps
    /// its confidence (a reuse that survived verification) and clears any
    /// penalty streak. Enforces the capacity bound by evicting the
    /// least-recently-used entry.
    pub fn record(&mut self, key: String, fix: CachedFix) {
        self.clock += 1;
        let clock = self.clock;
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.fix = fix;
                entry.confidence += 1;
                entry.strikes = 0;
                entry.last_used = Utc::now();
                entry.tick = clock;
            }
            None => {
                self.entries.insert(
                    key,
                    CacheEntry {
                        fix,
                        confidence: 1,
                        last_used: Utc::now(),
                        strikes: 0,
                        tick: clock,
                    },
                );
                if self.entries.len() > self.capacity {
                    self.evict_lru();
                }
            }
        }
    }

    /// Penalize a cached fix that was applied but left the same diagnostic
    /// standing. Three consecutive penalties remove the entry.
    pub fn penalize(&mut self, key: &str) {
        let poisoned = match self.entries.get_mut(key) {
            Some(entry) => {
                entry.strikes += 1;
                entry.confidence = entry.confidence.saturating_sub(1);
                entry.strikes >= POISON_STRIKES
            }
            None => false,
        };
        if poisoned {
            self.entries.remove(key);
            self.stats.poisoned += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            ..self.stats
        }
    }

    fn evict_lru(&mut self) {
        if let Some(key) = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.tick)
            .map(|(k, _)| k.clone())
        {
            self.entries.remove(&key);
            self.stats.evictions += 1;
        }
    }

    /// Load a persisted cache. Best-effort: a missing file yields an empty
    /// cache, and a corrupt one is logged and discarded, never fatal to
    /// startup.
    pub fn load_from_file(path: &Path, capacity: usize) -> Self {
        let mut cache = Self::new(capacity);
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return cache,
        };
        let stored: HashMap<String, CacheEntry> = match serde_json::from_str(&contents) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Corrupt pattern cache, starting empty");
                return cache;
            }
        };

        // Rebuild LRU ticks from persisted timestamps.
        let mut ordered: Vec<(String, CacheEntry)> = stored.into_iter().collect();
        ordered.sort_by_key(|(_, e)| e.last_used);
        for (key, mut entry) in ordered {
            cache.clock += 1;
            entry.tick = cache.clock;
            cache.entries.insert(key, entry);
        }
        while cache.entries.len() > cache.capacity {
            cache.evict_lru();
        }
        cache
    }

    /// Persist the cache as a flat signature → entry JSON mapping.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.entries)
            .context("Failed to serialize pattern cache")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write pattern cache: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(text: &str) -> CachedFix {
        CachedFix {
            replacement: text.to_string(),
            edits: vec![Edit::insert(0, text)],
        }
    }

    #[test]
    fn test_lookup_after_record_returns_fix() {
        let mut cache = PatternCache::new(8);
        assert!(cache.lookup("sig-a").is_none());

        cache.record("sig-a".to_string(), fix("use foo;"));
        assert_eq!(cache.lookup("sig-a").unwrap().replacement, "use foo;");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_record_refresh_bumps_confidence_and_clears_strikes() {
        let mut cache = PatternCache::new(8);
        cache.record("sig".to_string(), fix("v1"));
        cache.penalize("sig");
        cache.penalize("sig");
        cache.record("sig".to_string(), fix("v1"));

        // Streak was reset: two more penalties are not enough to poison.
        cache.penalize("sig");
        cache.penalize("sig");
        assert!(cache.lookup("sig").is_some());
    }

    #[test]
    fn test_three_consecutive_penalties_poison_the_entry() {
        let mut cache = PatternCache::new(8);
        cache.record("sig".to_string(), fix("bad"));
        cache.penalize("sig");
        cache.penalize("sig");
        cache.penalize("sig");
        assert!(cache.lookup("sig").is_none());
        assert_eq!(cache.stats().poisoned, 1);
    }

    #[test]
    fn test_penalize_unknown_signature_is_a_no_op() {
        let mut cache = PatternCache::new(8);
        cache.penalize("never-seen");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let mut cache = PatternCache::new(2);
        cache.record("a".to_string(), fix("1"));
        cache.record("b".to_string(), fix("2"));

        // Touch "a" so "b" is the LRU when "c" arrives.
        cache.lookup("a");
        cache.record("c".to_string(), fix("3"));

        assert!(cache.lookup("b").is_none());
        assert!(cache.lookup("a").is_some());
        assert!(cache.lookup("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_persistence_round_trip_and_corrupt_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let mut cache = PatternCache::new(8);
        cache.record("sig".to_string(), fix("use foo;"));
        cache.save_to_file(&path).unwrap();

        let mut loaded = PatternCache::load_from_file(&path, 8);
        assert_eq!(loaded.lookup("sig").unwrap().replacement, "use foo;");

        std::fs::write(&path, "{ not json").unwrap();
        let empty = PatternCache::load_from_file(&path, 8);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_load_missing_file_starts_empty() {
        let cache = PatternCache::load_from_file(Path::new("/nonexistent/cache.json"), 4);
        assert!(cache.is_empty());
    }
}
