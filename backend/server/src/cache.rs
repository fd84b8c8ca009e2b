//! Small TTL map in front of the store for read-heavy, rarely changing data.
//!
//! Every [`TtlCache::delete`] bumps the key's generation. A reader that loaded
//! from the store before the delete passes the generation it saw to
//! [`TtlCache::set_if_current`] and its stale copy is dropped.
use std::time::{Duration, Instant};

use dashmap::DashMap;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

pub struct TtlCache<V> {
    entries: DashMap<String, (V, Instant)>,
    generations: DashMap<String, u64>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            generations: DashMap::new(),
            ttl,
        }
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.ttl);
    }

    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.entries.insert(key.into(), (value, Instant::now() + ttl));
    }

    pub fn get(&self, key: &str) -> Option<V> {
        {
            let entry = self.entries.get(key)?;
            if Instant::now() <= entry.1 {
                return Some(entry.0.clone());
            }
        }

        // The read guard is gone; a writer may have refreshed the key meanwhile.
        self.entries
            .remove_if(key, |_, (_, expires)| Instant::now() > *expires);
        None
    }

    pub fn generation(&self, key: &str) -> u64 {
        self.generations.get(key).map_or(0, |generation| *generation)
    }

    /// Stores the value only if the key was not deleted since `generation`
    /// was read. Returns whether it was stored.
    pub fn set_if_current(&self, key: impl Into<String>, value: V, generation: u64) -> bool {
        let key = key.into();
        // Held until the insert lands so a concurrent delete waits for it.
        let current = self.generations.entry(key.clone()).or_insert(0);
        if *current != generation {
            return false;
        }

        self.entries
            .insert(key, (value, Instant::now() + self.ttl));
        true
    }

    pub fn delete(&self, key: &str) {
        let mut generation = self.generations.entry(key.to_string()).or_insert(0);
        *generation += 1;
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drops every expired entry, returns how many went.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires)| now <= *expires);

        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

pub mod keys {
    use uuid::Uuid;

    use crate::models::PeriodType;

    pub fn colleges() -> &'static str {
        "colleges:all"
    }

    pub fn leaderboard(college_id: Uuid, period: PeriodType) -> String {
        format!("leaderboard:{college_id}:{period}")
    }
}
