//! Unlock cache
//!
//! Every rule is monotonic in history: once unlocked it stays unlocked, and
//! its unlock date never moves. Cached entries are never removed.

use chrono::NaiveDate;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedUnlock {
    pub unlocked_at: NaiveDate,
    pub current_value: f64,
    pub target_value: f64,
}

#[derive(Debug, Default)]
pub struct AchievementCache {
    unlocked: RwLock<HashMap<String, CachedUnlock>>,
}

impl AchievementCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<CachedUnlock> {
        self.unlocked.read().get(id).cloned()
    }

    /// Record an unlock. Concurrent writers for the same id store the same value.
    pub fn insert(&self, id: &str, unlock: CachedUnlock) {
        self.unlocked.write().insert(id.to_string(), unlock);
    }

    pub fn is_unlocked(&self, id: &str) -> bool {
        self.unlocked.read().contains_key(id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.unlocked.read().len()
    }
}
