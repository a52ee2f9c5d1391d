//! Locally applied values that shadow server data for a short grace window
//!
//! A value recorded here wins over whatever the server reports until the
//! window expires, so a user action is not visually undone by a response that
//! was produced before the server saw it.

use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Override<V> {
    value: V,
    recorded_at: Instant,
}

#[derive(Debug)]
pub struct OptimisticOverrides<V> {
    entries: DashMap<String, Override<V>>,
    grace: Duration,
}

impl<V: Clone> OptimisticOverrides<V> {
    pub fn new(grace: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            grace,
        }
    }

    pub fn record(&self, key: &str, value: V) {
        self.record_at(key, value, Instant::now());
    }

    /// Last writer wins
    pub fn record_at(&self, key: &str, value: V, now: Instant) {
        self.entries.insert(key.to_string(), Override { value, recorded_at: now });
    }

    pub fn resolve(&self, key: &str, incoming: V) -> V {
        self.resolve_at(key, incoming, Instant::now())
    }

    /// The local value while inside the grace window, otherwise the incoming
    /// value. Expired entries are dropped on the way.
    pub fn resolve_at(&self, key: &str, incoming: V, now: Instant) -> V {
        if let Some(entry) = self.entries.get(key) {
            if now.saturating_duration_since(entry.recorded_at) < self.grace {
                return entry.value.clone();
            }
        }
        self.entries
            .remove_if(key, |_, entry| now.saturating_duration_since(entry.recorded_at) >= self.grace);
        incoming
    }

    pub fn clear(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_value_wins_inside_window() {
        let overrides = OptimisticOverrides::new(Duration::from_secs(5));
        let t0 = Instant::now();
        overrides.record_at("mint", true, t0);

        assert!(overrides.resolve_at("mint", false, t0 + Duration::from_secs(4)));
        assert!(!overrides.resolve_at("mint", false, t0 + Duration::from_secs(5)));
        assert!(overrides.is_empty());
    }

    #[test]
    fn test_last_writer_wins() {
        let overrides = OptimisticOverrides::new(Duration::from_secs(5));
        let t0 = Instant::now();
        overrides.record_at("mint", 1, t0);
        overrides.record_at("mint", 2, t0 + Duration::from_secs(1));
        assert_eq!(overrides.resolve_at("mint", 0, t0 + Duration::from_secs(5)), 2);
    }

    #[test]
    fn test_unknown_key_passes_through() {
        let overrides: OptimisticOverrides<u8> = OptimisticOverrides::new(Duration::from_secs(5));
        assert_eq!(overrides.resolve("other", 7), 7);
    }
}
