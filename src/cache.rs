use crate::models::OptimizationResult;
use crate::search_space::SearchBounds;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Optimisation results keyed by `(kind, bounds)`.
///
/// Entries are written once and never evicted; the cache lives as long as the
/// session that owns it. Clones share the same map.
#[derive(Clone, Default)]
pub struct ParameterCache {
    local_cache: Arc<DashMap<String, OptimizationResult>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl ParameterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_cache_key(bounds: &SearchBounds) -> String {
        bounds.cache_key()
    }

    pub fn check_cache(&self, bounds: &SearchBounds) -> Option<OptimizationResult> {
        let cache_key = Self::get_cache_key(bounds);
        match self.local_cache.get(&cache_key) {
            Some(result) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                log::debug!("Cache hit for {}", cache_key);
                Some(result.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Keeps the first result stored under a key.
    pub fn store_cache(&self, bounds: &SearchBounds, result: OptimizationResult) {
        self.local_cache
            .entry(Self::get_cache_key(bounds))
            .or_insert(result);
    }

    pub fn len(&self) -> usize {
        self.local_cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local_cache.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StrategyConfig, StrategyKind};

    fn result(length: usize) -> OptimizationResult {
        let best = StrategyConfig::Cci {
            length,
            constant: 0.015,
        };
        OptimizationResult {
            kind: StrategyKind::Cci,
            bounds: SearchBounds::Cci {
                min_length: 5,
                max_length: 6,
            },
            best,
            best_return_percent: 1.0,
            top: Vec::new(),
            evaluated: 1,
            used_fallback: false,
        }
    }

    #[test]
    fn first_write_wins_and_counters_track_lookups() {
        let cache = ParameterCache::new();
        let bounds = SearchBounds::Cci {
            min_length: 5,
            max_length: 6,
        };
        assert!(cache.check_cache(&bounds).is_none());
        cache.store_cache(&bounds, result(5));
        cache.store_cache(&bounds, result(6));

        let shared = cache.clone();
        assert_eq!(shared.check_cache(&bounds), Some(result(5)));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }
}
