//! Operation cache.
//!
//! Memoizes side-effect-free tool calls within a TTL so the model re-reading
//! the same file costs nothing. Only an allowlisted set of read-only tools
//! is eligible; writes never enter the cache. A separate per-iteration trace
//! lets the loop detector spot same-iteration duplicates without touching
//! the cache itself.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use sov_domain::config::CacheConfig;
use sov_domain::message::{ToolParams, ToolResult};

/// Tools whose results are safe to memoize.
const CACHEABLE_TOOLS: &[&str] = &["read_file", "list_directory", "code_search", "git_status"];

#[derive(Debug, Clone)]
struct CachedOperation {
    result: ToolResult,
    inserted_at: Instant,
    hit_count: u64,
}

/// Cache statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheStats {
    pub total_operations: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub unique_operations: usize,
    pub current_size: usize,
    pub max_size: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / self.total_operations as f64
    }
}

pub struct OperationCache {
    ttl: Duration,
    max_size: usize,
    entries: HashMap<String, CachedOperation>,
    total_operations: u64,
    hits: u64,
    misses: u64,
    /// Keys looked up in the current iteration.
    iteration_trace: HashSet<String>,
}

impl OperationCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.ttl_secs),
            max_size: config.max_size,
            entries: HashMap::new(),
            total_operations: 0,
            hits: 0,
            misses: 0,
            iteration_trace: HashSet::new(),
        }
    }

    pub fn is_eligible(tool: &str) -> bool {
        CACHEABLE_TOOLS.contains(&tool)
    }

    /// `toolName:hash(sorted params)`; params iterate lexicographically,
    /// so equal param sets always produce equal keys.
    fn make_key(tool: &str, params: &ToolParams) -> String {
        let mut hasher = Sha256::new();
        for (key, value) in params {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\x1f");
        }
        format!("{tool}:{}", hex::encode(hasher.finalize()))
    }

    /// Cached result for an eligible, unexpired entry; `None` otherwise.
    pub fn get(&mut self, tool: &str, params: &ToolParams) -> Option<ToolResult> {
        self.total_operations += 1;

        if !Self::is_eligible(tool) {
            self.misses += 1;
            return None;
        }

        let key = Self::make_key(tool, params);
        self.iteration_trace.insert(key.clone());

        let expired = self
            .entries
            .get(&key)
            .map(|op| op.inserted_at.elapsed() > self.ttl)
            .unwrap_or(false);
        if expired {
            self.entries.remove(&key);
        }

        match self.entries.get_mut(&key) {
            Some(op) => {
                op.hit_count += 1;
                self.hits += 1;
                tracing::debug!(tool, "operation cache hit");
                Some(op.result.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store a result; only eligible tools with successful results are kept.
    pub fn set(&mut self, tool: &str, params: &ToolParams, result: &ToolResult) {
        if !Self::is_eligible(tool) || !result.success {
            return;
        }

        if self.entries.len() >= self.max_size {
            self.evict();
        }

        self.entries.insert(
            Self::make_key(tool, params),
            CachedOperation {
                result: result.clone(),
                inserted_at: Instant::now(),
                hit_count: 0,
            },
        );
    }

    /// Drop expired entries first; if still at capacity, drop the oldest.
    fn evict(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, op| op.inserted_at.elapsed() <= ttl);

        if self.entries.len() >= self.max_size {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, op)| op.inserted_at)
                .map(|(key, _)| key.clone())
            {
                self.entries.remove(&oldest);
            }
        }
    }

    /// Whether this exact operation was already attempted this iteration.
    pub fn seen_this_iteration(&self, tool: &str, params: &ToolParams) -> bool {
        self.iteration_trace.contains(&Self::make_key(tool, params))
    }

    /// Clear the per-iteration trace without touching cached results.
    pub fn reset_iteration(&mut self) {
        self.iteration_trace.clear();
    }

    /// Empty the cache and statistics.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.iteration_trace.clear();
        self.total_operations = 0;
        self.hits = 0;
        self.misses = 0;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            total_operations: self.total_operations,
            cache_hits: self.hits,
            cache_misses: self.misses,
            unique_operations: self.entries.len(),
            current_size: self.entries.len(),
            max_size: self.max_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> OperationCache {
        OperationCache::new(&CacheConfig::default())
    }

    fn cache_with(ttl_secs: u64, max_size: usize) -> OperationCache {
        OperationCache::new(&CacheConfig { ttl_secs, max_size })
    }

    fn path_params(path: &str) -> ToolParams {
        let mut params = ToolParams::new();
        params.insert("path".into(), path.into());
        params
    }

    #[test]
    fn miss_then_hit_returns_identical_result() {
        let mut cache = cache();
        let params = path_params("/tmp/a.txt");

        assert!(cache.get("read_file", &params).is_none());
        let stored = ToolResult::ok("file contents");
        cache.set("read_file", &params, &stored);

        let hit = cache.get("read_file", &params).unwrap();
        assert_eq!(hit, stored);

        let stats = cache.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn ineligible_tools_bypass_cache() {
        let mut cache = cache();
        let params = path_params("/tmp/a.txt");

        cache.set("write_file", &params, &ToolResult::ok("done"));
        assert!(cache.get("write_file", &params).is_none());
        assert_eq!(cache.stats().unique_operations, 0);
    }

    #[test]
    fn failed_results_are_not_stored() {
        let mut cache = cache();
        let params = path_params("/missing");

        cache.set("read_file", &params, &ToolResult::err("no such file"));
        assert!(cache.get("read_file", &params).is_none());
    }

    #[test]
    fn different_params_are_different_keys() {
        let mut cache = cache();
        cache.set("read_file", &path_params("/a"), &ToolResult::ok("A"));
        cache.set("read_file", &path_params("/b"), &ToolResult::ok("B"));

        assert_eq!(cache.get("read_file", &path_params("/a")).unwrap().output, "A");
        assert_eq!(cache.get("read_file", &path_params("/b")).unwrap().output, "B");
    }

    #[test]
    fn expired_entries_are_misses() {
        let mut cache = cache_with(0, 100); // zero TTL: everything expires
        let params = path_params("/a");
        cache.set("read_file", &params, &ToolResult::ok("A"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("read_file", &params).is_none());
    }

    #[test]
    fn capacity_overflow_evicts_oldest() {
        let mut cache = cache_with(3600, 2);
        cache.set("read_file", &path_params("/first"), &ToolResult::ok("1"));
        std::thread::sleep(Duration::from_millis(5));
        cache.set("read_file", &path_params("/second"), &ToolResult::ok("2"));
        std::thread::sleep(Duration::from_millis(5));
        cache.set("read_file", &path_params("/third"), &ToolResult::ok("3"));

        assert!(cache.get("read_file", &path_params("/first")).is_none());
        assert!(cache.get("read_file", &path_params("/second")).is_some());
        assert!(cache.get("read_file", &path_params("/third")).is_some());
    }

    #[test]
    fn iteration_trace_resets_without_losing_entries() {
        let mut cache = cache();
        let params = path_params("/a");

        cache.get("read_file", &params);
        assert!(cache.seen_this_iteration("read_file", &params));

        cache.set("read_file", &params, &ToolResult::ok("A"));
        cache.reset_iteration();

        assert!(!cache.seen_this_iteration("read_file", &params));
        // The cached value survived the iteration reset.
        assert!(cache.get("read_file", &params).is_some());
    }

    #[test]
    fn clear_empties_everything() {
        let mut cache = cache();
        let params = path_params("/a");
        cache.set("read_file", &params, &ToolResult::ok("A"));
        cache.get("read_file", &params);

        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.total_operations, 0);
        assert_eq!(stats.unique_operations, 0);
        assert!(cache.get("read_file", &params).is_none());
    }
}
