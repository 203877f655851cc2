//! Three-level cache: session-local, project-shared, global.
//!
//! Writes go through from the requested level down; reads walk up from L1
//! and promote hits. Every value carries its own expiry, checked on read,
//! and each level can be invalidated wholesale in O(1).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Default TTL for cached embeddings.
pub const EMBED_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default TTL for cached search results.
pub const SEARCH_TTL: Duration = Duration::from_secs(10 * 60);
/// Default TTL for cached session objects.
pub const SESSION_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    Session,
    Project,
    Global,
}

#[derive(Clone)]
struct CachedValue {
    value: Arc<Value>,
    expires_at: Instant,
}

#[derive(Default)]
struct LevelCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Per-level hit-rate report.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LevelStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsReport {
    pub session: LevelStats,
    pub project: LevelStats,
    pub global: LevelStats,
}

pub struct CacheService {
    session: Cache<String, CachedValue>,
    project: Cache<String, CachedValue>,
    global: Cache<String, CachedValue>,
    counters: [LevelCounters; 3],
}

impl CacheService {
    pub fn new(capacity_per_level: u64) -> Self {
        let build = || Cache::builder().max_capacity(capacity_per_level).build();
        Self {
            session: build(),
            project: build(),
            global: build(),
            counters: Default::default(),
        }
    }

    fn level(&self, scope: CacheScope) -> &Cache<String, CachedValue> {
        match scope {
            CacheScope::Session => &self.session,
            CacheScope::Project => &self.project,
            CacheScope::Global => &self.global,
        }
    }

    fn counters(&self, scope: CacheScope) -> &LevelCounters {
        match scope {
            CacheScope::Session => &self.counters[0],
            CacheScope::Project => &self.counters[1],
            CacheScope::Global => &self.counters[2],
        }
    }

    async fn get_at(&self, scope: CacheScope, key: &str) -> Option<Arc<Value>> {
        let cache = self.level(scope);
        let counters = self.counters(scope);
        if let Some(cached) = cache.get(key).await {
            if Instant::now() >= cached.expires_at {
                cache.invalidate(key).await;
                counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            counters.hits.fetch_add(1, Ordering::Relaxed);
            return Some(cached.value);
        }
        counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Read through the levels starting at `scope`, promoting a lower-level
    /// hit into the levels above it.
    pub async fn get(&self, scope: CacheScope, key: &str) -> Option<Arc<Value>> {
        let order: &[CacheScope] = match scope {
            CacheScope::Session => &[CacheScope::Session, CacheScope::Project, CacheScope::Global],
            CacheScope::Project => &[CacheScope::Project, CacheScope::Global],
            CacheScope::Global => &[CacheScope::Global],
        };

        for (depth, &level) in order.iter().enumerate() {
            if let Some(value) = self.get_at(level, key).await {
                // Promote into the levels we already missed.
                for &missed in &order[..depth] {
                    if let Some(cached) = self.level(level).get(key).await {
                        self.level(missed).insert(key.to_string(), cached).await;
                    }
                }
                return Some(value);
            }
        }
        None
    }

    /// Write through from `scope` down to the global level.
    pub async fn set(&self, scope: CacheScope, key: &str, value: Value, ttl: Duration) {
        let cached = CachedValue {
            value: Arc::new(value),
            expires_at: Instant::now() + ttl,
        };
        let levels: &[CacheScope] = match scope {
            CacheScope::Session => &[CacheScope::Session, CacheScope::Project, CacheScope::Global],
            CacheScope::Project => &[CacheScope::Project, CacheScope::Global],
            CacheScope::Global => &[CacheScope::Global],
        };
        for &level in levels {
            self.level(level).insert(key.to_string(), cached.clone()).await;
        }
    }

    pub async fn invalidate(&self, key: &str) {
        for scope in [CacheScope::Session, CacheScope::Project, CacheScope::Global] {
            self.level(scope).invalidate(key).await;
        }
    }

    /// Drop an entire level. Scope-tagged storage makes this O(1).
    pub async fn invalidate_scope(&self, scope: CacheScope) {
        self.level(scope).invalidate_all();
        self.level(scope).run_pending_tasks().await;
    }

    pub async fn stats(&self) -> CacheStatsReport {
        let level_stats = |scope: CacheScope| {
            let counters = self.counters(scope);
            let hits = counters.hits.load(Ordering::Relaxed);
            let misses = counters.misses.load(Ordering::Relaxed);
            let total = hits + misses;
            LevelStats {
                hits,
                misses,
                entries: self.level(scope).entry_count(),
                hit_rate: if total == 0 {
                    0.0
                } else {
                    hits as f64 / total as f64
                },
            }
        };
        for scope in [CacheScope::Session, CacheScope::Project, CacheScope::Global] {
            self.level(scope).run_pending_tasks().await;
        }
        CacheStatsReport {
            session: level_stats(CacheScope::Session),
            project: level_stats(CacheScope::Project),
            global: level_stats(CacheScope::Global),
        }
    }

    // ---- Key builders -----------------------------------------------------

    pub fn embed_key(text: &str) -> String {
        format!("embed:{}", short_hash(text))
    }

    pub fn search_key(collection: &str, query: &str, opts: &str) -> String {
        format!("search:{}", short_hash(&format!("{collection}\x00{query}\x00{opts}")))
    }

    pub fn session_key(project: &str, session_id: &str) -> String {
        format!("session:{project}:{session_id}")
    }
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex_prefix(&digest, 16)
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    bytes
        .iter()
        .take(len)
        .map(|b| format!("{b:02x}"))
        .collect()
}
