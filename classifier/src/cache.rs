use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::trace;

use crate::{
    CollectFlags, FieldRef, FunctionRef, Operation, ParseResult, QueryClassifier, SqlMode,
    TypeMask,
};

/// Rough per-entry bookkeeping cost on top of the canonical text.
const ENTRY_OVERHEAD: usize = 96;

/// Cache key: the canonical statement plus the per-thread state that
/// changes how a statement classifies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub canonical: String,
    pub sql_mode: SqlMode,
    pub server_version: u64,
}

/// Classification results worth caching. Collected extras (tables,
/// fields) are not cached: they are cheap to recompute and rarely hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedClassification {
    pub parse_result: ParseResult,
    pub type_mask: TypeMask,
    pub operation: Operation,
}

/// LRU cache of classification results under an overall byte budget.
pub struct ClassifierCache {
    entries: LruCache<CacheKey, CachedClassification>,
    budget_bytes: usize,
    used_bytes: usize,
    hits: u64,
    misses: u64,
}

impl ClassifierCache {
    pub fn new(budget_bytes: usize) -> Self {
        ClassifierCache {
            entries: LruCache::unbounded(),
            budget_bytes,
            used_bytes: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// A cache with room for exactly `n` entries regardless of size,
    /// mostly for tests.
    pub fn with_entry_count(n: usize) -> Self {
        ClassifierCache {
            entries: LruCache::new(NonZeroUsize::new(n.max(1)).unwrap()),
            budget_bytes: usize::MAX,
            used_bytes: 0,
            hits: 0,
            misses: 0,
        }
    }

    fn cost(key: &CacheKey) -> usize {
        key.canonical.len() + ENTRY_OVERHEAD
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<CachedClassification> {
        match self.entries.get(key).cloned() {
            Some(hit) => {
                self.hits += 1;
                Some(hit)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: CacheKey, value: CachedClassification) {
        let cost = Self::cost(&key);
        if cost > self.budget_bytes {
            return;
        }
        while self.used_bytes + cost > self.budget_bytes {
            match self.entries.pop_lru() {
                Some((evicted, _)) => {
                    self.used_bytes -= Self::cost(&evicted);
                    trace!("Evicted cached classification: {}", evicted.canonical);
                }
                None => break,
            }
        }
        if self.entries.put(key, value).is_none() {
            self.used_bytes += cost;
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A classifier wrapped with the recommended LRU result cache. The
/// cache key is the canonical form plus sql mode and server version, so
/// statements differing only in literals share one entry.
pub struct CachingClassifier<C: QueryClassifier> {
    inner: C,
    cache: ClassifierCache,
}

impl<C: QueryClassifier> CachingClassifier<C> {
    pub fn new(inner: C, budget_bytes: usize) -> Self {
        CachingClassifier {
            inner,
            cache: ClassifierCache::new(budget_bytes),
        }
    }

    pub fn cache(&self) -> &ClassifierCache {
        &self.cache
    }

    fn classify_cached(&mut self, packet: &[u8]) -> CachedClassification {
        let key = CacheKey {
            canonical: self.inner.canonical(packet),
            sql_mode: self.inner.sql_mode(),
            server_version: self.inner.server_version(),
        };
        if let Some(hit) = self.cache.get(&key) {
            return hit;
        }
        let value = CachedClassification {
            parse_result: self.inner.parse(packet, CollectFlags::ESSENTIALS),
            type_mask: self.inner.type_mask(packet),
            operation: self.inner.operation(packet),
        };
        self.cache.insert(key, value.clone());
        value
    }
}

impl<C: QueryClassifier> QueryClassifier for CachingClassifier<C> {
    fn parse(&mut self, packet: &[u8], _collect: CollectFlags) -> ParseResult {
        self.classify_cached(packet).parse_result
    }

    fn type_mask(&mut self, packet: &[u8]) -> TypeMask {
        self.classify_cached(packet).type_mask
    }

    fn operation(&mut self, packet: &[u8]) -> Operation {
        self.classify_cached(packet).operation
    }

    fn tables(&mut self, packet: &[u8], qualified: bool) -> Vec<String> {
        self.inner.tables(packet, qualified)
    }

    fn databases(&mut self, packet: &[u8]) -> Vec<String> {
        self.inner.databases(packet)
    }

    fn fields(&mut self, packet: &[u8]) -> Vec<FieldRef> {
        self.inner.fields(packet)
    }

    fn functions(&mut self, packet: &[u8]) -> Vec<FunctionRef> {
        self.inner.functions(packet)
    }

    fn canonical(&mut self, packet: &[u8]) -> String {
        self.inner.canonical(packet)
    }

    fn has_where_or_using_clause(&mut self, packet: &[u8]) -> bool {
        self.inner.has_where_or_using_clause(packet)
    }

    fn prepare_name(&mut self, packet: &[u8]) -> Option<String> {
        self.inner.prepare_name(packet)
    }

    fn preparable_statement(&mut self, packet: &[u8]) -> Option<Vec<u8>> {
        self.inner.preparable_statement(packet)
    }

    fn created_table_name(&mut self, packet: &[u8]) -> Option<String> {
        self.inner.created_table_name(packet)
    }

    fn is_drop_table(&mut self, packet: &[u8]) -> bool {
        self.inner.is_drop_table(packet)
    }

    fn set_sql_mode(&mut self, mode: SqlMode) {
        self.inner.set_sql_mode(mode);
    }

    fn sql_mode(&self) -> SqlMode {
        self.inner.sql_mode()
    }

    fn set_server_version(&mut self, version: u64) {
        self.inner.set_server_version(version);
    }

    fn server_version(&self) -> u64 {
        self.inner.server_version()
    }
}
