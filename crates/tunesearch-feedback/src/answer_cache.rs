//! Semantic answer cache keyed by evidence overlap.
//!
//! [`AnswerCache`] stores answers that earned an up-verdict and serves
//! them again when a new question would retrieve substantially the same
//! evidence. The gate is deliberately not string equality: a stored
//! answer matches when the Jaccard overlap between the fresh retrieval's
//! fragment ids and the stored entry's fragment ids reaches
//! `min_source_overlap`.
//!
//! # Lifecycle
//!
//! - Entries are created only by up-verdicts, never by generation alone,
//!   and live for `default_ttl` (or `boost_ttl` when a repeat up-verdict
//!   reinforces an already-promoted question).
//! - A down-verdict shortens the matching entry's expiry to at most
//!   `punish_ttl` from the verdict. It never lengthens a lifetime.
//! - Expired entries are invisible to lookups immediately; they are
//!   physically removed by capacity enforcement or [`purge_expired`].
//!
//! Reads are lock-free against writers: lookups clone an `Arc` snapshot
//! of the state, so a promotion never blocks an in-flight lookup.
//!
//! [`purge_expired`]: AnswerCache::purge_expired

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use tunesearch_core::{
    CacheEntry, CacheHit, FeedbackError, FeedbackResult, RetrievalParams, SharedContextStore,
    SharedRetriever, Verdict, VerdictEvent, fragment_id_set, jaccard_similarity,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the [`AnswerCache`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerCacheConfig {
    /// Lifetime of a freshly promoted entry. Default: 15 minutes.
    pub default_ttl: Duration,
    /// Lifetime used instead of `default_ttl` when a repeat up-verdict
    /// reinforces an already-cached question. Must be at least
    /// `default_ttl`. Default: `None` (reinforcements get `default_ttl`).
    pub boost_ttl: Option<Duration>,
    /// Remaining lifetime imposed by a down-verdict. Must be shorter than
    /// `default_ttl`. Default: 60 seconds.
    pub punish_ttl: Duration,
    /// Minimum Jaccard overlap between fresh and stored fragment-id sets
    /// for a hit, in `[0.0, 1.0]`. Default: 0.4.
    pub min_source_overlap: f64,
    /// Maximum stored entries. `None` (the default) is unbounded; with a
    /// bound, expired entries are purged first, then the entry closest to
    /// expiry is evicted.
    pub max_entries: Option<usize>,
}

impl AnswerCacheConfig {
    /// Replaces the default TTL.
    #[must_use]
    pub const fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Enables a longer TTL for reinforced promotions.
    #[must_use]
    pub const fn with_boost_ttl(mut self, ttl: Duration) -> Self {
        self.boost_ttl = Some(ttl);
        self
    }

    /// Replaces the punish TTL.
    #[must_use]
    pub const fn with_punish_ttl(mut self, ttl: Duration) -> Self {
        self.punish_ttl = ttl;
        self
    }

    /// Replaces the overlap threshold.
    #[must_use]
    pub const fn with_min_source_overlap(mut self, threshold: f64) -> Self {
        self.min_source_overlap = threshold;
        self
    }

    /// Bounds the number of stored entries.
    #[must_use]
    pub const fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FeedbackError::InvalidConfig`] when any TTL is zero or
    /// inconsistent, the overlap threshold is outside `[0.0, 1.0]`, or
    /// `max_entries` is `Some(0)`.
    pub fn validate(&self) -> FeedbackResult<()> {
        if self.default_ttl.is_zero() {
            return Err(FeedbackError::invalid_config(
                "default_ttl",
                "0s",
                "promoted entries must live for a positive duration",
            ));
        }
        if self.punish_ttl.is_zero() || self.punish_ttl >= self.default_ttl {
            return Err(FeedbackError::invalid_config(
                "punish_ttl",
                format!("{:?}", self.punish_ttl),
                "must be positive and shorter than default_ttl",
            ));
        }
        if let Some(boost) = self.boost_ttl
            && boost < self.default_ttl
        {
            return Err(FeedbackError::invalid_config(
                "boost_ttl",
                format!("{boost:?}"),
                "must be at least default_ttl",
            ));
        }
        if !self.min_source_overlap.is_finite()
            || !(0.0..=1.0).contains(&self.min_source_overlap)
        {
            return Err(FeedbackError::invalid_config(
                "min_source_overlap",
                self.min_source_overlap,
                "must be between 0.0 and 1.0",
            ));
        }
        if self.max_entries == Some(0) {
            return Err(FeedbackError::invalid_config(
                "max_entries",
                0usize,
                "entry bound must retain at least one entry",
            ));
        }
        Ok(())
    }
}

impl Default for AnswerCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(15 * 60),
            boost_ttl: None,
            punish_ttl: Duration::from_secs(60),
            min_source_overlap: 0.4,
            max_entries: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Lock-free counters for cache telemetry.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Lookup calls.
    pub lookups: AtomicU64,
    /// Lookups that returned a cached answer.
    pub hits: AtomicU64,
    /// Lookups that returned nothing.
    pub misses: AtomicU64,
    /// Misses caused by the fresh retrieval coming back empty.
    pub misses_no_fresh_sources: AtomicU64,
    /// Entries created from up-verdicts.
    pub promotions: AtomicU64,
    /// Promotions for questions that were already cached.
    pub reinforcements: AtomicU64,
    /// Down-verdicts that shortened an entry's lifetime.
    pub punishments: AtomicU64,
    /// Up-verdicts dropped because no context was found.
    pub skipped_promotions: AtomicU64,
    /// Down-verdicts dropped because no entry matched the query id.
    pub unmatched_punishments: AtomicU64,
    /// Live entries evicted under `max_entries`.
    pub evictions: AtomicU64,
    /// Expired entries physically removed.
    pub expired_purged: AtomicU64,
}

impl CacheMetrics {
    /// Point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            misses_no_fresh_sources: self.misses_no_fresh_sources.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            reinforcements: self.reinforcements.load(Ordering::Relaxed),
            punishments: self.punishments.load(Ordering::Relaxed),
            skipped_promotions: self.skipped_promotions.load(Ordering::Relaxed),
            unmatched_punishments: self.unmatched_punishments.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired_purged: self.expired_purged.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`CacheMetrics`] counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetricsSnapshot {
    /// Lookup calls.
    pub lookups: u64,
    /// Lookups that returned a cached answer.
    pub hits: u64,
    /// Lookups that returned nothing.
    pub misses: u64,
    /// Misses caused by an empty fresh retrieval.
    pub misses_no_fresh_sources: u64,
    /// Entries created from up-verdicts.
    pub promotions: u64,
    /// Promotions for already-cached questions.
    pub reinforcements: u64,
    /// Down-verdicts that shortened a lifetime.
    pub punishments: u64,
    /// Up-verdicts dropped for lack of context.
    pub skipped_promotions: u64,
    /// Down-verdicts with no matching entry.
    pub unmatched_punishments: u64,
    /// Live entries evicted under the bound.
    pub evictions: u64,
    /// Expired entries physically removed.
    pub expired_purged: u64,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// Copy-on-write cache state. Readers clone the `Arc`; writers clone the
/// state once and swap it in.
#[derive(Debug, Clone, Default)]
struct CacheState {
    /// Stored entries keyed by entry id.
    entries: HashMap<String, CacheEntry>,
    /// Latest promoted entry per query id, for punish attribution.
    qa_to_entry: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// AnswerCache
// ---------------------------------------------------------------------------

/// Verdict-driven answer cache gated by source overlap.
///
/// See the [module-level documentation](self) for the lifecycle and the
/// hit criterion.
pub struct AnswerCache {
    config: AnswerCacheConfig,
    state: RwLock<Arc<CacheState>>,
    retriever: SharedRetriever,
    context: SharedContextStore,
    next_entry_id: AtomicU64,
    metrics: Arc<CacheMetrics>,
}

impl std::fmt::Debug for AnswerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerCache")
            .field("config", &self.config)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

impl AnswerCache {
    /// Creates an empty cache over the given collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`FeedbackError::InvalidConfig`] if `config` is invalid.
    pub fn new(
        config: AnswerCacheConfig,
        retriever: SharedRetriever,
        context: SharedContextStore,
    ) -> FeedbackResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: RwLock::new(Arc::new(CacheState::default())),
            retriever,
            context,
            next_entry_id: AtomicU64::new(0),
            metrics: Arc::new(CacheMetrics::default()),
        })
    }

    /// Cheap snapshot of the current state.
    fn current(&self) -> Arc<CacheState> {
        match self.state.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Runs `mutate` against a private copy of the state and swaps it in.
    fn with_state<R>(&self, mutate: impl FnOnce(&mut CacheState) -> R) -> R {
        let mut guard = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        mutate(Arc::make_mut(&mut guard))
    }

    // ── Lookup ───────────────────────────────────────────────────────

    /// Attempts to answer `question` from the cache.
    ///
    /// Retrieves fresh evidence under `params`, then returns the best
    /// non-expired entry whose stored fragment ids overlap the fresh ones
    /// by at least `min_source_overlap`. Ties on similarity go to the most
    /// recently promoted entry. Read-only: a lookup never changes cache
    /// state, whatever the outcome.
    ///
    /// Returns `None` when the cache is empty (the retriever is not even
    /// consulted), the fresh retrieval comes back empty, or no entry
    /// clears the threshold.
    #[must_use]
    pub fn lookup(
        &self,
        question: &str,
        params: &RetrievalParams,
        top_k: usize,
    ) -> Option<CacheHit> {
        self.lookup_at(question, params, top_k, Instant::now())
    }

    /// [`lookup`](Self::lookup) with an explicit clock, for replay and
    /// tests.
    #[must_use]
    pub fn lookup_at(
        &self,
        question: &str,
        params: &RetrievalParams,
        top_k: usize,
        now: Instant,
    ) -> Option<CacheHit> {
        self.metrics.lookups.fetch_add(1, Ordering::Relaxed);
        let state = self.current();

        if state.entries.is_empty() {
            self.metrics.misses.fetch_add(1, Ordering::Relaxed);
            trace!(target: "tunesearch.cache", question, "miss: cache empty");
            return None;
        }

        let fresh = self.retriever.retrieve(question, params, top_k);
        if fresh.is_empty() {
            self.metrics.misses.fetch_add(1, Ordering::Relaxed);
            self.metrics
                .misses_no_fresh_sources
                .fetch_add(1, Ordering::Relaxed);
            trace!(target: "tunesearch.cache", question, "miss: no fresh sources");
            return None;
        }

        let fresh_ids = fragment_id_set(&fresh);
        let best = state
            .entries
            .values()
            .filter(|entry| !entry.is_expired(now))
            .filter_map(|entry| {
                let stored_ids = fragment_id_set(&entry.sources);
                let similarity = jaccard_similarity(&fresh_ids, &stored_ids);
                (similarity >= self.config.min_source_overlap).then_some((similarity, entry))
            })
            .max_by(|(left, left_entry), (right, right_entry)| {
                left.total_cmp(right)
                    .then_with(|| left_entry.created_at.cmp(&right_entry.created_at))
                    .then_with(|| left_entry.id.cmp(&right_entry.id))
            });

        match best {
            Some((similarity, entry)) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                debug!(
                    target: "tunesearch.cache",
                    question,
                    entry = %entry.id,
                    similarity,
                    "cache hit"
                );
                Some(CacheHit {
                    entry_id: entry.id.clone(),
                    answer: entry.answer.clone(),
                    sources: entry.sources.clone(),
                    similarity,
                })
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                trace!(target: "tunesearch.cache", question, "miss: no entry above threshold");
                None
            }
        }
    }

    // ── Verdict handling ─────────────────────────────────────────────

    /// Applies a verdict: up-verdicts promote the recorded answer,
    /// down-verdicts shorten the matching entry's lifetime.
    ///
    /// TTLs are anchored at `event.timestamp`, so delivery delay does not
    /// extend a promoted entry's life.
    pub fn on_verdict(&self, event: &VerdictEvent) {
        self.on_verdict_at(event, event.timestamp);
    }

    /// [`on_verdict`](Self::on_verdict) with an explicit clock.
    pub fn on_verdict_at(&self, event: &VerdictEvent, now: Instant) {
        match event.verdict {
            Verdict::Up => self.promote(&event.query_id, now),
            Verdict::Down => self.punish(&event.query_id, now),
        }
    }

    /// Creates a new entry from the recorded context of `query_id`.
    fn promote(&self, query_id: &str, now: Instant) {
        let Some(context) = self.context.get(query_id) else {
            self.metrics.skipped_promotions.fetch_add(1, Ordering::Relaxed);
            debug!(
                target: "tunesearch.cache",
                query_id,
                "up-verdict skipped: no recorded context"
            );
            return;
        };

        let sequence = self.next_entry_id.fetch_add(1, Ordering::Relaxed) + 1;
        let entry_id = format!("ans-{sequence:012}");

        let (reinforced, evictions, purged) = self.with_state(|state| {
            let reinforced = state.qa_to_entry.contains_key(query_id);
            let ttl = match (reinforced, self.config.boost_ttl) {
                (true, Some(boost)) => boost,
                _ => self.config.default_ttl,
            };
            state.entries.insert(
                entry_id.clone(),
                CacheEntry {
                    id: entry_id.clone(),
                    question: context.question.clone(),
                    answer: context.answer.clone(),
                    sources: context.sources.clone(),
                    created_at: now,
                    expires_at: now + ttl,
                },
            );
            state
                .qa_to_entry
                .insert(query_id.to_owned(), entry_id.clone());
            let (evictions, purged) = enforce_capacity(state, self.config.max_entries, now);
            (reinforced, evictions, purged)
        });

        self.metrics.promotions.fetch_add(1, Ordering::Relaxed);
        if reinforced {
            self.metrics.reinforcements.fetch_add(1, Ordering::Relaxed);
        }
        self.metrics.evictions.fetch_add(evictions, Ordering::Relaxed);
        self.metrics.expired_purged.fetch_add(purged, Ordering::Relaxed);
        debug!(
            target: "tunesearch.cache",
            query_id,
            entry = %entry_id,
            reinforced,
            "answer promoted"
        );
    }

    /// Shortens the lifetime of the entry promoted for `query_id`.
    fn punish(&self, query_id: &str, now: Instant) {
        let punished = self.with_state(|state| {
            let Some(entry_id) = state.qa_to_entry.get(query_id).cloned() else {
                return None;
            };
            let entry = state.entries.get_mut(&entry_id)?;
            entry.expires_at = entry.expires_at.min(now + self.config.punish_ttl);
            Some((entry_id, entry.remaining(now)))
        });

        match punished {
            Some((entry_id, remaining)) => {
                self.metrics.punishments.fetch_add(1, Ordering::Relaxed);
                debug!(
                    target: "tunesearch.cache",
                    query_id,
                    entry = %entry_id,
                    remaining = ?remaining,
                    "entry punished"
                );
            }
            None => {
                self.metrics
                    .unmatched_punishments
                    .fetch_add(1, Ordering::Relaxed);
                debug!(
                    target: "tunesearch.cache",
                    query_id,
                    "down-verdict matched no cached entry"
                );
            }
        }
    }

    // ── Maintenance ──────────────────────────────────────────────────

    /// Removes expired entries and their query-id mappings, returning the
    /// number removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    /// [`purge_expired`](Self::purge_expired) with an explicit clock.
    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let removed = self.with_state(|state| {
            let before = state.entries.len();
            state.entries.retain(|_, entry| !entry.is_expired(now));
            let removed = before - state.entries.len();
            if removed > 0 {
                prune_mappings(state);
            }
            removed
        });
        if removed > 0 {
            self.metrics
                .expired_purged
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(target: "tunesearch.cache", removed, "expired entries purged");
        }
        removed
    }

    // ── Accessors ────────────────────────────────────────────────────

    /// Stored entries, oldest promotion first.
    #[must_use]
    pub fn entries(&self) -> Vec<CacheEntry> {
        let state = self.current();
        let mut entries: Vec<CacheEntry> = state.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        entries
    }

    /// Number of stored entries, expired ones included until purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.current().entries.len()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current().entries.is_empty()
    }

    /// Shared reference to the metrics counters.
    #[must_use]
    pub const fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// Configuration reference.
    #[must_use]
    pub const fn config(&self) -> &AnswerCacheConfig {
        &self.config
    }
}

/// Enforces `max_entries`: purges expired entries first, then evicts the
/// live entry closest to expiry. Returns `(evicted, purged)` counts.
fn enforce_capacity(
    state: &mut CacheState,
    max_entries: Option<usize>,
    now: Instant,
) -> (u64, u64) {
    let Some(max) = max_entries else {
        return (0, 0);
    };
    if state.entries.len() <= max {
        return (0, 0);
    }

    let before = state.entries.len();
    state.entries.retain(|_, entry| !entry.is_expired(now));
    let purged = (before - state.entries.len()) as u64;

    let mut evicted = 0u64;
    while state.entries.len() > max {
        let Some(victim) = state
            .entries
            .values()
            .min_by(|a, b| {
                a.expires_at
                    .cmp(&b.expires_at)
                    .then_with(|| a.created_at.cmp(&b.created_at))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|entry| entry.id.clone())
        else {
            break;
        };
        state.entries.remove(&victim);
        evicted += 1;
        trace!(target: "tunesearch.cache", entry = %victim, "entry evicted under bound");
    }

    if purged > 0 || evicted > 0 {
        prune_mappings(state);
    }
    (evicted, purged)
}

/// Drops query-id mappings whose entry no longer exists.
fn prune_mappings(state: &mut CacheState) {
    let CacheState {
        entries,
        qa_to_entry,
    } = state;
    qa_to_entry.retain(|_, entry_id| entries.contains_key(entry_id));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use std::sync::Mutex;

    use tunesearch_core::{MemoryContextStore, QueryContext, Retriever, SourceFragment};

    use super::*;

    /// Retriever answering from a fixed script, counting calls.
    #[derive(Default)]
    struct ScriptedRetriever {
        responses: Mutex<HashMap<String, Vec<SourceFragment>>>,
        calls: AtomicU64,
    }

    impl ScriptedRetriever {
        fn script(&self, question: &str, ids: &[&str]) {
            self.responses
                .lock()
                .unwrap()
                .insert(question.to_owned(), fragments(ids));
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    impl Retriever for ScriptedRetriever {
        fn retrieve(
            &self,
            query: &str,
            _params: &RetrievalParams,
            _top_k: usize,
        ) -> Vec<SourceFragment> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.responses
                .lock()
                .unwrap()
                .get(query)
                .cloned()
                .unwrap_or_default()
        }
    }

    fn fragments(ids: &[&str]) -> Vec<SourceFragment> {
        ids.iter()
            .map(|id| SourceFragment::new(*id, format!("content {id}")).with_score(0.8))
            .collect()
    }

    struct Fixture {
        cache: AnswerCache,
        retriever: Arc<ScriptedRetriever>,
        store: Arc<MemoryContextStore>,
    }

    impl Fixture {
        fn new(config: AnswerCacheConfig) -> Self {
            let retriever = Arc::new(ScriptedRetriever::default());
            let store = Arc::new(MemoryContextStore::new());
            let cache = AnswerCache::new(
                config,
                Arc::clone(&retriever) as SharedRetriever,
                Arc::clone(&store) as SharedContextStore,
            )
            .unwrap();
            Self {
                cache,
                retriever,
                store,
            }
        }

        /// Records a context and promotes it with an up-verdict at `now`.
        fn promote(&self, query_id: &str, question: &str, source_ids: &[&str], now: Instant) {
            self.store.insert(
                query_id,
                QueryContext::new(question, format!("answer: {question}"))
                    .with_sources(fragments(source_ids)),
            );
            self.cache
                .on_verdict_at(&VerdictEvent::new(query_id, Verdict::Up), now);
        }

        fn lookup_at(&self, question: &str, now: Instant) -> Option<CacheHit> {
            self.cache
                .lookup_at(question, &RetrievalParams::default(), 5, now)
        }
    }

    // ── Config ───────────────────────────────────────────────────────

    #[test]
    fn default_config_is_valid() {
        let config = AnswerCacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_ttl, Duration::from_secs(900));
        assert_eq!(config.punish_ttl, Duration::from_secs(60));
        assert_eq!(config.min_source_overlap, 0.4);
    }

    #[test]
    fn config_builders_chain() {
        let config = AnswerCacheConfig::default()
            .with_default_ttl(Duration::from_secs(600))
            .with_boost_ttl(Duration::from_secs(3600))
            .with_punish_ttl(Duration::from_secs(30))
            .with_min_source_overlap(0.6)
            .with_max_entries(128);
        assert!(config.validate().is_ok());
        assert_eq!(config.boost_ttl, Some(Duration::from_secs(3600)));
        assert_eq!(config.max_entries, Some(128));
    }

    #[test]
    fn config_rejects_zero_ttls() {
        let zero_default = AnswerCacheConfig::default().with_default_ttl(Duration::ZERO);
        assert!(zero_default.validate().is_err());

        let zero_punish = AnswerCacheConfig::default().with_punish_ttl(Duration::ZERO);
        assert!(zero_punish.validate().is_err());
    }

    #[test]
    fn config_rejects_punish_not_shorter_than_default() {
        let config = AnswerCacheConfig::default()
            .with_default_ttl(Duration::from_secs(60))
            .with_punish_ttl(Duration::from_secs(60));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("punish_ttl"));
    }

    #[test]
    fn config_rejects_boost_below_default() {
        let config = AnswerCacheConfig::default().with_boost_ttl(Duration::from_secs(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_rejects_bad_overlap() {
        assert!(
            AnswerCacheConfig::default()
                .with_min_source_overlap(1.5)
                .validate()
                .is_err()
        );
        assert!(
            AnswerCacheConfig::default()
                .with_min_source_overlap(f64::NAN)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn config_rejects_zero_capacity() {
        let config = AnswerCacheConfig::default().with_max_entries(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_serde_roundtrip() {
        let config = AnswerCacheConfig::default().with_max_entries(16);
        let json = serde_json::to_string(&config).unwrap();
        let decoded: AnswerCacheConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, config);
    }

    // ── Lookup ───────────────────────────────────────────────────────

    #[test]
    fn empty_cache_misses_without_retrieval() {
        let fixture = Fixture::new(AnswerCacheConfig::default());
        let now = Instant::now();

        assert!(fixture.lookup_at("anything", now).is_none());
        assert_eq!(fixture.retriever.calls(), 0);

        let metrics = fixture.cache.metrics().snapshot();
        assert_eq!(metrics.lookups, 1);
        assert_eq!(metrics.misses, 1);
    }

    #[test]
    fn hit_at_jaccard_threshold() {
        let fixture = Fixture::new(AnswerCacheConfig::default());
        let now = Instant::now();
        fixture.promote("q-1", "how do i bound the queue?", &["c1", "c2", "c3"], now);
        // {c1,c2,c3} vs {c2,c3,c4}: similarity 0.5, over the 0.4 default.
        fixture
            .retriever
            .script("how do I bound the event queue?", &["c2", "c3", "c4"]);

        let hit = fixture
            .lookup_at("how do I bound the event queue?", now)
            .unwrap();
        assert_eq!(hit.similarity, 0.5);
        assert_eq!(hit.answer, "answer: how do i bound the queue?");
        assert_eq!(hit.sources, fragments(&["c1", "c2", "c3"]));
        assert_eq!(fixture.cache.metrics().snapshot().hits, 1);
    }

    #[test]
    fn miss_below_jaccard_threshold() {
        let fixture = Fixture::new(AnswerCacheConfig::default());
        let now = Instant::now();
        fixture.promote("q-1", "first topic", &["c1", "c2", "c3"], now);
        // {c1,c2,c3} vs {c3,c4,c5}: similarity 0.2, under the 0.4 default.
        fixture.retriever.script("different topic", &["c3", "c4", "c5"]);

        assert!(fixture.lookup_at("different topic", now).is_none());
        assert_eq!(fixture.cache.metrics().snapshot().misses, 1);
    }

    #[test]
    fn empty_fresh_retrieval_is_a_miss() {
        let fixture = Fixture::new(AnswerCacheConfig::default());
        let now = Instant::now();
        fixture.promote("q-1", "question", &["c1"], now);
        // Nothing scripted for the probe question: retriever returns empty.

        assert!(fixture.lookup_at("unretrievable question", now).is_none());
        let metrics = fixture.cache.metrics().snapshot();
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.misses_no_fresh_sources, 1);
        assert_eq!(fixture.retriever.calls(), 1);
    }

    #[test]
    fn higher_overlap_wins() {
        let fixture = Fixture::new(AnswerCacheConfig::default());
        let now = Instant::now();
        fixture.promote("q-exact", "exact question", &["a", "b", "c"], now);
        fixture.promote("q-partial", "related question", &["a", "b", "x"], now);
        // Fresh {a,b,c}: exact entry scores 1.0, partial scores 0.5.
        fixture.retriever.script("probe", &["a", "b", "c"]);

        let hit = fixture.lookup_at("probe", now).unwrap();
        assert_eq!(hit.similarity, 1.0);
        assert_eq!(hit.answer, "answer: exact question");
    }

    #[test]
    fn similarity_tie_goes_to_most_recent() {
        let fixture = Fixture::new(AnswerCacheConfig::default());
        let t0 = Instant::now();
        fixture.promote("q-old", "old phrasing", &["a", "b"], t0);
        fixture.promote(
            "q-new",
            "new phrasing",
            &["a", "b"],
            t0 + Duration::from_secs(10),
        );
        fixture.retriever.script("probe", &["a", "b"]);

        let hit = fixture
            .lookup_at("probe", t0 + Duration::from_secs(20))
            .unwrap();
        assert_eq!(hit.answer, "answer: new phrasing");
    }

    #[test]
    fn expired_entries_are_never_returned() {
        let fixture = Fixture::new(AnswerCacheConfig::default());
        let t0 = Instant::now();
        fixture.promote("q-1", "question", &["c1", "c2"], t0);
        fixture.retriever.script("question", &["c1", "c2"]);

        let just_before = t0 + Duration::from_secs(900) - Duration::from_millis(1);
        assert!(fixture.lookup_at("question", just_before).is_some());

        // expires_at is exclusive: the entry is gone at exactly +default_ttl.
        assert!(
            fixture
                .lookup_at("question", t0 + Duration::from_secs(900))
                .is_none()
        );
        assert!(
            fixture
                .lookup_at("question", t0 + Duration::from_secs(901))
                .is_none()
        );
    }

    #[test]
    fn lookup_is_side_effect_free() {
        let fixture = Fixture::new(AnswerCacheConfig::default());
        let now = Instant::now();
        fixture.promote("q-1", "question", &["c1"], now);
        fixture.retriever.script("question", &["c1"]);

        let first = fixture.lookup_at("question", now).unwrap();
        let second = fixture.lookup_at("question", now).unwrap();
        assert_eq!(first, second);
        assert_eq!(fixture.cache.len(), 1);
        assert_eq!(fixture.cache.entries()[0].expires_at, now + Duration::from_secs(900));
        assert_eq!(fixture.cache.metrics().snapshot().hits, 2);
    }

    // ── Promotion ────────────────────────────────────────────────────

    #[test]
    fn up_verdict_without_context_is_skipped() {
        let fixture = Fixture::new(AnswerCacheConfig::default());
        fixture
            .cache
            .on_verdict(&VerdictEvent::new("q-ghost", Verdict::Up));

        assert!(fixture.cache.is_empty());
        assert_eq!(fixture.cache.metrics().snapshot().skipped_promotions, 1);
        assert_eq!(fixture.cache.metrics().snapshot().promotions, 0);
    }

    #[test]
    fn promotion_stores_context_with_default_ttl() {
        let fixture = Fixture::new(AnswerCacheConfig::default());
        let now = Instant::now();
        fixture.promote("q-1", "what is jaccard?", &["c1", "c2"], now);

        let entries = fixture.cache.entries();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.question, "what is jaccard?");
        assert_eq!(entry.answer, "answer: what is jaccard?");
        assert_eq!(entry.sources, fragments(&["c1", "c2"]));
        assert_eq!(entry.created_at, now);
        assert_eq!(entry.expires_at, now + Duration::from_secs(900));
    }

    #[test]
    fn repeat_up_verdict_creates_new_entry() {
        let fixture = Fixture::new(AnswerCacheConfig::default());
        let t0 = Instant::now();
        fixture.promote("q-1", "question", &["c1"], t0);
        fixture
            .cache
            .on_verdict_at(&VerdictEvent::new("q-1", Verdict::Up), t0 + Duration::from_secs(5));

        let entries = fixture.cache.entries();
        assert_eq!(entries.len(), 2);
        assert_ne!(entries[0].id, entries[1].id);

        let metrics = fixture.cache.metrics().snapshot();
        assert_eq!(metrics.promotions, 2);
        assert_eq!(metrics.reinforcements, 1);
    }

    #[test]
    fn boost_ttl_applies_to_reinforcements_only() {
        let fixture = Fixture::new(
            AnswerCacheConfig::default().with_boost_ttl(Duration::from_secs(3600)),
        );
        let t0 = Instant::now();
        fixture.promote("q-1", "question", &["c1"], t0);
        fixture
            .cache
            .on_verdict_at(&VerdictEvent::new("q-1", Verdict::Up), t0 + Duration::from_secs(5));

        let entries = fixture.cache.entries();
        assert_eq!(entries[0].expires_at, t0 + Duration::from_secs(900));
        assert_eq!(
            entries[1].expires_at,
            t0 + Duration::from_secs(5) + Duration::from_secs(3600)
        );
    }

    #[test]
    fn promotion_with_no_sources_never_matches() {
        let fixture = Fixture::new(AnswerCacheConfig::default());
        let now = Instant::now();
        fixture.promote("q-1", "sourceless answer", &[], now);
        fixture.retriever.script("probe", &["c1"]);

        assert_eq!(fixture.cache.len(), 1);
        assert!(fixture.lookup_at("probe", now).is_none());
    }

    // ── Punishment ───────────────────────────────────────────────────

    #[test]
    fn down_verdict_shortens_expiry() {
        let fixture = Fixture::new(AnswerCacheConfig::default());
        let t0 = Instant::now();
        fixture.promote("q-1", "question", &["c1", "c2"], t0);
        fixture.retriever.script("question", &["c1", "c2"]);

        fixture.cache.on_verdict_at(
            &VerdictEvent::new("q-1", Verdict::Down),
            t0 + Duration::from_secs(10),
        );

        // Expiry collapsed from t0+900s to t0+10s+60s.
        let entry = &fixture.cache.entries()[0];
        assert_eq!(entry.expires_at, t0 + Duration::from_secs(70));
        assert!(
            fixture
                .lookup_at("question", t0 + Duration::from_secs(60))
                .is_some()
        );
        assert!(
            fixture
                .lookup_at("question", t0 + Duration::from_secs(71))
                .is_none()
        );
        assert_eq!(fixture.cache.metrics().snapshot().punishments, 1);
    }

    #[test]
    fn punishment_never_extends_lifetime() {
        let fixture = Fixture::new(AnswerCacheConfig::default());
        let t0 = Instant::now();
        fixture.promote("q-1", "question", &["c1"], t0);

        // 880s in, natural expiry (t0+900) is sooner than t0+880+60.
        fixture.cache.on_verdict_at(
            &VerdictEvent::new("q-1", Verdict::Down),
            t0 + Duration::from_secs(880),
        );

        assert_eq!(
            fixture.cache.entries()[0].expires_at,
            t0 + Duration::from_secs(900)
        );
    }

    #[test]
    fn down_verdict_without_entry_is_unmatched() {
        let fixture = Fixture::new(AnswerCacheConfig::default());
        fixture
            .cache
            .on_verdict(&VerdictEvent::new("q-ghost", Verdict::Down));

        assert_eq!(fixture.cache.metrics().snapshot().unmatched_punishments, 1);
        assert_eq!(fixture.cache.metrics().snapshot().punishments, 0);
    }

    #[test]
    fn punish_targets_latest_promotion() {
        let fixture = Fixture::new(AnswerCacheConfig::default());
        let t0 = Instant::now();
        fixture.promote("q-1", "question", &["c1"], t0);
        fixture
            .cache
            .on_verdict_at(&VerdictEvent::new("q-1", Verdict::Up), t0 + Duration::from_secs(5));

        fixture.cache.on_verdict_at(
            &VerdictEvent::new("q-1", Verdict::Down),
            t0 + Duration::from_secs(10),
        );

        let entries = fixture.cache.entries();
        // First promotion keeps its natural expiry; the latest one is punished.
        assert_eq!(entries[0].expires_at, t0 + Duration::from_secs(900));
        assert_eq!(entries[1].expires_at, t0 + Duration::from_secs(70));
    }

    // ── Capacity and purging ─────────────────────────────────────────

    #[test]
    fn capacity_evicts_entry_closest_to_expiry() {
        let fixture = Fixture::new(AnswerCacheConfig::default().with_max_entries(2));
        let t0 = Instant::now();
        fixture.promote("q-1", "first", &["a"], t0);
        fixture.promote("q-2", "second", &["b"], t0 + Duration::from_secs(1));
        fixture.promote("q-3", "third", &["c"], t0 + Duration::from_secs(2));

        assert_eq!(fixture.cache.len(), 2);
        assert_eq!(fixture.cache.metrics().snapshot().evictions, 1);

        let questions: Vec<String> = fixture
            .cache
            .entries()
            .into_iter()
            .map(|entry| entry.question)
            .collect();
        assert_eq!(questions, vec!["second", "third"]);

        // The evicted entry's mapping is gone too.
        fixture.cache.on_verdict_at(
            &VerdictEvent::new("q-1", Verdict::Down),
            t0 + Duration::from_secs(3),
        );
        assert_eq!(fixture.cache.metrics().snapshot().unmatched_punishments, 1);
    }

    #[test]
    fn capacity_purges_expired_before_evicting_live() {
        let fixture = Fixture::new(AnswerCacheConfig::default().with_max_entries(2));
        let t0 = Instant::now();
        fixture.promote("q-1", "short lived", &["a"], t0);
        fixture.promote("q-2", "second", &["b"], t0 + Duration::from_secs(1));

        // q-1 expires naturally; promoting q-3 afterwards purges it
        // instead of evicting the live q-2 entry.
        let later = t0 + Duration::from_secs(1000);
        fixture.promote("q-3", "third", &["c"], later);

        let questions: Vec<String> = fixture
            .cache
            .entries()
            .into_iter()
            .map(|entry| entry.question)
            .collect();
        assert!(questions.contains(&"third".to_owned()));
        let metrics = fixture.cache.metrics().snapshot();
        assert_eq!(metrics.expired_purged, 2);
        assert_eq!(metrics.evictions, 0);
    }

    #[test]
    fn purge_expired_removes_and_counts() {
        let fixture = Fixture::new(AnswerCacheConfig::default());
        let t0 = Instant::now();
        fixture.promote("q-1", "first", &["a"], t0);
        fixture.promote("q-2", "second", &["b"], t0);

        assert_eq!(fixture.cache.purge_expired_at(t0 + Duration::from_secs(10)), 0);
        assert_eq!(
            fixture.cache.purge_expired_at(t0 + Duration::from_secs(1000)),
            2
        );
        assert!(fixture.cache.is_empty());
        assert_eq!(fixture.cache.metrics().snapshot().expired_purged, 2);

        fixture.cache.on_verdict_at(
            &VerdictEvent::new("q-1", Verdict::Down),
            t0 + Duration::from_secs(1001),
        );
        assert_eq!(fixture.cache.metrics().snapshot().unmatched_punishments, 1);
    }

    // ── Misc ─────────────────────────────────────────────────────────

    #[test]
    fn entry_ids_are_unique_and_sequential() {
        let fixture = Fixture::new(AnswerCacheConfig::default());
        let now = Instant::now();
        fixture.promote("q-1", "first", &["a"], now);
        fixture.promote("q-2", "second", &["b"], now);

        let ids: Vec<String> = fixture.cache.entries().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["ans-000000000001", "ans-000000000002"]);
    }

    #[test]
    fn metrics_snapshot_roundtrip() {
        let snapshot = CacheMetricsSnapshot {
            lookups: 10,
            hits: 4,
            misses: 6,
            misses_no_fresh_sources: 2,
            promotions: 3,
            reinforcements: 1,
            punishments: 1,
            skipped_promotions: 0,
            unmatched_punishments: 1,
            evictions: 0,
            expired_purged: 2,
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: CacheMetricsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn debug_format() {
        let fixture = Fixture::new(AnswerCacheConfig::default());
        let debug_str = format!("{:?}", fixture.cache);
        assert!(debug_str.contains("AnswerCache"));
        assert!(debug_str.contains("entries"));
    }
}
