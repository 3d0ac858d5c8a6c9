use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{FeedbackError, FeedbackResult};

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

/// A binary user judgment on a generated answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    /// The user endorsed the answer.
    Up,
    /// The user rejected the answer.
    Down,
}

impl Verdict {
    /// True for [`Verdict::Up`].
    #[must_use]
    pub const fn is_up(self) -> bool {
        matches!(self, Self::Up)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// A user verdict on the answer produced for one query.
///
/// Events are immutable once published: the bus hands every subscriber a
/// shared reference to the same event, in publication order.
#[derive(Debug, Clone, PartialEq)]
pub struct VerdictEvent {
    /// Identifier of the query whose answer was judged.
    pub query_id: String,
    /// The judgment itself.
    pub verdict: Verdict,
    /// Free-form labels attached by the caller (UI surface, model id, ...).
    /// Carried through delivery verbatim; no core component interprets them.
    pub tags: Vec<String>,
    /// When the verdict was issued.
    pub timestamp: Instant,
}

impl VerdictEvent {
    /// Creates an event stamped with the current time and no tags.
    #[must_use]
    pub fn new(query_id: impl Into<String>, verdict: Verdict) -> Self {
        Self {
            query_id: query_id.into(),
            verdict,
            tags: Vec::new(),
            timestamp: Instant::now(),
        }
    }

    /// Replaces the tag list.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Appends a single tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Retrieval parameters (bandit arms)
// ---------------------------------------------------------------------------

/// One candidate configuration of retrieval parameters.
///
/// A small fixed menu of these forms the bandit's arms; the bandit learns
/// which configuration earns positive verdicts for which query cluster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrievalParams {
    /// Number of source fragments requested from the retriever.
    pub top_k: usize,
    /// Relevance vs diversity tradeoff for MMR-style rerankers:
    /// `1.0` = pure relevance, `0.0` = pure diversity.
    pub mmr_lambda: f64,
    /// Minimum relevance score a fragment must reach to be kept, in
    /// `[0.0, 1.0]`.
    pub min_score: f64,
}

impl RetrievalParams {
    /// Creates a parameter triple.
    #[must_use]
    pub const fn new(top_k: usize, mmr_lambda: f64, min_score: f64) -> Self {
        Self {
            top_k,
            mmr_lambda,
            min_score,
        }
    }

    /// Validates the triple.
    ///
    /// # Errors
    ///
    /// Returns [`FeedbackError::InvalidConfig`] when `top_k` is zero or
    /// either float is outside `[0.0, 1.0]` (NaN included).
    pub fn validate(&self) -> FeedbackResult<()> {
        if self.top_k == 0 {
            return Err(FeedbackError::invalid_config(
                "top_k",
                self.top_k,
                "must request at least one fragment",
            ));
        }
        if !(0.0..=1.0).contains(&self.mmr_lambda) {
            return Err(FeedbackError::invalid_config(
                "mmr_lambda",
                self.mmr_lambda,
                "must be between 0.0 and 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(FeedbackError::invalid_config(
                "min_score",
                self.min_score,
                "must be between 0.0 and 1.0",
            ));
        }
        Ok(())
    }
}

impl Default for RetrievalParams {
    /// Balanced defaults: `top_k = 5`, `mmr_lambda = 0.7`, `min_score = 0.2`.
    fn default() -> Self {
        Self {
            top_k: 5,
            mmr_lambda: 0.7,
            min_score: 0.2,
        }
    }
}

impl fmt::Display for RetrievalParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "top_k={} mmr_lambda={:.2} min_score={:.2}",
            self.top_k, self.mmr_lambda, self.min_score
        )
    }
}

// ---------------------------------------------------------------------------
// Source fragments and query context
// ---------------------------------------------------------------------------

/// A retrieved source fragment used as evidence for an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFragment {
    /// Stable fragment identifier (chunk id, document id plus offset, ...).
    /// Identity for overlap comparison: two fragments with the same id are
    /// the same evidence regardless of content drift.
    pub id: String,
    /// Fragment text as supplied to generation.
    pub content: String,
    /// Retriever-assigned relevance score (higher is better).
    pub score: f64,
}

impl SourceFragment {
    /// Creates a fragment with score `0.0`.
    #[must_use]
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            score: 0.0,
        }
    }

    /// Sets the relevance score.
    #[must_use]
    pub const fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }
}

/// Everything recorded about one answered query: the question asked, the
/// answer produced, and the evidence it was grounded on.
///
/// Produced by the generation path, stored in a [`ContextStore`], and read
/// back when a verdict arrives.
///
/// [`ContextStore`]: crate::traits::ContextStore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    /// The user's question.
    pub question: String,
    /// The generated answer.
    pub answer: String,
    /// Source fragments used for generation, in retrieval order.
    pub sources: Vec<SourceFragment>,
}

impl QueryContext {
    /// Creates a context with no sources.
    #[must_use]
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            sources: Vec::new(),
        }
    }

    /// Replaces the source list.
    #[must_use]
    pub fn with_sources(mut self, sources: Vec<SourceFragment>) -> Self {
        self.sources = sources;
        self
    }
}

// ---------------------------------------------------------------------------
// Arm assignments and cache entries
// ---------------------------------------------------------------------------

/// Which arm produced the parameters for a query.
///
/// Recorded at selection time so a later verdict can be attributed to the
/// arm that earned it. Ephemeral: assignments may be evicted under a
/// configured bound, after which verdicts for the query id become no-ops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmAssignment {
    /// Cluster the query was mapped to at selection time.
    pub cluster_id: String,
    /// Index into the fixed arm menu.
    pub arm_index: usize,
}

/// A promoted answer held by the cache.
///
/// Created only from a positive verdict, never from generation alone.
/// Visible to lookup while `expires_at > now`; a negative verdict shortens
/// (never lengthens) the lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Cache-assigned entry identifier.
    pub id: String,
    /// The question the stored answer was produced for.
    pub question: String,
    /// The endorsed answer.
    pub answer: String,
    /// Evidence the answer was grounded on, in retrieval order.
    pub sources: Vec<SourceFragment>,
    /// When the entry was promoted.
    pub created_at: Instant,
    /// When the entry becomes invisible to lookups. Always after
    /// `created_at`.
    pub expires_at: Instant,
}

impl CacheEntry {
    /// True once the entry is no longer visible to lookups.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }

    /// Remaining lifetime at `now` (zero once expired).
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

/// A successful cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    /// Identifier of the entry that matched.
    pub entry_id: String,
    /// The cached answer.
    pub answer: String,
    /// The cached evidence the answer was grounded on.
    pub sources: Vec<SourceFragment>,
    /// Jaccard overlap between the fresh and stored fragment-id sets.
    pub similarity: f64,
}

// ---------------------------------------------------------------------------
// Overlap similarity
// ---------------------------------------------------------------------------

/// Collects the distinct fragment identities of `fragments`.
#[must_use]
pub fn fragment_id_set(fragments: &[SourceFragment]) -> HashSet<&str> {
    fragments.iter().map(|f| f.id.as_str()).collect()
}

/// Jaccard similarity between two sets of fragment identities:
/// `|A ∩ B| / |A ∪ B|`.
///
/// Order is ignored and duplicates are collapsed by construction of the
/// inputs; two empty sets yield `0.0` (no overlap evidence at all).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn jaccard_similarity(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}
