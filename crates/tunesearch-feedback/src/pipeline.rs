//! End-to-end assembly of the feedback loop.
//!
//! [`FeedbackLoop`] wires the three components together over one
//! [`VerdictBus`]:
//!
//! ```text
//! plan_query ─▶ ParamBandit ─▶ ArmChoice ─▶ AnswerCache.lookup ─▶ QueryPlan
//!
//! publish_verdict ─▶ VerdictBus ─┬─▶ ParamBandit.record_verdict
//!                                └─▶ AnswerCache.on_verdict
//! ```
//!
//! The host drives the loop: call [`plan_query`] before retrieval, serve
//! the cached answer when one comes back, record the generation context in
//! the [`ContextStore`] otherwise, and publish the user's verdict when it
//! arrives. Learning happens asynchronously on the bus delivery thread;
//! the query path never waits for it.
//!
//! [`plan_query`]: FeedbackLoop::plan_query
//! [`ContextStore`]: tunesearch_core::ContextStore

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;
use tunesearch_core::{
    CacheHit, FeedbackResult, QueryClusterer, RetrievalParams, SharedContextStore,
    SharedRetriever, Verdict, VerdictEvent,
};

use crate::answer_cache::{AnswerCache, AnswerCacheConfig};
use crate::bandit::{ArmChoice, BanditConfig, ParamBandit};
use crate::bus::{BusConfig, VerdictBus};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the assembled [`FeedbackLoop`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackLoopConfig {
    /// Event bus settings.
    pub bus: BusConfig,
    /// Parameter bandit settings.
    pub bandit: BanditConfig,
    /// Answer cache settings.
    pub cache: AnswerCacheConfig,
}

impl FeedbackLoopConfig {
    /// Validates every component configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`FeedbackError::InvalidConfig`] found.
    ///
    /// [`FeedbackError::InvalidConfig`]: tunesearch_core::FeedbackError::InvalidConfig
    pub fn validate(&self) -> FeedbackResult<()> {
        self.bus.validate()?;
        self.bandit.validate()?;
        self.cache.validate()
    }
}

// ---------------------------------------------------------------------------
// Query plan
// ---------------------------------------------------------------------------

/// The plan for answering one query: which parameters to retrieve with,
/// and the cached answer when one cleared the overlap gate.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// Arm selection, already recorded for verdict attribution.
    pub choice: ArmChoice,
    /// Endorsed answer served from the cache, if any.
    pub cached: Option<CacheHit>,
}

impl QueryPlan {
    /// Parameters retrieval should run with.
    #[must_use]
    pub const fn params(&self) -> &RetrievalParams {
        &self.choice.params
    }

    /// True when the query can be served without generation.
    #[must_use]
    pub const fn answered_from_cache(&self) -> bool {
        self.cached.is_some()
    }
}

// ---------------------------------------------------------------------------
// FeedbackLoop
// ---------------------------------------------------------------------------

/// The assembled adaptive retrieval loop.
///
/// Owns the verdict bus with the bandit and cache subscribed to it.
/// Dropping the loop shuts the bus down and joins the delivery thread;
/// verdicts still queued at that point are discarded.
pub struct FeedbackLoop {
    bus: VerdictBus,
    bandit: Arc<ParamBandit>,
    cache: Arc<AnswerCache>,
}

impl std::fmt::Debug for FeedbackLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackLoop")
            .field("bus", &self.bus)
            .field("bandit", &self.bandit)
            .field("cache", &self.cache)
            .finish()
    }
}

impl FeedbackLoop {
    /// Builds the components and wires them to the bus.
    ///
    /// # Errors
    ///
    /// Returns [`FeedbackError::InvalidConfig`] for an invalid
    /// configuration, or [`FeedbackError::Io`] if the delivery thread
    /// cannot be spawned.
    ///
    /// [`FeedbackError::InvalidConfig`]: tunesearch_core::FeedbackError::InvalidConfig
    /// [`FeedbackError::Io`]: tunesearch_core::FeedbackError::Io
    pub fn new(
        config: FeedbackLoopConfig,
        retriever: SharedRetriever,
        context: SharedContextStore,
        clusterer: impl QueryClusterer + 'static,
    ) -> FeedbackResult<Self> {
        let bandit = Arc::new(ParamBandit::new(config.bandit, clusterer)?);
        let cache = Arc::new(AnswerCache::new(config.cache, retriever, context)?);
        let bus = VerdictBus::new(config.bus)?;

        let bandit_subscriber = Arc::clone(&bandit);
        bus.subscribe("bandit", move |event: &VerdictEvent| {
            bandit_subscriber.record_verdict(event);
        });
        let cache_subscriber = Arc::clone(&cache);
        bus.subscribe("answer-cache", move |event: &VerdictEvent| {
            cache_subscriber.on_verdict(event);
        });

        info!(
            target: "tunesearch.pipeline",
            arms = bandit.config().arms.len(),
            "feedback loop started"
        );
        Ok(Self { bus, bandit, cache })
    }

    // ── Query path ───────────────────────────────────────────────────

    /// Chooses retrieval parameters for `query`, records the choice under
    /// `query_id`, and probes the cache with the chosen parameters.
    #[must_use]
    pub fn plan_query(&self, query: &str, query_id: &str) -> QueryPlan {
        let choice = self.bandit.choose_params(query, query_id);
        let cached = self
            .cache
            .lookup(query, &choice.params, choice.params.top_k);
        QueryPlan { choice, cached }
    }

    /// Arm selection without a cache probe.
    pub fn choose_params(&self, query: &str, query_id: &str) -> ArmChoice {
        self.bandit.choose_params(query, query_id)
    }

    /// Cache probe without an arm selection.
    #[must_use]
    pub fn lookup(
        &self,
        question: &str,
        params: &RetrievalParams,
        top_k: usize,
    ) -> Option<CacheHit> {
        self.cache.lookup(question, params, top_k)
    }

    // ── Verdict path ─────────────────────────────────────────────────

    /// Publishes an untagged verdict for `query_id`.
    ///
    /// Returns `false` when the bus rejected the event (shut down, or
    /// bounded and full).
    pub fn publish_verdict(&self, query_id: impl Into<String>, verdict: Verdict) -> bool {
        self.publish(VerdictEvent::new(query_id, verdict))
    }

    /// Publishes a prepared event, tags included.
    pub fn publish(&self, event: VerdictEvent) -> bool {
        self.bus.publish(event)
    }

    /// Blocks until every published verdict has been delivered or the
    /// timeout elapses. Returns `true` when the bus went idle in time.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.bus.wait_until_idle(timeout)
    }

    /// Stops verdict delivery. Idempotent; queued events are discarded.
    pub fn shutdown(&self) {
        self.bus.shutdown();
    }

    // ── Accessors ────────────────────────────────────────────────────

    /// The verdict bus. Hosts may subscribe handlers of their own.
    #[must_use]
    pub const fn bus(&self) -> &VerdictBus {
        &self.bus
    }

    /// The parameter bandit.
    #[must_use]
    pub const fn bandit(&self) -> &Arc<ParamBandit> {
        &self.bandit
    }

    /// The answer cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<AnswerCache> {
        &self.cache
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
