//! # tunesearch
//!
//! Adaptive retrieval for on-device RAG assistants: user verdicts
//! (thumbs up / thumbs down) feed back into retrieval so answer quality
//! improves with use, without retraining or network calls.
//!
//! Three components close the loop:
//!
//! 1. **Verdict bus** ([`VerdictBus`]): distributes verdict events to
//!    subscribers on a dedicated delivery thread, off the query path. A
//!    panicking subscriber is isolated; the others still run.
//! 2. **Parameter bandit** ([`ParamBandit`]): Thompson sampling over a
//!    fixed menu of retrieval parameter arms, with independent posteriors
//!    per query cluster. Up-verdicts reward the arm that produced the
//!    answer, down-verdicts penalize it.
//! 3. **Answer cache** ([`AnswerCache`]): endorsed answers are stored and
//!    served again when a new question retrieves substantially the same
//!    evidence, judged by Jaccard overlap of source-fragment ids.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tunesearch::prelude::*;
//! use tunesearch::MemoryContextStore;
//!
//! // A toy retriever that always surfaces the same two fragments.
//! struct StaticRetriever;
//!
//! impl Retriever for StaticRetriever {
//!     fn retrieve(
//!         &self,
//!         _query: &str,
//!         _params: &RetrievalParams,
//!         _top_k: usize,
//!     ) -> Vec<SourceFragment> {
//!         vec![
//!             SourceFragment::new("guide#ownership", "ownership moves values"),
//!             SourceFragment::new("guide#borrowing", "references borrow them"),
//!         ]
//!     }
//! }
//!
//! let store = Arc::new(MemoryContextStore::new());
//! let feedback = FeedbackLoop::new(
//!     FeedbackLoopConfig::default(),
//!     Arc::new(StaticRetriever),
//!     Arc::clone(&store) as SharedContextStore,
//!     GlobalClusterer,
//! )?;
//!
//! // Plan a query: pick parameters, probe the cache. Cold cache: miss.
//! let plan = feedback.plan_query("how does ownership work?", "q-1");
//! assert!(!plan.answered_from_cache());
//!
//! // The host generates an answer, records its context, and the user
//! // approves it.
//! store.insert(
//!     "q-1",
//!     QueryContext::new("how does ownership work?", "each value has one owner")
//!         .with_sources(StaticRetriever.retrieve("", plan.params(), 5)),
//! );
//! assert!(feedback.publish_verdict("q-1", Verdict::Up));
//! assert!(feedback.wait_until_idle(Duration::from_secs(5)));
//!
//! // A rephrased question retrieving the same evidence is served from
//! // the cache, skipping generation entirely.
//! let plan = feedback.plan_query("explain rust ownership", "q-2");
//! assert!(plan.answered_from_cache());
//! # Ok::<(), tunesearch::FeedbackError>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//!  plan_query ──► ParamBandit ──► ArmChoice ──► AnswerCache.lookup ──► QueryPlan
//!                     ▲                              ▲
//!                     │ record_verdict               │ on_verdict
//!                     │                              │
//!  publish_verdict ──► VerdictBus (delivery thread) ─┘
//! ```
//!
//! ## Crate Layout
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | [`tunesearch-core`](core) | Types, collaborator traits, errors, query clustering |
//! | [`tunesearch-feedback`](feedback) | Verdict bus, parameter bandit, answer cache, assembly |
//!
//! ## Key Types
//!
//! - [`FeedbackLoop`] — assembled loop: plan queries, publish verdicts
//! - [`FeedbackLoopConfig`] — bus, bandit, and cache settings in one place
//! - [`QueryPlan`] — chosen parameters plus the cached answer, if any
//! - [`Retriever`] / [`ContextStore`] — the host-implemented seams
//! - [`QueryKindClusterer`] — clusters queries by shape for per-cluster learning
//!
//! # Threading
//!
//! Everything is synchronous except verdict delivery, which runs on one
//! dedicated thread owned by the bus. Hosts never block on learning:
//! publishing a verdict is a queue push, and a bounded bus drops rather
//! than blocks when full.

// ─── Sub-crate module aliases (advanced access) ─────────────────────────────

/// Core types, collaborator traits, and error definitions.
pub use tunesearch_core as core;
/// Verdict bus, parameter bandit, answer cache, and loop assembly.
pub use tunesearch_feedback as feedback;

// ─── Error types ────────────────────────────────────────────────────────────

pub use tunesearch_core::error::{FeedbackError, FeedbackResult};

// ─── Data model ─────────────────────────────────────────────────────────────

pub use tunesearch_core::types::{
    ArmAssignment, CacheEntry, CacheHit, QueryContext, RetrievalParams, SourceFragment, Verdict,
    VerdictEvent, fragment_id_set, jaccard_similarity,
};

// ─── Collaborator traits ────────────────────────────────────────────────────

pub use tunesearch_core::traits::{
    ContextStore, QueryClusterer, Retriever, SharedContextStore, SharedRetriever, VerdictHandler,
};

// ─── Query clustering and context storage ───────────────────────────────────

pub use tunesearch_core::cluster::{
    GLOBAL_CLUSTER, GlobalClusterer, QueryKind, QueryKindClusterer,
};
pub use tunesearch_core::store::MemoryContextStore;

// ─── Verdict bus ────────────────────────────────────────────────────────────

pub use tunesearch_feedback::bus::{BusConfig, BusMetrics, BusMetricsSnapshot, VerdictBus};

// ─── Parameter bandit ───────────────────────────────────────────────────────

pub use tunesearch_feedback::bandit::{
    ArmChoice, ArmPosterior, ArmSnapshot, BanditConfig, BanditMetrics, BanditMetricsSnapshot,
    BanditSnapshot, ParamBandit, default_arm_menu,
};

// ─── Answer cache ───────────────────────────────────────────────────────────

pub use tunesearch_feedback::answer_cache::{
    AnswerCache, AnswerCacheConfig, CacheMetrics, CacheMetricsSnapshot,
};

// ─── Loop assembly ──────────────────────────────────────────────────────────

pub use tunesearch_feedback::pipeline::{FeedbackLoop, FeedbackLoopConfig, QueryPlan};

// ─── Prelude ────────────────────────────────────────────────────────────────

/// Convenience re-exports for common usage.
///
/// ```rust
/// use tunesearch::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        CacheHit, ContextStore, FeedbackError, FeedbackLoop, FeedbackLoopConfig, FeedbackResult,
        GlobalClusterer, QueryClusterer, QueryContext, QueryKindClusterer, QueryPlan,
        RetrievalParams, Retriever, SharedContextStore, SharedRetriever, SourceFragment, Verdict,
        VerdictEvent, VerdictHandler,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_types_accessible() {
        let _params = RetrievalParams::default();
        let _bus = BusConfig::default();
        let _bandit = BanditConfig::default();
        let _cache = AnswerCacheConfig::default();
        let _loop_config = FeedbackLoopConfig::default();
    }

    #[test]
    fn error_types_accessible() {
        let err = FeedbackError::invalid_config("field", 0usize, "reason");
        let result: FeedbackResult<()> = Err(err);
        assert!(result.is_err());
    }

    #[test]
    fn prelude_provides_essentials() {
        use crate::prelude::*;

        let _config = FeedbackLoopConfig::default();
        let event = VerdictEvent::new("q-1", Verdict::Up);
        assert!(event.verdict.is_up());
    }

    #[test]
    fn traits_are_object_safe() {
        fn _takes_retriever(_: &dyn Retriever) {}
        fn _takes_store(_: &dyn ContextStore) {}
        fn _takes_clusterer(_: &dyn QueryClusterer) {}
        fn _takes_handler(_: &dyn VerdictHandler) {}
    }

    #[test]
    fn utility_functions_accessible() {
        let a = [SourceFragment::new("c1", "x"), SourceFragment::new("c2", "y")];
        let b = [SourceFragment::new("c2", "y"), SourceFragment::new("c3", "z")];
        let similarity = jaccard_similarity(&fragment_id_set(&a), &fragment_id_set(&b));
        assert!((similarity - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn query_kind_accessible() {
        let kind = QueryKind::classify("how does borrowing work in rust?");
        assert_eq!(kind, QueryKind::NaturalLanguage);
    }

    #[test]
    fn default_arm_menu_is_valid() {
        let menu = default_arm_menu();
        assert!(!menu.is_empty());
        for arm in &menu {
            assert!(arm.validate().is_ok());
        }
    }

    #[test]
    fn sub_crate_modules_accessible() {
        // Advanced users can reach sub-crate modules directly.
        let _ = core::types::Verdict::Down;
        let _ = feedback::bus::BusConfig::default();
    }
}
