//! Collaborator traits for the tunesearch feedback loop.
//!
//! - [`ContextStore`]: Lookup of what was asked/answered for a query id.
//! - [`Retriever`]: The retrieval pipeline the loop tunes and probes.
//! - [`QueryClusterer`]: Maps queries to the buckets the bandit learns over.
//! - [`VerdictHandler`]: Callback invoked for every published verdict.
//!
//! Each seam is deliberately narrow so production pipelines and test stubs
//! plug in equally well behind `Arc<dyn Trait>` handles.

use std::sync::Arc;

use crate::types::{QueryContext, RetrievalParams, SourceFragment, VerdictEvent};

// ─── Context Store ──────────────────────────────────────────────────────────

/// Lookup of the recorded context for an answered query.
///
/// The feedback loop only ever reads: how contexts get written, persisted,
/// or expired is the host application's business.
pub trait ContextStore: Send + Sync {
    /// Returns the context recorded for `query_id`, if any.
    ///
    /// `None` means the verdict cannot be acted on; consumers treat that as
    /// a silent skip, not an error.
    fn get(&self, query_id: &str) -> Option<QueryContext>;
}

/// Shared handle for dynamic context stores.
pub type SharedContextStore = Arc<dyn ContextStore>;

// ─── Retriever ──────────────────────────────────────────────────────────────

/// The retrieval pipeline whose parameters the loop tunes.
///
/// # Contract
///
/// Infallible by design: a failed or degraded retrieval surfaces as an empty
/// result list, never a panic. Callers must behave sensibly on empty output.
pub trait Retriever: Send + Sync {
    /// Retrieves up to `top_k` fragments for `query` under `params`.
    ///
    /// `top_k` is passed separately from `params.top_k` so callers can probe
    /// with a different depth than the arm prescribes.
    fn retrieve(&self, query: &str, params: &RetrievalParams, top_k: usize)
    -> Vec<SourceFragment>;
}

/// Shared handle for dynamic retrievers.
pub type SharedRetriever = Arc<dyn Retriever>;

// ─── Query Clusterer ────────────────────────────────────────────────────────

/// Maps a query to the cluster whose posteriors the bandit should use.
///
/// # Contract
///
/// Must be total and deterministic: the same query always lands in the same
/// cluster, and every query lands somewhere. Cluster ids are opaque strings;
/// new ids simply start fresh posteriors.
pub trait QueryClusterer: Send + Sync {
    /// Returns the cluster id for `query`.
    fn cluster(&self, query: &str) -> String;
}

// ─── Verdict Handler ────────────────────────────────────────────────────────

/// Callback invoked by the verdict bus for every published event.
///
/// Handlers run on the bus's delivery thread, one event at a time, so they
/// should be quick. A panicking handler is isolated and counted; it never
/// poisons the bus or starves other subscribers.
pub trait VerdictHandler: Send + Sync {
    /// Called once per published event, in publication order.
    fn on_verdict(&self, event: &VerdictEvent);
}

/// Any `Fn(&VerdictEvent)` closure is a handler.
impl<F> VerdictHandler for F
where
    F: Fn(&VerdictEvent) + Send + Sync,
{
    fn on_verdict(&self, event: &VerdictEvent) {
        self(event);
    }
}
