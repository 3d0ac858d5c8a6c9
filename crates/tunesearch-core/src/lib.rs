//! Core traits, types, and error types for the tunesearch feedback loop.
//!
//! This crate defines the collaborator interfaces ([`ContextStore`],
//! [`Retriever`], [`QueryClusterer`], [`VerdictHandler`]), the shared data
//! model ([`VerdictEvent`], [`RetrievalParams`], [`QueryContext`],
//! [`CacheEntry`]), error types ([`FeedbackError`]), and query clustering
//! used across all tunesearch crates.
//!
//! It has minimal external dependencies and is intended to be depended on
//! by every other crate in the workspace.

pub mod cluster;
pub mod error;
pub mod store;
pub mod traits;
pub mod types;

pub use cluster::{GLOBAL_CLUSTER, GlobalClusterer, QueryKind, QueryKindClusterer};
pub use error::{FeedbackError, FeedbackResult};
pub use store::MemoryContextStore;
pub use traits::{
    ContextStore, QueryClusterer, Retriever, SharedContextStore, SharedRetriever, VerdictHandler,
};
pub use types::{
    ArmAssignment, CacheEntry, CacheHit, QueryContext, RetrievalParams, SourceFragment, Verdict,
    VerdictEvent, fragment_id_set, jaccard_similarity,
};
