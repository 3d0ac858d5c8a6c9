//! Adaptive retrieval components for the tunesearch feedback loop.
//!
//! Three components turn user verdicts into better retrieval:
//!
//! | Component | Learns from verdicts by |
//! |-----------|-------------------------|
//! | [`VerdictBus`] | distributing them to subscribers off the query path |
//! | [`ParamBandit`] | shifting Thompson-sampling posteriors per query cluster |
//! | [`AnswerCache`] | promoting endorsed answers and punishing rejected ones |
//!
//! [`FeedbackLoop`] assembles all three over one bus; hosts that need a
//! different wiring can build the components directly.

pub mod answer_cache;
pub mod bandit;
pub mod bus;
pub mod pipeline;

pub use answer_cache::{AnswerCache, AnswerCacheConfig, CacheMetrics, CacheMetricsSnapshot};
pub use bandit::{
    ArmChoice, ArmPosterior, ArmSnapshot, BanditConfig, BanditMetrics, BanditMetricsSnapshot,
    BanditSnapshot, ParamBandit, default_arm_menu,
};
pub use bus::{BusConfig, BusMetrics, BusMetricsSnapshot, VerdictBus};
pub use pipeline::{FeedbackLoop, FeedbackLoopConfig, QueryPlan};
