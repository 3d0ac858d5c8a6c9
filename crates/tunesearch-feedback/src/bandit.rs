//! Thompson-sampling bandit over a fixed menu of retrieval parameters.
//!
//! Instead of tuning `top_k`, `mmr_lambda`, and `min_score` by hand,
//! [`ParamBandit`] keeps one Beta posterior per (cluster, arm) pair and
//! lets user verdicts decide which configuration wins:
//!
//! 1. [`choose_params`](ParamBandit::choose_params) draws one sample from
//!    each arm's posterior for the query's cluster and picks the largest
//!    (ties go to the lowest arm index).
//! 2. The chosen arm is recorded under the query id so a later verdict can
//!    be attributed to it.
//! 3. [`update`](ParamBandit::update) folds the verdict into that arm's
//!    posterior: up-verdicts increment alpha, down-verdicts increment beta.
//!
//! All posteriors start at Beta(1, 1), the uniform prior, so exploration
//! is automatic: unproven arms keep sampling across the whole unit
//! interval until evidence narrows them down. A verdict for an unknown
//! query id is a silent no-op, counted in the metrics.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::Beta;
use tracing::{debug, trace};
use tunesearch_core::{
    ArmAssignment, FeedbackError, FeedbackResult, QueryClusterer, RetrievalParams, Verdict,
    VerdictEvent,
};

// ---------------------------------------------------------------------------
// Arm posterior
// ---------------------------------------------------------------------------

/// Beta posterior over one arm's success probability.
///
/// `alpha - 1` counts observed up-verdicts, `beta - 1` observed
/// down-verdicts; Beta(1, 1) is the uniform prior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmPosterior {
    /// Success pseudo-count, starts at 1.0.
    pub alpha: f64,
    /// Failure pseudo-count, starts at 1.0.
    pub beta: f64,
    /// Verdicts folded into this posterior.
    pub observations: u64,
}

impl ArmPosterior {
    /// The uniform prior, Beta(1, 1).
    #[must_use]
    pub const fn uniform() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            observations: 0,
        }
    }

    /// Folds one verdict into the posterior.
    pub fn observe(&mut self, success: bool) {
        if success {
            self.alpha += 1.0;
        } else {
            self.beta += 1.0;
        }
        self.observations += 1;
    }

    /// Posterior mean, `alpha / (alpha + beta)`.
    #[must_use]
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Posterior variance.
    #[must_use]
    pub fn variance(&self) -> f64 {
        let total = self.alpha + self.beta;
        (self.alpha * self.beta) / (total * total * (total + 1.0))
    }

    /// Draws one Thompson sample from the posterior.
    ///
    /// Falls back to the posterior mean if the Beta parameters are
    /// degenerate (only possible after importing a hand-edited snapshot).
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        Beta::new(self.alpha, self.beta).map_or_else(|_| self.mean(), |dist| dist.sample(rng))
    }
}

impl Default for ArmPosterior {
    fn default() -> Self {
        Self::uniform()
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// The default four-arm menu.
///
/// Spread across the precision/recall range so feedback has meaningfully
/// different configurations to compare:
///
/// | Arm | Intent   | `top_k` | `mmr_lambda` | `min_score` |
/// |-----|----------|---------|--------------|-------------|
/// | 0   | precise  | 3       | 0.9          | 0.35        |
/// | 1   | balanced | 5       | 0.7          | 0.25        |
/// | 2   | diverse  | 5       | 0.4          | 0.2         |
/// | 3   | broad    | 8       | 0.5          | 0.1         |
#[must_use]
pub fn default_arm_menu() -> Vec<RetrievalParams> {
    vec![
        RetrievalParams::new(3, 0.9, 0.35),
        RetrievalParams::new(5, 0.7, 0.25),
        RetrievalParams::new(5, 0.4, 0.2),
        RetrievalParams::new(8, 0.5, 0.1),
    ]
}

/// Configuration for the [`ParamBandit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditConfig {
    /// The fixed arm menu. Arm order is part of the bandit's identity:
    /// snapshots and assignments refer to arms by index.
    pub arms: Vec<RetrievalParams>,
    /// Maximum retained query-to-arm assignments. `None` (the default)
    /// keeps them all; with a bound, the oldest assignment is evicted
    /// first and verdicts for evicted ids become no-ops.
    pub max_assignments: Option<usize>,
    /// Seed for the sampling RNG. `None` seeds from entropy; fixing it
    /// makes arm selection reproducible for tests and replay.
    pub seed: Option<u64>,
}

impl BanditConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FeedbackError::InvalidConfig`] when the menu is empty,
    /// any arm is invalid, or `max_assignments` is `Some(0)`.
    pub fn validate(&self) -> FeedbackResult<()> {
        if self.arms.is_empty() {
            return Err(FeedbackError::invalid_config(
                "arms",
                "[]",
                "arm menu must contain at least one configuration",
            ));
        }
        for arm in &self.arms {
            arm.validate()?;
        }
        if self.max_assignments == Some(0) {
            return Err(FeedbackError::invalid_config(
                "max_assignments",
                0usize,
                "assignment bound must retain at least one entry",
            ));
        }
        Ok(())
    }
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            arms: default_arm_menu(),
            max_assignments: None,
            seed: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Lock-free counters for bandit telemetry.
#[derive(Debug, Default)]
pub struct BanditMetrics {
    /// Arm selections served.
    pub selections: AtomicU64,
    /// Verdicts folded into a posterior.
    pub updates_applied: AtomicU64,
    /// Verdicts ignored because no assignment was found.
    pub attribution_misses: AtomicU64,
    /// Assignments evicted under `max_assignments`.
    pub assignments_evicted: AtomicU64,
}

impl BanditMetrics {
    /// Point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> BanditMetricsSnapshot {
        BanditMetricsSnapshot {
            selections: self.selections.load(Ordering::Relaxed),
            updates_applied: self.updates_applied.load(Ordering::Relaxed),
            attribution_misses: self.attribution_misses.load(Ordering::Relaxed),
            assignments_evicted: self.assignments_evicted.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`BanditMetrics`] counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanditMetricsSnapshot {
    /// Arm selections served.
    pub selections: u64,
    /// Verdicts folded into a posterior.
    pub updates_applied: u64,
    /// Verdicts ignored because no assignment was found.
    pub attribution_misses: u64,
    /// Assignments evicted under `max_assignments`.
    pub assignments_evicted: u64,
}

// ---------------------------------------------------------------------------
// Selection result and snapshots
// ---------------------------------------------------------------------------

/// One arm selection, ready to drive a retrieval call.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmChoice {
    /// Cluster the query was mapped to.
    pub cluster_id: String,
    /// Index of the chosen arm in the configured menu.
    pub arm_index: usize,
    /// The chosen arm's parameters.
    pub params: RetrievalParams,
}

/// Serializable view of one arm's learned state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSnapshot {
    /// The arm's parameters, for readability and import validation.
    pub params: RetrievalParams,
    /// Success pseudo-count.
    pub alpha: f64,
    /// Failure pseudo-count.
    pub beta: f64,
    /// Verdicts folded into this arm.
    pub observations: u64,
}

/// Serializable view of every cluster's posteriors.
///
/// Clusters are ordered for stable output. Assignments are deliberately
/// absent: they are ephemeral attribution state, not learned knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditSnapshot {
    /// Per-cluster arm posteriors, keyed by cluster id.
    pub clusters: BTreeMap<String, Vec<ArmSnapshot>>,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// Mutable state behind the bandit's lock.
struct BanditState {
    /// Per-cluster posteriors, one entry per configured arm. Created
    /// lazily on first selection for a cluster.
    clusters: HashMap<String, Vec<ArmPosterior>>,
    /// Pending attribution: which arm answered which query.
    assignments: HashMap<String, ArmAssignment>,
    /// Assignment keys in insertion order, for bounded eviction. Holds
    /// exactly the keys of `assignments`.
    assignment_order: VecDeque<String>,
    rng: StdRng,
}

/// Index of the largest sample, first one winning ties.
fn best_arm_index(samples: &[f64]) -> usize {
    let mut best = 0;
    for (index, sample) in samples.iter().enumerate().skip(1) {
        if *sample > samples[best] {
            best = index;
        }
    }
    best
}

// ---------------------------------------------------------------------------
// ParamBandit
// ---------------------------------------------------------------------------

/// Per-cluster Thompson sampling over the configured arm menu.
///
/// Thread-safe: selection and update take a write lock briefly; snapshots
/// take a read lock. See the [module-level documentation](self) for the
/// learning loop.
pub struct ParamBandit {
    config: BanditConfig,
    clusterer: Box<dyn QueryClusterer>,
    state: RwLock<BanditState>,
    metrics: Arc<BanditMetrics>,
}

impl std::fmt::Debug for ParamBandit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamBandit")
            .field("arms", &self.config.arms.len())
            .field("clusters", &self.cluster_count())
            .field("assignments", &self.assignment_count())
            .finish_non_exhaustive()
    }
}

impl ParamBandit {
    /// Creates a bandit over `config.arms`, segmented by `clusterer`.
    ///
    /// # Errors
    ///
    /// Returns [`FeedbackError::InvalidConfig`] if `config` is invalid.
    pub fn new(
        config: BanditConfig,
        clusterer: impl QueryClusterer + 'static,
    ) -> FeedbackResult<Self> {
        config.validate()?;
        let rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Ok(Self {
            config,
            clusterer: Box::new(clusterer),
            state: RwLock::new(BanditState {
                clusters: HashMap::new(),
                assignments: HashMap::new(),
                assignment_order: VecDeque::new(),
                rng,
            }),
            metrics: Arc::new(BanditMetrics::default()),
        })
    }

    fn read_state(&self) -> RwLockReadGuard<'_, BanditState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, BanditState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ── Selection ────────────────────────────────────────────────────

    /// Chooses retrieval parameters for `query` and records the choice
    /// under `query_id` for later verdict attribution.
    ///
    /// Re-selecting for an already-assigned query id overwrites the
    /// assignment but keeps its original eviction age.
    pub fn choose_params(&self, query: &str, query_id: &str) -> ArmChoice {
        let cluster_id = self.clusterer.cluster(query);
        let mut state = self.write_state();
        let BanditState {
            clusters,
            assignments,
            assignment_order,
            rng,
        } = &mut *state;

        let posteriors = clusters
            .entry(cluster_id.clone())
            .or_insert_with(|| vec![ArmPosterior::uniform(); self.config.arms.len()]);
        let samples: Vec<f64> = posteriors.iter().map(|p| p.sample(rng)).collect();
        let arm_index = best_arm_index(&samples);

        let assignment = ArmAssignment {
            cluster_id: cluster_id.clone(),
            arm_index,
        };
        if assignments.insert(query_id.to_owned(), assignment).is_none() {
            assignment_order.push_back(query_id.to_owned());
        }
        if let Some(max) = self.config.max_assignments {
            while assignments.len() > max {
                let Some(oldest) = assignment_order.pop_front() else {
                    break;
                };
                assignments.remove(&oldest);
                self.metrics.assignments_evicted.fetch_add(1, Ordering::Relaxed);
                trace!(
                    target: "tunesearch.bandit",
                    query_id = %oldest,
                    "assignment evicted under bound"
                );
            }
        }
        drop(state);

        self.metrics.selections.fetch_add(1, Ordering::Relaxed);
        let params = self.config.arms[arm_index];
        debug!(
            target: "tunesearch.bandit",
            query_id,
            cluster = %cluster_id,
            arm = arm_index,
            params = %params,
            "arm selected"
        );
        ArmChoice {
            cluster_id,
            arm_index,
            params,
        }
    }

    // ── Updates ──────────────────────────────────────────────────────

    /// Attributes a verdict to the arm recorded for `query_id`.
    ///
    /// Unknown query ids are ignored and counted as attribution misses.
    /// Repeated verdicts for the same id all land on the same arm; the
    /// assignment is kept, not consumed.
    pub fn update(&self, query_id: &str, verdict: Verdict) {
        let mut state = self.write_state();
        let Some(assignment) = state.assignments.get(query_id).cloned() else {
            drop(state);
            self.record_miss(query_id, "no assignment for query id");
            return;
        };
        let Some(posterior) = state
            .clusters
            .get_mut(&assignment.cluster_id)
            .and_then(|arms| arms.get_mut(assignment.arm_index))
        else {
            drop(state);
            self.record_miss(query_id, "assignment points at unknown posterior");
            return;
        };

        posterior.observe(verdict.is_up());
        let (alpha, beta) = (posterior.alpha, posterior.beta);
        drop(state);

        self.metrics.updates_applied.fetch_add(1, Ordering::Relaxed);
        trace!(
            target: "tunesearch.bandit",
            query_id,
            cluster = %assignment.cluster_id,
            arm = assignment.arm_index,
            verdict = %verdict,
            alpha,
            beta,
            "posterior updated"
        );
    }

    /// Bus adapter: attributes `event.verdict` to `event.query_id`.
    pub fn record_verdict(&self, event: &VerdictEvent) {
        self.update(&event.query_id, event.verdict);
    }

    fn record_miss(&self, query_id: &str, reason: &str) {
        self.metrics.attribution_misses.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: "tunesearch.bandit",
            query_id,
            reason,
            "verdict not attributed"
        );
    }

    /// Discards all learned posteriors and pending assignments.
    pub fn reset(&self) {
        let mut state = self.write_state();
        state.clusters.clear();
        state.assignments.clear();
        state.assignment_order.clear();
        drop(state);
        debug!(target: "tunesearch.bandit", "bandit state reset");
    }

    // ── Snapshots ────────────────────────────────────────────────────

    /// Copies the learned posteriors of every cluster.
    #[must_use]
    pub fn snapshot(&self) -> BanditSnapshot {
        let state = self.read_state();
        let clusters = state
            .clusters
            .iter()
            .map(|(cluster_id, posteriors)| {
                let arms = posteriors
                    .iter()
                    .zip(&self.config.arms)
                    .map(|(posterior, params)| ArmSnapshot {
                        params: *params,
                        alpha: posterior.alpha,
                        beta: posterior.beta,
                        observations: posterior.observations,
                    })
                    .collect();
                (cluster_id.clone(), arms)
            })
            .collect();
        BanditSnapshot { clusters }
    }

    /// Serializes the learned posteriors as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`FeedbackError::SnapshotEncode`] if serialization fails.
    pub fn export_json(&self) -> FeedbackResult<String> {
        serde_json::to_string_pretty(&self.snapshot())
            .map_err(|source| FeedbackError::SnapshotEncode {
                source: Box::new(source),
            })
    }

    /// Replaces the learned posteriors with a previously exported
    /// snapshot. Pending assignments are kept.
    ///
    /// # Errors
    ///
    /// Returns [`FeedbackError::SnapshotDecode`] when the JSON does not
    /// parse, a cluster's arm count differs from the configured menu, arm
    /// parameters do not match, or Beta counts are below the uniform
    /// prior.
    pub fn import_json(&self, json: &str) -> FeedbackResult<()> {
        let snapshot: BanditSnapshot =
            serde_json::from_str(json).map_err(|err| FeedbackError::SnapshotDecode {
                reason: format!("snapshot is not valid JSON: {err}"),
            })?;

        for (cluster_id, arms) in &snapshot.clusters {
            if arms.len() != self.config.arms.len() {
                return Err(FeedbackError::SnapshotDecode {
                    reason: format!(
                        "cluster \"{cluster_id}\" has {} arms, expected {}",
                        arms.len(),
                        self.config.arms.len()
                    ),
                });
            }
            for (index, arm) in arms.iter().enumerate() {
                if arm.params != self.config.arms[index] {
                    return Err(FeedbackError::SnapshotDecode {
                        reason: format!(
                            "cluster \"{cluster_id}\" arm {index} params do not match the configured menu"
                        ),
                    });
                }
                if !arm.alpha.is_finite()
                    || !arm.beta.is_finite()
                    || arm.alpha < 1.0
                    || arm.beta < 1.0
                {
                    return Err(FeedbackError::SnapshotDecode {
                        reason: format!(
                            "cluster \"{cluster_id}\" arm {index} Beta counts must be finite and at least 1.0"
                        ),
                    });
                }
            }
        }

        let clusters = snapshot
            .clusters
            .into_iter()
            .map(|(cluster_id, arms)| {
                let posteriors = arms
                    .into_iter()
                    .map(|arm| ArmPosterior {
                        alpha: arm.alpha,
                        beta: arm.beta,
                        observations: arm.observations,
                    })
                    .collect();
                (cluster_id, posteriors)
            })
            .collect();

        let mut state = self.write_state();
        state.clusters = clusters;
        drop(state);
        debug!(target: "tunesearch.bandit", "posteriors imported from snapshot");
        Ok(())
    }

    // ── Accessors ────────────────────────────────────────────────────

    /// Number of clusters with learned posteriors.
    #[must_use]
    pub fn cluster_count(&self) -> usize {
        self.read_state().clusters.len()
    }

    /// Number of pending query-to-arm assignments.
    #[must_use]
    pub fn assignment_count(&self) -> usize {
        self.read_state().assignments.len()
    }

    /// Shared reference to the metrics counters.
    #[must_use]
    pub const fn metrics(&self) -> &Arc<BanditMetrics> {
        &self.metrics
    }

    /// Configuration reference.
    #[must_use]
    pub const fn config(&self) -> &BanditConfig {
        &self.config
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
