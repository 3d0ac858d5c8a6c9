//! End-to-end walkthrough of the adaptive retrieval loop.
//!
//! Simulates a small documentation assistant: questions retrieve evidence
//! from a toy corpus, a pretend user judges the answers, and the loop
//! learns which answers to reuse and which retrieval parameters work.
//!
//! Run with: `cargo run --example feedback_loop`

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tunesearch::prelude::*;
use tunesearch::{BanditConfig, MemoryContextStore};

/// Keyword-overlap retriever over a fixed corpus. Scores by the share of
/// query tokens found in a document, honoring `min_score` and `top_k`.
struct KeywordRetriever {
    corpus: Vec<(&'static str, &'static str)>,
}

impl KeywordRetriever {
    fn docs() -> Self {
        Self {
            corpus: vec![
                ("book#ownership", "ownership move semantics borrow checker value owner drop"),
                ("book#borrowing", "references borrowing mutable shared aliasing lifetime"),
                ("book#channels", "channel sender receiver mpsc thread message passing"),
                ("book#traits", "trait object dyn dispatch vtable generic bound impl"),
                ("book#errors", "result option question mark operator error propagation panic"),
                ("book#closures", "closure capture move fn fnmut fnonce environment"),
            ],
        }
    }
}

impl Retriever for KeywordRetriever {
    fn retrieve(
        &self,
        query: &str,
        params: &RetrievalParams,
        top_k: usize,
    ) -> Vec<SourceFragment> {
        let query_tokens: HashSet<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_owned)
            .collect();
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<SourceFragment> = self
            .corpus
            .iter()
            .filter_map(|(id, content)| {
                let content_tokens: HashSet<&str> = content.split_whitespace().collect();
                let overlap = query_tokens
                    .iter()
                    .filter(|token| content_tokens.contains(token.as_str()))
                    .count();
                #[allow(clippy::cast_precision_loss)]
                let score = overlap as f64 / query_tokens.len() as f64;
                (score >= params.min_score && overlap > 0)
                    .then(|| SourceFragment::new(*id, *content).with_score(score))
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        scored.truncate(top_k);
        scored
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("\n\x1b[1;36m=== tunesearch: adaptive retrieval walkthrough ===\x1b[0m\n");

    let store = Arc::new(MemoryContextStore::new());
    let feedback = FeedbackLoop::new(
        FeedbackLoopConfig {
            bandit: BanditConfig {
                seed: Some(7),
                ..BanditConfig::default()
            },
            ..FeedbackLoopConfig::default()
        },
        Arc::new(KeywordRetriever::docs()),
        Arc::clone(&store) as SharedContextStore,
        QueryKindClusterer,
    )
    .expect("assemble feedback loop");

    // ── 1. Cold questions: everything needs generation ────────────────────
    println!("\x1b[1m--- 1. cold questions ---\x1b[0m");
    let first_round = [
        ("q-1", "how does ownership move a value"),
        ("q-2", "what is a trait object"),
        ("q-3", "how does the question mark operator propagate an error"),
    ];
    for (query_id, question) in first_round {
        let plan = feedback.plan_query(question, query_id);
        assert!(!plan.answered_from_cache());
        let sources = KeywordRetriever::docs().retrieve(question, plan.params(), 5);
        let evidence: Vec<&str> = sources.iter().map(|s| s.id.as_str()).collect();
        println!("  miss  {question:55} evidence: {evidence:?}");

        store.insert(
            query_id,
            QueryContext::new(question, format!("(generated) {question}")).with_sources(sources),
        );
        feedback.publish_verdict(query_id, Verdict::Up);
    }
    assert!(feedback.wait_until_idle(Duration::from_secs(5)));
    println!("  cached entries after approvals: {}\n", feedback.cache().len());

    // ── 2. Rephrasings: same evidence, served from cache ──────────────────
    println!("\x1b[1m--- 2. rephrased questions ---\x1b[0m");
    let rephrased = [
        ("q-4", "how does move semantics transfer ownership of a value"),
        ("q-5", "explain dyn trait object dispatch"),
        ("q-6", "what does the question mark operator do with an error"),
    ];
    for (query_id, question) in rephrased {
        let plan = feedback.plan_query(question, query_id);
        match &plan.cached {
            Some(hit) => println!(
                "  hit   {question:55} similarity {:.2}: {}",
                hit.similarity, hit.answer
            ),
            None => println!("  miss  {question:55} (would generate)"),
        }
    }

    // ── 3. A rejection shortens the cached answer's life ──────────────────
    println!("\n\x1b[1m--- 3. thumbs-down on q-1 ---\x1b[0m");
    feedback.publish_verdict("q-1", Verdict::Down);
    assert!(feedback.wait_until_idle(Duration::from_secs(5)));
    for entry in feedback.cache().entries() {
        println!(
            "  {} expires in {:>4}s  ({})",
            entry.id,
            entry.remaining(Instant::now()).as_secs(),
            entry.question
        );
    }

    // ── 4. The bandit learns which parameters earn approval ───────────────
    println!("\n\x1b[1m--- 4. parameter learning (precise answers rewarded) ---\x1b[0m");
    for round in 0..120 {
        let query_id = format!("train-{round}");
        let plan = feedback.plan_query("how do closures capture their environment", &query_id);
        let verdict = if plan.params().top_k <= 3 {
            Verdict::Up
        } else {
            Verdict::Down
        };
        feedback.publish_verdict(&query_id, verdict);
    }
    assert!(feedback.wait_until_idle(Duration::from_secs(5)));

    let snapshot = feedback.bandit().snapshot();
    let json = serde_json::to_string_pretty(&snapshot).expect("encode snapshot");
    println!("{json}");

    // ── 5. Final counters ─────────────────────────────────────────────────
    println!("\n\x1b[1m--- 5. metrics ---\x1b[0m");
    println!("  bus:    {:?}", feedback.bus().metrics().snapshot());
    println!("  bandit: {:?}", feedback.bandit().metrics().snapshot());
    println!("  cache:  {:?}", feedback.cache().metrics().snapshot());
    println!("\n\x1b[1;32mdone\x1b[0m\n");
}
