//! Query clustering for per-cluster bandit posteriors.
//!
//! The bandit keeps one posterior set per cluster id, so the clusterer
//! decides how finely feedback is segmented:
//!
//! | Clusterer            | Granularity                     | Cold-start cost |
//! |----------------------|---------------------------------|-----------------|
//! | [`GlobalClusterer`]  | One bucket for everything       | Lowest          |
//! | [`QueryKindClusterer`] | One bucket per [`QueryKind`]  | Three buckets   |
//!
//! Both are total and deterministic. Hosts with their own segmentation
//! (per-corpus, per-user) implement [`QueryClusterer`] directly.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::traits::QueryClusterer;

/// Cluster id used when all queries share one posterior set.
pub const GLOBAL_CLUSTER: &str = "global";

// ─── Global Clusterer ───────────────────────────────────────────────────────

/// Maps every query to [`GLOBAL_CLUSTER`].
///
/// The right default when verdict volume is too low to split: all feedback
/// pools into a single posterior set per arm.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalClusterer;

impl QueryClusterer for GlobalClusterer {
    fn cluster(&self, _query: &str) -> String {
        GLOBAL_CLUSTER.to_owned()
    }
}

// ─── Query-Kind Clusterer ───────────────────────────────────────────────────

/// Shape of a query, as seen by [`QueryKindClusterer`].
///
/// Different shapes reward different retrieval parameters: identifier
/// lookups want precise high-threshold retrieval, while natural-language
/// questions want broader and more diverse evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryKind {
    /// Looks like an identifier: file path, symbol, issue id.
    Identifier,
    /// Short keyword query (up to 3 words, no question structure).
    ShortKeyword,
    /// Question or multi-word descriptive phrase.
    NaturalLanguage,
}

impl QueryKind {
    /// Classifies a query by cheap lexical heuristics.
    ///
    /// - Single token carrying path separators, `::`, dots, underscores,
    ///   mixed case, or a prefix-digits id pattern → `Identifier`
    /// - Up to 3 words (empty included) → `ShortKeyword`
    /// - 4+ words → `NaturalLanguage`
    #[must_use]
    pub fn classify(query: &str) -> Self {
        let trimmed = query.trim();
        if Self::looks_like_identifier(trimmed) {
            return Self::Identifier;
        }
        if trimmed.split_whitespace().count() <= 3 {
            Self::ShortKeyword
        } else {
            Self::NaturalLanguage
        }
    }

    /// Heuristic check for identifier-like single-token queries.
    fn looks_like_identifier(s: &str) -> bool {
        if s.is_empty() || s.chars().any(char::is_whitespace) {
            return false;
        }

        // Paths, module paths, dotted names, snake_case.
        if s.contains('/') || s.contains('\\') || s.contains("::") || s.contains('.') {
            return true;
        }
        if s.contains('_') {
            return true;
        }

        // camelCase or PascalCase-with-interior-uppercase, but not plain
        // capitalized words like "Rust".
        let has_lower = s.chars().any(|c| c.is_lowercase());
        let has_upper = s.chars().any(|c| c.is_uppercase());
        let first_upper = s.chars().next().is_some_and(|c| c.is_uppercase());
        let rest_lower = s.chars().skip(1).all(|c| c.is_lowercase());
        if has_lower && has_upper && !(first_upper && rest_lower) {
            return true;
        }

        // Issue/ticket id pattern: prefix-digits (bd-123, JIRA-456).
        if let Some((prefix, suffix)) = s.rsplit_once('-')
            && !prefix.is_empty()
            && !suffix.is_empty()
            && suffix.chars().all(|c| c.is_ascii_digit())
            && prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return true;
        }

        false
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier => write!(f, "identifier"),
            Self::ShortKeyword => write!(f, "short_keyword"),
            Self::NaturalLanguage => write!(f, "natural_language"),
        }
    }
}

/// Maps queries to one bucket per [`QueryKind`].
///
/// Cluster ids are the `Display` forms of the kind, so snapshots stay
/// readable.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryKindClusterer;

impl QueryClusterer for QueryKindClusterer {
    fn cluster(&self, query: &str) -> String {
        QueryKind::classify(query).to_string()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    // ── Global ──────────────────────────────────────────────────────────

    #[test]
    fn global_clusterer_is_constant() {
        let clusterer = GlobalClusterer;
        assert_eq!(clusterer.cluster(""), GLOBAL_CLUSTER);
        assert_eq!(clusterer.cluster("how does mmr work?"), GLOBAL_CLUSTER);
        assert_eq!(clusterer.cluster("src/main.rs"), GLOBAL_CLUSTER);
    }

    // ── Identifier ──────────────────────────────────────────────────────

    #[test]
    fn classify_file_path() {
        assert_eq!(QueryKind::classify("src/main.rs"), QueryKind::Identifier);
        assert_eq!(
            QueryKind::classify("path\\to\\file.txt"),
            QueryKind::Identifier
        );
    }

    #[test]
    fn classify_module_path_and_dotted_name() {
        assert_eq!(
            QueryKind::classify("std::collections::HashMap"),
            QueryKind::Identifier
        );
        assert_eq!(QueryKind::classify("config.toml"), QueryKind::Identifier);
    }

    #[test]
    fn classify_snake_and_camel_case() {
        assert_eq!(QueryKind::classify("max_entries"), QueryKind::Identifier);
        assert_eq!(QueryKind::classify("minSourceOverlap"), QueryKind::Identifier);
    }

    #[test]
    fn classify_issue_id() {
        assert_eq!(QueryKind::classify("bd-123"), QueryKind::Identifier);
        assert_eq!(QueryKind::classify("JIRA-456"), QueryKind::Identifier);
        assert_eq!(QueryKind::classify("my-project-789"), QueryKind::Identifier);
    }

    #[test]
    fn capitalized_word_is_not_identifier() {
        assert_eq!(QueryKind::classify("Rust"), QueryKind::ShortKeyword);
    }

    #[test]
    fn hyphenated_keywords_are_not_ids() {
        assert_eq!(
            QueryKind::classify("error-handling"),
            QueryKind::ShortKeyword
        );
        assert_eq!(QueryKind::classify("bd-ab"), QueryKind::ShortKeyword);
    }

    // ── Short keyword and natural language ──────────────────────────────

    #[test]
    fn classify_empty_as_short_keyword() {
        assert_eq!(QueryKind::classify(""), QueryKind::ShortKeyword);
        assert_eq!(QueryKind::classify("   "), QueryKind::ShortKeyword);
    }

    #[test]
    fn classify_keyword_queries() {
        assert_eq!(QueryKind::classify("search"), QueryKind::ShortKeyword);
        assert_eq!(
            QueryKind::classify("vector index search"),
            QueryKind::ShortKeyword
        );
    }

    #[test]
    fn classify_questions() {
        assert_eq!(
            QueryKind::classify("how does the cache decide on a hit?"),
            QueryKind::NaturalLanguage
        );
        assert_eq!(
            QueryKind::classify("find all notes about distributed consensus"),
            QueryKind::NaturalLanguage
        );
    }

    // ── Clusterer mapping ───────────────────────────────────────────────

    #[test]
    fn kind_clusterer_uses_display_ids() {
        let clusterer = QueryKindClusterer;
        assert_eq!(clusterer.cluster("bd-123"), "identifier");
        assert_eq!(clusterer.cluster("error handling"), "short_keyword");
        assert_eq!(
            clusterer.cluster("why is the sky blue at noon?"),
            "natural_language"
        );
    }

    #[test]
    fn display_all_variants() {
        assert_eq!(QueryKind::Identifier.to_string(), "identifier");
        assert_eq!(QueryKind::ShortKeyword.to_string(), "short_keyword");
        assert_eq!(QueryKind::NaturalLanguage.to_string(), "natural_language");
    }

    #[test]
    fn serialization_roundtrip() {
        for kind in [
            QueryKind::Identifier,
            QueryKind::ShortKeyword,
            QueryKind::NaturalLanguage,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            let decoded: QueryKind = serde_json::from_str(&json).unwrap();
            assert_eq!(decoded, kind);
        }
    }

    // ── Property Invariants ─────────────────────────────────────────────

    proptest! {
        #[test]
        fn classify_is_trim_invariant(query in ".{0,128}") {
            prop_assert_eq!(
                QueryKind::classify(&query),
                QueryKind::classify(query.trim()),
            );
        }

        #[test]
        fn clustering_is_deterministic_and_total(query in ".{0,128}") {
            let clusterer = QueryKindClusterer;
            let first = clusterer.cluster(&query);
            let second = clusterer.cluster(&query);

            prop_assert_eq!(&first, &second);
            prop_assert!(!first.is_empty());
        }
    }
}
