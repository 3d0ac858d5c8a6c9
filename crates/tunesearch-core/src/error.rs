/// Unified error type for the tunesearch feedback loop.
///
/// The loop is deliberately forgiving at runtime: attribution misses, absent
/// context records, and empty retrievals are ordinary outcomes handled inline
/// (skip the optimization, keep serving), not errors. What remains fallible
/// is the edge of the system: configuration validation, snapshot
/// encode/decode, and operating-system resources at startup. Every variant
/// carries an actionable message guiding the consumer toward resolution.
#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    // === Configuration errors ===
    /// A configuration value is invalid.
    #[error("Invalid config: {field} = \"{value}\" ({reason})")]
    InvalidConfig {
        /// Which config field.
        field: String,
        /// The invalid value.
        value: String,
        /// Why it is invalid.
        reason: String,
    },

    // === Snapshot errors ===
    /// A state snapshot could not be serialized.
    #[error("Snapshot encode failed: {source}. In-memory state is unaffected.")]
    SnapshotEncode {
        /// The underlying serialization error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A state snapshot could not be parsed, or does not match the
    /// configured arm menu.
    #[error("Snapshot decode failed: {reason}. In-memory state is left unchanged.")]
    SnapshotDecode {
        /// What was wrong with the snapshot.
        reason: String,
    },

    // === I/O errors ===
    /// Wraps `std::io::Error` (e.g., the delivery thread could not be
    /// spawned at startup).
    #[error("I/O error: {0}. Check process resource limits.")]
    Io(#[from] std::io::Error),
}

impl FeedbackError {
    /// Shorthand constructor for [`FeedbackError::InvalidConfig`].
    #[must_use]
    pub fn invalid_config(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the tunesearch crate hierarchy.
pub type FeedbackResult<T> = Result<T, FeedbackError>;
