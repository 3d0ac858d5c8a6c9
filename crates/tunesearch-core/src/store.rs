//! In-memory [`ContextStore`] for hosts without their own record of
//! answered queries.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::trace;

use crate::traits::ContextStore;
use crate::types::QueryContext;

/// Map-backed context store.
///
/// Thread-safe and unbounded. Hosts that persist contexts elsewhere should
/// implement [`ContextStore`] over their own storage instead; this type
/// exists for tests, demos, and small deployments.
#[derive(Debug, Default)]
pub struct MemoryContextStore {
    records: RwLock<HashMap<String, QueryContext>>,
}

impl MemoryContextStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read_records(&self) -> RwLockReadGuard<'_, HashMap<String, QueryContext>> {
        match self.records.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_records(&self) -> RwLockWriteGuard<'_, HashMap<String, QueryContext>> {
        match self.records.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Records the context for `query_id`, replacing any previous record.
    pub fn insert(&self, query_id: impl Into<String>, context: QueryContext) {
        let query_id = query_id.into();
        trace!(
            target: "tunesearch.context",
            query_id = %query_id,
            sources = context.sources.len(),
            "context recorded"
        );
        self.write_records().insert(query_id, context);
    }

    /// Removes the context for `query_id`, returning it if present.
    pub fn remove(&self, query_id: &str) -> Option<QueryContext> {
        self.write_records().remove(query_id)
    }

    /// Number of recorded contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_records().len()
    }

    /// True when nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_records().is_empty()
    }
}

impl ContextStore for MemoryContextStore {
    fn get(&self, query_id: &str) -> Option<QueryContext> {
        self.read_records().get(query_id).cloned()
    }
}
